use std::convert::Infallible;

use warp::{Filter, Rejection, Reply};

use crate::export::ExportContext;
use crate::handlers_collections::build_collection_routes;
use crate::handlers_export::build_export_routes;
use crate::handlers_health::build_health_routes;
use crate::handlers_watermark::build_watermark_routes;
use crate::warp_helpers::{cors, handle_rejection};

/// All HTTP routes, without rejection recovery.
pub fn build_api_routes(
    ctx: ExportContext,
    identity_header: String,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    build_health_routes(ctx.clone())
        .or(build_export_routes(ctx.clone(), identity_header.clone()))
        .or(build_watermark_routes(ctx.clone(), identity_header.clone()))
        .or(build_collection_routes(ctx, identity_header))
}

/// Routes with CORS, request logging and JSON error bodies.
pub fn build_app(
    ctx: ExportContext,
    identity_header: String,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    build_api_routes(ctx, identity_header)
        .with(cors())
        .with(warp::log("watermark_export"))
        .recover(handle_rejection)
}
