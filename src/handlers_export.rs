use serde::Deserialize;
use warp::{reject, Filter, Rejection, Reply};

use crate::archive;
use crate::compositor::WatermarkConfig;
use crate::db::{Collection, Photo, WatermarkConfigRecord};
use crate::export::{self, ExportArchive, ExportContext, ExportRequest};
use crate::export_error::ExportError;
use crate::handlers_collections::load_owned_collection;
use crate::handlers_watermark::require_watermark_config;
use crate::paging::{ExportMode, ExportPlan, PageRequest};
use crate::warp_helpers::{with_context, with_identity, CallerId};

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub batch: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub chunk: Option<i64>,
    pub total_chunks: Option<i64>,
}

fn required(value: Option<i64>, name: &str) -> Result<i64, ExportError> {
    value.ok_or_else(|| ExportError::BadRequest(format!("Missing required parameter: {}", name)))
}

/// Loading stage shared by both URL conventions: collection, config and the
/// capped photo list, in that order.
async fn load_export_inputs(
    ctx: &ExportContext,
    collection_id: &str,
    caller: &CallerId,
) -> Result<(Collection, WatermarkConfig, Vec<Photo>), ExportError> {
    let collection = load_owned_collection(ctx, collection_id, caller).await?;
    let config = require_watermark_config(ctx, &collection.id).await?;
    let photos = Photo::list_ordered(
        &ctx.db_pool,
        &collection.id,
        ctx.settings.max_export_photos as i64,
    )
    .await?;
    Ok((collection, config, photos))
}

fn archive_reply(archive: ExportArchive) -> impl Reply {
    let succeeded = archive.report.succeeded.to_string();
    let failed = archive.report.failed.to_string();
    let disposition = archive::content_disposition(&archive.filename);

    let reply = warp::reply::with_header(archive.bytes, "content-type", "application/zip");
    let reply = warp::reply::with_header(reply, "content-disposition", disposition);
    let reply = warp::reply::with_header(
        reply,
        "cache-control",
        "no-cache, no-store, must-revalidate",
    );
    let reply = warp::reply::with_header(reply, "x-export-succeeded", succeeded);
    warp::reply::with_header(reply, "x-export-failed", failed)
}

async fn export_batch(
    ctx: &ExportContext,
    collection_id: &str,
    caller: &CallerId,
    query: BatchQuery,
) -> Result<ExportArchive, ExportError> {
    let (collection, config, photos) = load_export_inputs(ctx, collection_id, caller).await?;

    let batch = required(query.batch, "batch")?;
    let size = PageRequest::page_size(query.size, ctx.page_size(ExportMode::Batch))?;
    let page = PageRequest::from_batch(batch, size, photos.len())?;

    export::run_export(
        ctx,
        ExportRequest {
            collection: &collection,
            config: &config,
            photos: &photos,
            page,
            mode: ExportMode::Batch,
            client_total_chunks: None,
        },
    )
    .await
}

async fn export_chunk(
    ctx: &ExportContext,
    collection_id: &str,
    caller: &CallerId,
    query: ChunkQuery,
) -> Result<ExportArchive, ExportError> {
    let (collection, config, photos) = load_export_inputs(ctx, collection_id, caller).await?;

    let chunk = required(query.chunk, "chunk")?;
    let size = ctx.page_size(ExportMode::Chunk);
    let page = PageRequest::from_chunk(chunk, size, photos.len())?;

    export::run_export(
        ctx,
        ExportRequest {
            collection: &collection,
            config: &config,
            photos: &photos,
            page,
            mode: ExportMode::Chunk,
            client_total_chunks: query.total_chunks,
        },
    )
    .await
}

/// GET /collections/{id}/download?batch=N&size=S
pub async fn download_batch(
    collection_id: String,
    caller: CallerId,
    query: BatchQuery,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let archive = export_batch(&ctx, &collection_id, &caller, query)
        .await
        .map_err(reject::custom)?;
    Ok(archive_reply(archive))
}

/// GET /collections/{id}/chunked-download?chunk=N&totalChunks=T
pub async fn download_chunk(
    collection_id: String,
    caller: CallerId,
    query: ChunkQuery,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let archive = export_chunk(&ctx, &collection_id, &caller, query)
        .await
        .map_err(reject::custom)?;
    Ok(archive_reply(archive))
}

/// Paging plan without touching any image.
pub async fn export_size(
    collection_id: String,
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let stored = Photo::count_in_collection(&ctx.db_pool, &collection.id)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;
    let has_config = WatermarkConfigRecord::find_for_collection(&ctx.db_pool, &collection.id)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?
        .is_some();

    let plan = ExportPlan::new(
        stored.max(0) as usize,
        ctx.page_size(ExportMode::Chunk),
        ctx.settings.max_export_photos,
        has_config,
    );
    Ok(warp::reply::json(&plan))
}

pub fn build_export_routes(
    ctx: ExportContext,
    identity_header: String,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let download = warp::path!("collections" / String / "download")
        .and(warp::get())
        .and(with_identity(identity_header.clone()))
        .and(warp::query::<BatchQuery>())
        .and(with_context(ctx.clone()))
        .and_then(download_batch);

    let chunked = warp::path!("collections" / String / "chunked-download")
        .and(warp::get())
        .and(with_identity(identity_header.clone()))
        .and(warp::query::<ChunkQuery>())
        .and(with_context(ctx.clone()))
        .and_then(download_chunk);

    let size = warp::path!("collections" / String / "size")
        .and(warp::get())
        .and(with_identity(identity_header))
        .and(with_context(ctx))
        .and_then(export_size);

    download.or(chunked).or(size)
}
