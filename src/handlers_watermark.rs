use log::info;
use serde::Deserialize;
use warp::{reject, Filter, Rejection, Reply};

use crate::compositor::{normalize_rotation, Dimensions, Position, WatermarkConfig};
use crate::db::{Photo, Watermark, WatermarkConfigRecord};
use crate::export::{self, ExportContext};
use crate::export_error::ExportError;
use crate::handlers_collections::load_owned_collection;
use crate::warp_helpers::{with_context, with_identity, CallerId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveWatermarkConfigRequest {
    pub watermark_id: String,
    pub position: Position,
    pub dimensions: Dimensions,
    #[serde(default)]
    pub rotation: f64,
}

impl SaveWatermarkConfigRequest {
    /// Checks geometry and returns the request with rotation normalized.
    /// The footprint, rotated or not, must stay within `max_pixels`.
    pub fn validate(mut self, max_pixels: u64) -> Result<Self, ExportError> {
        self.dimensions
            .validate()
            .map_err(|e| ExportError::BadRequest(e.to_string()))?;
        if !self.position.x.is_finite() || !self.position.y.is_finite() {
            return Err(ExportError::BadRequest(
                "position must be finite numbers".to_string(),
            ));
        }
        if !self.rotation.is_finite() {
            return Err(ExportError::BadRequest(
                "rotation must be a finite number".to_string(),
            ));
        }
        self.rotation = normalize_rotation(self.rotation);
        self.dimensions
            .check_area(self.rotation, max_pixels)
            .map_err(|e| ExportError::BadRequest(e.to_string()))?;
        Ok(self)
    }
}

/// Stored placement joined with its watermark, or 404 when none is configured.
pub async fn require_watermark_config(
    ctx: &ExportContext,
    collection_id: &str,
) -> Result<WatermarkConfig, ExportError> {
    WatermarkConfig::load_for_collection(&ctx.db_pool, collection_id)
        .await?
        .ok_or_else(|| {
            ExportError::NotFound("No watermark configured for this collection".to_string())
        })
}

pub async fn save_watermark_config(
    collection_id: String,
    caller: CallerId,
    ctx: ExportContext,
    body: SaveWatermarkConfigRequest,
) -> Result<impl Reply, Rejection> {
    let request = body
        .validate(ctx.settings.max_image_pixels)
        .map_err(reject::custom)?;
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    Watermark::find_for_owner(&ctx.db_pool, &request.watermark_id, caller.as_str())
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?
        .ok_or_else(|| reject::custom(ExportError::NotFound("Watermark not found".to_string())))?;

    let stored = WatermarkConfigRecord {
        collection_id: collection.id.clone(),
        watermark_id: request.watermark_id,
        position_x: request.position.x,
        position_y: request.position.y,
        width: request.dimensions.width,
        height: request.dimensions.height,
        rotation: request.rotation,
        updated_at: None,
    }
    .upsert(&ctx.db_pool)
    .await
    .map_err(|e| reject::custom(ExportError::from(e)))?;

    info!(
        "Saved watermark config for collection {} (watermark {})",
        collection.id, stored.watermark_id
    );
    Ok(warp::reply::json(&stored))
}

pub async fn get_watermark_config(
    collection_id: String,
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let record = WatermarkConfigRecord::find_for_collection(&ctx.db_pool, &collection.id)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?
        .ok_or_else(|| {
            reject::custom(ExportError::NotFound(
                "No watermark configured for this collection".to_string(),
            ))
        })?;

    Ok(warp::reply::json(&record))
}

/// Single watermarked photo at preview quality.
pub async fn preview_photo(
    collection_id: String,
    photo_id: String,
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let photo = Photo::find_in_collection(&ctx.db_pool, &collection.id, &photo_id)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?
        .ok_or_else(|| reject::custom(ExportError::NotFound("Photo not found".to_string())))?;

    let config = require_watermark_config(&ctx, &collection.id)
        .await
        .map_err(reject::custom)?;

    let jpeg = export::render_preview(&ctx, &config, &photo)
        .await
        .map_err(reject::custom)?;

    let filename = format!("watermarked_{}", export::output_name(&photo));
    let reply = warp::reply::with_header(jpeg, "content-type", "image/jpeg");
    let reply = warp::reply::with_header(
        reply,
        "content-disposition",
        crate::archive::content_disposition(&filename),
    );
    let reply = warp::reply::with_header(
        reply,
        "cache-control",
        "no-cache, no-store, must-revalidate",
    );

    Ok(reply)
}

pub fn build_watermark_routes(
    ctx: ExportContext,
    identity_header: String,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let save = warp::path!("collections" / String / "watermark")
        .and(warp::post())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and(warp::body::json())
        .and_then(save_watermark_config);

    let get = warp::path!("collections" / String / "watermark")
        .and(warp::get())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and_then(get_watermark_config);

    let preview = warp::path!("collections" / String / "photos" / String / "watermarked")
        .and(warp::get())
        .and(with_identity(identity_header))
        .and(with_context(ctx))
        .and_then(preview_photo);

    save.or(get).or(preview)
}
