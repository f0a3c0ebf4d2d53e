use log::info;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{reject, Filter, Rejection, Reply};

use crate::db::{Collection, CollectionRecord, Photo, Watermark};
use crate::export::ExportContext;
use crate::export_error::ExportError;
use crate::warp_helpers::{with_context, with_identity, CallerId};

/// Listing view of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub id: String,
    pub name: String,
    pub photo_count: i64,
    pub has_watermark_config: bool,
}

impl CollectionSummary {
    pub fn project(record: &CollectionRecord) -> Self {
        Self {
            id: record.collection.id.clone(),
            name: record.collection.name.clone(),
            photo_count: record.photo_count,
            has_watermark_config: record.has_watermark_config,
        }
    }
}

/// Detail view: the summary plus photos in export order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub summary: CollectionSummary,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub photos: Vec<Photo>,
}

impl CollectionDetail {
    pub fn project(record: &CollectionRecord, photos: Vec<Photo>) -> Self {
        Self {
            summary: CollectionSummary::project(record),
            created_at: record.collection.created_at,
            photos,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddPhotoRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWatermarkRequest {
    pub url: String,
}

/// Loads a collection owned by `caller`. Foreign collections look missing.
pub async fn load_owned_collection(
    ctx: &ExportContext,
    collection_id: &str,
    caller: &CallerId,
) -> Result<Collection, ExportError> {
    Collection::find_for_owner(&ctx.db_pool, collection_id, caller.as_str())
        .await?
        .ok_or_else(|| ExportError::NotFound("Collection not found".to_string()))
}

fn validate_url(url: &str) -> Result<String, ExportError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(ExportError::BadRequest(
            "url must be an absolute http(s) URL".to_string(),
        ))
    }
}

pub async fn list_collections(
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let records = Collection::list_for_owner(&ctx.db_pool, caller.as_str())
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;

    let summaries: Vec<CollectionSummary> =
        records.iter().map(CollectionSummary::project).collect();
    Ok(warp::reply::json(&summaries))
}

pub async fn create_collection(
    caller: CallerId,
    ctx: ExportContext,
    body: CreateCollectionRequest,
) -> Result<impl Reply, Rejection> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(reject::custom(ExportError::BadRequest(
            "name must not be empty".to_string(),
        )));
    }

    let collection = Collection::create(&ctx.db_pool, caller.as_str(), name)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;
    info!("Created collection {} for {}", collection.id, caller.as_str());

    let record = CollectionRecord {
        collection,
        photo_count: 0,
        has_watermark_config: false,
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&CollectionSummary::project(&record)),
        StatusCode::CREATED,
    ))
}

pub async fn get_collection(
    collection_id: String,
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let record = collection
        .load_record(&ctx.db_pool)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;
    let photos = Photo::list_ordered(&ctx.db_pool, &collection.id, i64::MAX)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;

    Ok(warp::reply::json(&CollectionDetail::project(&record, photos)))
}

pub async fn add_photo(
    collection_id: String,
    caller: CallerId,
    ctx: ExportContext,
    body: AddPhotoRequest,
) -> Result<impl Reply, Rejection> {
    let url = validate_url(&body.url).map_err(reject::custom)?;
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let photo = Photo::append(&ctx.db_pool, &collection.id, &url)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;

    Ok(warp::reply::with_status(
        warp::reply::json(&photo),
        StatusCode::CREATED,
    ))
}

pub async fn delete_photo(
    collection_id: String,
    photo_id: String,
    caller: CallerId,
    ctx: ExportContext,
) -> Result<impl Reply, Rejection> {
    let collection = load_owned_collection(&ctx, &collection_id, &caller)
        .await
        .map_err(reject::custom)?;

    let deleted = Photo::delete(&ctx.db_pool, &collection.id, &photo_id)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;
    if !deleted {
        return Err(reject::custom(ExportError::NotFound(
            "Photo not found".to_string(),
        )));
    }

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "deleted": photo_id })),
        StatusCode::OK,
    ))
}

pub async fn create_watermark(
    caller: CallerId,
    ctx: ExportContext,
    body: CreateWatermarkRequest,
) -> Result<impl Reply, Rejection> {
    let url = validate_url(&body.url).map_err(reject::custom)?;

    let watermark = Watermark::create(&ctx.db_pool, caller.as_str(), &url)
        .await
        .map_err(|e| reject::custom(ExportError::from(e)))?;

    Ok(warp::reply::with_status(
        warp::reply::json(&watermark),
        StatusCode::CREATED,
    ))
}

pub fn build_collection_routes(
    ctx: ExportContext,
    identity_header: String,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("collections")
        .and(warp::get())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and_then(list_collections);

    let create = warp::path!("collections")
        .and(warp::post())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and(warp::body::json())
        .and_then(create_collection);

    let detail = warp::path!("collections" / String)
        .and(warp::get())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and_then(get_collection);

    let add = warp::path!("collections" / String / "photos")
        .and(warp::post())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and(warp::body::json())
        .and_then(add_photo);

    let delete = warp::path!("collections" / String / "photos" / String)
        .and(warp::delete())
        .and(with_identity(identity_header.clone()))
        .and(with_context(ctx.clone()))
        .and_then(delete_photo);

    let watermarks = warp::path!("watermarks")
        .and(warp::post())
        .and(with_identity(identity_header))
        .and(with_context(ctx))
        .and(warp::body::json())
        .and_then(create_watermark);

    list.or(create)
        .or(detail)
        .or(add)
        .or(delete)
        .or(watermarks)
}
