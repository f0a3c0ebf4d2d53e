use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use warp::{reject, Filter, Rejection, Reply};

use crate::config::ExportSettings;
use crate::export::ExportContext;
use crate::export_error::ExportError;
use crate::warp_helpers::with_context;

/// Export limits a client needs to plan paged downloads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLimits {
    pub batch_size: usize,
    pub batch_concurrency: usize,
    pub chunk_size: usize,
    pub chunk_concurrency: usize,
    pub max_export_photos: usize,
    pub fetch_timeout_ms: u64,
    pub fetch_max_attempts: u32,
    pub request_budget_secs: u64,
}

impl From<&ExportSettings> for ExportLimits {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            batch_concurrency: settings.batch_concurrency,
            chunk_size: settings.chunk_size,
            chunk_concurrency: settings.chunk_concurrency,
            max_export_photos: settings.max_export_photos,
            fetch_timeout_ms: u64::try_from(settings.fetch_timeout.as_millis()).unwrap_or(u64::MAX),
            fetch_max_attempts: settings.fetch_max_attempts,
            request_budget_secs: settings.request_budget.as_secs(),
        }
    }
}

pub async fn health_check() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Ready once the store answers; also reports the active export limits.
pub async fn ready_check(ctx: ExportContext) -> Result<impl Reply, Rejection> {
    if let Err(e) = sqlx::query("SELECT 1").execute(&ctx.db_pool).await {
        log::error!("Database connection failed: {}", e);
        return Err(reject::custom(ExportError::Database(e)));
    }

    Ok(warp::reply::json(&json!({
        "status": "ready",
        "database": "connected",
        "export": ExportLimits::from(&ctx.settings),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub fn build_health_routes(
    ctx: ExportContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path!("health").and(warp::get()).and_then(health_check);

    let ready = warp::path!("ready")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(ready_check);

    health.or(ready)
}
