use thiserror::Error;
use warp::http::StatusCode;
use warp::reject;

use crate::archive::ArchiveError;
use crate::compositor::CompositeError;
use crate::fetcher::FetchError;
use crate::paging::PagingError;

/// Request-level failures. Per-photo failures never become one of these;
/// they end up in the processing report instead.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Paging(#[from] PagingError),
    #[error("Watermark image could not be fetched: {0}")]
    WatermarkUnavailable(FetchError),
    #[error("Watermark image could not be processed: {0}")]
    WatermarkInvalid(CompositeError),
    #[error("All {attempted} photos in this page failed to process")]
    AllPhotosFailed { attempted: usize },
    #[error("Failed to watermark photo: {0}")]
    PhotoFailed(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Failed to build archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl reject::Reject for ExportError {}

impl ExportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExportError::Unauthorized => StatusCode::UNAUTHORIZED,
            ExportError::NotFound(_) => StatusCode::NOT_FOUND,
            ExportError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ExportError::Paging(PagingError::Empty) => StatusCode::NOT_FOUND,
            ExportError::Paging(_) => StatusCode::BAD_REQUEST,
            ExportError::WatermarkUnavailable(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ExportError::WatermarkUnavailable(_) => StatusCode::BAD_GATEWAY,
            ExportError::WatermarkInvalid(_)
            | ExportError::AllPhotosFailed { .. }
            | ExportError::PhotoFailed(_)
            | ExportError::Database(_)
            | ExportError::Archive(_)
            | ExportError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to callers. Storage and archive internals are
    /// logged, not returned.
    pub fn public_message(&self) -> String {
        match self {
            ExportError::Database(_) => "Database error".to_string(),
            ExportError::Archive(_) => "Failed to build archive".to_string(),
            ExportError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
