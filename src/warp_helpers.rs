use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use warp::http::{HeaderMap, StatusCode};
use warp::{reject, Filter, Rejection, Reply};

use crate::export::ExportContext;
use crate::export_error::ExportError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub timestamp: String,
}

/// Identity of the caller as asserted by the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn with_context(
    ctx: ExportContext,
) -> impl Filter<Extract = (ExportContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

pub fn caller_from_headers(headers: &HeaderMap, header_name: &str) -> Option<CallerId> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| CallerId(value.to_string()))
}

/// Extracts the caller identity from `header_name`, rejecting with 401 when
/// it is missing or blank.
pub fn with_identity(
    header_name: String,
) -> impl Filter<Extract = (CallerId,), Error = Rejection> + Clone {
    let header_name = Arc::new(header_name);
    warp::header::headers_cloned().and_then(move |headers: HeaderMap| {
        let header_name = header_name.clone();
        async move {
            caller_from_headers(&headers, &header_name)
                .ok_or_else(|| reject::custom(ExportError::Unauthorized))
        }
    })
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;
    let timestamp = chrono::Utc::now().to_rfc3339();

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Not Found".to_string();
    } else if let Some(export_error) = err.find::<ExportError>() {
        code = export_error.status_code();
        message = export_error.public_message();
        if code.is_server_error() {
            log::error!("Request failed: {}", export_error);
        } else {
            log::debug!("Request rejected: {}", export_error);
        }
    } else if let Some(query_error) = err.find::<warp::reject::InvalidQuery>() {
        code = StatusCode::BAD_REQUEST;
        message = format!("Invalid query parameters: {}", query_error);
    } else if let Some(body_error) = err.find::<warp::filters::body::BodyDeserializeError>() {
        code = StatusCode::BAD_REQUEST;
        message = format!("Invalid request body: {}", body_error);
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        code = StatusCode::PAYLOAD_TOO_LARGE;
        message = "Payload too large".to_string();
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        code = StatusCode::UNSUPPORTED_MEDIA_TYPE;
        message = "Unsupported media type".to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let error_response = ErrorResponse {
        error: message,
        code: code.as_u16(),
        timestamp,
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_response),
        code,
    ))
}

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization", "x-user-id"])
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .expose_headers(vec![
            "content-disposition",
            "x-export-succeeded",
            "x-export-failed",
        ])
}
