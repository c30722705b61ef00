use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid admin token")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    axis: Option<&'a str>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        use EngineError::*;
        match self {
            ApiError::Engine(e) => match e {
                Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                LimitExceeded(_) => (StatusCode::BAD_REQUEST, "limit_exceeded"),
                Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
                Duplicate { .. } => (StatusCode::CONFLICT, "duplicate"),
                AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
                NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StationNotFound(_) => (StatusCode::NOT_FOUND, "station_not_found"),
                Busy(_) => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
                WalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let axis = match &self {
            ApiError::Engine(EngineError::Conflict { axis, .. }) => Some(axis.as_str()),
            ApiError::Engine(EngineError::Duplicate { .. }) => Some("station"),
            _ => None,
        };
        let error = if status.is_server_error() {
            warn!("request failed: {self}");
            match &self {
                ApiError::Engine(EngineError::Busy(_)) => self.to_string(),
                _ => "internal error".to_string(),
            }
        } else {
            debug!("request rejected ({code}): {self}");
            self.to_string()
        };
        (status, Json(ErrorBody { error, code, axis })).into_response()
    }
}
