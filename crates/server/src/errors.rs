use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::types::ErrorBody;
use service::ServiceError;
use thiserror::Error;
use tracing::{debug, error};

/// Service failure rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self(ServiceError::Validation(e.body_text()))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Persistence(_) | ServiceError::StartupLoad(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            debug!(%status, error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody::new(self.0.public_message()))).into_response()
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Load(#[from] ServiceError),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(ApiError(ServiceError::key_required()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError(ServiceError::key_not_found()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(ServiceError::Persistence("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
