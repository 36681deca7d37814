use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use std::fmt;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalError(String),
    ValidationError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        };

        let message = self.to_string();

        match self {
            ApiError::InternalError(_) | ApiError::ServiceUnavailable(_) => {
                error!("{}", message)
            }
            _ => tracing::warn!("{}", message),
        }

        HttpResponse::build(status).json(json!({
            "error": error_type,
            "message": message,
            "status_code": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

impl From<crate::StreamError> for ApiError {
    fn from(err: crate::StreamError) -> Self {
        match err {
            crate::StreamError::SessionNotFound(msg) => ApiError::NotFound(msg),
            crate::StreamError::CameraNotFound(msg) => {
                ApiError::NotFound(format!("Camera not found: {}", msg))
            }
            crate::StreamError::Launch { camera_id, .. } => ApiError::ServiceUnavailable(
                format!("could not start stream for camera {}", camera_id),
            ),
            crate::StreamError::SessionLimit(limit) => ApiError::ServiceUnavailable(
                format!("session limit reached ({} active)", limit),
            ),
            crate::StreamError::ConfigError(msg) => ApiError::BadRequest(msg),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::ValidationError("test".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::ServiceUnavailable("test".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_launch_error_maps_to_clear_message() {
        let err = crate::StreamError::Launch {
            camera_id: "cam1".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no ffmpeg"),
        };
        let api_error: ApiError = err.into();
        assert!(matches!(api_error, ApiError::ServiceUnavailable(_)));
        assert!(api_error.to_string().contains("could not start stream"));
    }

    #[test]
    fn test_session_not_found_maps_to_404() {
        let err = crate::StreamError::SessionNotFound("cam1".to_string());
        let api_error: ApiError = err.into();
        assert!(matches!(api_error, ApiError::NotFound(_)));
    }
}
