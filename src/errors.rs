use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-time faults surfaced by the query layer.
///
/// Every variant renders as `{"error": <category>, "message": <detail>}`;
/// internal error text never reaches a client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid path format. Use /deployments/{{namespace}}")]
    InvalidPathFormat,
    #[error("Invalid namespace encoding")]
    InvalidNamespaceEncoding,
    #[error("Namespace not being watched: {0}")]
    NamespaceNotWatched(String),
    #[error("The requested endpoint does not exist")]
    EndpointNotFound,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPathFormat | AppError::InvalidNamespaceEncoding => {
                StatusCode::BAD_REQUEST
            }
            AppError::NamespaceNotWatched(_) | AppError::EndpointNotFound => {
                StatusCode::NOT_FOUND
            }
        }
    }

    fn category(&self) -> &'static str {
        match self {
            AppError::EndpointNotFound => "Not Found",
            _ => "Request Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.category(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_the_wire_contract() {
        assert_eq!(
            AppError::InvalidPathFormat.to_string(),
            "Invalid path format. Use /deployments/{namespace}"
        );
        assert_eq!(
            AppError::NamespaceNotWatched("team-a".to_string()).to_string(),
            "Namespace not being watched: team-a"
        );
    }

    #[test]
    fn categories_split_request_errors_from_not_found() {
        assert_eq!(AppError::EndpointNotFound.category(), "Not Found");
        assert_eq!(AppError::InvalidPathFormat.category(), "Request Error");
        assert_eq!(
            AppError::NamespaceNotWatched("x".to_string()).category(),
            "Request Error"
        );
    }
}
