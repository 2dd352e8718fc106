use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use agora_gateway::GatewayError;
use agora_types::api::ErrorBody;

/// An HTTP rejection rendered as a JSON `ErrorBody`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    required: Option<i64>,
    current: Option<i64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            required: None,
            current: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Logs the cause; clients only see a generic message.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!("Internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthenticated => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            GatewayError::InsufficientReputation { required, current, .. } => Self {
                status: StatusCode::FORBIDDEN,
                message: err.to_string(),
                required: Some(required),
                current: Some(current),
            },
            GatewayError::EmptyMessage => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            GatewayError::ShuttingDown => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            GatewayError::TransportClosed
            | GatewayError::DuplicateConnection(_)
            | GatewayError::Store(_)
            | GatewayError::Join(_) => Self::internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.status.as_u16(),
            message: self.message,
            required: self.required,
            current: self.current,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::RoomTier;

    #[test]
    fn test_gateway_error_statuses() {
        let cases = [
            (GatewayError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (GatewayError::insufficient(RoomTier::Gold, 20), StatusCode::FORBIDDEN),
            (GatewayError::EmptyMessage, StatusCode::BAD_REQUEST),
            (GatewayError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (GatewayError::Store(anyhow::anyhow!("disk full")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_reputation_gap_is_carried() {
        let err = ApiError::from(GatewayError::insufficient(RoomTier::Diamond, 150));
        assert_eq!(err.required, Some(1000));
        assert_eq!(err.current, Some(150));

        let internal = ApiError::from(GatewayError::Store(anyhow::anyhow!("secret path /var/db")));
        assert_eq!(internal.message, "internal server error");
    }
}
