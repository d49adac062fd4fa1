//! Call controller error types.
//!
//! Each variant maps to a fixed HTTP status; the response body is the
//! `{error, details, status}` envelope from `signal-protocol`. Identifier
//! context travels in `details`, never interpolated into the message, so
//! clients can branch without parsing prose.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use signal_protocol::ApiError;
use thiserror::Error;

/// Relay error taxonomy.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No call with the given ID exists.
    #[error("Invalid call ID")]
    CallNotFound { call_id: String },

    /// No connection with the given ID exists within the call.
    #[error("Invalid connection ID")]
    ConnectionNotFound { connection_id: String },

    /// Malformed request body.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The media subsystem never resolved a request within budget.
    #[error("Media subsystem did not respond in time")]
    UpstreamTimeout,

    /// The connection was evicted or its channel detached while a request
    /// was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The media subsystem resolved a request with an error.
    #[error("Media subsystem error")]
    Upstream(String),

    /// Push channel failed to open or validate.
    #[error("Push channel error: {0}")]
    Transport(String),

    /// Internal error (actor channel failures and the like).
    #[error("Internal error")]
    Internal(String),
}

impl RelayError {
    /// The fixed HTTP status for this error kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::CallNotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::ConnectionNotFound { .. } | RelayError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::ConnectionClosed => StatusCode::GONE,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Transport(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Structured context for the error envelope.
    ///
    /// Internal detail (transport failures, upstream error text) is logged
    /// at the site that produced it and not echoed back to clients.
    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            RelayError::CallNotFound { call_id } => json!({ "callId": call_id }),
            RelayError::ConnectionNotFound { connection_id } => {
                json!({ "connectionId": connection_id })
            }
            RelayError::Validation(reason) => json!({ "reason": reason }),
            RelayError::UpstreamTimeout
            | RelayError::ConnectionClosed
            | RelayError::Upstream(_)
            | RelayError::Transport(_)
            | RelayError::Internal(_) => Value::Null,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiError {
            error: self.to_string(),
            details: self.details(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::CallNotFound {
                call_id: "c1".to_string()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::ConnectionNotFound {
                connection_id: "k1".to_string()
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Validation("missing field".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(RelayError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(RelayError::ConnectionClosed.status(), StatusCode::GONE);
        assert_eq!(
            RelayError::Upstream("errback".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::Internal("channel".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_details_carry_identifiers() {
        let err = RelayError::ConnectionNotFound {
            connection_id: "bogus".to_string(),
        };
        assert_eq!(err.details()["connectionId"], "bogus");

        let err = RelayError::CallNotFound {
            call_id: "c1".to_string(),
        };
        assert_eq!(err.details()["callId"], "c1");
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = RelayError::Internal("mpsc channel closed at registry".to_string());
        assert_eq!(err.to_string(), "Internal error");
        assert_eq!(err.details(), Value::Null);

        let err = RelayError::Upstream("ICE failure at 10.0.0.7".to_string());
        assert!(!err.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn test_error_messages_match_wire_contract() {
        let err = RelayError::CallNotFound {
            call_id: "c1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid call ID");

        let err = RelayError::ConnectionNotFound {
            connection_id: "bogus".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid connection ID");
    }
}
