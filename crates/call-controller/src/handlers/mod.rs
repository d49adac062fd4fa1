//! HTTP-facing handlers: the REST surface and the push gateway.

pub mod call_handler;
pub mod notifications;

use axum::Json;
use serde::Serialize;
use signal_protocol::ApiSuccess;

/// Wrap a payload in the success envelope.
pub(crate) fn success<T: Serialize>(message: &str, payload: T) -> Json<ApiSuccess<T>> {
    Json(ApiSuccess::new(message, payload))
}
