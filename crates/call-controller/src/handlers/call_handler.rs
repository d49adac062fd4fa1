//! REST handlers for the call surface.
//!
//! Every handler resolves the call through the registry handle in router
//! state, translates taxonomy errors via `RelayError::into_response`, and
//! wraps success payloads in the `{message, payload}` envelope.

use crate::errors::RelayError;
use crate::handlers::success;
use crate::routes::AppState;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signal_protocol::ApiSuccess;
use std::sync::Arc;
use tracing::debug;

use crate::actors::ConnectionSummary;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Optional display label; not validated.
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCreatedPayload {
    pub call_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub call_id: String,
    pub connection_id: String,
    pub caller_name: Option<String>,
    pub connection_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub connection_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInfoPayload {
    pub call_id: String,
    pub connections: Vec<ConnectionSummary>,
    pub connection_count: usize,
    pub created_at: i64,
}

/// Create a new call.
///
/// POST /call
pub async fn create_call(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiSuccess<CallCreatedPayload>>, RelayError> {
    let call_id = state.registry.create_call().await?;
    metrics::counter!("gp_calls_created_total").increment(1);
    Ok(success("Call created", CallCreatedPayload { call_id }))
}

/// Admit a new connection to a call.
///
/// POST /call/{callId}/connect
pub async fn connect(
    Path(call_id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<ConnectRequest>>,
) -> Result<Json<ApiSuccess<ConnectPayload>>, RelayError> {
    let caller_name = body.and_then(|Json(request)| request.name);

    let call = state.registry.get_call(call_id.clone()).await?;
    let admitted = call.connect(caller_name.clone()).await?;

    Ok(success(
        "Call connection information",
        ConnectPayload {
            call_id,
            connection_id: admitted.connection_id,
            caller_name,
            connection_count: admitted.connection_count,
        },
    ))
}

/// Evict a connection.
///
/// POST /call/{callId}/disconnect/{connectionId}
pub async fn disconnect(
    Path((call_id, connection_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiSuccess<DisconnectPayload>>, RelayError> {
    let call = state.registry.get_call(call_id).await?;

    if !call.disconnect(connection_id.clone()).await? {
        return Err(RelayError::ConnectionNotFound { connection_id });
    }

    Ok(success(
        "Connection disconnected",
        DisconnectPayload { connection_id },
    ))
}

/// Call information.
///
/// GET /call/{callId}
pub async fn call_info(
    Path(call_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiSuccess<CallInfoPayload>>, RelayError> {
    let call = state.registry.get_call(call_id).await?;
    let status = call.status().await?;

    Ok(success(
        "Call information",
        CallInfoPayload {
            call_id: status.call_id,
            connections: status.connections,
            connection_count: status.connection_count,
            created_at: status.created_at,
        },
    ))
}

/// Delete a call.
///
/// DELETE /call/{callId}
pub async fn delete_call(
    Path(call_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiSuccess<CallCreatedPayload>>, RelayError> {
    let call_id = state.registry.delete_call(call_id).await?;
    metrics::counter!("gp_calls_deleted_total").increment(1);
    Ok(success("Call deleted", CallCreatedPayload { call_id }))
}

/// Relay a signaling payload to the media subsystem.
///
/// POST /call/{callId}/message/{connectionId}
///
/// A payload object carrying `"notification": true` is fire-and-forget;
/// everything else is a correlated request whose media response becomes
/// the envelope payload.
pub async fn message(
    Path((call_id, connection_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<ApiSuccess<Value>>, RelayError> {
    let payload = body
        .get("message")
        .cloned()
        .ok_or_else(|| RelayError::Validation("missing 'message' field".to_string()))?;

    let call = state.registry.get_call(call_id).await?;

    let is_notification = payload
        .get("notification")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if is_notification {
        debug!(
            target: "gp.handler.message",
            call_id = %call.call_id(),
            connection_id = %connection_id,
            "Forwarding notification"
        );
        call.route_notification(connection_id, payload).await?;
        metrics::counter!("gp_notifications_relayed_total").increment(1);
        return Ok(success("Notification forwarded", Value::Null));
    }

    let response = call.route_request(connection_id, payload).await?;
    metrics::counter!("gp_requests_relayed_total").increment(1);
    Ok(success("Message response", response))
}
