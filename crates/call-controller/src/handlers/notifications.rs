//! Push gateway: the long-lived duplex channel per connection.
//!
//! Opened at `/notifications?callId=...&connectionId=...` after REST
//! admission. The identifier pair is validated against the registry before
//! the upgrade - a failed validation rejects the request outright, so there
//! is never a partial attach.
//!
//! Outbound, the socket drains the frames the call actor pushes (media
//! events, then a closing frame on server-initiated shutdown). Inbound,
//! only `relayedMessage` envelopes are consumed - they carry a media
//! notification from the far end and are forwarded fire-and-forget. Every
//! other inbound shape is logged and ignored; nothing a client sends can
//! crash the channel.
//!
//! On close by either side, the channel detaches unconditionally. The
//! attachment's sequence number makes the detach a no-op when a newer
//! channel has already superseded this one.

use crate::actors::CallActorHandle;
use crate::errors::RelayError;
use crate::routes::AppState;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use signal_protocol::PushFrame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    pub call_id: String,
    pub connection_id: String,
}

/// Upgrade handler for the push channel.
///
/// GET /notifications?callId=...&connectionId=...
pub async fn notifications(
    ws: WebSocketUpgrade,
    Query(query): Query<NotificationsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Validate the identifier pair before upgrading: no partial attach.
    let call = match state.registry.get_call(query.call_id.clone()).await {
        Ok(call) => call,
        Err(err) => return err.into_response(),
    };

    let known = match call.status().await {
        Ok(status) => status
            .connections
            .iter()
            .any(|conn| conn.connection_id == query.connection_id),
        Err(err) => return err.into_response(),
    };
    if !known {
        return RelayError::ConnectionNotFound {
            connection_id: query.connection_id,
        }
        .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, call, query.connection_id))
}

async fn handle_socket(mut socket: WebSocket, call: CallActorHandle, connection_id: String) {
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<PushFrame>();

    // The connection may have been evicted between validation and upgrade.
    let channel_seq = match call.attach_channel(connection_id.clone(), frame_tx).await {
        Ok(seq) => seq,
        Err(err) => {
            warn!(
                target: "gp.gateway",
                call_id = %call.call_id(),
                connection_id = %connection_id,
                error = %err,
                "Push channel rejected"
            );
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: err.to_string().into(),
                })))
                .await;
            return;
        }
    };

    debug!(
        target: "gp.gateway",
        call_id = %call.call_id(),
        connection_id = %connection_id,
        "Push channel open"
    );

    loop {
        tokio::select! {
            outbound = frame_rx.recv() => {
                match outbound {
                    Some(PushFrame::Closing { reason }) => {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    Some(frame) => {
                        let encoded = match frame.encode() {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                warn!(
                                    target: "gp.gateway",
                                    connection_id = %connection_id,
                                    error = %e,
                                    "Outbound frame failed to encode, dropped"
                                );
                                continue;
                            }
                        };
                        if socket.send(Message::Text(encoded)).await.is_err() {
                            break;
                        }
                    }
                    // Call actor dropped the sender (actor stopped).
                    None => break,
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(raw))) => {
                        handle_inbound(&call, &connection_id, &raw).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(
                            target: "gp.gateway",
                            connection_id = %connection_id,
                            "Binary frame ignored"
                        );
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        let err = RelayError::Transport(e.to_string());
                        debug!(
                            target: "gp.gateway",
                            connection_id = %connection_id,
                            error = %err,
                            "Push channel transport error"
                        );
                        break;
                    }
                }
            }
        }
    }

    // Unconditional detach wakes any requests still pending for this
    // connection; the sequence guard protects a superseding channel.
    call.detach_channel(connection_id.clone(), channel_seq).await;

    debug!(
        target: "gp.gateway",
        call_id = %call.call_id(),
        connection_id = %connection_id,
        "Push channel closed"
    );
}

/// Dispatch one inbound frame. Only `relayedMessage` is consumed.
async fn handle_inbound(call: &CallActorHandle, connection_id: &str, raw: &str) {
    match PushFrame::decode(raw) {
        Ok(PushFrame::RelayedMessage(payload)) => {
            if let Err(e) = call
                .route_notification(connection_id.to_string(), payload)
                .await
            {
                warn!(
                    target: "gp.gateway",
                    connection_id = %connection_id,
                    error = %e,
                    "Relayed message not forwarded"
                );
            }
        }
        Ok(other) => {
            warn!(
                target: "gp.gateway",
                connection_id = %connection_id,
                frame = ?other,
                "Unsupported inbound frame ignored"
            );
        }
        Err(e) => {
            warn!(
                target: "gp.gateway",
                connection_id = %connection_id,
                error = %e,
                "Undecodable inbound frame ignored"
            );
        }
    }
}
