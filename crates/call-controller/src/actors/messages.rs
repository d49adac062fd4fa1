//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Response patterns use `tokio::sync::oneshot` for
//! request-reply semantics.

use crate::actors::call::CallActorHandle;
use crate::errors::RelayError;

use serde::Serialize;
use serde_json::Value;
use signal_protocol::PushFrame;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `CallRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a new call session.
    CreateCall {
        /// Response channel for the new call's ID.
        respond_to: oneshot::Sender<Result<String, RelayError>>,
    },

    /// Check whether a call exists.
    HasCall {
        call_id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get a handle to an existing call actor.
    GetCall {
        call_id: String,
        respond_to: oneshot::Sender<Result<CallActorHandle, RelayError>>,
    },

    /// Remove a call, tearing down its connections and media session.
    DeleteCall {
        call_id: String,
        /// Response channel for the deleted call's ID.
        respond_to: oneshot::Sender<Result<String, RelayError>>,
    },

    /// Get current registry status (for diagnostics/readiness).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Messages sent to a `CallActor`.
#[derive(Debug)]
pub enum CallMessage {
    /// Admit a new connection to this call.
    Connect {
        caller_name: Option<String>,
        respond_to: oneshot::Sender<ConnectResult>,
    },

    /// Evict a connection. Responds `false` if the ID is unknown; callers
    /// translate that into a client error.
    Disconnect {
        connection_id: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Bind a push channel to a connection (last-attach-wins).
    AttachChannel {
        connection_id: String,
        channel: mpsc::UnboundedSender<PushFrame>,
        /// Response channel for the attachment's sequence number.
        respond_to: oneshot::Sender<Result<u64, RelayError>>,
    },

    /// Clear a connection's push channel. Idempotent; the sequence number
    /// guards against a stale socket detaching its successor.
    DetachChannel {
        connection_id: String,
        channel_seq: u64,
    },

    /// Forward a correlated request to the media subsystem. The sender is
    /// parked in the connection's pending table and woken by resolution,
    /// connection close, or the sweep.
    RouteRequest {
        connection_id: String,
        payload: Value,
        respond_to: oneshot::Sender<Result<Value, RelayError>>,
    },

    /// Forward a fire-and-forget notification to the media subsystem.
    RouteNotification {
        connection_id: String,
        payload: Value,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    },

    /// Get a snapshot of this call (for diagnostics).
    GetStatus {
        respond_to: oneshot::Sender<CallStatus>,
    },
}

/// Result of admitting a connection.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub connection_id: String,
    pub connection_count: usize,
}

/// Connection lifecycle state, as exposed in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Admitted via REST, no push channel bound yet (or channel lost).
    Admitted,
    /// Push channel bound.
    Attached,
}

/// Per-connection summary for diagnostics. Never exposes channel handles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub caller_name: Option<String>,
    pub state: ConnectionState,
}

/// Snapshot of one call.
#[derive(Debug, Clone)]
pub struct CallStatus {
    pub call_id: String,
    pub created_at: i64,
    pub connections: Vec<ConnectionSummary>,
    pub connection_count: usize,
}

/// Snapshot of the registry.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub call_count: usize,
    pub connection_count: usize,
}
