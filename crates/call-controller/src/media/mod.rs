//! Media subsystem adapter seam.
//!
//! The SFU that does the actual audio routing is an external collaborator.
//! The controller sees it only through this interface: submit a correlated
//! request or a fire-and-forget notification, and consume a per-call event
//! stream that carries both request resolutions and unsolicited events.
//!
//! Events flow over an unbounded channel: the adapter must never be able to
//! block behind a slow call actor, and the actor drains its stream on every
//! loop iteration.

pub mod loopback;

pub use loopback::LoopbackMediaBackend;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media adapter failure.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The session was released or its event stream is gone.
    #[error("media session closed")]
    SessionClosed,

    /// Transport-level failure talking to the media subsystem.
    #[error("media transport failure: {0}")]
    Transport(String),
}

/// An event emitted by the media subsystem for one call.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// Resolution of a previously submitted request.
    Resolved {
        request_id: u64,
        result: Result<Value, String>,
    },

    /// Unsolicited event targeted at one connection (peer joined, consumer
    /// added, peer closed, ...). The payload stays opaque.
    Notify {
        connection_id: String,
        payload: Value,
    },
}

/// One call's session inside the media subsystem.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Submit a correlated request. The resolution arrives later on the
    /// session's event stream, tagged with `request_id`.
    async fn send(
        &self,
        request_id: u64,
        connection_id: &str,
        payload: Value,
    ) -> Result<(), MediaError>;

    /// Submit a fire-and-forget notification.
    async fn notify(&self, connection_id: &str, payload: Value) -> Result<(), MediaError>;

    /// Release the session. Idempotent, best-effort.
    async fn close(&self);
}

/// Factory for per-call media sessions.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Create the media session for a new call, along with the event
    /// stream the call actor will drain.
    async fn create_session(&self, call_id: &str) -> Result<MediaSessionHandle, MediaError>;
}

/// A created session plus its event stream.
pub struct MediaSessionHandle {
    pub session: Arc<dyn MediaSession>,
    pub events: mpsc::UnboundedReceiver<MediaEvent>,
}
