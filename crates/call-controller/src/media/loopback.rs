//! Loopback media backend.
//!
//! Resolves every request with its own payload and reflects every
//! notification back to the originating connection as an unsolicited
//! event. Stands in for the SFU when none is configured (local
//! development) and backs the test suite.

use super::{MediaBackend, MediaError, MediaEvent, MediaSession, MediaSessionHandle};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Backend producing [`LoopbackSession`]s.
#[derive(Debug, Default, Clone)]
pub struct LoopbackMediaBackend;

struct LoopbackSession {
    call_id: String,
    events: mpsc::UnboundedSender<MediaEvent>,
}

#[async_trait]
impl MediaBackend for LoopbackMediaBackend {
    async fn create_session(&self, call_id: &str) -> Result<MediaSessionHandle, MediaError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        debug!(
            target: "gp.media.loopback",
            call_id = %call_id,
            "Loopback media session created"
        );
        Ok(MediaSessionHandle {
            session: Arc::new(LoopbackSession {
                call_id: call_id.to_string(),
                events: events_tx,
            }),
            events: events_rx,
        })
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    async fn send(
        &self,
        request_id: u64,
        _connection_id: &str,
        payload: Value,
    ) -> Result<(), MediaError> {
        self.events
            .send(MediaEvent::Resolved {
                request_id,
                result: Ok(payload),
            })
            .map_err(|_| MediaError::SessionClosed)
    }

    async fn notify(&self, connection_id: &str, payload: Value) -> Result<(), MediaError> {
        self.events
            .send(MediaEvent::Notify {
                connection_id: connection_id.to_string(),
                payload,
            })
            .map_err(|_| MediaError::SessionClosed)
    }

    async fn close(&self) {
        debug!(
            target: "gp.media.loopback",
            call_id = %self.call_id,
            "Loopback media session closed"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_resolves_with_request_payload() {
        let backend = LoopbackMediaBackend;
        let mut handle = backend.create_session("call-1").await.unwrap();

        handle
            .session
            .send(7, "conn-1", json!({"method": "join"}))
            .await
            .unwrap();

        match handle.events.recv().await.unwrap() {
            MediaEvent::Resolved { request_id, result } => {
                assert_eq!(request_id, 7);
                assert_eq!(result.unwrap(), json!({"method": "join"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notify_echoes_as_event() {
        let backend = LoopbackMediaBackend;
        let mut handle = backend.create_session("call-1").await.unwrap();

        handle
            .session
            .notify("conn-2", json!({"method": "producerPaused"}))
            .await
            .unwrap();

        match handle.events.recv().await.unwrap() {
            MediaEvent::Notify {
                connection_id,
                payload,
            } => {
                assert_eq!(connection_id, "conn-2");
                assert_eq!(payload, json!({"method": "producerPaused"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_session_closed() {
        let backend = LoopbackMediaBackend;
        let handle = backend.create_session("call-1").await.unwrap();
        drop(handle.events);

        let err = handle
            .session
            .send(1, "conn-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SessionClosed));
    }
}
