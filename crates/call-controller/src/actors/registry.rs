//! `CallRegistryActor` - singleton supervisor for call actors.
//!
//! The registry is the top-level actor:
//!
//! - Owns the map of live calls, keyed by call ID
//! - Creates each call's media session through the configured backend
//! - Supervises `CallActor` tasks (reaps finished ones)
//! - Owns the root `CancellationToken` for graceful shutdown
//!
//! There is no process-wide singleton: the registry handle is constructed
//! at startup and injected into every HTTP handler through router state.

use crate::actors::call::{CallActor, CallActorHandle};
use crate::actors::messages::{RegistryMessage, RegistryStatus};
use crate::actors::metrics::RelayMetrics;
use crate::config::Config;
use crate::errors::RelayError;
use crate::media::MediaBackend;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How long `deleteCall` waits for a call's teardown before giving up on it.
const CALL_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `CallRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct CallRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl CallRegistryHandle {
    /// Create a new `CallRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        config: &Config,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = CallRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            calls: HashMap::new(),
            backend,
            metrics,
            request_timeout: config.request_timeout(),
            sweep_interval: config.pending_sweep_interval(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Create a new call session, returning its fresh call ID.
    pub async fn create_call(&self) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateCall { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Check whether a call exists.
    pub async fn has_call(&self, call_id: String) -> Result<bool, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::HasCall {
                call_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Get a handle to an existing call.
    pub async fn get_call(&self, call_id: String) -> Result<CallActorHandle, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetCall {
                call_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Delete a call, tearing down its connections and media session.
    ///
    /// Teardown is best-effort: failures are logged, never propagated.
    pub async fn delete_call(&self, call_id: String) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::DeleteCall {
                call_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current registry status.
    pub async fn status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate shutdown of the registry and every call under it.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the registry is shutting down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed call.
struct ManagedCall {
    /// Handle to the call actor.
    handle: CallActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `CallRegistryActor` implementation.
struct CallRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    calls: HashMap<String, ManagedCall>,
    backend: Arc<dyn MediaBackend>,
    metrics: Arc<RelayMetrics>,
    request_timeout: Duration,
    sweep_interval: Duration,
}

impl CallRegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "gp.actor.registry")]
    async fn run(mut self) {
        info!(target: "gp.actor.registry", "CallRegistryActor started");

        loop {
            // Reap call actors that stopped on their own.
            self.check_call_health();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "gp.actor.registry",
                                "CallRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "gp.actor.registry",
            calls = self.calls.len(),
            "CallRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateCall { respond_to } => {
                let result = self.handle_create_call().await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::HasCall {
                call_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.calls.contains_key(&call_id));
            }

            RegistryMessage::GetCall {
                call_id,
                respond_to,
            } => {
                let result = match self.calls.get(&call_id) {
                    Some(managed) => Ok(managed.handle.clone()),
                    None => Err(RelayError::CallNotFound { call_id }),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::DeleteCall {
                call_id,
                respond_to,
            } => {
                let result = self.handle_delete_call(call_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    call_count: self.calls.len(),
                    connection_count: self.metrics.connection_count(),
                });
            }
        }
    }

    /// Create a call: fresh ID, media session, supervised actor.
    async fn handle_create_call(&mut self) -> Result<String, RelayError> {
        let call_id = uuid::Uuid::new_v4().to_string();

        // The media session is created eagerly, one per call.
        let media = self
            .backend
            .create_session(&call_id)
            .await
            .map_err(|e| {
                error!(
                    target: "gp.actor.registry",
                    call_id = %call_id,
                    error = %e,
                    "Media session creation failed"
                );
                RelayError::Internal(format!("media session creation failed: {e}"))
            })?;

        let call_token = self.cancel_token.child_token();
        let (handle, task_handle) = CallActor::spawn(
            call_id.clone(),
            media,
            call_token,
            Arc::clone(&self.metrics),
            self.request_timeout,
            self.sweep_interval,
        );

        self.calls.insert(
            call_id.clone(),
            ManagedCall {
                handle,
                task_handle,
            },
        );
        self.metrics.call_created();

        info!(
            target: "gp.actor.registry",
            call_id = %call_id,
            total_calls = self.calls.len(),
            "Call created"
        );

        Ok(call_id)
    }

    /// Delete a call and wait briefly for its teardown.
    async fn handle_delete_call(&mut self, call_id: String) -> Result<String, RelayError> {
        let Some(managed) = self.calls.remove(&call_id) else {
            return Err(RelayError::CallNotFound { call_id });
        };

        managed.handle.cancel();
        match tokio::time::timeout(CALL_TEARDOWN_TIMEOUT, managed.task_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                // Teardown is best-effort; log and move on.
                warn!(
                    target: "gp.actor.registry",
                    call_id = %call_id,
                    error = ?join_error,
                    "Call actor failed during teardown"
                );
            }
            Err(_elapsed) => {
                warn!(
                    target: "gp.actor.registry",
                    call_id = %call_id,
                    "Call teardown timed out"
                );
            }
        }

        self.metrics.call_removed();

        info!(
            target: "gp.actor.registry",
            call_id = %call_id,
            remaining_calls = self.calls.len(),
            "Call deleted"
        );

        Ok(call_id)
    }

    /// Reap call actors whose tasks finished outside `deleteCall`.
    fn check_call_health(&mut self) {
        let finished: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(call_id, _)| call_id.clone())
            .collect();

        for call_id in finished {
            if self.calls.remove(&call_id).is_some() {
                self.metrics.call_removed();
                debug!(
                    target: "gp.actor.registry",
                    call_id = %call_id,
                    "Reaped finished call actor"
                );
            }
        }
    }

    /// Cancel every call and wait for teardown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "gp.actor.registry",
            calls = self.calls.len(),
            "Registry shutting down"
        );

        for managed in self.calls.values() {
            managed.handle.cancel();
        }

        for (call_id, managed) in self.calls.drain() {
            match tokio::time::timeout(CALL_TEARDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "gp.actor.registry",
                        call_id = %call_id,
                        error = ?e,
                        "Call actor failed during shutdown"
                    );
                }
                Err(_elapsed) => {
                    warn!(
                        target: "gp.actor.registry",
                        call_id = %call_id,
                        "Call shutdown timed out"
                    );
                }
            }
            self.metrics.call_removed();
        }

        info!(target: "gp.actor.registry", "Registry shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::media::LoopbackMediaBackend;
    use signal_protocol::PushFrame;
    use std::collections::HashSet;

    fn test_registry() -> (CallRegistryHandle, Arc<RelayMetrics>) {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let metrics = RelayMetrics::new();
        let handle = CallRegistryHandle::new(
            Arc::new(LoopbackMediaBackend),
            &config,
            Arc::clone(&metrics),
        );
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_created_calls_are_unique_and_visible() {
        let (registry, _metrics) = test_registry();

        let mut ids = HashSet::new();
        for _ in 0..10 {
            let call_id = registry.create_call().await.unwrap();
            assert!(registry.has_call(call_id.clone()).await.unwrap());
            assert!(ids.insert(call_id));
        }
        assert_eq!(ids.len(), 10);

        let status = registry.status().await.unwrap();
        assert_eq!(status.call_count, 10);
    }

    #[tokio::test]
    async fn test_get_missing_call_fails() {
        let (registry, _metrics) = test_registry();

        let result = registry.get_call("nope".to_string()).await;
        assert!(matches!(result, Err(RelayError::CallNotFound { .. })));

        assert!(!registry.has_call("nope".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_call_fails() {
        let (registry, _metrics) = test_registry();

        let result = registry.delete_call("nope".to_string()).await;
        assert!(matches!(result, Err(RelayError::CallNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_call_removes_and_returns_id() {
        let (registry, _metrics) = test_registry();

        let call_id = registry.create_call().await.unwrap();
        let deleted = registry.delete_call(call_id.clone()).await.unwrap();
        assert_eq!(deleted, call_id);

        assert!(!registry.has_call(call_id.clone()).await.unwrap());
        assert!(matches!(
            registry.get_call(call_id).await,
            Err(RelayError::CallNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_call_closes_attached_channels() {
        let (registry, _metrics) = test_registry();

        let call_id = registry.create_call().await.unwrap();
        let call = registry.get_call(call_id.clone()).await.unwrap();
        let admitted = call.connect(Some("Alice".to_string())).await.unwrap();

        let (frame_tx, mut frame_rx) = tokio::sync::mpsc::unbounded_channel();
        call.attach_channel(admitted.connection_id, frame_tx)
            .await
            .unwrap();

        registry.delete_call(call_id).await.unwrap();

        match frame_rx.recv().await.unwrap() {
            PushFrame::Closing { reason } => assert_eq!(reason, "call deleted"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registry_shutdown_tears_down_calls() {
        let (registry, metrics) = test_registry();

        let call_id = registry.create_call().await.unwrap();
        let call = registry.get_call(call_id).await.unwrap();
        call.connect(None).await.unwrap();

        registry.shutdown();
        assert!(registry.is_cancelled());

        // Give teardown a moment to drain.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(metrics.connection_count(), 0);
        assert_eq!(metrics.call_count(), 0);
    }
}
