//! `CallActor` - per-call actor that owns call state.
//!
//! Each `CallActor`:
//! - Owns all state for one call (connections, push channels, pending
//!   request tables)
//! - Owns the call's media session handle and drains its event stream
//! - Serializes lifecycle operations, so request-id and channel-sequence
//!   allocation is race-free by construction
//!
//! `routeRequest` callers never suspend inside the actor loop: the actor
//! only parks the caller's oneshot in the connection's pending table and
//! forwards the payload; the caller waits on its own task with a timeout.
//!
//! # Channel loss vs eviction
//!
//! A detached push channel returns the connection to `Admitted` so the
//! client can reattach; only `disconnect` or call deletion removes the
//! connection. Requests pending at either point are woken immediately
//! with `ConnectionClosed` rather than left to time out.

use crate::actors::messages::{
    CallMessage, CallStatus, ConnectResult, ConnectionState, ConnectionSummary,
};
use crate::actors::metrics::RelayMetrics;
use crate::errors::RelayError;
use crate::media::{MediaEvent, MediaSession, MediaSessionHandle};

use serde_json::Value;
use signal_protocol::PushFrame;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the call mailbox.
const CALL_CHANNEL_BUFFER: usize = 200;

/// Slack added to the request budget before the sweep reclaims an entry,
/// so the caller-side timeout always fires first.
const SWEEP_GRACE: Duration = Duration::from_secs(1);

/// Handle to a `CallActor`.
#[derive(Clone, Debug)]
pub struct CallActorHandle {
    sender: mpsc::Sender<CallMessage>,
    cancel_token: CancellationToken,
    call_id: String,
    request_timeout: Duration,
}

impl CallActorHandle {
    /// Get the call ID.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Admit a new connection.
    pub async fn connect(&self, caller_name: Option<String>) -> Result<ConnectResult, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::Connect {
                caller_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Evict a connection. Returns `false` if the ID is unknown.
    pub async fn disconnect(&self, connection_id: String) -> Result<bool, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::Disconnect {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Bind a push channel to a connection (last-attach-wins).
    ///
    /// Returns the attachment's sequence number, which the socket task
    /// passes back on detach so a superseded socket cannot detach its
    /// replacement.
    pub async fn attach_channel(
        &self,
        connection_id: String,
        channel: mpsc::UnboundedSender<PushFrame>,
    ) -> Result<u64, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::AttachChannel {
                connection_id,
                channel,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Clear a connection's push channel. Idempotent; ignores a sequence
    /// number that no longer matches the live attachment.
    pub async fn detach_channel(&self, connection_id: String, channel_seq: u64) {
        // The call may already be gone (deleted); detach is best-effort.
        let _ = self
            .sender
            .send(CallMessage::DetachChannel {
                connection_id,
                channel_seq,
            })
            .await;
    }

    /// Forward a correlated request to the media subsystem and wait for
    /// its resolution, the request budget, or connection close - whichever
    /// comes first.
    pub async fn route_request(
        &self,
        connection_id: String,
        payload: Value,
    ) -> Result<Value, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::RouteRequest {
                connection_id,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RelayError::Internal(format!(
                "response receive failed: {e}"
            ))),
            Err(_elapsed) => Err(RelayError::UpstreamTimeout),
        }
    }

    /// Forward a fire-and-forget notification to the media subsystem.
    pub async fn route_notification(
        &self,
        connection_id: String,
        payload: Value,
    ) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::RouteNotification {
                connection_id,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a snapshot of this call.
    pub async fn status(&self) -> Result<CallStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CallMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the call actor (triggers teardown of every connection).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// State for one participant's membership in the call.
struct Connection {
    connection_id: String,
    caller_name: Option<String>,
    state: ConnectionState,
    /// At most one live push channel; replaced wholesale on attach.
    push: Option<PushChannel>,
    /// Pending correlated requests, keyed by request id.
    pending: HashMap<u64, PendingRequest>,
}

impl Connection {
    fn to_summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            connection_id: self.connection_id.clone(),
            caller_name: self.caller_name.clone(),
            state: self.state,
        }
    }
}

struct PushChannel {
    seq: u64,
    sender: mpsc::UnboundedSender<PushFrame>,
}

struct PendingRequest {
    respond_to: oneshot::Sender<Result<Value, RelayError>>,
    issued_at: Instant,
}

/// The `CallActor` implementation.
pub struct CallActor {
    call_id: String,
    receiver: mpsc::Receiver<CallMessage>,
    cancel_token: CancellationToken,
    connections: HashMap<String, Connection>,
    /// Opaque handle into the media subsystem, one per call.
    session: Arc<dyn MediaSession>,
    /// Event stream from the media subsystem for this call.
    events: mpsc::UnboundedReceiver<MediaEvent>,
    /// Cleared when the media subsystem ends its event stream.
    media_open: bool,
    /// Request id -> connection id, for routing resolutions.
    request_index: HashMap<u64, String>,
    next_request_id: u64,
    next_channel_seq: u64,
    request_timeout: Duration,
    sweep_interval: Duration,
    created_at: i64,
    metrics: Arc<RelayMetrics>,
}

impl CallActor {
    /// Spawn a new call actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        call_id: String,
        media: MediaSessionHandle,
        cancel_token: CancellationToken,
        metrics: Arc<RelayMetrics>,
        request_timeout: Duration,
        sweep_interval: Duration,
    ) -> (CallActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CALL_CHANNEL_BUFFER);

        let actor = Self {
            call_id: call_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            connections: HashMap::new(),
            session: media.session,
            events: media.events,
            media_open: true,
            request_index: HashMap::new(),
            next_request_id: 0,
            next_channel_seq: 0,
            request_timeout,
            sweep_interval,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallActorHandle {
            sender,
            cancel_token,
            call_id,
            request_timeout,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "gp.actor.call", fields(call_id = %self.call_id))]
    async fn run(mut self) {
        debug!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            "CallActor started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick() => {
                    self.sweep_expired_requests();
                }

                event = self.events.recv(), if self.media_open => {
                    match event {
                        Some(event) => self.handle_media_event(event),
                        None => {
                            self.media_open = false;
                            warn!(
                                target: "gp.actor.call",
                                call_id = %self.call_id,
                                "Media event stream ended"
                            );
                        }
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "gp.actor.call",
                                call_id = %self.call_id,
                                "CallActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            connections = self.connections.len(),
            "CallActor stopped"
        );
    }

    async fn handle_message(&mut self, message: CallMessage) {
        match message {
            CallMessage::Connect {
                caller_name,
                respond_to,
            } => {
                let result = self.handle_connect(caller_name);
                let _ = respond_to.send(result);
            }

            CallMessage::Disconnect {
                connection_id,
                respond_to,
            } => {
                let removed = self.handle_disconnect(&connection_id);
                let _ = respond_to.send(removed);
            }

            CallMessage::AttachChannel {
                connection_id,
                channel,
                respond_to,
            } => {
                let result = self.handle_attach(&connection_id, channel);
                let _ = respond_to.send(result);
            }

            CallMessage::DetachChannel {
                connection_id,
                channel_seq,
            } => {
                self.handle_detach(&connection_id, channel_seq);
            }

            CallMessage::RouteRequest {
                connection_id,
                payload,
                respond_to,
            } => {
                self.handle_route_request(connection_id, payload, respond_to)
                    .await;
            }

            CallMessage::RouteNotification {
                connection_id,
                payload,
                respond_to,
            } => {
                self.handle_route_notification(&connection_id, payload, respond_to)
                    .await;
            }

            CallMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn handle_connect(&mut self, caller_name: Option<String>) -> ConnectResult {
        let connection_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            connection_id.clone(),
            Connection {
                connection_id: connection_id.clone(),
                caller_name,
                state: ConnectionState::Admitted,
                push: None,
                pending: HashMap::new(),
            },
        );
        self.metrics.connection_created();

        info!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            connection_id = %connection_id,
            total_connections = self.connections.len(),
            "Connection admitted"
        );

        ConnectResult {
            connection_id,
            connection_count: self.connections.len(),
        }
    }

    fn handle_disconnect(&mut self, connection_id: &str) -> bool {
        match self.connections.remove(connection_id) {
            Some(connection) => {
                self.close_connection(connection, "disconnected");
                self.metrics.connection_closed();
                info!(
                    target: "gp.actor.call",
                    call_id = %self.call_id,
                    connection_id = %connection_id,
                    remaining_connections = self.connections.len(),
                    "Connection evicted"
                );
                true
            }
            None => false,
        }
    }

    fn handle_attach(
        &mut self,
        connection_id: &str,
        channel: mpsc::UnboundedSender<PushFrame>,
    ) -> Result<u64, RelayError> {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return Err(RelayError::ConnectionNotFound {
                connection_id: connection_id.to_string(),
            });
        };

        // Last-attach-wins: close any previous channel first.
        if let Some(old) = connection.push.take() {
            let _ = old.sender.send(PushFrame::Closing {
                reason: "superseded by a new channel".to_string(),
            });
            debug!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                "Previous push channel superseded"
            );
        }

        self.next_channel_seq += 1;
        let seq = self.next_channel_seq;
        connection.push = Some(PushChannel {
            seq,
            sender: channel,
        });
        connection.state = ConnectionState::Attached;

        info!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            connection_id = %connection_id,
            "Push channel attached"
        );

        Ok(seq)
    }

    fn handle_detach(&mut self, connection_id: &str, channel_seq: u64) {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };

        if !connection
            .push
            .as_ref()
            .is_some_and(|push| push.seq == channel_seq)
        {
            // Stale or repeated detach; the live attachment stays.
            return;
        }

        connection.push = None;
        connection.state = ConnectionState::Admitted;

        let woken = Self::abort_pending(
            &mut connection.pending,
            &mut self.request_index,
            &self.metrics,
        );

        info!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            connection_id = %connection_id,
            requests_woken = woken,
            "Push channel detached"
        );
    }

    async fn handle_route_request(
        &mut self,
        connection_id: String,
        payload: Value,
        respond_to: oneshot::Sender<Result<Value, RelayError>>,
    ) {
        if !self.connections.contains_key(&connection_id) {
            let _ = respond_to.send(Err(RelayError::ConnectionNotFound { connection_id }));
            return;
        }

        self.next_request_id += 1;
        let request_id = self.next_request_id;

        if let Err(e) = self
            .session
            .send(request_id, &connection_id, payload)
            .await
        {
            warn!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                request_id = request_id,
                error = %e,
                "Media subsystem rejected request"
            );
            let _ = respond_to.send(Err(RelayError::Upstream(e.to_string())));
            return;
        }

        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.pending.insert(
                request_id,
                PendingRequest {
                    respond_to,
                    issued_at: Instant::now(),
                },
            );
            self.request_index.insert(request_id, connection_id);
        }
    }

    async fn handle_route_notification(
        &mut self,
        connection_id: &str,
        payload: Value,
        respond_to: oneshot::Sender<Result<(), RelayError>>,
    ) {
        if !self.connections.contains_key(connection_id) {
            let _ = respond_to.send(Err(RelayError::ConnectionNotFound {
                connection_id: connection_id.to_string(),
            }));
            return;
        }

        // Notifications are best-effort: media failures are logged, never
        // surfaced to the caller.
        if let Err(e) = self.session.notify(connection_id, payload).await {
            warn!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                error = %e,
                "Media notification failed"
            );
        }
        let _ = respond_to.send(Ok(()));
    }

    fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Resolved { request_id, result } => {
                self.resolve_request(request_id, result);
            }
            MediaEvent::Notify {
                connection_id,
                payload,
            } => {
                self.deliver_event(&connection_id, payload);
            }
        }
    }

    /// Match a media resolution back to the waiting caller.
    ///
    /// Exactly one response is delivered per request; duplicates and
    /// unmatched resolutions are logged and discarded.
    fn resolve_request(&mut self, request_id: u64, result: Result<Value, String>) {
        let pending = self
            .request_index
            .remove(&request_id)
            .and_then(|connection_id| self.connections.get_mut(&connection_id))
            .and_then(|connection| connection.pending.remove(&request_id));

        let Some(pending) = pending else {
            warn!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                request_id = request_id,
                "Unmatched media response discarded"
            );
            self.metrics.response_discarded();
            return;
        };

        let response = result.map_err(RelayError::Upstream);
        if pending.respond_to.send(response).is_err() {
            // The caller gave up (timed out) before the resolution arrived.
            debug!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                request_id = request_id,
                "Late media response discarded"
            );
            self.metrics.response_discarded();
        } else {
            self.metrics.request_resolved();
        }
    }

    /// Push an unsolicited media event onto the target connection's channel.
    ///
    /// Events for a connection are delivered in production order; with no
    /// channel attached the event is dropped (re-delivery is the media
    /// subsystem's concern).
    fn deliver_event(&mut self, connection_id: &str, payload: Value) {
        let Some(connection) = self.connections.get_mut(connection_id) else {
            debug!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                "Event for unknown connection dropped"
            );
            self.metrics.event_dropped();
            return;
        };

        let Some(push) = connection.push.as_ref() else {
            debug!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                "No push channel attached, event dropped"
            );
            self.metrics.event_dropped();
            return;
        };

        if push.sender.send(PushFrame::MediaEvent(payload)).is_err() {
            // Socket task died without detaching yet; treat as channel loss.
            connection.push = None;
            connection.state = ConnectionState::Admitted;
            self.metrics.event_dropped();
            debug!(
                target: "gp.actor.call",
                call_id = %self.call_id,
                connection_id = %connection_id,
                "Push channel gone, event dropped"
            );
        }
    }

    fn status(&self) -> CallStatus {
        CallStatus {
            call_id: self.call_id.clone(),
            created_at: self.created_at,
            connections: self.connections.values().map(Connection::to_summary).collect(),
            connection_count: self.connections.len(),
        }
    }

    /// Reclaim pending entries whose callers have long since timed out.
    fn sweep_expired_requests(&mut self) {
        let now = Instant::now();
        let budget = self.request_timeout + SWEEP_GRACE;

        let mut expired: Vec<(String, u64)> = Vec::new();
        for connection in self.connections.values() {
            for (request_id, pending) in &connection.pending {
                if now.duration_since(pending.issued_at) >= budget {
                    expired.push((connection.connection_id.clone(), *request_id));
                }
            }
        }

        for (connection_id, request_id) in expired {
            self.request_index.remove(&request_id);
            if let Some(pending) = self
                .connections
                .get_mut(&connection_id)
                .and_then(|connection| connection.pending.remove(&request_id))
            {
                let _ = pending.respond_to.send(Err(RelayError::UpstreamTimeout));
                self.metrics.request_abandoned();
                warn!(
                    target: "gp.actor.call",
                    call_id = %self.call_id,
                    connection_id = %connection_id,
                    request_id = request_id,
                    "Pending request swept after budget"
                );
            }
        }
    }

    /// Wake every pending request on a connection with `ConnectionClosed`.
    fn abort_pending(
        pending: &mut HashMap<u64, PendingRequest>,
        request_index: &mut HashMap<u64, String>,
        metrics: &RelayMetrics,
    ) -> usize {
        let mut woken = 0;
        for (request_id, entry) in pending.drain() {
            request_index.remove(&request_id);
            let _ = entry.respond_to.send(Err(RelayError::ConnectionClosed));
            metrics.request_abandoned();
            woken += 1;
        }
        woken
    }

    /// Close a removed connection: wake its pending requests and close its
    /// push channel with a reason.
    fn close_connection(&mut self, mut connection: Connection, reason: &str) {
        Self::abort_pending(
            &mut connection.pending,
            &mut self.request_index,
            &self.metrics,
        );

        if let Some(push) = connection.push.take() {
            let _ = push.sender.send(PushFrame::Closing {
                reason: reason.to_string(),
            });
        }
    }

    /// Tear down every connection and release the media session.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "gp.actor.call",
            call_id = %self.call_id,
            connections = self.connections.len(),
            "Tearing down call"
        );

        let connections: Vec<Connection> =
            self.connections.drain().map(|(_, conn)| conn).collect();
        for connection in connections {
            self.close_connection(connection, "call deleted");
            self.metrics.connection_closed();
        }

        self.session.close().await;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::media::{LoopbackMediaBackend, MediaBackend, MediaError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    /// Media session that accepts everything and never resolves anything.
    struct SilentSession;

    #[async_trait]
    impl MediaSession for SilentSession {
        async fn send(
            &self,
            _request_id: u64,
            _connection_id: &str,
            _payload: Value,
        ) -> Result<(), MediaError> {
            Ok(())
        }

        async fn notify(&self, _connection_id: &str, _payload: Value) -> Result<(), MediaError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    /// Session handle whose event stream is driven by the test.
    fn manual_session() -> (MediaSessionHandle, mpsc::UnboundedSender<MediaEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            MediaSessionHandle {
                session: Arc::new(SilentSession),
                events: events_rx,
            },
            events_tx,
        )
    }

    async fn loopback_call(
        request_timeout: Duration,
    ) -> (CallActorHandle, Arc<RelayMetrics>) {
        let media = LoopbackMediaBackend
            .create_session("call-1")
            .await
            .unwrap();
        let metrics = RelayMetrics::new();
        let (handle, _task) = CallActor::spawn(
            "call-1".to_string(),
            media,
            CancellationToken::new(),
            Arc::clone(&metrics),
            request_timeout,
            Duration::from_secs(5),
        );
        (handle, metrics)
    }

    fn manual_call(
        request_timeout: Duration,
    ) -> (
        CallActorHandle,
        mpsc::UnboundedSender<MediaEvent>,
        Arc<RelayMetrics>,
    ) {
        let (media, events_tx) = manual_session();
        let metrics = RelayMetrics::new();
        let (handle, _task) = CallActor::spawn(
            "call-1".to_string(),
            media,
            CancellationToken::new(),
            Arc::clone(&metrics),
            request_timeout,
            Duration::from_secs(5),
        );
        (handle, events_tx, metrics)
    }

    #[tokio::test]
    async fn test_connect_and_status() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let first = handle.connect(Some("Alice".to_string())).await.unwrap();
        assert_eq!(first.connection_count, 1);

        let second = handle.connect(None).await.unwrap();
        assert_eq!(second.connection_count, 2);
        assert_ne!(first.connection_id, second.connection_id);

        let status = handle.status().await.unwrap();
        assert_eq!(status.call_id, "call-1");
        assert_eq!(status.connection_count, 2);
        let alice = status
            .connections
            .iter()
            .find(|c| c.connection_id == first.connection_id)
            .unwrap();
        assert_eq!(alice.caller_name.as_deref(), Some("Alice"));
        assert_eq!(alice.state, ConnectionState::Admitted);
    }

    #[tokio::test]
    async fn test_disconnect_semantics() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let admitted = handle.connect(None).await.unwrap();

        assert!(handle.disconnect(admitted.connection_id.clone()).await.unwrap());
        // Second eviction of the same ID is not an error, just false.
        assert!(!handle.disconnect(admitted.connection_id).await.unwrap());
        assert!(!handle.disconnect("bogus".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_connects_yield_distinct_ids() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.connect(None).await.unwrap().connection_id
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids.len(), 32);

        let status = handle.status().await.unwrap();
        assert_eq!(status.connection_count, 32);
    }

    #[tokio::test]
    async fn test_attach_unknown_connection_fails() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let result = handle.attach_channel("bogus".to_string(), frame_tx).await;
        assert!(matches!(
            result,
            Err(RelayError::ConnectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_detach_transitions() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let admitted = handle.connect(None).await.unwrap();
        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let seq = handle
            .attach_channel(admitted.connection_id.clone(), frame_tx)
            .await
            .unwrap();

        let status = handle.status().await.unwrap();
        assert_eq!(status.connections[0].state, ConnectionState::Attached);

        // Detach returns the connection to Admitted, not Closed.
        handle
            .detach_channel(admitted.connection_id.clone(), seq)
            .await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.connections[0].state, ConnectionState::Admitted);
        assert_eq!(status.connection_count, 1);

        // Detach is idempotent.
        handle.detach_channel(admitted.connection_id, seq).await;
    }

    #[tokio::test]
    async fn test_last_attach_wins() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let admitted = handle.connect(None).await.unwrap();

        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let old_seq = handle
            .attach_channel(admitted.connection_id.clone(), old_tx)
            .await
            .unwrap();

        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        let new_seq = handle
            .attach_channel(admitted.connection_id.clone(), new_tx)
            .await
            .unwrap();
        assert_ne!(old_seq, new_seq);

        // The superseded channel is told to close.
        match old_rx.recv().await.unwrap() {
            PushFrame::Closing { reason } => assert!(reason.contains("superseded")),
            other => panic!("unexpected frame: {other:?}"),
        }

        // The superseded socket's detach must not clobber the live channel.
        handle
            .detach_channel(admitted.connection_id.clone(), old_seq)
            .await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.connections[0].state, ConnectionState::Attached);
    }

    #[tokio::test]
    async fn test_route_request_resolves_with_media_response() {
        let (handle, metrics) = loopback_call(Duration::from_secs(5)).await;

        let admitted = handle.connect(None).await.unwrap();
        let payload = json!({"method": "join", "peerName": "Alice"});

        let response = handle
            .route_request(admitted.connection_id, payload.clone())
            .await
            .unwrap();
        // The loopback backend resolves with the request payload, unchanged.
        assert_eq!(response, payload);
        assert_eq!(metrics.requests_resolved(), 1);
    }

    #[tokio::test]
    async fn test_route_request_unknown_connection() {
        let (handle, _metrics) = loopback_call(Duration::from_secs(5)).await;

        let result = handle
            .route_request("bogus".to_string(), json!({}))
            .await;
        assert!(matches!(
            result,
            Err(RelayError::ConnectionNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_request_times_out() {
        let (handle, _events_tx, _metrics) = manual_call(Duration::from_secs(20));

        let admitted = handle.connect(None).await.unwrap();
        let result = handle
            .route_request(admitted.connection_id, json!({"method": "join"}))
            .await;
        assert!(matches!(result, Err(RelayError::UpstreamTimeout)));
    }

    #[tokio::test]
    async fn test_detach_wakes_pending_with_connection_closed() {
        let (handle, _events_tx, _metrics) = manual_call(Duration::from_secs(30));

        let admitted = handle.connect(None).await.unwrap();
        let (frame_tx, _frame_rx) = mpsc::unbounded_channel();
        let seq = handle
            .attach_channel(admitted.connection_id.clone(), frame_tx)
            .await
            .unwrap();

        let request_handle = handle.clone();
        let connection_id = admitted.connection_id.clone();
        let request = tokio::spawn(async move {
            request_handle
                .route_request(connection_id, json!({"method": "join"}))
                .await
        });

        // Let the request get parked before detaching.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.detach_channel(admitted.connection_id, seq).await;

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_disconnect_wakes_pending_and_closes_channel() {
        let (handle, _events_tx, _metrics) = manual_call(Duration::from_secs(30));

        let admitted = handle.connect(None).await.unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        handle
            .attach_channel(admitted.connection_id.clone(), frame_tx)
            .await
            .unwrap();

        let request_handle = handle.clone();
        let connection_id = admitted.connection_id.clone();
        let request = tokio::spawn(async move {
            request_handle
                .route_request(connection_id, json!({"method": "join"}))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.disconnect(admitted.connection_id).await.unwrap());

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));

        match frame_rx.recv().await.unwrap() {
            PushFrame::Closing { reason } => assert_eq!(reason, "disconnected"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (handle, events_tx, _metrics) = manual_call(Duration::from_secs(5));

        let admitted = handle.connect(None).await.unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        handle
            .attach_channel(admitted.connection_id.clone(), frame_tx)
            .await
            .unwrap();

        for n in 0..5 {
            events_tx
                .send(MediaEvent::Notify {
                    connection_id: admitted.connection_id.clone(),
                    payload: json!({"seq": n}),
                })
                .unwrap();
        }

        for n in 0..5 {
            match frame_rx.recv().await.unwrap() {
                PushFrame::MediaEvent(payload) => assert_eq!(payload["seq"], n),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_event_without_channel_is_dropped() {
        let (handle, events_tx, metrics) = manual_call(Duration::from_secs(5));

        let admitted = handle.connect(None).await.unwrap();
        events_tx
            .send(MediaEvent::Notify {
                connection_id: admitted.connection_id.clone(),
                payload: json!({"seq": 0}),
            })
            .unwrap();

        // Give the actor a chance to process the event.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.events_dropped(), 1);

        // The connection itself is untouched.
        let status = handle.status().await.unwrap();
        assert_eq!(status.connection_count, 1);
    }

    #[tokio::test]
    async fn test_unmatched_response_discarded() {
        let (handle, events_tx, metrics) = manual_call(Duration::from_secs(5));

        let _admitted = handle.connect(None).await.unwrap();
        events_tx
            .send(MediaEvent::Resolved {
                request_id: 999,
                result: Ok(json!({})),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.responses_discarded(), 1);

        // The actor keeps running.
        assert_eq!(handle.status().await.unwrap().connection_count, 1);
    }

    #[tokio::test]
    async fn test_media_error_resolution_maps_to_upstream() {
        let (handle, events_tx, _metrics) = manual_call(Duration::from_secs(30));

        let admitted = handle.connect(None).await.unwrap();

        let request_handle = handle.clone();
        let connection_id = admitted.connection_id.clone();
        let request = tokio::spawn(async move {
            request_handle
                .route_request(connection_id, json!({"method": "join"}))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        // The actor allocates ids from 1.
        events_tx
            .send(MediaEvent::Resolved {
                request_id: 1,
                result: Err("no such peer".to_string()),
            })
            .unwrap();

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RelayError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_cancel_tears_down_connections() {
        let (handle, _events_tx, metrics) = manual_call(Duration::from_secs(30));

        let admitted = handle.connect(None).await.unwrap();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        handle
            .attach_channel(admitted.connection_id.clone(), frame_tx)
            .await
            .unwrap();

        let request_handle = handle.clone();
        let connection_id = admitted.connection_id.clone();
        let request = tokio::spawn(async move {
            request_handle
                .route_request(connection_id, json!({"method": "join"}))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let result = request.await.unwrap();
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));

        match frame_rx.recv().await.unwrap() {
            PushFrame::Closing { reason } => assert_eq!(reason, "call deleted"),
            other => panic!("unexpected frame: {other:?}"),
        }

        assert_eq!(metrics.connection_count(), 0);
    }
}
