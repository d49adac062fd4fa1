//! Actor model implementation.
//!
//! Two actor kinds, supervised top-down:
//!
//! - [`registry::CallRegistryActor`] - singleton owning the call map
//! - [`call::CallActor`] - one per call, owning connections, pending
//!   requests, and the call's media session
//!
//! All cross-actor communication is typed message passing over
//! `tokio::sync::mpsc`, with `oneshot` channels for request/reply.
//! Cancellation propagates through a `CancellationToken` hierarchy rooted
//! at the registry.

pub mod call;
pub mod messages;
pub mod metrics;
pub mod registry;

pub use call::CallActorHandle;
pub use messages::{CallStatus, ConnectResult, ConnectionState, ConnectionSummary, RegistryStatus};
pub use metrics::RelayMetrics;
pub use registry::CallRegistryHandle;
