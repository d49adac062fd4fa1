//! Observability: health probes and the registry status endpoint.

pub mod health;

pub use health::{health_router, HealthState};
