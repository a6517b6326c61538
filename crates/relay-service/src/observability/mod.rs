//! Observability for the Channel Relay.
//!
//! - `health` - liveness/readiness state and router
//! - `metrics` - Prometheus metric definitions and recorder setup

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
