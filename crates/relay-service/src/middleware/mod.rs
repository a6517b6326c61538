//! HTTP middleware for the Channel Relay.
//!
//! - `auth` - bearer token authentication and presence refresh
//! - `http_metrics` - request counters and latency for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthState};
pub use http_metrics::http_metrics_middleware;
