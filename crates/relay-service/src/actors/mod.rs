//! Actor model for the Channel Relay.
//!
//! ```text
//! SessionCoordinator (singleton)
//! ├── owns the session state and the single ProcessHandle
//! ├── drives the Supervisor (stop-before-start)
//! ├── attaches upstream output to the FanoutRelay
//! └── publishes SessionStatus (watch) and ViewerEvents (broadcast)
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - `SessionCoordinator` actor and its handle
//! - [`messages`] - request, state, and error types

pub mod coordinator;
pub mod messages;

pub use coordinator::{CoordinatorConfig, SessionCoordinator, SessionCoordinatorHandle};
pub use messages::{CoordinatorMessage, SessionError, SessionState, SessionStatus};
