//! Test utilities for the Channel Relay.
//!
//! - [`server_harness`] - `TestRelayServer`, a real router on a random port
//!   backed by the mock supervisor and an in-memory catalog
//! - [`fixtures`] - sample channels, catalog files and configuration vars

pub mod fixtures;
pub mod server_harness;

pub use fixtures::{sample_channels, test_vars, write_catalog, ALICE_TOKEN, BOB_TOKEN};
pub use server_harness::TestRelayServer;
