//! Background tasks for the Channel Relay.
//!
//! # Tasks
//!
//! - `presence_sweeper` - Removes expired presence entries on a fixed interval

pub mod presence_sweeper;

pub use presence_sweeper::start_presence_sweeper;
