//! Fan-out of the single upstream to every viewer.
//!
//! - `fanout` - continuous transport: one reader, broadcast to N subscribers
//! - `hls` - segmented transport: the output directory served with no-store
//! - `events` - JSON events pushed to viewer connections

pub mod events;
pub mod fanout;
pub mod hls;

pub use events::{ClientMessage, ViewerEvent};
pub use fanout::{FanoutRelay, MediaChunk};
pub use hls::hls_router;
