//! HTTP request handlers for the Channel Relay.

pub mod channels;
pub mod metrics;
pub mod playback;
pub mod presence;
pub mod status;
pub mod stream;
pub mod viewer;

pub use channels::{list_channels, list_favorites, toggle_favorite};
pub use metrics::metrics_handler;
pub use playback::{play_channel, stop_stream};
pub use presence::{heartbeat, logout, online_users};
pub use status::get_status;
pub use stream::live_stream;
pub use viewer::viewer_socket;
