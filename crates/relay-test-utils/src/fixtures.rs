//! Shared test fixtures.

use common::types::ChannelId;
use relay_service::catalog::Channel;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Bearer token for the `alice` test viewer.
pub const ALICE_TOKEN: &str = "alice-token";

/// Bearer token for the `bob` test viewer.
pub const BOB_TOKEN: &str = "bob-token";

/// Three channels, deliberately not in name order.
pub fn sample_channels() -> Vec<Channel> {
    vec![
        Channel {
            id: ChannelId(1),
            name: "Sports One".to_string(),
            url: "http://upstream.test/live/1.ts".to_string(),
            favorite: false,
        },
        Channel {
            id: ChannelId(2),
            name: "arte".to_string(),
            url: "http://upstream.test/live/2.ts".to_string(),
            favorite: true,
        },
        Channel {
            id: ChannelId(3),
            name: "News 24".to_string(),
            url: "http://upstream.test/live/3.ts".to_string(),
            favorite: false,
        },
    ]
}

/// Write `channels` as a JSON catalog into `dir`.
pub fn write_catalog(dir: &Path, channels: &[Channel]) -> PathBuf {
    let path = dir.join("channels.json");
    let json = serde_json::to_string_pretty(channels).expect("channels serialize");
    std::fs::write(&path, json).expect("catalog written");
    path
}

/// Minimal valid configuration for tests.
///
/// Short timings so restart and shutdown paths finish quickly.
pub fn test_vars(channels_file: &Path, output_dir: &Path) -> HashMap<String, String> {
    HashMap::from([
        (
            "RELAY_CHANNELS_FILE".to_string(),
            channels_file.display().to_string(),
        ),
        (
            "RELAY_VIEWER_TOKENS".to_string(),
            format!("alice:{ALICE_TOKEN},bob:{BOB_TOKEN}"),
        ),
        ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        (
            "RELAY_OUTPUT_DIR".to_string(),
            output_dir.display().to_string(),
        ),
        ("RELAY_STOP_GRACE_MS".to_string(), "200".to_string()),
        ("RELAY_STARTUP_PROBE_MS".to_string(), "0".to_string()),
        ("RELAY_RESTART_BACKOFF_MS".to_string(), "50".to_string()),
        ("RELAY_DRAIN_SECONDS".to_string(), "0".to_string()),
    ])
}
