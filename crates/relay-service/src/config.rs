//! Channel Relay configuration.
//!
//! Configuration is loaded from environment variables. Viewer tokens are
//! held as `SecretString` and redacted in Debug output.

use crate::supervisor::OutputTarget;
use common::secret::SecretString;
use common::types::UserIdentity;
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5050";

/// Default transcoder executable name.
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";

/// Default HLS output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "stream";

/// Default upstream user agent, accepted by most IPTV providers.
pub const DEFAULT_USER_AGENT: &str = "IPTV Smarters Pro";

/// Default HLS segment duration in seconds.
pub const DEFAULT_HLS_SEGMENT_SECONDS: u32 = 2;

/// Default HLS playlist window (segments kept in the playlist).
pub const DEFAULT_HLS_LIST_SIZE: u32 = 10;

/// Default graceful stop window in milliseconds.
pub const DEFAULT_STOP_GRACE_MS: u64 = 3000;

/// Default early-exit detection window in milliseconds.
pub const DEFAULT_STARTUP_PROBE_MS: u64 = 1500;

/// Default delay before the single automatic restart, in milliseconds.
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 2000;

/// Default uptime after which a crashed upstream earns a fresh retry.
pub const DEFAULT_RESTART_STABLE_SECONDS: u64 = 30;

/// Default presence timeout in seconds.
pub const DEFAULT_PRESENCE_TIMEOUT_SECONDS: u64 = 15;

/// Default expected client heartbeat interval in seconds.
pub const DEFAULT_PRESENCE_HEARTBEAT_SECONDS: u64 = 5;

/// Default presence sweep interval in seconds.
pub const DEFAULT_PRESENCE_SWEEP_SECONDS: u64 = 5;

/// Default shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// How the upstream output reaches viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Transcoder writes an HLS playlist and segments to the output directory.
    Hls,
    /// Transcoder writes MPEG-TS to stdout, relayed through a broadcast channel.
    MpegTs,
}

impl Transport {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hls" => Some(Transport::Hls),
            "mpegts" | "ts" => Some(Transport::MpegTs),
            _ => None,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Hls => "hls",
            Transport::MpegTs => "mpegts",
        }
    }
}

/// A bearer token accepted by the static authenticator.
#[derive(Clone)]
pub struct ViewerCredential {
    /// Identity the token authenticates as.
    pub user: UserIdentity,
    /// The bearer token itself.
    pub token: SecretString,
}

impl fmt::Debug for ViewerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerCredential")
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Channel Relay configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:5050").
    pub bind_address: String,

    /// JSON channel catalog.
    pub channels_file: PathBuf,

    /// Accepted viewer bearer tokens.
    pub viewer_tokens: Vec<ViewerCredential>,

    /// Transcoder name (searched in `transcoder_search_path`) or path.
    pub transcoder: String,

    /// Directories searched for a bare transcoder name.
    pub transcoder_search_path: Option<OsString>,

    /// Output transport.
    pub transport: Transport,

    /// HLS output directory.
    pub output_dir: PathBuf,

    /// HLS segment duration in seconds.
    pub hls_segment_seconds: u32,

    /// HLS playlist window.
    pub hls_list_size: u32,

    /// User agent passed to the transcoder for upstream requests.
    pub user_agent: String,

    /// Graceful stop window before the transcoder is killed.
    pub stop_grace: Duration,

    /// Window in which an early transcoder exit fails the start.
    pub startup_probe: Duration,

    /// Delay before the automatic restart after a crash.
    pub restart_backoff: Duration,

    /// Uptime after which a crashed upstream refills the retry budget.
    pub restart_stable_after: Duration,

    /// Presence timeout.
    pub presence_timeout: Duration,

    /// Expected client heartbeat interval.
    pub presence_heartbeat: Duration,

    /// Presence sweep interval.
    pub presence_sweep: Duration,

    /// Shutdown drain period in seconds.
    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("channels_file", &self.channels_file)
            .field("viewer_tokens", &format!("[{} REDACTED]", self.viewer_tokens.len()))
            .field("transcoder", &self.transcoder)
            .field("transport", &self.transport)
            .field("output_dir", &self.output_dir)
            .field("hls_segment_seconds", &self.hls_segment_seconds)
            .field("hls_list_size", &self.hls_list_size)
            .field("user_agent", &self.user_agent)
            .field("stop_grace", &self.stop_grace)
            .field("startup_probe", &self.startup_probe)
            .field("restart_backoff", &self.restart_backoff)
            .field("restart_stable_after", &self.restart_stable_after)
            .field("presence_timeout", &self.presence_timeout)
            .field("presence_heartbeat", &self.presence_heartbeat)
            .field("presence_sweep", &self.presence_sweep)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid viewer token configuration: {0}")]
    InvalidViewerTokens(String),

    #[error("Invalid transport configuration: {0}")]
    InvalidTransport(String),

    #[error("Invalid numeric configuration: {0}")]
    InvalidNumber(String),

    #[error("Invalid presence timing configuration: {0}")]
    InvalidPresenceTiming(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let channels_file = vars
            .get("RELAY_CHANNELS_FILE")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_CHANNELS_FILE".to_string()))?;

        let tokens_raw = vars
            .get("RELAY_VIEWER_TOKENS")
            .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_VIEWER_TOKENS".to_string()))?;
        let viewer_tokens = parse_viewer_tokens(tokens_raw)?;

        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let transcoder = vars
            .get("RELAY_TRANSCODER")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRANSCODER.to_string());

        // Falls back to the PATH captured with the rest of the environment
        let transcoder_search_path = vars
            .get("RELAY_TRANSCODER_SEARCH_PATH")
            .or_else(|| vars.get("PATH"))
            .map(OsString::from);

        let transport = match vars.get("RELAY_TRANSPORT") {
            Some(value) => Transport::parse(value).ok_or_else(|| {
                ConfigError::InvalidTransport(format!(
                    "RELAY_TRANSPORT must be 'hls' or 'mpegts', got '{}'",
                    value
                ))
            })?,
            None => Transport::Hls,
        };

        let output_dir = vars
            .get("RELAY_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let hls_segment_seconds = u32::try_from(positive_u64(
            vars,
            "RELAY_HLS_SEGMENT_SECONDS",
            u64::from(DEFAULT_HLS_SEGMENT_SECONDS),
        )?)
        .map_err(|e| ConfigError::InvalidNumber(format!("RELAY_HLS_SEGMENT_SECONDS: {e}")))?;

        let hls_list_size = u32::try_from(positive_u64(
            vars,
            "RELAY_HLS_LIST_SIZE",
            u64::from(DEFAULT_HLS_LIST_SIZE),
        )?)
        .map_err(|e| ConfigError::InvalidNumber(format!("RELAY_HLS_LIST_SIZE: {e}")))?;

        let user_agent = vars
            .get("RELAY_USER_AGENT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let stop_grace = Duration::from_millis(positive_u64(
            vars,
            "RELAY_STOP_GRACE_MS",
            DEFAULT_STOP_GRACE_MS,
        )?);
        let startup_probe = Duration::from_millis(non_negative_u64(
            vars,
            "RELAY_STARTUP_PROBE_MS",
            DEFAULT_STARTUP_PROBE_MS,
        )?);
        let restart_backoff = Duration::from_millis(non_negative_u64(
            vars,
            "RELAY_RESTART_BACKOFF_MS",
            DEFAULT_RESTART_BACKOFF_MS,
        )?);
        let restart_stable_after = Duration::from_secs(positive_u64(
            vars,
            "RELAY_RESTART_STABLE_SECONDS",
            DEFAULT_RESTART_STABLE_SECONDS,
        )?);

        let presence_timeout_secs = positive_u64(
            vars,
            "PRESENCE_TIMEOUT_SECONDS",
            DEFAULT_PRESENCE_TIMEOUT_SECONDS,
        )?;
        let presence_heartbeat_secs = positive_u64(
            vars,
            "PRESENCE_HEARTBEAT_SECONDS",
            DEFAULT_PRESENCE_HEARTBEAT_SECONDS,
        )?;
        let presence_sweep_secs = positive_u64(
            vars,
            "PRESENCE_SWEEP_SECONDS",
            DEFAULT_PRESENCE_SWEEP_SECONDS,
        )?;

        // A single missed heartbeat must not flip a viewer offline
        if presence_timeout_secs < presence_heartbeat_secs.saturating_mul(2) {
            return Err(ConfigError::InvalidPresenceTiming(format!(
                "PRESENCE_TIMEOUT_SECONDS ({}) must be at least twice PRESENCE_HEARTBEAT_SECONDS ({})",
                presence_timeout_secs, presence_heartbeat_secs
            )));
        }

        let drain_seconds = non_negative_u64(vars, "RELAY_DRAIN_SECONDS", DEFAULT_DRAIN_SECONDS)?;

        Ok(Config {
            bind_address,
            channels_file,
            viewer_tokens,
            transcoder,
            transcoder_search_path,
            transport,
            output_dir,
            hls_segment_seconds,
            hls_list_size,
            user_agent,
            stop_grace,
            startup_probe,
            restart_backoff,
            restart_stable_after,
            presence_timeout: Duration::from_secs(presence_timeout_secs),
            presence_heartbeat: Duration::from_secs(presence_heartbeat_secs),
            presence_sweep: Duration::from_secs(presence_sweep_secs),
            drain_seconds,
        })
    }

    /// Where the transcoder writes its output for the configured transport.
    #[must_use]
    pub fn output_target(&self) -> OutputTarget {
        match self.transport {
            Transport::Hls => OutputTarget::Segmented {
                dir: self.output_dir.clone(),
                segment_seconds: self.hls_segment_seconds,
                list_size: self.hls_list_size,
            },
            Transport::MpegTs => OutputTarget::Continuous,
        }
    }
}

/// Parse `user:token,user:token` into credentials.
fn parse_viewer_tokens(raw: &str) -> Result<Vec<ViewerCredential>, ConfigError> {
    let mut credentials: Vec<ViewerCredential> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (user, token) = entry.split_once(':').ok_or_else(|| {
            ConfigError::InvalidViewerTokens(
                "RELAY_VIEWER_TOKENS entries must have the form user:token".to_string(),
            )
        })?;

        let user = UserIdentity::new(user).map_err(|e| {
            ConfigError::InvalidViewerTokens(format!("RELAY_VIEWER_TOKENS: {e}"))
        })?;

        let token = token.trim();
        if token.is_empty() {
            // Never echo the entry itself, it may contain a partial secret
            return Err(ConfigError::InvalidViewerTokens(format!(
                "RELAY_VIEWER_TOKENS: empty token for user '{}'",
                user
            )));
        }

        if credentials.iter().any(|c| c.user == user) {
            return Err(ConfigError::InvalidViewerTokens(format!(
                "RELAY_VIEWER_TOKENS: duplicate user '{}'",
                user
            )));
        }

        credentials.push(ViewerCredential {
            user,
            token: SecretString::from(token.to_string()),
        });
    }

    if credentials.is_empty() {
        return Err(ConfigError::InvalidViewerTokens(
            "RELAY_VIEWER_TOKENS must contain at least one user:token entry".to_string(),
        ));
    }

    Ok(credentials)
}

fn non_negative_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidNumber(format!(
                "{} must be a valid non-negative integer, got '{}': {}",
                name, value_str, e
            ))
        }),
        None => Ok(default),
    }
}

fn positive_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = non_negative_u64(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidNumber(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(value)
}
