//! Viewer-facing event messages.
//!
//! Pushed to every connected viewer as JSON text frames over `/ws`.

use crate::actors::{SessionState, SessionStatus};
use common::types::ChannelId;
use serde::{Deserialize, Serialize};

/// Server → viewer events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerEvent {
    /// Current session snapshot, sent on connect.
    Status {
        is_streaming: bool,
        selected_channel_id: Option<ChannelId>,
        state: SessionState,
        generation: u64,
    },
    /// A new channel went live.
    ChannelChanged {
        channel_id: ChannelId,
        channel_name: String,
        message: String,
        generation: u64,
    },
    /// The session was stopped by a viewer.
    StreamStopped { message: String },
    /// The upstream failed and the automatic retry did not recover it.
    StreamError {
        channel_id: Option<ChannelId>,
        message: String,
    },
}

impl ViewerEvent {
    pub fn status(status: &SessionStatus) -> Self {
        ViewerEvent::Status {
            is_streaming: status.is_streaming(),
            selected_channel_id: status.selected_channel_id,
            state: status.state,
            generation: status.generation,
        }
    }

    pub fn channel_changed(channel_id: ChannelId, channel_name: &str, generation: u64) -> Self {
        ViewerEvent::ChannelChanged {
            channel_id,
            channel_name: channel_name.to_string(),
            message: format!("Started: {channel_name}"),
            generation,
        }
    }

    /// Event name as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ViewerEvent::Status { .. } => "status",
            ViewerEvent::ChannelChanged { .. } => "channel_changed",
            ViewerEvent::StreamStopped { .. } => "stream_stopped",
            ViewerEvent::StreamError { .. } => "stream_error",
        }
    }
}

/// Viewer → server messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_changed_wire_format() {
        let event = ViewerEvent::channel_changed(ChannelId(4), "Arte HD", 9);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "channel_changed",
                "channel_id": 4,
                "channel_name": "Arte HD",
                "message": "Started: Arte HD",
                "generation": 9
            })
        );
        assert_eq!(event.kind(), "channel_changed");
    }

    #[test]
    fn test_status_wire_format() {
        let event = ViewerEvent::Status {
            is_streaming: false,
            selected_channel_id: None,
            state: SessionState::Idle,
            generation: 0,
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "idle");
        assert!(value["selected_channel_id"].is_null());
    }

    #[test]
    fn test_stream_error_wire_format() {
        let event = ViewerEvent::StreamError {
            channel_id: Some(ChannelId(2)),
            message: "Stream failed".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "stream_error");
        assert_eq!(value["channel_id"], 2);
    }

    #[test]
    fn test_client_heartbeat_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
