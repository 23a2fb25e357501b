//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::state::{ProcessingMode, Snapshot};

/// Requests from UI to client daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current client status
    GetStatus,

    /// Select a processing mode (resets job and playback)
    SetMode { mode: ProcessingMode },

    /// Submit an audio file for processing in the current mode
    Submit { path: PathBuf },

    /// Clear the current job back to idle
    Reset,

    /// Play the track, or pause it if it is the one playing
    TogglePlay { speaker_id: String },

    /// Jump within the playing track
    Seek { seconds: f64 },

    /// Stop playback and rewind
    Stop,

    /// Download every track of the current job as a ZIP
    DownloadAll,

    /// Download a single track
    DownloadTrack { speaker_id: String },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state change notifications
    Subscribe,
}

/// Responses from client daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current client status
    Status(ClientStatus),

    /// Action applied
    Accepted,

    /// Download handed off to the background
    Download { url: String, destination: PathBuf },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from client daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// State event occurred
    Event { event: StateEvent },
}

/// Full status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatus {
    /// Client version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    #[serde(flatten)]
    pub state: Snapshot,
}

impl ClientStatus {
    pub fn new(state: Snapshot, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetMode {
            mode: ProcessingMode::Music,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_mode"));
        assert!(json.contains("music"));
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{"type":"toggle_play","speaker_id":"SPEAKER_00"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert!(matches!(req, Request::TogglePlay { speaker_id } if speaker_id == "SPEAKER_00"));

        let json = r#"{"type":"submit","path":"/tmp/interview.wav"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert!(matches!(req, Request::Submit { .. }));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::error("no_results", "no results available");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("no_results"));
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::Event {
            event: StateEvent::JobReset,
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, r#"{"type":"event","event":{"type":"job_reset"}}"#);
    }
}
