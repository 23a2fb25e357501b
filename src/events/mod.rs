//! Events module for state machine transitions
//!
//! Every job, playback and download transition is broadcast as one of
//! these, and pushed verbatim to subscribed IPC clients.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::ProcessingMode;

/// Events emitted by the state machine during transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Processing mode selected; job and playback were reset first
    ModeChanged {
        mode: ProcessingMode,
        previous: ProcessingMode,
    },

    /// A file was submitted for processing
    JobStarted {
        token: u64,
        mode: ProcessingMode,
        file_name: String,
    },

    /// Synthetic progress moved
    ProgressUpdated { progress: u8 },

    /// Results are available
    JobCompleted { job_id: String, tracks: usize },

    /// Upload or processing failed
    JobFailed { message: String },

    /// Job cleared back to idle
    JobReset,

    TrackActivated { speaker_id: String },

    /// Active track toggled off (paused)
    TrackDeactivated { speaker_id: String },

    /// Playback stopped because the job or mode changed
    PlaybackStopped { speaker_id: String },

    /// Active track played to its end
    PlaybackEnded { speaker_id: String },

    PositionUpdated {
        current_time: f64,
        /// `None` until metadata is loaded
        duration: Option<f64>,
    },

    DownloadStarted { url: String, destination: PathBuf },

    DownloadFinished { destination: PathBuf, bytes: u64 },

    DownloadFailed { url: String, message: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ModeChanged { mode, previous } => {
                write!(f, "MODE_CHANGED ({} -> {})", previous, mode)
            }
            StateEvent::JobStarted { token, file_name, .. } => {
                write!(f, "JOB_STARTED #{} ({})", token, file_name)
            }
            StateEvent::ProgressUpdated { progress } => write!(f, "PROGRESS ({}%)", progress),
            StateEvent::JobCompleted { job_id, tracks } => {
                write!(f, "JOB_COMPLETED {} ({} tracks)", job_id, tracks)
            }
            StateEvent::JobFailed { message } => write!(f, "JOB_FAILED ({})", message),
            StateEvent::JobReset => write!(f, "JOB_RESET"),
            StateEvent::TrackActivated { speaker_id } => write!(f, "TRACK_ACTIVATED {}", speaker_id),
            StateEvent::TrackDeactivated { speaker_id } => {
                write!(f, "TRACK_DEACTIVATED {}", speaker_id)
            }
            StateEvent::PlaybackStopped { speaker_id } => write!(f, "PLAYBACK_STOPPED {}", speaker_id),
            StateEvent::PlaybackEnded { speaker_id } => write!(f, "PLAYBACK_ENDED {}", speaker_id),
            StateEvent::PositionUpdated { current_time, .. } => {
                write!(f, "POSITION ({:.1}s)", current_time)
            }
            StateEvent::DownloadStarted { destination, .. } => {
                write!(f, "DOWNLOAD_STARTED {}", destination.display())
            }
            StateEvent::DownloadFinished { destination, bytes } => {
                write!(f, "DOWNLOAD_FINISHED {} ({} bytes)", destination.display(), bytes)
            }
            StateEvent::DownloadFailed { message, .. } => write!(f, "DOWNLOAD_FAILED ({})", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::JobCompleted {
            job_id: "job_1a2b3c4d".to_string(),
            tracks: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"job_completed\""));
        assert!(json.contains("job_1a2b3c4d"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"mode_changed","mode":"clean","previous":"speech"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            StateEvent::ModeChanged {
                mode: ProcessingMode::Clean,
                previous: ProcessingMode::Speech,
            }
        );
    }

    #[test]
    fn test_event_display() {
        let event = StateEvent::ProgressUpdated { progress: 45 };
        assert_eq!(event.to_string(), "PROGRESS (45%)");
    }
}
