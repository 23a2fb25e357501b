//! State machine module for jobs and playback
//!
//! Three cooperating pieces, all driven from one task:
//! - ProcessingMode: which endpoint a job goes to
//! - Job: upload → processing → completed/failed, with synthetic progress
//! - PlaybackSession: the one shared output and its active track

mod job;
mod machine;
mod mode;
mod playback;

pub use job::JobStatus;
pub use machine::{
    Action, Command, ControlError, DownloadTicket, JobSettings, JobView, Outcome, Snapshot,
    StateMachine, TrackView,
};
pub use mode::ProcessingMode;
pub use playback::{format_time, PlaybackView};
