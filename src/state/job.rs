//! Lifecycle of one processing request
//!
//! The job only records state; timers and network calls are owned by the
//! state machine, which feeds their outcomes back in tagged with the
//! submission token they were started for.

use serde::{Deserialize, Serialize};

use super::mode::advance_progress;
use crate::api::{InputFile, JobResults};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Idle => write!(f, "Idle"),
            JobStatus::Processing => write!(f, "Processing"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Job {
    input: Option<InputFile>,
    status: JobStatus,
    progress: u8,
    results: Option<JobResults>,
    error: Option<String>,
    /// Identifies the current submission; bumped on every submit and reset
    token: u64,
    /// Set once the upload succeeded and the settle delay is running
    settling: bool,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn input(&self) -> Option<&InputFile> {
        self.input.as_ref()
    }

    pub fn results(&self) -> Option<&JobResults> {
        self.results.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether `token` still names the submission in flight
    pub fn awaits(&self, token: u64) -> bool {
        self.status == JobStatus::Processing && self.token == token
    }

    /// Start a new submission and return its token
    pub fn begin(&mut self, input: InputFile) -> u64 {
        self.token += 1;
        self.input = Some(input);
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.results = None;
        self.error = None;
        self.settling = false;
        self.token
    }

    /// One synthetic progress step; returns the new value if it changed
    pub fn tick(&mut self, token: u64) -> Option<u8> {
        if !self.awaits(token) || self.settling {
            return None;
        }
        let next = advance_progress(self.progress);
        if next == self.progress {
            return None;
        }
        self.progress = next;
        Some(next)
    }

    /// Upload succeeded: progress jumps to 100 while the bar settles
    pub fn upload_succeeded(&mut self, token: u64) -> bool {
        if !self.awaits(token) {
            return false;
        }
        self.progress = 100;
        self.settling = true;
        true
    }

    /// Settle delay over: results become visible
    pub fn complete(&mut self, token: u64, results: JobResults) -> bool {
        if !self.awaits(token) || !self.settling {
            return false;
        }
        self.status = JobStatus::Completed;
        self.results = Some(results);
        self.settling = false;
        true
    }

    /// Upload failed. Progress is left where the ticker stopped and the
    /// input is dropped, so a retry starts from a fresh selection.
    pub fn fail(&mut self, token: u64, message: String) -> bool {
        if !self.awaits(token) {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(message);
        self.input = None;
        self.settling = false;
        true
    }

    /// Back to idle. Outcomes of the previous submission no longer match.
    pub fn reset(&mut self) {
        self.token += 1;
        self.input = None;
        self.status = JobStatus::Idle;
        self.progress = 0;
        self.results = None;
        self.error = None;
        self.settling = false;
    }
}
