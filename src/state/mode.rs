//! Processing modes offered by the service
//!
//! The mode picks the upload endpoint, the cadence of the synthetic
//! progress ticker, and the copy shown by the front-end.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Progress ticker step, in percent
pub const PROGRESS_STEP: u8 = 5;

/// Synthetic progress never passes this value before the server answers
pub const PROGRESS_CAP: u8 = 90;

/// The three processing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Voice isolation: speaker diarization into per-speaker tracks
    Speech,
    /// Music stem separation: vocals, drums, bass, other
    Music,
    /// Noise cleanup of a single recording
    Clean,
}

impl Default for ProcessingMode {
    fn default() -> Self {
        Self::Speech
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProcessingMode {
    /// Wire name, as used in the `mode` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Speech => "speech",
            ProcessingMode::Music => "music",
            ProcessingMode::Clean => "clean",
        }
    }

    /// Upload endpoint path for this mode
    pub fn endpoint(&self) -> &'static str {
        match self {
            ProcessingMode::Speech => "/process-audio",
            ProcessingMode::Music => "/separate-music",
            ProcessingMode::Clean => "/enhance-audio",
        }
    }

    /// Interval between synthetic progress steps.
    ///
    /// Stem separation is the heaviest job, so it advances more slowly.
    pub fn tick_interval(&self) -> Duration {
        match self {
            ProcessingMode::Music => Duration::from_millis(400),
            ProcessingMode::Speech | ProcessingMode::Clean => Duration::from_millis(250),
        }
    }

    /// Badge shown in the navigation bar
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingMode::Speech => "Voice Mode",
            ProcessingMode::Music => "Music Mode",
            ProcessingMode::Clean => "Cleaner Mode",
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            ProcessingMode::Speech => "Isolate Voices with Precision",
            ProcessingMode::Music => "Separate Music with Precision",
            ProcessingMode::Clean => "Enhance Audio Instantly",
        }
    }

    /// Title shown above a finished job's tracks
    pub fn completion_title(&self) -> &'static str {
        match self {
            ProcessingMode::Clean => "Enhancement Complete",
            ProcessingMode::Speech | ProcessingMode::Music => "Separation Complete",
        }
    }
}

/// Next synthetic progress value after one tick
pub fn advance_progress(progress: u8) -> u8 {
    if progress >= PROGRESS_CAP {
        PROGRESS_CAP.max(progress)
    } else {
        (progress + PROGRESS_STEP).min(PROGRESS_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(ProcessingMode::Speech.endpoint(), "/process-audio");
        assert_eq!(ProcessingMode::Music.endpoint(), "/separate-music");
        assert_eq!(ProcessingMode::Clean.endpoint(), "/enhance-audio");
    }

    #[test]
    fn test_music_ticks_slower() {
        assert!(ProcessingMode::Music.tick_interval() > ProcessingMode::Speech.tick_interval());
        assert_eq!(
            ProcessingMode::Clean.tick_interval(),
            ProcessingMode::Speech.tick_interval()
        );
    }

    #[test]
    fn test_progress_caps_at_ninety() {
        let mut progress = 0;
        for _ in 0..100 {
            let next = advance_progress(progress);
            assert!(next >= progress);
            progress = next;
        }
        assert_eq!(progress, PROGRESS_CAP);
    }

    #[test]
    fn test_progress_never_decreases_past_cap() {
        assert_eq!(advance_progress(100), 100);
        assert_eq!(advance_progress(88), 90);
    }

    #[test]
    fn test_mode_wire_names() {
        let json = serde_json::to_string(&ProcessingMode::Clean).unwrap();
        assert_eq!(json, "\"clean\"");
        let mode: ProcessingMode = serde_json::from_str("\"music\"").unwrap();
        assert_eq!(mode, ProcessingMode::Music);
    }
}
