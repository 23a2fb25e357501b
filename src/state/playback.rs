//! Playback session over the single shared output
//!
//! At most one track is active. Activating a track always replaces the
//! previous source on the engine, so exclusivity holds without tracking
//! per-track state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineEventKind, PlaybackEngine};

/// Result of a toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle {
    /// The track was loaded and started
    Activated { speaker_id: String },
    /// The track was already active and is now paused
    Deactivated { speaker_id: String },
}

/// Notable outcome of an engine notification
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Position { current_time: f64, duration: f64 },
    Ended { speaker_id: String },
}

/// Serializable view of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackView {
    pub active_track: Option<String>,
    pub current_time: f64,
    /// `None` until the engine reports metadata
    pub duration: Option<f64>,
    pub elapsed_label: String,
    pub duration_label: String,
}

pub struct PlaybackSession {
    engine: Box<dyn PlaybackEngine>,
    active: Option<String>,
    current_time: f64,
    duration: f64,
    /// Tags every load; engine notifications for older loads are dropped
    generation: u64,
}

impl PlaybackSession {
    pub fn new(engine: Box<dyn PlaybackEngine>) -> Self {
        Self {
            engine,
            active: None,
            current_time: 0.0,
            duration: f64::NAN,
            generation: 0,
        }
    }

    pub fn active_track(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Pause `speaker_id` if it is playing, otherwise make it the one
    /// playing track, streamed from `url`
    pub fn toggle(&mut self, speaker_id: &str, url: &str) -> Toggle {
        if self.active.as_deref() == Some(speaker_id) {
            self.engine.pause();
            self.generation += 1;
            self.active = None;
            info!(speaker_id, "playback paused");
            return Toggle::Deactivated {
                speaker_id: speaker_id.to_string(),
            };
        }

        self.generation += 1;
        self.engine.load(self.generation, url);
        self.active = Some(speaker_id.to_string());
        self.current_time = 0.0;
        self.duration = f64::NAN;

        info!(speaker_id, generation = self.generation, "playback started");
        Toggle::Activated {
            speaker_id: speaker_id.to_string(),
        }
    }

    /// Jump within the active track. Returns false if nothing is active.
    pub fn seek(&mut self, seconds: f64) -> bool {
        if self.active.is_none() {
            return false;
        }

        let mut target = seconds.max(0.0);
        if self.duration.is_finite() {
            target = target.min(self.duration);
        }

        self.engine.seek(target);
        // Shown right away, ahead of the engine's own position report
        self.current_time = target;
        true
    }

    /// Pause, rewind and deactivate, whatever the current state.
    /// Returns the track that was active, if any.
    pub fn stop(&mut self) -> Option<String> {
        self.engine.stop();
        self.generation += 1;
        self.current_time = 0.0;
        let previous = self.active.take();
        if let Some(speaker_id) = &previous {
            debug!(%speaker_id, "playback stopped");
        }
        previous
    }

    /// Apply an engine notification, ignoring those for replaced sources
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Option<PlaybackUpdate> {
        if event.generation != self.generation || self.active.is_none() {
            debug!(
                generation = event.generation,
                current = self.generation,
                "ignoring stale engine event"
            );
            return None;
        }

        match event.kind {
            EngineEventKind::TimeUpdate(t) => {
                self.current_time = t;
                Some(self.position())
            }
            EngineEventKind::MetadataLoaded { duration } => {
                self.duration = duration;
                Some(self.position())
            }
            EngineEventKind::Ended => {
                // Like stop(), but the duration stays known
                self.generation += 1;
                self.current_time = 0.0;
                self.active
                    .take()
                    .map(|speaker_id| PlaybackUpdate::Ended { speaker_id })
            }
            EngineEventKind::Error(message) => {
                // Playback problems never fail the job; the track stays selectable
                warn!(speaker_id = ?self.active, %message, "audio playback error");
                None
            }
        }
    }

    pub fn view(&self) -> PlaybackView {
        PlaybackView {
            active_track: self.active.clone(),
            current_time: self.current_time,
            duration: self.duration.is_finite().then_some(self.duration),
            elapsed_label: format_time(self.current_time),
            duration_label: format_time(self.duration),
        }
    }

    fn position(&self) -> PlaybackUpdate {
        PlaybackUpdate::Position {
            current_time: self.current_time,
            duration: self.duration,
        }
    }
}

/// `m:ss`, with `0:00` for an unknown (NaN) or otherwise unusable time
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
