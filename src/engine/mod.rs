//! Audio engine module for track playback
//!
//! A single output resource is shared by every track. The engine runs on
//! a dedicated thread and reports playback progress back to the state
//! machine as generation-tagged notifications.

mod clock;
mod output;
mod player;

pub use player::AudioEngine;

/// The exclusive playback resource driven by the playback session.
///
/// Calls are fire-and-forget; failures come back as
/// [`EngineEventKind::Error`] notifications.
pub trait PlaybackEngine: Send {
    /// Replace the current source with `url` and start playing it
    fn load(&mut self, generation: u64, url: &str);
    /// Pause without rewinding
    fn pause(&mut self);
    /// Pause and rewind to the start
    fn stop(&mut self);
    /// Jump to `seconds` into the current source
    fn seek(&mut self, seconds: f64);
}

/// Notification from the engine about the source loaded as `generation`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub generation: u64,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    /// Playback position advanced
    TimeUpdate(f64),
    /// Source duration became known
    MetadataLoaded { duration: f64 },
    /// Source played to its end
    Ended,
    /// Fetch, decode or output failure
    Error(String),
}

/// Errors that can occur in the audio engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to fetch audio: {0}")]
    Fetch(String),

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("failed to spawn engine thread: {0}")]
    ThreadSpawn(String),
}
