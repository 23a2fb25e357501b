//! Wall-clock playback position tracking

use std::time::{Duration, Instant};

/// Tracks the position of a source that is played, paused and seeked
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    /// Position accumulated before the current run
    offset: Duration,
    /// Start of the current run, if playing
    started_at: Option<Instant>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(started) = self.started_at.take() {
            self.offset = self.offset.saturating_add(now.saturating_duration_since(started));
        }
    }

    /// Move to `position`, keeping the running state
    pub fn seek(&mut self, position: Duration, now: Instant) {
        self.offset = position;
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }

    pub fn reset(&mut self) {
        self.offset = Duration::ZERO;
        self.started_at = None;
    }

    pub fn position(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(started) => self.offset.saturating_add(now.saturating_duration_since(started)),
            None => self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_and_pauses() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new();
        assert_eq!(clock.position(t0), Duration::ZERO);

        clock.start(t0);
        assert_eq!(clock.position(t0 + Duration::from_secs(2)), Duration::from_secs(2));

        clock.pause(t0 + Duration::from_secs(3));
        assert!(!clock.is_running());
        assert_eq!(clock.position(t0 + Duration::from_secs(10)), Duration::from_secs(3));
    }

    #[test]
    fn test_seek_while_running() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new();
        clock.start(t0);
        clock.seek(Duration::from_secs(30), t0 + Duration::from_secs(1));
        assert_eq!(clock.position(t0 + Duration::from_secs(3)), Duration::from_secs(32));
    }

    #[test]
    fn test_far_seek_saturates() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new();
        clock.start(t0);
        clock.seek(Duration::MAX, t0);
        assert_eq!(clock.position(t0 + Duration::from_secs(1)), Duration::MAX);
        clock.pause(t0 + Duration::from_secs(2));
        assert_eq!(clock.position(t0 + Duration::from_secs(3)), Duration::MAX);
    }

    #[test]
    fn test_reset() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new();
        clock.start(t0);
        clock.reset();
        assert!(!clock.is_running());
        assert_eq!(clock.position(t0 + Duration::from_secs(5)), Duration::ZERO);
    }
}
