//! Audio engine thread
//!
//! Owns the output device and the currently loaded source. Commands
//! arrive over a std channel; notifications go back to the async side
//! through a tokio channel. The thread wakes every [`TICK_INTERVAL`] to
//! report the playback position, like a media element's `timeupdate`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::clock::PlaybackClock;
use super::output::{default_output, AudioOutput};
use super::{EngineError, EngineEvent, EngineEventKind, PlaybackEngine};

/// Interval between position notifications while playing
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Commands sent from the playback session to the engine thread
#[derive(Debug, Clone, PartialEq)]
enum EngineCommand {
    Load { generation: u64, url: String },
    Pause,
    Stop,
    Seek(f64),
    Shutdown,
}

/// Handle to the engine thread. Clones share the same thread.
#[derive(Debug, Clone)]
pub struct AudioEngine {
    command_tx: std_mpsc::Sender<EngineCommand>,
    running: Arc<AtomicBool>,
    /// False when the output could not be opened and loads are rejected
    available: bool,
}

impl AudioEngine {
    /// Spawn the engine thread with the build's default output.
    ///
    /// Returns once the thread has tried to open its output.
    pub fn start(event_tx: mpsc::Sender<EngineEvent>) -> Result<Self, EngineError> {
        Self::start_with(event_tx, build_engine)
    }

    fn start_with<F, B>(event_tx: mpsc::Sender<EngineEvent>, build: B) -> Result<Self, EngineError>
    where
        F: SourceFetcher,
        B: FnOnce() -> Result<EngineLoop<F>, EngineError> + Send + 'static,
    {
        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let running = Arc::new(AtomicBool::new(true));
        let guard = RunningGuard(Arc::clone(&running));

        thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                let _guard = guard;
                info!("audio engine thread started");

                match build() {
                    Ok(engine) => {
                        let _ = ready_tx.send(true);
                        run_engine_loop(command_rx, event_tx, engine);
                    }
                    Err(e) => {
                        error!(?e, "audio engine unavailable");
                        let _ = ready_tx.send(false);
                        reject_loads(command_rx, event_tx, e);
                    }
                }

                info!("audio engine thread stopped");
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        let available = ready_rx
            .recv()
            .map_err(|_| EngineError::ThreadSpawn("engine thread exited during startup".to_string()))?;

        Ok(Self {
            command_tx,
            running,
            available,
        })
    }

    /// Whether the output opened; loads fail with an error event otherwise
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Ask the engine thread to exit
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("audio engine thread is gone, command dropped");
        }
    }
}

impl PlaybackEngine for AudioEngine {
    fn load(&mut self, generation: u64, url: &str) {
        self.send(EngineCommand::Load {
            generation,
            url: url.to_string(),
        });
    }

    fn pause(&mut self) {
        self.send(EngineCommand::Pause);
    }

    fn stop(&mut self) {
        self.send(EngineCommand::Stop);
    }

    fn seek(&mut self, seconds: f64) {
        self.send(EngineCommand::Seek(seconds));
    }
}

/// Clears the running flag when the engine thread exits, unwinding included
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where the engine gets source bytes from
trait SourceFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, EngineError>;
}

/// Blocking HTTP fetcher, only ever used on the engine thread
struct HttpFetcher {
    http: reqwest::blocking::Client,
}

impl HttpFetcher {
    fn new() -> Result<Self, EngineError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
        Ok(Self { http })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, EngineError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Fetch(format!("HTTP {}", response.status())));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| EngineError::Fetch(e.to_string()))
    }
}

fn build_engine() -> Result<EngineLoop<HttpFetcher>, EngineError> {
    Ok(EngineLoop::new(default_output()?, HttpFetcher::new()?))
}

/// The source currently held by the output
#[derive(Debug)]
struct LoadedSource {
    generation: u64,
    clock: PlaybackClock,
    duration: Option<Duration>,
}

/// Engine state machine, driven by commands and ticks
struct EngineLoop<F> {
    output: Box<dyn AudioOutput>,
    fetcher: F,
    current: Option<LoadedSource>,
}

impl<F: SourceFetcher> EngineLoop<F> {
    fn new(output: Box<dyn AudioOutput>, fetcher: F) -> Self {
        Self {
            output,
            fetcher,
            current: None,
        }
    }

    fn handle(&mut self, command: EngineCommand, now: Instant) -> Vec<EngineEvent> {
        match command {
            EngineCommand::Load { generation, url } => self.load(generation, &url, now),
            EngineCommand::Pause => {
                self.output.pause();
                match self.current.as_mut() {
                    Some(source) => {
                        source.clock.pause(now);
                        vec![event(source.generation, EngineEventKind::TimeUpdate(secs(source.clock.position(now))))]
                    }
                    None => Vec::new(),
                }
            }
            EngineCommand::Stop => {
                self.output.stop();
                if let Some(source) = self.current.as_mut() {
                    source.clock.reset();
                }
                Vec::new()
            }
            EngineCommand::Seek(seconds) => self.seek(seconds, now),
            // Handled by the thread loop
            EngineCommand::Shutdown => Vec::new(),
        }
    }

    fn load(&mut self, generation: u64, url: &str, now: Instant) -> Vec<EngineEvent> {
        self.output.stop();
        self.current = None;

        debug!(generation, url, "loading source");

        let opened = self
            .fetcher
            .fetch(url)
            .and_then(|bytes| self.output.open(bytes));

        match opened {
            Ok(duration) => {
                let mut clock = PlaybackClock::new();
                clock.start(now);
                self.current = Some(LoadedSource {
                    generation,
                    clock,
                    duration,
                });

                let mut events = Vec::with_capacity(2);
                if let Some(d) = duration {
                    events.push(event(generation, EngineEventKind::MetadataLoaded { duration: secs(d) }));
                }
                events.push(event(generation, EngineEventKind::TimeUpdate(0.0)));
                events
            }
            Err(e) => vec![event(generation, EngineEventKind::Error(e.to_string()))],
        }
    }

    fn seek(&mut self, seconds: f64, now: Instant) -> Vec<EngineEvent> {
        let Some(source) = self.current.as_mut() else {
            debug!(seconds, "seek without a loaded source");
            return Vec::new();
        };

        let mut target = match Duration::try_from_secs_f64(seconds.max(0.0)) {
            Ok(target) => target,
            Err(e) => {
                warn!(seconds, "seek target out of range");
                return vec![event(
                    source.generation,
                    EngineEventKind::Error(format!("invalid seek position {}: {}", seconds, e)),
                )];
            }
        };
        if let Some(d) = source.duration {
            target = target.min(d);
        }

        if let Err(e) = self.output.seek(target) {
            return vec![event(source.generation, EngineEventKind::Error(e.to_string()))];
        }
        source.clock.seek(target, now);
        vec![event(source.generation, EngineEventKind::TimeUpdate(secs(target)))]
    }

    fn tick(&mut self, now: Instant) -> Vec<EngineEvent> {
        let Some(source) = self.current.as_mut() else {
            return Vec::new();
        };
        if !source.clock.is_running() {
            return Vec::new();
        }

        let position = source.clock.position(now);
        let past_end = source.duration.map(|d| position >= d).unwrap_or(false);

        if past_end || self.output.is_finished() {
            self.output.stop();
            source.clock.reset();
            return vec![event(source.generation, EngineEventKind::Ended)];
        }

        vec![event(source.generation, EngineEventKind::TimeUpdate(secs(position)))]
    }
}

fn run_engine_loop<F: SourceFetcher>(
    command_rx: std_mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    mut engine: EngineLoop<F>,
) {
    let mut next_tick = Instant::now() + TICK_INTERVAL;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        let mut events = match command_rx.recv_timeout(wait) {
            Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => engine.handle(command, Instant::now()),
            Err(RecvTimeoutError::Timeout) => Vec::new(),
        };

        let now = Instant::now();
        if now >= next_tick {
            events.extend(engine.tick(now));
            next_tick = now + TICK_INTERVAL;
        }

        for ev in events {
            // Not in an async context, so block until the state machine has room
            if event_tx.blocking_send(ev).is_err() {
                warn!("failed to send engine event - channel closed?");
                return;
            }
        }
    }
}

/// Without an output, answer every load with an error so the failure
/// shows up in the log next to the track that was toggled.
fn reject_loads(
    command_rx: std_mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    cause: EngineError,
) {
    let message = cause.to_string();
    while let Ok(command) = command_rx.recv() {
        match command {
            EngineCommand::Shutdown => break,
            EngineCommand::Load { generation, .. } => {
                let ev = event(generation, EngineEventKind::Error(message.clone()));
                if event_tx.blocking_send(ev).is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
}

fn event(generation: u64, kind: EngineEventKind) -> EngineEvent {
    EngineEvent { generation, kind }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}
