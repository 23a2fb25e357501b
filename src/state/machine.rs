//! Core state machine implementation
//!
//! Owns the mode, the job and the playback session, and applies every
//! input on a single task: IPC commands, progress ticks, upload outcomes,
//! settle expiries and engine notifications. Timer and network work runs
//! in spawned tasks that only ever report back through `job_tx`, tagged
//! with the submission token they belong to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobStatus};
use super::mode::ProcessingMode;
use super::playback::{PlaybackSession, PlaybackUpdate, PlaybackView, Toggle};
use crate::api::{
    bundle_file_name, track_file_name, ApiClient, ApiError, InputFile, JobResults,
    ProcessingService, TrackKind,
};
use crate::config::Config;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::events::StateEvent;

/// Pause between reaching 100% and showing results
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Timing and output settings for jobs
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub request_timeout: Duration,
    pub settle_delay: Duration,
    pub download_dir: PathBuf,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            settle_delay: SETTLE_DELAY,
            download_dir: config.download_dir.clone(),
        }
    }
}

/// User actions, as forwarded by the IPC server
#[derive(Debug, Clone)]
pub enum Action {
    SetMode(ProcessingMode),
    Submit(InputFile),
    Reset,
    TogglePlay(String),
    Seek(f64),
    Stop,
    DownloadAll,
    DownloadTrack(String),
    Status,
}

/// An action plus the channel its outcome is returned on
#[derive(Debug)]
pub struct Command {
    pub action: Action,
    pub reply: oneshot::Sender<Result<Outcome, ControlError>>,
}

impl Command {
    pub fn new(action: Action) -> (Self, oneshot::Receiver<Result<Outcome, ControlError>>) {
        let (reply, rx) = oneshot::channel();
        (Self { action, reply }, rx)
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Done,
    Status(Snapshot),
    Download(DownloadTicket),
}

/// A download handed off to a background task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTicket {
    pub url: String,
    pub destination: PathBuf,
}

/// Rejected user actions
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("a file is already being processed")]
    AlreadyProcessing,

    #[error("no results available")]
    NoResults,

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("no track is playing")]
    NoActiveTrack,

    #[error("invalid seek position: {0}")]
    InvalidSeek(f64),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ControlError {
    /// Stable error code for IPC clients
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AlreadyProcessing => "already_processing",
            ControlError::NoResults => "no_results",
            ControlError::UnknownTrack(_) => "unknown_track",
            ControlError::NoActiveTrack => "no_active_track",
            ControlError::InvalidSeek(_) => "invalid_seek",
            ControlError::Api(_) => "api_error",
        }
    }
}

/// Full client state, as shown by the front-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub mode: ProcessingMode,
    pub mode_label: String,
    pub headline: String,
    pub job: JobView,
    pub playback: PlaybackView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub status: JobStatus,
    pub progress: u8,
    pub file_name: Option<String>,
    pub error: Option<String>,
    pub job_id: Option<String>,
    /// "Separation Complete" / "Enhancement Complete" once results are in
    pub title: Option<String>,
    pub tracks: Vec<TrackView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub speaker_id: String,
    pub kind: TrackKind,
    pub badge: Option<String>,
    /// Seconds, when the service reported a numeric duration
    pub duration: Option<f64>,
    /// `None` if no URL can be built from the configured base
    pub stream_url: Option<String>,
    pub active: bool,
}

/// Inputs produced by the machine's own timer and network tasks
#[derive(Debug)]
enum JobEvent {
    Tick { token: u64 },
    UploadFinished { token: u64, outcome: Result<JobResults, ApiError> },
    Settled { token: u64, results: JobResults },
}

/// Tasks running on behalf of the current submission
struct InFlight {
    token: u64,
    cancel: CancellationToken,
    ticker: JoinHandle<()>,
}

/// The state machine that owns mode, job and playback
pub struct StateMachine {
    mode: ProcessingMode,
    job: Job,
    playback: PlaybackSession,
    api: ApiClient,
    service: Arc<dyn ProcessingService>,
    settings: JobSettings,
    inflight: Option<InFlight>,
    job_tx: mpsc::Sender<JobEvent>,
    job_rx: Option<mpsc::Receiver<JobEvent>>,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateMachine {
    /// Create a new state machine.
    ///
    /// `api` builds stream and download URLs; `service` runs uploads. In
    /// production both are the same client.
    pub fn new(
        api: ApiClient,
        service: Arc<dyn ProcessingService>,
        engine: Box<dyn PlaybackEngine>,
        settings: JobSettings,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(64);
        Self {
            mode: ProcessingMode::default(),
            job: Job::default(),
            playback: PlaybackSession::new(engine),
            api,
            service,
            settings,
            inflight: None,
            job_tx,
            job_rx: Some(job_rx),
            event_tx,
        }
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Run the state machine until the command channel closes
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        mut engine_rx: mpsc::Receiver<EngineEvent>,
    ) {
        let Some(mut job_rx) = self.job_rx.take() else {
            error!("state machine is already running");
            return;
        };

        info!(mode = %self.mode, "state machine started in Idle state");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = job_rx.recv() => self.handle_job_event(event),
                Some(event) = engine_rx.recv() => self.handle_engine_event(event),
            }
        }

        self.cancel_inflight();
        self.playback.stop();
        info!("state machine stopped");
    }

    pub fn handle_command(&mut self, command: Command) {
        let Command { action, reply } = command;
        let result = self.apply(action);
        if reply.send(result).is_err() {
            debug!("command issuer went away before the reply");
        }
    }

    /// Apply one user action
    pub fn apply(&mut self, action: Action) -> Result<Outcome, ControlError> {
        match action {
            Action::SetMode(mode) => {
                self.switch_mode(mode);
                Ok(Outcome::Done)
            }
            Action::Submit(input) => self.submit(input).map(|_| Outcome::Done),
            Action::Reset => {
                self.reset();
                Ok(Outcome::Done)
            }
            Action::TogglePlay(speaker_id) => self.toggle_play(&speaker_id).map(|_| Outcome::Done),
            Action::Seek(seconds) => self.seek(seconds).map(|_| Outcome::Done),
            Action::Stop => {
                self.stop_playback();
                Ok(Outcome::Done)
            }
            Action::DownloadAll => self.download_all().map(Outcome::Download),
            Action::DownloadTrack(speaker_id) => {
                self.download_track(&speaker_id).map(Outcome::Download)
            }
            Action::Status => Ok(Outcome::Status(self.snapshot())),
        }
    }

    /// Select a mode. Always resets job and playback, even when the mode
    /// is unchanged.
    pub fn switch_mode(&mut self, mode: ProcessingMode) {
        let previous = self.mode;
        if previous == mode {
            debug!(%mode, "mode re-selected, resetting anyway");
        }

        self.reset();
        self.mode = mode;

        info!(from = %previous, to = %mode, "mode switched");
        self.emit(StateEvent::ModeChanged { mode, previous });
    }

    /// Submit a file in the current mode and return its token
    pub fn submit(&mut self, input: InputFile) -> Result<u64, ControlError> {
        if self.job.status() == JobStatus::Processing {
            warn!(token = self.job.token(), "submit rejected, job already processing");
            return Err(ControlError::AlreadyProcessing);
        }

        self.cancel_inflight();
        self.stop_playback();

        let token = self.job.begin(input.clone());
        let mode = self.mode;

        info!(token, %mode, file = %input.name, size = input.size, "job submitted");
        self.emit(StateEvent::JobStarted {
            token,
            mode,
            file_name: input.name.clone(),
        });

        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(token, mode.tick_interval(), self.job_tx.clone()));

        let request = self.service.process(mode, input);
        let tx = self.job_tx.clone();
        let timeout = self.settings.request_timeout;
        let upload_cancel = cancel.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = upload_cancel.cancelled() => {
                    debug!(token, "upload cancelled");
                    return;
                }
                result = tokio::time::timeout(timeout, request) => {
                    result.unwrap_or_else(|_| Err(ApiError::Timeout(timeout.as_secs())))
                }
            };
            let _ = tx.send(JobEvent::UploadFinished { token, outcome }).await;
        });

        self.inflight = Some(InFlight {
            token,
            cancel,
            ticker,
        });

        Ok(token)
    }

    /// Back to idle: drop the job, its in-flight upload, and playback
    pub fn reset(&mut self) {
        self.cancel_inflight();
        self.stop_playback();
        self.job.reset();
        info!("job reset");
        self.emit(StateEvent::JobReset);
    }

    pub fn toggle_play(&mut self, speaker_id: &str) -> Result<(), ControlError> {
        let url = {
            let results = self.job.results().ok_or(ControlError::NoResults)?;
            let track = results
                .track(speaker_id)
                .ok_or_else(|| ControlError::UnknownTrack(speaker_id.to_string()))?;
            self.api.track_url(track)?.to_string()
        };

        let event = match self.playback.toggle(speaker_id, &url) {
            Toggle::Activated { speaker_id } => StateEvent::TrackActivated { speaker_id },
            Toggle::Deactivated { speaker_id } => StateEvent::TrackDeactivated { speaker_id },
        };
        self.emit(event);
        Ok(())
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), ControlError> {
        if !seconds.is_finite() {
            return Err(ControlError::InvalidSeek(seconds));
        }
        if !self.playback.seek(seconds) {
            return Err(ControlError::NoActiveTrack);
        }
        self.emit_position();
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        if let Some(speaker_id) = self.playback.stop() {
            self.emit(StateEvent::PlaybackStopped { speaker_id });
        }
    }

    /// Fetch the ZIP bundle of the current results in the background
    pub fn download_all(&mut self) -> Result<DownloadTicket, ControlError> {
        let job_id = self
            .job
            .results()
            .map(|r| r.job_id.clone())
            .ok_or(ControlError::NoResults)?;

        let url = self.api.bundle_url(&job_id, self.mode)?;
        let destination = self.settings.download_dir.join(bundle_file_name(&job_id));
        Ok(self.spawn_download(url, destination))
    }

    /// Fetch one track's audio in the background
    pub fn download_track(&mut self, speaker_id: &str) -> Result<DownloadTicket, ControlError> {
        let results = self.job.results().ok_or(ControlError::NoResults)?;
        let track = results
            .track(speaker_id)
            .ok_or_else(|| ControlError::UnknownTrack(speaker_id.to_string()))?;

        let url = self.api.track_url(track)?;
        let destination = self.settings.download_dir.join(track_file_name(track));
        Ok(self.spawn_download(url, destination))
    }

    pub fn snapshot(&self) -> Snapshot {
        let results = self.job.results();
        let active = self.playback.active_track();

        let tracks = results
            .map(|r| {
                r.speakers
                    .iter()
                    .map(|track| TrackView {
                        speaker_id: track.speaker_id.clone(),
                        kind: track.kind,
                        badge: track.kind.badge().map(str::to_string),
                        duration: track.duration,
                        stream_url: match self.api.track_url(track) {
                            Ok(url) => Some(url.to_string()),
                            Err(e) => {
                                warn!(speaker_id = %track.speaker_id, error = %e, "no stream URL for track");
                                None
                            }
                        },
                        active: active == Some(track.speaker_id.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Snapshot {
            mode: self.mode,
            mode_label: self.mode.label().to_string(),
            headline: self.mode.headline().to_string(),
            job: JobView {
                status: self.job.status(),
                progress: self.job.progress(),
                file_name: self.job.input().map(|i| i.name.clone()),
                error: self.job.error().map(str::to_string),
                job_id: results.map(|r| r.job_id.clone()),
                title: results.map(|_| self.mode.completion_title().to_string()),
                tracks,
            },
            playback: self.playback.view(),
        }
    }

    fn handle_job_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Tick { token } => {
                if let Some(progress) = self.job.tick(token) {
                    debug!(token, progress, "progress tick");
                    self.emit(StateEvent::ProgressUpdated { progress });
                }
            }
            JobEvent::UploadFinished { token, outcome } => self.finish_upload(token, outcome),
            JobEvent::Settled { token, results } => {
                let job_id = results.job_id.clone();
                let tracks = results.speakers.len();
                if !self.job.complete(token, results) {
                    debug!(token, "discarding stale results");
                    return;
                }
                self.inflight = None;
                // New results replace whatever was playing
                self.stop_playback();
                info!(token, %job_id, tracks, "job completed");
                self.emit(StateEvent::JobCompleted { job_id, tracks });
            }
        }
    }

    fn finish_upload(&mut self, token: u64, outcome: Result<JobResults, ApiError>) {
        // The ticker goes first, whatever order its ticks were delivered in
        if let Some(inflight) = self.inflight.as_ref().filter(|f| f.token == token) {
            inflight.ticker.abort();
        }

        if !self.job.awaits(token) {
            debug!(token, current = self.job.token(), "discarding stale upload response");
            return;
        }

        match outcome {
            Ok(results) => {
                self.job.upload_succeeded(token);
                self.emit(StateEvent::ProgressUpdated { progress: 100 });

                let tx = self.job_tx.clone();
                let delay = self.settings.settle_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(JobEvent::Settled { token, results }).await;
                });
            }
            Err(e) => {
                self.inflight = None;
                let message = e.to_string();
                error!(token, error = %message, "job failed");
                self.job.fail(token, message.clone());
                self.emit(StateEvent::JobFailed { message });
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match self.playback.handle_engine_event(event) {
            Some(PlaybackUpdate::Position {
                current_time,
                duration,
            }) => self.emit(StateEvent::PositionUpdated {
                current_time,
                duration: duration.is_finite().then_some(duration),
            }),
            Some(PlaybackUpdate::Ended { speaker_id }) => {
                info!(%speaker_id, "playback ended");
                self.emit(StateEvent::PlaybackEnded { speaker_id });
            }
            None => {}
        }
    }

    fn cancel_inflight(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            inflight.cancel.cancel();
            inflight.ticker.abort();
            debug!(token = inflight.token, "in-flight submission cancelled");
        }
    }

    fn spawn_download(&self, url: reqwest::Url, destination: PathBuf) -> DownloadTicket {
        let ticket = DownloadTicket {
            url: url.to_string(),
            destination: destination.clone(),
        };
        info!(url = %ticket.url, destination = %destination.display(), "download started");
        self.emit(StateEvent::DownloadStarted {
            url: ticket.url.clone(),
            destination: destination.clone(),
        });

        let api = self.api.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let raw_url = url.to_string();
            let event = match api.download_to(url, &destination).await {
                Ok(bytes) => {
                    info!(destination = %destination.display(), bytes, "download finished");
                    StateEvent::DownloadFinished { destination, bytes }
                }
                Err(e) => {
                    warn!(url = %raw_url, error = %e, "download failed");
                    StateEvent::DownloadFailed {
                        url: raw_url,
                        message: e.to_string(),
                    }
                }
            };
            let _ = event_tx.send(event);
        });

        ticket
    }

    fn emit_position(&self) {
        let view = self.playback.view();
        self.emit(StateEvent::PositionUpdated {
            current_time: view.current_time,
            duration: view.duration,
        });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting state event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Send a tick for `token` every `period`, starting one period from now
async fn run_ticker(token: u64, period: Duration, tx: mpsc::Sender<JobEvent>) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        interval.tick().await;
        if tx.send(JobEvent::Tick { token }).await.is_err() {
            break;
        }
    }
}
