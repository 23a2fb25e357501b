//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! state change events to subscribed clients. Requests are forwarded to
//! the state machine as commands; the server keeps no job state itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::InputFile;
use crate::events::StateEvent;
use crate::state::{Action, Command, Outcome};

use super::protocol::{ClientStatus, Notification, Request, Response};

/// Largest accepted request frame
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frames queued per client before writes apply backpressure
const OUTBOX_CAPACITY: usize = 64;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    start_time: Instant,
    /// Commands to the state machine
    commands: mpsc::Sender<Command>,
    /// Source of notifications for subscribed clients
    events: broadcast::Sender<StateEvent>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            start_time: Instant::now(),
            commands,
            events,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();

        // Responses and notifications share one ordered outbox
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTBOX_CAPACITY);
        let writer_task = tokio::spawn(Self::write_frames(writer, out_rx));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = Self::serve_requests(&mut reader, &state, &out_tx, &mut forwarder).await;

        if let Some(task) = forwarder {
            task.abort();
        }
        drop(out_tx);
        if let Err(e) = writer_task.await {
            debug!(?e, "writer task ended abnormally");
        }

        result
    }

    /// Read length-prefixed requests until the client disconnects
    async fn serve_requests(
        reader: &mut OwnedReadHalf,
        state: &Arc<ServerState>,
        out_tx: &mpsc::Sender<Vec<u8>>,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    if matches!(request, Request::Subscribe) && forwarder.is_none() {
                        *forwarder = Some(tokio::spawn(Self::forward_events(
                            state.events.subscribe(),
                            out_tx.clone(),
                        )));
                        debug!("client subscribed to notifications");
                    }
                    Self::process_request(request, state).await
                }
                Err(e) => {
                    warn!(?e, "failed to parse request");
                    Response::error("bad_request", e.to_string())
                }
            };

            if out_tx.send(encode_frame(&response)?).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &Arc<ServerState>) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Subscribe => Response::Subscribed,

            Request::GetStatus => Self::dispatch(state, Action::Status).await,

            Request::SetMode { mode } => Self::dispatch(state, Action::SetMode(mode)).await,

            Request::Submit { path } => match InputFile::inspect(&path) {
                Ok(input) => Self::dispatch(state, Action::Submit(input)).await,
                Err(e) => {
                    info!(error = %e, "submission rejected");
                    Response::error("invalid_input", e.to_string())
                }
            },

            Request::Reset => Self::dispatch(state, Action::Reset).await,

            Request::TogglePlay { speaker_id } => {
                Self::dispatch(state, Action::TogglePlay(speaker_id)).await
            }

            Request::Seek { seconds } => Self::dispatch(state, Action::Seek(seconds)).await,

            Request::Stop => Self::dispatch(state, Action::Stop).await,

            Request::DownloadAll => Self::dispatch(state, Action::DownloadAll).await,

            Request::DownloadTrack { speaker_id } => {
                Self::dispatch(state, Action::DownloadTrack(speaker_id)).await
            }
        }
    }

    /// Hand an action to the state machine and wait for its outcome
    async fn dispatch(state: &Arc<ServerState>, action: Action) -> Response {
        let (command, reply) = Command::new(action);

        if state.commands.send(command).await.is_err() {
            return Response::error("unavailable", "state machine is not running");
        }

        match reply.await {
            Ok(Ok(Outcome::Done)) => Response::Accepted,
            Ok(Ok(Outcome::Status(snapshot))) => Response::Status(ClientStatus::new(
                snapshot,
                state.start_time.elapsed().as_secs(),
            )),
            Ok(Ok(Outcome::Download(ticket))) => Response::Download {
                url: ticket.url,
                destination: ticket.destination,
            },
            Ok(Err(e)) => Response::error(e.code(), e.to_string()),
            Err(_) => Response::error("unavailable", "state machine dropped the request"),
        }
    }

    /// Push state events to a subscribed client
    async fn forward_events(mut events: broadcast::Receiver<StateEvent>, out_tx: mpsc::Sender<Vec<u8>>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let frame = match encode_frame(&Notification::Event { event }) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(?e, "failed to encode notification");
                            continue;
                        }
                    };
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Drain the outbox onto the socket
    async fn write_frames(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!(?e, "client write failed");
                break;
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Length-prefixed JSON frame
fn encode_frame<T: serde::Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let len = u32::try_from(body.len()).context("message too large")?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlError;

    async fn send(stream: &mut UnixStream, request: &Request) {
        stream.write_all(&encode_frame(request).unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> serde_json::Value {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Stand-in for the state machine: accepts everything except toggles
    fn spawn_responder(mut commands: mpsc::Receiver<Command>) {
        tokio::spawn(async move {
            while let Some(Command { action, reply }) = commands.recv().await {
                let result = match action {
                    Action::TogglePlay(_) => Err(ControlError::NoResults),
                    _ => Ok(Outcome::Done),
                };
                let _ = reply.send(result);
            }
        });
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("arya-ipc-{}-{}.sock", name, std::process::id()))
    }

    async fn start(name: &str) -> (Arc<Server>, broadcast::Sender<StateEvent>, PathBuf) {
        let path = socket_path(name);
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(16);
        spawn_responder(command_rx);

        let server = Arc::new(Server::new(&path, command_tx, event_tx.clone()).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });
        (server, event_tx, path)
    }

    #[tokio::test]
    async fn test_ping_and_errors() {
        let (server, _events, path) = start("ping").await;
        let mut client = UnixStream::connect(&path).await.unwrap();

        send(&mut client, &Request::Ping).await;
        assert_eq!(recv(&mut client).await["type"], "pong");

        send(&mut client, &Request::Reset).await;
        assert_eq!(recv(&mut client).await["type"], "accepted");

        send(
            &mut client,
            &Request::TogglePlay {
                speaker_id: "A".to_string(),
            },
        )
        .await;
        let reply = recv(&mut client).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "no_results");

        send(
            &mut client,
            &Request::Submit {
                path: PathBuf::from("/definitely/not/here.wav"),
            },
        )
        .await;
        let reply = recv(&mut client).await;
        assert_eq!(reply["code"], "invalid_input");

        server.shutdown().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (server, _events, path) = start("malformed").await;
        let mut client = UnixStream::connect(&path).await.unwrap();

        let body = br#"{"type":"launch_rockets"}"#;
        client.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();
        let reply = recv(&mut client).await;
        assert_eq!(reply["code"], "bad_request");

        // Connection is still usable
        send(&mut client, &Request::Ping).await;
        assert_eq!(recv(&mut client).await["type"], "pong");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_receives_events() {
        let (server, events, path) = start("subscribe").await;
        let mut client = UnixStream::connect(&path).await.unwrap();

        send(&mut client, &Request::Subscribe).await;
        assert_eq!(recv(&mut client).await["type"], "subscribed");

        // The receiver is attached before the confirmation goes out
        assert_eq!(events.receiver_count(), 1);
        events.send(StateEvent::ProgressUpdated { progress: 35 }).unwrap();

        let note = recv(&mut client).await;
        assert_eq!(note["type"], "event");
        assert_eq!(note["event"]["type"], "progress_updated");
        assert_eq!(note["event"]["progress"], 35);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let (server, _events, path) = start("oversized").await;
        let mut client = UnixStream::connect(&path).await.unwrap();

        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        let read = client.read(&mut buf).await.unwrap();
        assert_eq!(read, 0);

        server.shutdown().await;
    }
}
