//! Unix domain socket server for IPC
//!
//! Provides request-response access to the coordinator's commands and pushes
//! every voice event to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::protocol::{Notification, Request, Response, ShellStatus, MAX_MESSAGE_LEN};
use crate::events::{Subscription, VoiceEvent};
use crate::session::VoiceSessionCoordinator;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    coordinator: Arc<VoiceSessionCoordinator>,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, coordinator: Arc<VoiceSessionCoordinator>) -> Result<Self> {
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
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            coordinator,
            start_time: Instant::now(),
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
                    let coordinator = Arc::clone(&self.coordinator);
                    let start_time = self.start_time;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, coordinator, start_time) => {
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
    async fn handle_client(
        stream: UnixStream,
        coordinator: Arc<VoiceSessionCoordinator>,
        start_time: Instant,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Reads are not cancel-safe, so they get their own task
        let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(16);
        let reader_task = tokio::spawn(async move {
            loop {
                let body = match read_frame(&mut reader).await {
                    Ok(Some(body)) => body,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?e, "failed to read request");
                        break;
                    }
                };
                let request = serde_json::from_slice::<Request>(&body).map_err(|e| e.to_string());
                if request_tx.send(request).await.is_err() {
                    break;
                }
            }
        });

        let mut subscription: Option<Subscription> = None;

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let request = match request {
                        Some(Ok(request)) => request,
                        Some(Err(message)) => {
                            warn!(%message, "malformed request");
                            let response = Response::Error {
                                code: "bad_request".to_string(),
                                message,
                            };
                            write_frame(&mut writer, &response).await?;
                            continue;
                        }
                        None => {
                            debug!("client disconnected");
                            break;
                        }
                    };

                    debug!(?request, "received request");

                    let (response, subscribe) =
                        Self::process_request(request, &coordinator, start_time).await;
                    if subscribe && subscription.is_none() {
                        subscription = Some(coordinator.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    write_frame(&mut writer, &response).await?;
                }
                event = next_event(&mut subscription) => match event {
                    Some(event) => {
                        write_frame(&mut writer, &Notification::Event { event }).await?;
                    }
                    None => subscription = None,
                },
            }
        }

        reader_task.abort();
        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        coordinator: &VoiceSessionCoordinator,
        start_time: Instant,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let status = ShellStatus::new(coordinator.status(), start_time.elapsed().as_secs());
                (Response::Status(status), false)
            }

            Request::StartTurn => (coordinator.start_turn().await.into(), false),

            Request::StopTurn => (coordinator.stop_turn().await.into(), false),

            Request::Interrupt => (coordinator.interrupt().await.into(), false),

            Request::SetWakeWordEnabled { enabled } => {
                info!(enabled, "wake word toggled via IPC");
                (coordinator.set_wake_word_enabled(enabled).await.into(), false)
            }

            Request::Reset => (coordinator.reset().await.into(), false),

            Request::Subscribe => (Response::Subscribed, true),
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

async fn next_event(subscription: &mut Option<Subscription>) -> Option<VoiceEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed message body; `None` on clean disconnect
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
