//! Connection server
//!
//! Accepts TCP connections and runs one request/response loop per
//! connection: read a frame, decode the command, dispatch it to the
//! [`JobManager`], write the rendered reply. A `shutdown` command closes the
//! listener; connections already open get the shutdown timeout to finish,
//! then every job loop is cancelled and awaited.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::jobs::JobManager;
use crate::protocol::{Command, CommandCodec, FrameError, Reply, UNKNOWN_COMMAND, read_frame, write_frame};

/// Reply sent to the client that requested shutdown
const SHUTTING_DOWN: &str = "Сервер выключается";

/// Everything a connection task needs
#[derive(Debug)]
struct Shared {
    manager: Arc<JobManager>,
    codec: CommandCodec,
    max_frame_size: usize,
    shutdown: CancellationToken,
}

/// TCP server for the job protocol
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    tracker: TaskTracker,
    drain_timeout: Duration,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(
        addr: impl ToSocketAddrs,
        manager: Arc<JobManager>,
        codec: CommandCodec,
        max_frame_size: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("Failed to bind server socket")?;
        debug!(local_addr = ?listener.local_addr().ok(), "Server::bind: socket bound");
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                manager,
                codec,
                max_frame_size,
                shutdown: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
            drain_timeout: Duration::from_secs(10),
        })
    }

    /// How long to wait for open connections after the listener closes
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    /// Token that stops the accept loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Accept connections until shutdown, then wind everything down
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            shared,
            tracker,
            drain_timeout,
        } = self;
        info!(local_addr = ?listener.local_addr().ok(), "Server accepting connections");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            info!(%peer, "Client connected");
                            let shared = Arc::clone(&shared);
                            tracker.spawn(async move {
                                if let Err(e) = handle_connection(stream, &shared).await {
                                    warn!(%peer, error = %e, "Connection error");
                                }
                                info!(%peer, "Client disconnected");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept error");
                        }
                    }
                }

                _ = shared.shutdown.cancelled() => {
                    debug!("run: shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        info!("Listener closed");

        tracker.close();
        if tokio::time::timeout(drain_timeout, tracker.wait()).await.is_err() {
            warn!(open = tracker.len(), "Connections still open after drain timeout");
        }

        shared.manager.shutdown().await;
        info!("Server shutdown complete");
        Ok(())
    }
}

/// Serve one client until it hangs up, a frame fails, or it asks to shut down
async fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    loop {
        let payload = match read_frame(&mut stream, shared.max_frame_size).await {
            Ok(payload) => payload,
            Err(FrameError::ConnectionClosed) => {
                debug!("handle_connection: peer closed the stream");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to read frame"),
        };

        let (reply, shutdown) = dispatch(shared, &payload).await?;
        write_frame(&mut stream, reply.render().as_bytes())
            .await
            .context("Failed to write reply")?;

        if shutdown {
            info!("Shutdown requested by client");
            shared.shutdown.cancel();
            return Ok(());
        }
    }
}

/// Decode a payload and run it, returning the reply and whether to shut down
async fn dispatch(shared: &Shared, payload: &[u8]) -> Result<(Reply, bool)> {
    let command = match shared.codec.decode(payload) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "dispatch: malformed command");
            return Ok((e.to_reply(), false));
        }
    };
    debug!(command = command.name(), "dispatch: decoded command");

    let manager = &shared.manager;
    let reply = match command {
        Command::Add {
            name,
            filename,
            launch_command,
            interval_ms,
            file_contents,
        } => {
            manager
                .add(&name, &filename, &launch_command, interval_ms, &file_contents)
                .await?
        }
        Command::Remove { name } => manager.remove(&name).await?,
        Command::Start { name } => manager.start(&name).await?,
        Command::Stop { name } => manager.stop(&name).await?,
        Command::List => manager.list().await?,
        Command::Get { name } => manager.get_result(&name).await?,
        Command::Shutdown => return Ok((Reply::message(SHUTTING_DOWN), true)),
        Command::Unknown { name } => {
            debug!(%name, "dispatch: unknown command");
            Reply::message(UNKNOWN_COMMAND)
        }
    };
    Ok((reply, false))
}
