//! The agent's single persistent connection to the server.
//!
//! Lifecycle is cyclic: `disconnected -> connecting -> connected ->
//! disconnected`. Entering `connected` resets the retry counter, sends
//! the registration handshake and starts the heartbeat and telemetry
//! tickers; any disconnect cancels both tickers and schedules a
//! reconnect with linear backoff. Once the attempt cap is exhausted
//! the process fails fast with a nonzero exit, leaving recovery to
//! external supervision.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, sleep};
use tokio::{pin, signal};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleet_shared::protocol::{AgentMessage, ServerMessage};

use crate::config::Config;
use crate::executor::CommandExecutor;
use crate::shell::ShellMultiplexer;
use crate::{files, packages, syslog, system_metrics};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backoff before reconnect attempt `attempt` (1-based): linear in the
/// attempt count, clipped at the ceiling.
pub fn reconnect_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt).min(cap)
}

/// Runs the agent until the connection is permanently lost or a
/// shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    info!(machine_id = %config.machine_id, "Running agent");
    let link = AgentLink::new(config);

    let shutdown = signal::ctrl_c();
    pin!(shutdown);
    tokio::select! {
        result = link.run() => result,
        _ = &mut shutdown => {
            info!("Received shutdown signal, stopping agent");
            link.shells.close_all();
            Ok(())
        }
    }
}

pub struct AgentLink {
    config: Config,
    executor: Arc<CommandExecutor>,
    shells: Arc<ShellMultiplexer>,
}

impl AgentLink {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            executor: Arc::new(CommandExecutor::new()),
            shells: Arc::new(ShellMultiplexer::new()),
        }
    }

    /// Connect-serve-reconnect loop. Returns an error only once the
    /// reconnect budget is spent; the caller turns that into a nonzero
    /// process exit.
    pub async fn run(&self) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            info!(url = %self.config.server_url, "connecting to server");
            match connect_async(self.config.websocket_url()).await {
                Ok((ws, _)) => {
                    attempts = 0;
                    info!("connected to server");
                    match self.serve_connection(ws).await {
                        Ok(()) => info!("connection closed by server"),
                        Err(e) => warn!("connection lost: {e:#}"),
                    }
                }
                Err(e) => warn!("connect failed: {e}"),
            }

            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                error!(
                    "max reconnect attempts reached ({}), giving up",
                    self.config.max_reconnect_attempts
                );
                bail!(
                    "exhausted {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
            }
            let delay = reconnect_delay(
                self.config.reconnect_base(),
                self.config.reconnect_cap(),
                attempts,
            );
            info!(
                attempt = attempts,
                "reconnecting in {} seconds",
                delay.as_secs()
            );
            sleep(delay).await;
        }
    }

    /// Serves one established connection until it drops.
    async fn serve_connection(&self, ws: WsStream) -> Result<()> {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentMessage>();
        let cancel = CancellationToken::new();

        // registration handshake goes out before any other traffic
        let facts = system_metrics::collect_host_facts()
            .await
            .context("Failed to collect host facts")?;
        let _ = tx.send(AgentMessage::Register { data: facts });

        // writer: the single ordered path onto the socket
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        });

        self.spawn_heartbeat(tx.clone(), cancel.clone());
        self.spawn_telemetry(tx.clone(), cancel.clone());

        // inbound loop: a malformed frame is logged and dropped, the
        // connection stays open
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => self.dispatch(message, &tx),
                        Err(e) => warn!(error = %e, "discarding malformed server frame"),
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    cancel.cancel();
                    writer.abort();
                    return Err(e).context("websocket error");
                }
            }
        }

        // deterministic teardown of both tickers on every exit path
        cancel.cancel();
        writer.abort();
        Ok(())
    }

    fn spawn_heartbeat(&self, tx: mpsc::UnboundedSender<AgentMessage>, cancel: CancellationToken) {
        let period = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if tx.send(AgentMessage::Heartbeat).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Telemetry fires once immediately, then on the configured period.
    fn spawn_telemetry(&self, tx: mpsc::UnboundedSender<AgentMessage>, cancel: CancellationToken) {
        let period = self.config.metrics_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        send_metrics(&tx).await;
                        if tx.is_closed() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Routes one inbound message. Slow work (commands, collectors)
    /// moves to its own task so it can never stall the socket loop.
    fn dispatch(&self, message: ServerMessage, tx: &mpsc::UnboundedSender<AgentMessage>) {
        match message {
            ServerMessage::Connected { machine_id } => {
                debug!(%machine_id, "server acknowledged connection");
            }
            ServerMessage::ExecuteCommand {
                command_id,
                command_type,
                command,
            } => {
                let executor = self.executor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    executor
                        .execute(&command_id, command_type, &command, &tx)
                        .await;
                });
            }
            ServerMessage::GetFileListing { request_id, path } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let message = match files::list_directory(&path).await {
                        Ok(files) => AgentMessage::FileListing {
                            request_id,
                            path,
                            files: Some(files),
                            error: None,
                        },
                        Err(e) => AgentMessage::FileListing {
                            request_id,
                            path,
                            files: None,
                            error: Some(e.to_string()),
                        },
                    };
                    let _ = tx.send(message);
                });
            }
            ServerMessage::GetFileContent { request_id, path } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let message = match files::read_content(&path).await {
                        Ok(content) => AgentMessage::FileContent {
                            request_id: Some(request_id),
                            path,
                            content: Some(content),
                            error: None,
                            is_binary: false,
                        },
                        Err(e) => AgentMessage::FileContent {
                            request_id: Some(request_id),
                            path,
                            content: None,
                            error: Some(e.to_string()),
                            is_binary: false,
                        },
                    };
                    let _ = tx.send(message);
                });
            }
            ServerMessage::UploadFile {
                destination_path,
                content,
            } => {
                tokio::spawn(async move {
                    match files::write_upload(&destination_path, &content).await {
                        Ok(()) => info!(path = %destination_path, "file uploaded"),
                        Err(e) => warn!(path = %destination_path, error = %e, "file upload failed"),
                    }
                });
            }
            ServerMessage::DownloadFile { source_path } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match files::read_download(&source_path).await {
                        Ok(content) => {
                            let _ = tx.send(AgentMessage::FileContent {
                                request_id: None,
                                path: source_path,
                                content: Some(content),
                                error: None,
                                is_binary: true,
                            });
                        }
                        Err(e) => warn!(path = %source_path, error = %e, "file download failed"),
                    }
                });
            }
            ServerMessage::ShellInput { session_id, input } => {
                self.shells.input(&session_id, input, tx);
            }
            ServerMessage::CloseShell { session_id } => {
                self.shells.close(&session_id);
            }
            ServerMessage::InstallPackage { package_name } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match packages::install(&package_name).await {
                        Ok(_) => info!(%package_name, "package installed"),
                        Err(e) => warn!(%package_name, error = %e, "package install failed"),
                    }
                    send_packages(&tx).await;
                });
            }
            ServerMessage::UninstallPackage { package_name } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match packages::uninstall(&package_name).await {
                        Ok(_) => info!(%package_name, "package uninstalled"),
                        Err(e) => warn!(%package_name, error = %e, "package uninstall failed"),
                    }
                    send_packages(&tx).await;
                });
            }
            ServerMessage::UpdatePackages => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match packages::update_all().await {
                        Ok(_) => info!("packages updated"),
                        Err(e) => warn!(error = %e, "package update failed"),
                    }
                    send_packages(&tx).await;
                });
            }
            ServerMessage::RequestMetrics => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    send_metrics(&tx).await;
                });
            }
            ServerMessage::RequestLogs { hours } => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let data = syslog::collect(hours).await;
                    let _ = tx.send(AgentMessage::Logs { data });
                });
            }
            ServerMessage::RequestPackages => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    send_packages(&tx).await;
                });
            }
        }
    }
}

async fn send_metrics(tx: &mpsc::UnboundedSender<AgentMessage>) {
    match system_metrics::collect_metrics().await {
        Ok(data) => {
            let _ = tx.send(AgentMessage::Metrics { data });
        }
        Err(e) => warn!(error = %e, "failed to collect metrics"),
    }
}

async fn send_packages(tx: &mpsc::UnboundedSender<AgentMessage>) {
    let data = packages::list_installed().await;
    let _ = tx.send(AgentMessage::Packages { data });
}
