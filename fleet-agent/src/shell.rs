//! Interactive shell sessions multiplexed over the agent's single
//! connection.
//!
//! A session is created lazily by the first `shell_input` for an
//! unseen session id and owns exactly one subprocess. Output is pure
//! passthrough: chunks are forwarded upstream as they arrive, tagged
//! with the session id and an error-channel flag, with no buffering or
//! coalescing.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fleet_shared::protocol::AgentMessage;

/// Grace delay before the triggering input is written into a freshly
/// spawned subprocess, so the write cannot land before its stdin is
/// ready. A sequencing guard, not a debounce.
pub const SPAWN_GRACE: Duration = Duration::from_millis(500);

struct ShellSession {
    epoch: u64,
    stdin_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Session id -> live subprocess. Never more than one subprocess per
/// id: creation goes through the map's entry lock, so racing inputs
/// for the same unseen id cannot double-spawn.
pub struct ShellMultiplexer {
    sessions: Arc<DashMap<String, ShellSession>>,
    next_epoch: AtomicU64,
    grace: Duration,
}

impl Default for ShellMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellMultiplexer {
    pub fn new() -> Self {
        Self::with_grace(SPAWN_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_epoch: AtomicU64::new(1),
            grace,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Routes input to the session's subprocess, spawning it first if
    /// this id has not been seen. Input racing a teardown still goes to
    /// the not-yet-removed subprocess rather than spawning a second one.
    pub fn input(&self, session_id: &str, input: String, tx: &mpsc::UnboundedSender<AgentMessage>) {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(entry) => {
                let _ = entry.get().stdin_tx.send(input);
            }
            Entry::Vacant(slot) => match self.spawn_session(session_id, tx.clone()) {
                Ok(session) => {
                    let _ = session.stdin_tx.send(input);
                    slot.insert(session);
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "failed to spawn shell");
                    let _ = tx.send(AgentMessage::ShellOutput {
                        session_id: session_id.to_string(),
                        output: format!("Failed to start shell: {e}\n"),
                        is_error: true,
                        is_complete: Some(true),
                    });
                }
            },
        }
    }

    /// Kills the subprocess immediately and removes the session. No
    /// terminal marker is emitted on this path.
    pub fn close(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            debug!(%session_id, "closing shell session");
            session.cancel.cancel();
        }
    }

    /// Tears down every live session (agent shutdown).
    pub fn close_all(&self) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.close(&id);
        }
    }

    fn spawn_session(
        &self,
        session_id: &str,
        tx: mpsc::UnboundedSender<AgentMessage>,
    ) -> std::io::Result<ShellSession> {
        let mut child = interactive_shell()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        debug!(%session_id, "spawned interactive shell");

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let stdout_task = tokio::spawn(forward_output(
            stdout,
            session_id.to_string(),
            false,
            tx.clone(),
        ));
        let stderr_task = tokio::spawn(forward_output(
            stderr,
            session_id.to_string(),
            true,
            tx.clone(),
        ));

        tokio::spawn(drive_session(
            child,
            session_id.to_string(),
            epoch,
            self.grace,
            stdin_rx,
            cancel.clone(),
            tx,
            self.sessions.clone(),
            [stdout_task, stderr_task],
        ));

        Ok(ShellSession {
            epoch,
            stdin_tx,
            cancel,
        })
    }
}

#[cfg(unix)]
fn interactive_shell() -> Command {
    Command::new(std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()))
}

#[cfg(windows)]
fn interactive_shell() -> Command {
    Command::new("powershell.exe")
}

/// Owns the subprocess for one session: feeds stdin, waits for exit,
/// and releases the handle on both teardown paths.
#[allow(clippy::too_many_arguments)]
async fn drive_session(
    mut child: Child,
    session_id: String,
    epoch: u64,
    grace: Duration,
    mut stdin_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<AgentMessage>,
    sessions: Arc<DashMap<String, ShellSession>>,
    output_tasks: [tokio::task::JoinHandle<()>; 2],
) {
    // let the subprocess's stdin become ready before the triggering
    // input (and anything queued behind it) is written
    sleep(grace).await;

    let mut stdin_open = true;
    loop {
        tokio::select! {
            // explicit close: kill now, no terminal marker
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return;
            }
            // natural exit: drain both output streams, then exactly one
            // terminal marker, then the session goes
            status = child.wait() => {
                debug!(%session_id, ?status, "shell session ended");
                for task in output_tasks {
                    let _ = task.await;
                }
                let _ = tx.send(AgentMessage::ShellOutput {
                    session_id: session_id.clone(),
                    output: String::new(),
                    is_error: false,
                    is_complete: Some(true),
                });
                sessions.remove_if(&session_id, |_, session| session.epoch == epoch);
                return;
            }
            input = stdin_rx.recv(), if stdin_open => {
                match input {
                    Some(input) => {
                        if let Some(stdin) = child.stdin.as_mut() {
                            if stdin.write_all(input.as_bytes()).await.is_err() {
                                debug!(%session_id, "shell stdin closed");
                            } else {
                                let _ = stdin.flush().await;
                            }
                        }
                    }
                    None => stdin_open = false,
                }
            }
        }
    }
}

async fn forward_output(
    mut reader: impl AsyncReadExt + Unpin,
    session_id: String,
    is_error: bool,
    tx: mpsc::UnboundedSender<AgentMessage>,
) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let _ = tx.send(AgentMessage::ShellOutput {
                    session_id: session_id.clone(),
                    output: String::from_utf8_lossy(&buf[..n]).into_owned(),
                    is_error,
                    is_complete: None,
                });
            }
        }
    }
}
