//! Runs shell commands, scripts and privileged actions on behalf of
//! the server.
//!
//! Every invocation reports exactly two phases upstream: one
//! `executing` acknowledgment before work begins and one terminal
//! `completed`/`failed` result. Output is collected in full; there is
//! no incremental streaming for these command kinds.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use fleet_shared::command::{CommandKind, CommandStatus};
use fleet_shared::protocol::AgentMessage;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(unix)]
const SCRIPT_SUFFIX: &str = ".sh";
#[cfg(windows)]
const SCRIPT_SUFFIX: &str = ".ps1";

/// Terminal result of one command invocation. An error always resolves
/// to a `failed` status; it never propagates further up the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecOutcome {
    fn failed(error: String) -> Self {
        Self {
            output: None,
            error: Some(error),
        }
    }

    pub fn status(&self) -> CommandStatus {
        if self.error.is_some() {
            CommandStatus::Failed
        } else {
            CommandStatus::Completed
        }
    }
}

pub struct CommandExecutor {
    timeout: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs one dispatched command and reports both phases over `tx`.
    pub async fn execute(
        &self,
        command_id: &str,
        kind: CommandKind,
        command: &str,
        tx: &mpsc::UnboundedSender<AgentMessage>,
    ) {
        debug!(%command_id, %kind, "executing command");
        let _ = tx.send(AgentMessage::CommandResult {
            command_id: command_id.to_string(),
            status: CommandStatus::Executing,
            output: None,
            error: None,
        });

        let outcome = match kind {
            CommandKind::Shell => self.run_shell(command).await,
            CommandKind::Script => self.run_script(command).await,
            CommandKind::Reboot | CommandKind::Shutdown => run_privileged(kind),
        };

        let _ = tx.send(AgentMessage::CommandResult {
            command_id: command_id.to_string(),
            status: outcome.status(),
            output: outcome.output,
            error: outcome.error,
        });
    }

    /// Runs `command` through the platform default shell interpreter.
    pub async fn run_shell(&self, command: &str) -> ExecOutcome {
        let mut cmd = shell_command(command);
        self.run_with_timeout(cmd.stdin(Stdio::null())).await
    }

    /// Writes `body` to a uniquely named temp file and executes it. The
    /// temp file is removed on every exit path: success, failure and
    /// timeout alike (it lives exactly as long as this scope).
    pub async fn run_script(&self, body: &str) -> ExecOutcome {
        self.run_script_in(&std::env::temp_dir(), body).await
    }

    pub async fn run_script_in(&self, dir: &Path, body: &str) -> ExecOutcome {
        let script = match tempfile::Builder::new()
            .prefix("fleet_script_")
            .suffix(SCRIPT_SUFFIX)
            .tempfile_in(dir)
        {
            Ok(script) => script,
            Err(e) => return ExecOutcome::failed(format!("Failed to create script file: {e}")),
        };
        if let Err(e) = std::fs::write(script.path(), body) {
            return ExecOutcome::failed(format!("Failed to write script file: {e}"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::Permissions::from_mode(0o755);
            if let Err(e) = std::fs::set_permissions(script.path(), mode) {
                return ExecOutcome::failed(format!("Failed to mark script executable: {e}"));
            }
        }

        let mut cmd = script_command(script.path());
        self.run_with_timeout(cmd.stdin(Stdio::null())).await
    }

    /// Spawns the prepared command, enforcing the timeout. On timeout
    /// the subprocess is killed and whatever output it produced so far
    /// is still returned alongside the timeout error.
    async fn run_with_timeout(&self, cmd: &mut Command) -> ExecOutcome {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecOutcome::failed(format!("Failed to spawn command: {e}")),
        };

        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let stdout_task = tokio::spawn(read_stream(stdout));
        let stderr_task = tokio::spawn(read_stream(stderr));

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let output = collect(stdout_task).await;
                let stderr_text = collect(stderr_task).await;
                if status.success() {
                    ExecOutcome {
                        output: non_empty(output),
                        error: None,
                    }
                } else {
                    let error = if stderr_text.trim().is_empty() {
                        format!("Exit code: {}", status.code().unwrap_or(-1))
                    } else {
                        stderr_text
                    };
                    ExecOutcome {
                        output: non_empty(output),
                        error: Some(error),
                    }
                }
            }
            Ok(Err(e)) => ExecOutcome::failed(format!("Failed to wait for command: {e}")),
            Err(_) => {
                // killing closes the pipes; the readers then drain what
                // was produced before the deadline
                let _ = child.kill().await;
                let output = collect(stdout_task).await;
                let stderr_text = collect(stderr_task).await;
                let error = if stderr_text.trim().is_empty() {
                    "Command timed out".to_string()
                } else {
                    format!("Command timed out: {}", stderr_text.trim())
                };
                ExecOutcome {
                    output: non_empty(output),
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn script_command(path: &Path) -> Command {
    Command::new(path)
}

#[cfg(windows)]
fn script_command(path: &Path) -> Command {
    let mut cmd = Command::new("powershell");
    cmd.arg("-ExecutionPolicy").arg("Bypass").arg("-File").arg(path);
    cmd
}

/// Accepts the platform reboot/shutdown request without waiting for
/// the OS to actually go down.
fn run_privileged(kind: CommandKind) -> ExecOutcome {
    let (mut cmd, message) = privileged_command(kind);
    match cmd.spawn() {
        Ok(_child) => ExecOutcome {
            output: Some(message.to_string()),
            error: None,
        },
        Err(e) => ExecOutcome::failed(format!("Failed to invoke {kind}: {e}")),
    }
}

#[cfg(unix)]
fn privileged_command(kind: CommandKind) -> (Command, &'static str) {
    match kind {
        CommandKind::Shutdown => {
            let mut cmd = Command::new("shutdown");
            cmd.arg("-h").arg("now");
            (cmd, "Shutdown initiated")
        }
        _ => (Command::new("reboot"), "Reboot initiated"),
    }
}

#[cfg(windows)]
fn privileged_command(kind: CommandKind) -> (Command, &'static str) {
    let mut cmd = Command::new("shutdown");
    match kind {
        CommandKind::Shutdown => {
            cmd.arg("/s").arg("/t").arg("0");
            (cmd, "Shutdown initiated")
        }
        _ => {
            cmd.arg("/r").arg("/t").arg("0");
            (cmd, "Reboot initiated")
        }
    }
}

async fn read_stream(mut reader: impl AsyncReadExt + Unpin) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

async fn collect(task: JoinHandle<Vec<u8>>) -> String {
    let bytes = task.await.unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}
