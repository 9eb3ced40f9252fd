use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Shell,
    Script,
    Reboot,
    Shutdown,
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Shell => write!(f, "shell"),
            CommandKind::Script => write!(f, "script"),
            CommandKind::Reboot => write!(f, "reboot"),
            CommandKind::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Lifecycle of a command record. Advances forward only:
/// `pending -> executing -> completed | failed`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }

    /// Whether moving from `self` to `next` follows the forward-only
    /// transition table. Skipping `executing` is allowed (an agent may
    /// fail before acknowledging); regressing or leaving a terminal
    /// state is not.
    pub fn can_advance_to(self, next: CommandStatus) -> bool {
        match (self, next) {
            (CommandStatus::Pending, CommandStatus::Executing)
            | (CommandStatus::Pending, CommandStatus::Completed)
            | (CommandStatus::Pending, CommandStatus::Failed)
            | (CommandStatus::Executing, CommandStatus::Completed)
            | (CommandStatus::Executing, CommandStatus::Failed) => true,
            _ => false,
        }
    }
}

impl Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandStatus::Pending => write!(f, "pending"),
            CommandStatus::Executing => write!(f, "executing"),
            CommandStatus::Completed => write!(f, "completed"),
            CommandStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Dispatch target: one machine, or a group whose membership is
/// snapshotted at dispatch time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandTarget {
    Machine { id: String },
    Group { id: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommandRecord {
    pub id: String,
    pub kind: CommandKind,
    pub command: String,
    pub target: CommandTarget,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommandRecord {
    pub fn new(id: String, kind: CommandKind, command: String, target: CommandTarget) -> Self {
        Self {
            id,
            kind,
            command,
            target,
            status: CommandStatus::Pending,
            output: None,
            error: None,
            created_at: Utc::now(),
            executed_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        use CommandStatus::*;
        assert!(Pending.can_advance_to(Executing));
        assert!(Executing.can_advance_to(Completed));
        assert!(Executing.can_advance_to(Failed));

        assert!(!Executing.can_advance_to(Pending));
        assert!(!Completed.can_advance_to(Executing));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Completed));
    }

    #[test]
    fn status_may_skip_executing() {
        assert!(CommandStatus::Pending.can_advance_to(CommandStatus::Failed));
        assert!(CommandStatus::Pending.can_advance_to(CommandStatus::Completed));
    }

    #[test]
    fn status_cannot_stay_in_place() {
        use CommandStatus::*;
        for status in [Pending, Executing, Completed, Failed] {
            assert!(!status.can_advance_to(status));
        }
    }

    #[test]
    fn new_record_starts_pending() {
        let record = CommandRecord::new(
            "c-1".into(),
            CommandKind::Shell,
            "uptime".into(),
            CommandTarget::Machine { id: "m-1".into() },
        );
        assert_eq!(record.status, CommandStatus::Pending);
        assert!(record.executed_at.is_none());
        assert!(record.completed_at.is_none());
    }
}
