//! Wire catalogue for the fleet control plane.
//!
//! Every frame is a JSON object with a `type` tag. Envelope fields are
//! camelCase (`commandId`, `sessionId`, ...); data payloads (host
//! facts, metrics, logs, packages) are snake_case. One enum per
//! direction so dispatch is exhaustively checked at compile time.

use serde::{Deserialize, Serialize};

use crate::command::{CommandKind, CommandStatus};
use crate::files::FileEntry;
use crate::logs::LogEntry;
use crate::machine::{HostFacts, MachineStatus};
use crate::metrics::MetricsSnapshot;
use crate::packages::PackageInfo;

fn default_log_hours() -> u32 {
    24
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Messages an agent sends upstream to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Register {
        data: HostFacts,
    },
    Metrics {
        data: MetricsSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    CommandResult {
        command_id: String,
        status: CommandStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Logs {
        data: Vec<LogEntry>,
    },
    Packages {
        data: Vec<PackageInfo>,
    },
    #[serde(rename_all = "camelCase")]
    FileListing {
        request_id: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<FileEntry>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileContent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        is_binary: bool,
    },
    #[serde(rename_all = "camelCase")]
    ShellOutput {
        session_id: String,
        output: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_complete: Option<bool>,
    },
    Heartbeat,
}

/// Messages the server sends down to an agent.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent once per accepted agent connection.
    #[serde(rename_all = "camelCase")]
    Connected {
        machine_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ExecuteCommand {
        command_id: String,
        command_type: CommandKind,
        command: String,
    },
    #[serde(rename_all = "camelCase")]
    GetFileListing {
        request_id: String,
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    GetFileContent {
        request_id: String,
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    UploadFile {
        destination_path: String,
        /// base64-encoded file body
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    DownloadFile {
        source_path: String,
    },
    #[serde(rename_all = "camelCase")]
    ShellInput {
        session_id: String,
        input: String,
    },
    #[serde(rename_all = "camelCase")]
    CloseShell {
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    InstallPackage {
        package_name: String,
    },
    #[serde(rename_all = "camelCase")]
    UninstallPackage {
        package_name: String,
    },
    UpdatePackages,
    RequestMetrics,
    RequestLogs {
        #[serde(default = "default_log_hours")]
        hours: u32,
    },
    RequestPackages,
}

/// Actions a dashboard issues over its observer connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardRequest {
    #[serde(rename_all = "camelCase")]
    ExecuteCommand {
        command_type: CommandKind,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        machine_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetFileListing {
        machine_id: String,
        request_id: String,
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    GetFileContent {
        machine_id: String,
        request_id: String,
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    ShellInput {
        machine_id: String,
        session_id: String,
        input: String,
    },
    #[serde(rename_all = "camelCase")]
    CloseShell {
        machine_id: String,
        session_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RequestMetrics {
        machine_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RequestLogs {
        machine_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hours: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    RequestPackages {
        machine_id: String,
    },
}

/// Events fanned out to dashboard observers (plus the two direct
/// acknowledgments, `connected` and `command_created`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        client_type: String,
    },
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        machine_id: String,
        status: MachineStatus,
    },
    #[serde(rename_all = "camelCase")]
    MachineRegistered {
        machine_id: String,
        data: HostFacts,
    },
    #[serde(rename_all = "camelCase")]
    MetricsUpdate {
        machine_id: String,
        data: MetricsSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    CommandCreated {
        command_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CommandResult {
        command_id: String,
        machine_id: String,
        status: CommandStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LogsUpdate {
        machine_id: String,
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    PackagesUpdate {
        machine_id: String,
        count: usize,
    },
    #[serde(rename_all = "camelCase")]
    FileListing {
        machine_id: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<FileEntry>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileContent {
        machine_id: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        is_binary: bool,
    },
    #[serde(rename_all = "camelCase")]
    ShellOutput {
        machine_id: String,
        session_id: String,
        output: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_complete: Option<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_a_bare_tag() {
        let json = serde_json::to_string(&AgentMessage::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
        let parsed: AgentMessage = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(parsed, AgentMessage::Heartbeat);
    }

    #[test]
    fn execute_command_envelope_is_camel_case() {
        let msg = ServerMessage::ExecuteCommand {
            command_id: "c-1".into(),
            command_type: CommandKind::Shell,
            command: "echo hi".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"execute_command""#));
        assert!(json.contains(r#""commandId":"c-1""#));
        assert!(json.contains(r#""commandType":"shell""#));
    }

    #[test]
    fn command_result_omits_absent_output() {
        let msg = AgentMessage::CommandResult {
            command_id: "c-2".into(),
            status: CommandStatus::Executing,
            output: None,
            error: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"command_result","commandId":"c-2","status":"executing"}"#
        );
    }

    #[test]
    fn dashboard_execute_command_parses_wire_format() {
        let json = r#"{
            "type": "execute_command",
            "commandType": "script",
            "command": "echo 1",
            "machineId": "m-1"
        }"#;
        let request: DashboardRequest = serde_json::from_str(json).unwrap();
        match request {
            DashboardRequest::ExecuteCommand {
                command_type,
                machine_id,
                group_id,
                ..
            } => {
                assert_eq!(command_type, CommandKind::Script);
                assert_eq!(machine_id.as_deref(), Some("m-1"));
                assert!(group_id.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn request_logs_defaults_to_24_hours() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"request_logs"}"#).unwrap();
        assert_eq!(msg, ServerMessage::RequestLogs { hours: 24 });
    }

    #[test]
    fn unknown_type_tag_is_an_error() {
        let result = serde_json::from_str::<AgentMessage>(r#"{"type":"mystery"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn shell_output_event_round_trip() {
        let event = DashboardEvent::ShellOutput {
            machine_id: "m-1".into(),
            session_id: "s-1".into(),
            output: "$ ".into(),
            is_error: false,
            is_complete: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""sessionId":"s-1""#));
        assert!(json.contains(r#""isError":false"#));
        assert!(!json.contains("isComplete"));
        let parsed: DashboardEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
