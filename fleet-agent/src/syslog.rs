//! System log collection for `request_logs`.
//!
//! Linux reads the journal (with a plain-file fallback for machines
//! without systemd), macOS uses `log show`, Windows queries the event
//! log through PowerShell. Collection failures degrade to an empty
//! batch; they never take the agent down.

use std::process::Stdio;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use fleet_shared::logs::{LogEntry, LogLevel};

const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest message forwarded per entry; journals can carry multi-KB
/// blobs that dashboards have no use for.
const MESSAGE_CAP: usize = 500;

pub async fn collect(hours: u32) -> Vec<LogEntry> {
    #[cfg(target_os = "linux")]
    {
        collect_linux(hours).await
    }
    #[cfg(target_os = "macos")]
    {
        collect_macos(hours).await
    }
    #[cfg(target_os = "windows")]
    {
        collect_windows(hours).await
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = hours;
        Vec::new()
    }
}

async fn run_capture(program: &str, args: &[String]) -> Option<String> {
    let output = tokio::time::timeout(
        COLLECT_TIMEOUT,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn cap_message(message: &str) -> String {
    message.chars().take(MESSAGE_CAP).collect()
}

// ---------------------------------------------------------------
// Linux
// ---------------------------------------------------------------

#[cfg(target_os = "linux")]
async fn collect_linux(hours: u32) -> Vec<LogEntry> {
    let args = vec![
        "--since".to_string(),
        format!("{hours} hours ago"),
        "--no-pager".to_string(),
        "-o".to_string(),
        "json".to_string(),
    ];
    match run_capture("journalctl", &args).await {
        Some(stdout) => stdout.lines().filter_map(parse_journal_line).collect(),
        None => {
            debug!("journalctl unavailable, falling back to log files");
            read_log_files().await
        }
    }
}

/// One `journalctl -o json` line -> entry. Lines that are not valid
/// journal records are skipped.
fn parse_journal_line(line: &str) -> Option<LogEntry> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;

    let timestamp = value
        .get("__REALTIME_TIMESTAMP")
        .and_then(|v| v.as_str())
        .and_then(|micros| micros.parse::<i64>().ok())
        .and_then(|micros| Utc.timestamp_micros(micros).single())
        .unwrap_or_else(Utc::now);

    let level = value
        .get("PRIORITY")
        .and_then(|v| v.as_str())
        .and_then(|priority| priority.parse::<u8>().ok())
        .map(LogLevel::from_priority)
        .unwrap_or(LogLevel::Info);

    let source = value
        .get("SYSLOG_IDENTIFIER")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let message = value.get("MESSAGE").and_then(|v| v.as_str())?;

    Some(LogEntry {
        timestamp,
        level,
        source,
        message: cap_message(message),
        event_id: None,
    })
}

/// Fallback for machines without a journal: tail the classic log
/// files as info-level lines.
#[cfg(target_os = "linux")]
async fn read_log_files() -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for path in ["/var/log/syslog", "/var/log/messages", "/var/log/auth.log"] {
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let tail = lines.len().saturating_sub(1000);
        for line in &lines[tail..] {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                source: path.rsplit('/').next().unwrap_or(path).to_string(),
                message: cap_message(line),
                event_id: None,
            });
        }
    }
    entries
}

// ---------------------------------------------------------------
// macOS
// ---------------------------------------------------------------

#[cfg(target_os = "macos")]
async fn collect_macos(hours: u32) -> Vec<LogEntry> {
    let args = vec![
        "show".to_string(),
        "--last".to_string(),
        format!("{hours}h"),
        "--style".to_string(),
        "json".to_string(),
    ];
    let Some(stdout) = run_capture("log", &args).await else {
        return Vec::new();
    };
    let Ok(Value::Array(events)) = serde_json::from_str(&stdout) else {
        return Vec::new();
    };
    events.iter().filter_map(parse_macos_event).collect()
}

#[cfg(target_os = "macos")]
fn parse_macos_event(event: &Value) -> Option<LogEntry> {
    let message = event.get("eventMessage").and_then(|v| v.as_str())?;
    let timestamp = event
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|text| chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%z").ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let level = match event.get("eventType").and_then(|v| v.as_str()) {
        Some("error") | Some("fault") => LogLevel::Error,
        Some("default") => LogLevel::Warning,
        Some("debug") => LogLevel::Debug,
        _ => LogLevel::Info,
    };
    Some(LogEntry {
        timestamp,
        level,
        source: event
            .get("sender")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        message: cap_message(message),
        event_id: None,
    })
}

// ---------------------------------------------------------------
// Windows
// ---------------------------------------------------------------

#[cfg(target_os = "windows")]
async fn collect_windows(hours: u32) -> Vec<LogEntry> {
    let script = format!(
        "Get-WinEvent -FilterHashtable @{{LogName='System','Application'; \
         StartTime=(Get-Date).AddHours(-{hours})}} -ErrorAction SilentlyContinue | \
         Select-Object @{{n='time';e={{$_.TimeCreated.ToUniversalTime().ToString('o')}}}}, \
         LevelDisplayName, ProviderName, Id, Message | ConvertTo-Json"
    );
    let args = vec!["-Command".to_string(), script];
    let Some(stdout) = run_capture("powershell.exe", &args).await else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<Value>(&stdout) else {
        return Vec::new();
    };
    let events = match parsed {
        Value::Array(events) => events,
        single => vec![single],
    };
    events.iter().filter_map(parse_windows_event).collect()
}

#[cfg(target_os = "windows")]
fn parse_windows_event(event: &Value) -> Option<LogEntry> {
    let message = event.get("Message").and_then(|v| v.as_str()).unwrap_or("");
    let timestamp = event
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|text| text.parse::<chrono::DateTime<Utc>>().ok())
        .unwrap_or_else(Utc::now);
    let level = match event.get("LevelDisplayName").and_then(|v| v.as_str()) {
        Some("Critical") | Some("Error") => LogLevel::Error,
        Some("Warning") => LogLevel::Warning,
        Some("Verbose") => LogLevel::Debug,
        _ => LogLevel::Info,
    };
    Some(LogEntry {
        timestamp,
        level,
        source: event
            .get("ProviderName")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        message: cap_message(message),
        event_id: event.get("Id").and_then(|v| v.as_i64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_line_parses_fields() {
        let line = r#"{
            "__REALTIME_TIMESTAMP": "1700000000000000",
            "PRIORITY": "3",
            "SYSLOG_IDENTIFIER": "sshd",
            "MESSAGE": "Connection closed"
        }"#;
        let entry = parse_journal_line(line).unwrap();
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.source, "sshd");
        assert_eq!(entry.message, "Connection closed");
        assert_eq!(entry.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn journal_line_without_message_is_skipped() {
        assert!(parse_journal_line(r#"{"PRIORITY":"6"}"#).is_none());
        assert!(parse_journal_line("not json").is_none());
    }

    #[test]
    fn journal_line_defaults_missing_fields() {
        let entry = parse_journal_line(r#"{"MESSAGE":"hello"}"#).unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.source, "unknown");
    }

    #[test]
    fn long_messages_are_capped() {
        let long = "x".repeat(2000);
        let line = format!(r#"{{"MESSAGE":"{long}"}}"#);
        let entry = parse_journal_line(&line).unwrap();
        assert_eq!(entry.message.len(), 500);
    }
}
