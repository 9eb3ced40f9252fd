use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Syslog-style severity, ordered from most to least severe.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Emerg,
    Alert,
    Crit,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    /// Map a syslog numeric priority (0..=7) onto a level. Out-of-range
    /// values degrade to `Info`.
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            0 => LogLevel::Emerg,
            1 => LogLevel::Alert,
            2 => LogLevel::Crit,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 => LogLevel::Notice,
            6 => LogLevel::Info,
            7 => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_covers_syslog_range() {
        assert_eq!(LogLevel::from_priority(0), LogLevel::Emerg);
        assert_eq!(LogLevel::from_priority(3), LogLevel::Error);
        assert_eq!(LogLevel::from_priority(7), LogLevel::Debug);
        assert_eq!(LogLevel::from_priority(42), LogLevel::Info);
    }

    #[test]
    fn entry_serializes_event_id_only_when_present() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            source: "kernel".into(),
            message: "boot".into(),
            event_id: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("event_id"));
    }
}
