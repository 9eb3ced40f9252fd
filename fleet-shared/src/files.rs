use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One directory entry in a `file_listing` reply. A stat failure on an
/// individual entry degrades to a zero size rather than failing the
/// whole listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_uses_camel_case_fields() {
        let entry = FileEntry {
            name: "etc".into(),
            is_directory: true,
            size: 0,
            modified: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"isDirectory\":true"));
        assert!(!json.contains("is_directory"));
    }
}
