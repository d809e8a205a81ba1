use serde::{Deserialize, Serialize};

/// Collection a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Locations,
    Profiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Coarse "something changed" notification. Carries no row payload; subscribers
/// reload the full snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    #[serde(default)]
    pub seq: u64,
    pub table: Table,
    pub kind: ChangeKind,
    pub timestamp: String,
}

/// SSE event name used for [`ChangeNotice`] frames.
pub const CHANGE_EVENT_NAME: &str = "change";

#[cfg(test)]
mod tests {
    use super::{ChangeKind, ChangeNotice, Table};

    #[test]
    fn wire_format_uses_snake_case_tags() {
        let notice = ChangeNotice {
            seq: 3,
            table: Table::Locations,
            kind: ChangeKind::Delete,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&notice).expect("serialize notice");
        assert_eq!(json["table"], "locations");
        assert_eq!(json["kind"], "delete");
    }

    #[test]
    fn missing_seq_defaults_to_zero() {
        let raw = r#"{"table":"profiles","kind":"insert","timestamp":"t"}"#;
        let parsed: ChangeNotice = serde_json::from_str(raw).expect("parse notice");
        assert_eq!(parsed.seq, 0);
        assert_eq!(parsed.table, Table::Profiles);
    }
}
