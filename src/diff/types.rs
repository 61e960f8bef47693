use serde::{Deserialize, Serialize};

/// What happened to a hunk or a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A line-level hunk. Line numbers are 1-based and inclusive.
///
/// `Added` hunks only carry the new range, `Removed` hunks only the old
/// range, `Modified` hunks both; `content` is always the new text except for
/// `Removed`, where it holds the lines that went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_end: Option<usize>,
    pub content: String,
}

impl DiffChange {
    pub fn added(new_start: usize, new_end: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Added,
            old_start: None,
            old_end: None,
            new_start: Some(new_start),
            new_end: Some(new_end),
            content: content.into(),
        }
    }

    pub fn removed(old_start: usize, old_end: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            old_start: Some(old_start),
            old_end: Some(old_end),
            new_start: None,
            new_end: None,
            content: content.into(),
        }
    }

    pub fn modified(
        old_start: usize,
        old_end: usize,
        new_start: usize,
        new_end: usize,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChangeKind::Modified,
            old_start: Some(old_start),
            old_end: Some(old_end),
            new_start: Some(new_start),
            new_end: Some(new_end),
            content: content.into(),
        }
    }
}

/// A symbol that appeared, vanished or changed between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub symbol: String,
    /// New code, empty when the symbol was removed
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_code: Option<String>,
    /// 1-based line where the code starts, 0 when unknown
    pub line_number: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_serializes_only_new_range() {
        let json = serde_json::to_value(DiffChange::added(4, 5, "x\ny")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "added", "newStart": 4, "newEnd": 5, "content": "x\ny"})
        );
    }

    #[test]
    fn test_symbol_change_round_trips_through_json() {
        let change = SymbolChange {
            kind: ChangeKind::Removed,
            symbol: "foo".into(),
            code: String::new(),
            old_code: Some("fn foo() {}".into()),
            line_number: 3,
        };
        let text = serde_json::to_string(&change).unwrap();
        assert!(text.contains("\"oldCode\""));
        let back: SymbolChange = serde_json::from_str(&text).unwrap();
        assert_eq!(back, change);
    }
}
