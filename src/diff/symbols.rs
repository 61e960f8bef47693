use std::collections::HashMap;

use super::types::{ChangeKind, SymbolChange};

/// Compare two symbol-name → code maps.
///
/// Every symbol whose code differs shows up exactly once; unchanged symbols
/// produce nothing. Ordering follows map iteration and carries no meaning.
/// The optional texts are only used to locate each symbol's line.
pub fn diff_symbol_maps(
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
    old_text: Option<&str>,
    new_text: Option<&str>,
) -> Vec<SymbolChange> {
    let mut changes = Vec::new();

    for (name, code) in new {
        match old.get(name) {
            None => changes.push(SymbolChange {
                kind: ChangeKind::Added,
                symbol: name.clone(),
                code: code.clone(),
                old_code: None,
                line_number: locate(new_text, code),
            }),
            Some(previous) if previous != code => changes.push(SymbolChange {
                kind: ChangeKind::Modified,
                symbol: name.clone(),
                code: code.clone(),
                old_code: Some(previous.clone()),
                line_number: locate(new_text, code),
            }),
            Some(_) => {}
        }
    }

    for (name, previous) in old {
        if !new.contains_key(name) {
            changes.push(SymbolChange {
                kind: ChangeKind::Removed,
                symbol: name.clone(),
                code: String::new(),
                old_code: Some(previous.clone()),
                line_number: locate(old_text, previous),
            });
        }
    }

    changes
}

/// 1-based line of the first occurrence of `code` in `text`, 0 if absent.
fn locate(text: Option<&str>, code: &str) -> usize {
    let Some(text) = text else { return 0 };
    if code.is_empty() {
        return 0;
    }
    text.find(code)
        .map(|offset| text[..offset].matches('\n').count() + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_modified_and_added_symbols() {
        let old = map(&[("foo", "old")]);
        let new = map(&[("foo", "new"), ("bar", "b")]);

        let mut changes = diff_symbol_maps(&old, &new, None, None);
        changes.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].symbol, "bar");
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].code, "b");
        assert_eq!(changes[1].symbol, "foo");
        assert_eq!(changes[1].kind, ChangeKind::Modified);
        assert_eq!(changes[1].code, "new");
        assert_eq!(changes[1].old_code.as_deref(), Some("old"));
    }

    #[test]
    fn test_removed_symbol_keeps_old_code() {
        let old = map(&[("gone", "fn gone() {}"), ("same", "x")]);
        let new = map(&[("same", "x")]);

        let changes = diff_symbol_maps(&old, &new, Some("// header\nfn gone() {}"), None);
        assert_eq!(
            changes,
            vec![SymbolChange {
                kind: ChangeKind::Removed,
                symbol: "gone".into(),
                code: String::new(),
                old_code: Some("fn gone() {}".into()),
                line_number: 2,
            }]
        );
    }

    #[test]
    fn test_locate_line_numbers() {
        assert_eq!(locate(Some("a\nb\nfn x() {}\n"), "fn x() {}"), 3);
        assert_eq!(locate(Some("a\nb"), "missing"), 0);
        assert_eq!(locate(None, "anything"), 0);
    }
}
