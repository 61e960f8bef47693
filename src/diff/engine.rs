use tracing::debug;

use super::types::{ChangeKind, DiffChange};
use crate::constants::DEFAULT_MAX_TABLE_CELLS;
use crate::utils::{MinctxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Unchanged,
    Added,
    Removed,
}

/// One step of the LCS walk. `old_line`/`new_line` are 1-based.
#[derive(Debug, Clone, Copy)]
struct LineOp<'a> {
    kind: OpKind,
    old_line: usize,
    new_line: usize,
    text: &'a str,
}

/// Line-level diff and patch engine
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    /// Upper bound on the LCS table; larger inputs become one whole-text hunk
    max_table_cells: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TABLE_CELLS)
    }
}

impl DiffEngine {
    pub fn new(max_table_cells: usize) -> Self {
        Self { max_table_cells }
    }

    /// Compute the hunks turning `old` into `new`. Never fails.
    pub fn diff(&self, old: &str, new: &str) -> Vec<DiffChange> {
        if old == new {
            return Vec::new();
        }

        let old_lines: Vec<&str> = old.split('\n').collect();
        let new_lines: Vec<&str> = new.split('\n').collect();

        let cells = (old_lines.len() + 1).saturating_mul(new_lines.len() + 1);
        if cells > self.max_table_cells {
            debug!(
                "diff table of {} cells exceeds limit {}, replacing whole text",
                cells, self.max_table_cells
            );
            return vec![DiffChange::modified(
                1,
                old_lines.len(),
                1,
                new_lines.len(),
                new,
            )];
        }

        let ops = line_ops(&old_lines, &new_lines);
        merge_ops(&ops)
    }

    /// Apply hunks produced by [`DiffEngine::diff`] (or built by hand) to `original`.
    pub fn apply(&self, original: &str, changes: &[DiffChange]) -> Result<String> {
        let lines: Vec<&str> = original.split('\n').collect();
        let mut output: Vec<&str> = Vec::with_capacity(lines.len());

        // Next unread original line (0-based)
        let mut cursor = 0;
        // Lines emitted so far, counted in the hunks' own new-text numbering
        let mut new_pos = 0;

        for change in order_hunks(changes) {
            match change.kind {
                ChangeKind::Added => {
                    let wanted = change
                        .new_start
                        .map(|start| start.saturating_sub(1))
                        .unwrap_or(new_pos);
                    let gap = wanted.saturating_sub(new_pos).min(lines.len() - cursor);
                    output.extend_from_slice(&lines[cursor..cursor + gap]);
                    cursor += gap;
                    new_pos += gap;

                    let before = output.len();
                    output.extend(change.content.split('\n'));
                    new_pos = change.new_end.unwrap_or(new_pos + output.len() - before);
                }
                ChangeKind::Removed | ChangeKind::Modified => {
                    let (start, end) = old_range(change, cursor, lines.len())?;
                    output.extend_from_slice(&lines[cursor..start]);
                    new_pos += start - cursor;
                    cursor = end;

                    if change.kind == ChangeKind::Modified {
                        let before = output.len();
                        output.extend(change.content.split('\n'));
                        new_pos = change.new_end.unwrap_or(new_pos + output.len() - before);
                    }
                }
            }
        }

        output.extend_from_slice(&lines[cursor..]);
        Ok(output.join("\n"))
    }
}

/// Classic LCS table walked back from the bottom-right corner.
fn line_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<LineOp<'a>> {
    let (m, n) = (old.len(), new.len());
    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];

    for i in 1..=m {
        for j in 1..=n {
            dp[i * width + j] = if old[i - 1] == new[j - 1] {
                dp[(i - 1) * width + j - 1] + 1
            } else {
                dp[(i - 1) * width + j].max(dp[i * width + j - 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(LineOp {
                kind: OpKind::Unchanged,
                old_line: i,
                new_line: j,
                text: old[i - 1],
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i * width + j - 1] >= dp[(i - 1) * width + j]) {
            // Ties count the line as added
            ops.push(LineOp {
                kind: OpKind::Added,
                old_line: i,
                new_line: j,
                text: new[j - 1],
            });
            j -= 1;
        } else {
            ops.push(LineOp {
                kind: OpKind::Removed,
                old_line: i,
                new_line: j,
                text: old[i - 1],
            });
            i -= 1;
        }
    }

    ops.reverse();
    ops
}

/// Collapse the op stream into hunks: removed+added runs become `Modified`.
fn merge_ops(ops: &[LineOp<'_>]) -> Vec<DiffChange> {
    let mut changes = Vec::new();
    let mut idx = 0;

    while idx < ops.len() {
        match ops[idx].kind {
            OpKind::Unchanged => idx += 1,
            OpKind::Removed => {
                let removed_end = run_end(ops, idx, OpKind::Removed);
                let added_end = run_end(ops, removed_end, OpKind::Added);
                let removed = &ops[idx..removed_end];
                let old_start = removed[0].old_line;
                let old_end = removed[removed.len() - 1].old_line;

                if added_end > removed_end {
                    let added = &ops[removed_end..added_end];
                    changes.push(DiffChange::modified(
                        old_start,
                        old_end,
                        added[0].new_line,
                        added[added.len() - 1].new_line,
                        join_text(added),
                    ));
                } else {
                    changes.push(DiffChange::removed(old_start, old_end, join_text(removed)));
                }
                idx = added_end;
            }
            OpKind::Added => {
                let end = run_end(ops, idx, OpKind::Added);
                let added = &ops[idx..end];
                changes.push(DiffChange::added(
                    added[0].new_line,
                    added[added.len() - 1].new_line,
                    join_text(added),
                ));
                idx = end;
            }
        }
    }

    changes
}

fn run_end(ops: &[LineOp<'_>], start: usize, kind: OpKind) -> usize {
    let mut end = start;
    while end < ops.len() && ops[end].kind == kind {
        end += 1;
    }
    end
}

fn join_text(ops: &[LineOp<'_>]) -> String {
    ops.iter().map(|op| op.text).collect::<Vec<_>>().join("\n")
}

/// Old-anchored hunks go in ascending `old_start` order. A pure insertion
/// stays behind whichever hunk preceded it in the input.
fn order_hunks(changes: &[DiffChange]) -> Vec<&DiffChange> {
    let mut anchor = 0;
    let mut keyed: Vec<(usize, &DiffChange)> = changes
        .iter()
        .map(|change| {
            if change.kind != ChangeKind::Added {
                if let Some(start) = change.old_start {
                    anchor = start;
                }
            }
            (anchor, change)
        })
        .collect();

    // sort_by_key is stable, which keeps insertions next to their anchor
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, change)| change).collect()
}

/// Validate an old range against the cursor; returns a 0-based half-open range.
fn old_range(change: &DiffChange, cursor: usize, len: usize) -> Result<(usize, usize)> {
    let start = change.old_start.ok_or_else(|| {
        MinctxError::InvalidHunkSequence(format!("{:?} hunk has no oldStart", change.kind))
    })?;
    let end = change.old_end.unwrap_or(start);

    if start == 0 || end < start {
        return Err(MinctxError::InvalidHunkSequence(format!(
            "invalid old range {}-{}",
            start, end
        )));
    }
    if start - 1 < cursor {
        return Err(MinctxError::InvalidHunkSequence(format!(
            "hunk at line {} overlaps the previous hunk ending at line {}",
            start, cursor
        )));
    }
    if end > len {
        return Err(MinctxError::InvalidHunkSequence(format!(
            "hunk {}-{} extends past the end of the text ({} lines)",
            start, end, len
        )));
    }

    Ok((start - 1, end))
}

/// Render hunks as a compact update: a header per hunk, then +/- lines.
pub fn render_minimal_update(changes: &[DiffChange]) -> String {
    let mut out = String::new();

    for change in changes {
        let old_span = range_span(change.old_start, change.old_end);
        let new_span = range_span(change.new_start, change.new_end);
        let header = match (old_span, new_span) {
            (Some(old), Some(new)) => format!("@@ -{} +{} @@", old, new),
            (Some(old), None) => format!("@@ -{} @@", old),
            (None, Some(new)) => format!("@@ +{} @@", new),
            (None, None) => "@@ @@".to_string(),
        };
        out.push_str(&header);
        out.push('\n');

        let prefix = if change.kind == ChangeKind::Removed { '-' } else { '+' };
        for line in change.content.split('\n') {
            out.push(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}

fn range_span(start: Option<usize>, end: Option<usize>) -> Option<String> {
    let start = start?;
    let end = end.unwrap_or(start);
    Some(format!("{},{}", start, end.saturating_sub(start) + 1))
}
