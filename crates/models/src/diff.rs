//! Line-level diff between two content snapshots.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiffLineKind {
    Added,
    Removed,
    Unchanged,
}

/// One line of a computed edit script. Derived on demand from two snapshots,
/// never persisted.
///
/// Line numbers are 1-based. `old_line_number` and `new_line_number` locate
/// the line in each input; `line_number` is the display-side number (new side
/// for added and unchanged lines, old side for removed lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub kind: DiffLineKind,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
    pub line_number: Option<usize>,
}

impl DiffLine {
    fn added(content: &str, new_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Added,
            content: content.to_string(),
            old_line_number: None,
            new_line_number: Some(new_line),
            line_number: Some(new_line),
        }
    }

    fn removed(content: &str, old_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Removed,
            content: content.to_string(),
            old_line_number: Some(old_line),
            new_line_number: None,
            line_number: Some(old_line),
        }
    }

    fn unchanged(content: &str, old_line: usize, new_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Unchanged,
            content: content.to_string(),
            old_line_number: Some(old_line),
            new_line_number: Some(new_line),
            line_number: Some(new_line),
        }
    }
}

/// Compute a line-level edit script from `old_text` to `new_text`.
///
/// Greedy single-line-lookahead matcher: when the current lines differ, a
/// match of `old[i + 1]` against `new[j]` is treated as a deletion and a
/// match of `new[j + 1]` against `old[i]` as an insertion; anything else is
/// emitted as a removed/added pair. This trades minimality for a single
/// linear pass. It does not produce the shortest edit script and can
/// misalign on inputs with repeated lines. Deterministic for any input pair.
pub fn diff(old_text: &str, new_text: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = old_text.split('\n').collect();
    let new: Vec<&str> = new_text.split('\n').collect();

    let mut lines = Vec::with_capacity(old.len().max(new.len()));
    let mut i = 0;
    let mut j = 0;

    while i < old.len() || j < new.len() {
        if i >= old.len() {
            lines.push(DiffLine::added(new[j], j + 1));
            j += 1;
        } else if j >= new.len() {
            lines.push(DiffLine::removed(old[i], i + 1));
            i += 1;
        } else if old[i] == new[j] {
            lines.push(DiffLine::unchanged(old[i], i + 1, j + 1));
            i += 1;
            j += 1;
        } else if i + 1 < old.len() && old[i + 1] == new[j] {
            lines.push(DiffLine::removed(old[i], i + 1));
            i += 1;
        } else if j + 1 < new.len() && new[j + 1] == old[i] {
            lines.push(DiffLine::added(new[j], j + 1));
            j += 1;
        } else {
            // No realignment within one line: treat as a modification.
            lines.push(DiffLine::removed(old[i], i + 1));
            lines.push(DiffLine::added(new[j], j + 1));
            i += 1;
            j += 1;
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(lines: &[DiffLine]) -> Vec<(DiffLineKind, &str)> {
        lines
            .iter()
            .map(|l| (l.kind, l.content.as_str()))
            .collect()
    }

    #[test]
    fn identical_inputs_are_all_unchanged() {
        let text = "alpha\nbeta\ngamma";
        let lines = diff(text, text);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.kind == DiffLineKind::Unchanged));
        assert_eq!(lines[1].old_line_number, Some(2));
        assert_eq!(lines[1].new_line_number, Some(2));
    }

    #[test]
    fn same_inputs_yield_same_output() {
        let a = "one\ntwo\nthree\nthree\ntwo";
        let b = "one\ntwo\nfour\nthree";
        assert_eq!(diff(a, b), diff(a, b));
    }

    #[test]
    fn modified_middle_line() {
        let lines = diff("line1\nline2\nline3", "line1\nlineX\nline3");
        assert_eq!(
            kinds(&lines),
            vec![
                (DiffLineKind::Unchanged, "line1"),
                (DiffLineKind::Removed, "line2"),
                (DiffLineKind::Added, "lineX"),
                (DiffLineKind::Unchanged, "line3"),
            ]
        );
    }

    #[test]
    fn lookahead_detects_deletion() {
        let lines = diff("a\nb\nc", "b\nc");
        assert_eq!(
            kinds(&lines),
            vec![
                (DiffLineKind::Removed, "a"),
                (DiffLineKind::Unchanged, "b"),
                (DiffLineKind::Unchanged, "c"),
            ]
        );
    }

    #[test]
    fn lookahead_detects_insertion() {
        let lines = diff("a\nb", "x\na\nb");
        assert_eq!(
            kinds(&lines),
            vec![
                (DiffLineKind::Added, "x"),
                (DiffLineKind::Unchanged, "a"),
                (DiffLineKind::Unchanged, "b"),
            ]
        );
    }

    #[test]
    fn trailing_lines_are_pure_additions() {
        let lines = diff("a", "a\nb\nc");
        assert_eq!(
            kinds(&lines),
            vec![
                (DiffLineKind::Unchanged, "a"),
                (DiffLineKind::Added, "b"),
                (DiffLineKind::Added, "c"),
            ]
        );
        assert_eq!(lines[2].new_line_number, Some(3));
        assert_eq!(lines[2].old_line_number, None);
    }

    #[test]
    fn empty_inputs_compare_as_one_empty_line() {
        // split('\n') on "" yields a single empty line on both sides
        let lines = diff("", "");
        assert_eq!(kinds(&lines), vec![(DiffLineKind::Unchanged, "")]);
    }
}
