//! Line diffs between a revision and the current content of its file
//!
//! Used for the `Diff` picker action and the `diff` command. Lines are diffed
//! with `similar`'s Myers implementation and the ops grouped into hunks with
//! surrounding context, as in unified diffs. Binary content (a NUL byte in
//! the first 8 KiB) and inputs above [`DiffOptions::max_file_size`] are
//! flagged instead of diffed.
//!
//! ```rust
//! use git_backup::diff::compute_line_diff;
//! use git_backup::types::{DiffOptions, LineChange};
//!
//! let hunks = compute_line_diff(b"a\nb\nc\n", b"a\nB\nc\n", &DiffOptions::default());
//! assert_eq!(hunks.len(), 1);
//! assert!(hunks[0].changes.contains(&LineChange::Deleted(2, "b".to_string())));
//! assert!(hunks[0].changes.contains(&LineChange::Added(2, "B".to_string())));
//! ```

use crate::types::{DiffHunk, DiffOptions, LineChange, RevisionDiff};
use similar::{Algorithm, DiffOp, DiffTag};
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

/// Bytes inspected by [`is_binary_content`]
const BINARY_PROBE_LEN: usize = 8192;

/// Past this, Myers falls back to a coarser but still valid diff
const DIFF_DEADLINE: Duration = Duration::from_secs(2);

/// Compute hunks turning `old` into `new`
pub fn compute_line_diff(old: &[u8], new: &[u8], options: &DiffOptions) -> Vec<DiffHunk> {
    let old_text = String::from_utf8_lossy(old);
    let new_text = String::from_utf8_lossy(new);
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();

    let (old_keys, new_keys) = if options.ignore_whitespace {
        (trimmed(&old_lines), trimmed(&new_lines))
    } else {
        (old_lines.clone(), new_lines.clone())
    };

    let deadline = Instant::now() + DIFF_DEADLINE;
    let ops = similar::capture_diff_slices_deadline(Algorithm::Myers, &old_keys, &new_keys, Some(deadline));
    similar::group_diff_ops(ops, options.context_lines)
        .iter()
        .filter(|group| group.iter().any(|op| op.tag() != DiffTag::Equal))
        .map(|group| build_hunk(group, &old_lines, &new_lines))
        .collect()
}

/// Diff revision content `old` against current content `new` of `path`
pub fn diff_revision(
    path: &Path,
    revision_id: &str,
    old: &[u8],
    new: &[u8],
    options: &DiffOptions,
) -> RevisionDiff {
    let too_large = old.len() as u64 > options.max_file_size || new.len() as u64 > options.max_file_size;
    let is_binary = is_binary_content(old) || is_binary_content(new);

    let hunks = if too_large || is_binary {
        Vec::new()
    } else {
        compute_line_diff(old, new, options)
    };

    let (mut lines_added, mut lines_deleted) = (0, 0);
    for change in hunks.iter().flat_map(|h| &h.changes) {
        match change {
            LineChange::Added(..) => lines_added += 1,
            LineChange::Deleted(..) => lines_deleted += 1,
            LineChange::Context(..) => {}
        }
    }

    RevisionDiff {
        path: path.to_path_buf(),
        revision_id: revision_id.to_string(),
        is_binary,
        too_large,
        hunks,
        lines_added,
        lines_deleted,
    }
}

/// Heuristic binary check: a NUL byte near the start
pub fn is_binary_content(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_PROBE_LEN)].contains(&0)
}

/// Render `diff` in unified format with `a/` = revision and `b/` = current
pub fn to_unified(diff: &RevisionDiff) -> String {
    let name = diff.path.display();
    let mut out = String::new();
    let _ = writeln!(out, "--- a{} ({})", name, crate::types::short_id(&diff.revision_id));
    let _ = writeln!(out, "+++ b{}", name);

    if diff.is_binary {
        let _ = writeln!(out, "Binary files differ");
        return out;
    }
    if diff.too_large {
        let _ = writeln!(out, "File too large to diff");
        return out;
    }

    for hunk in &diff.hunks {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.from_line, hunk.from_count, hunk.to_line, hunk.to_count
        );
        for change in &hunk.changes {
            let (marker, line) = match change {
                LineChange::Added(_, line) => ('+', line),
                LineChange::Deleted(_, line) => ('-', line),
                LineChange::Context(_, line) => (' ', line),
            };
            let _ = writeln!(out, "{}{}", marker, line);
        }
    }
    out
}

fn trimmed<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    lines.iter().map(|line| line.trim()).collect()
}

fn build_hunk(group: &[DiffOp], old: &[&str], new: &[&str]) -> DiffHunk {
    let (old_start, new_start) = group
        .first()
        .map(|op| (op.old_range().start, op.new_range().start))
        .unwrap_or_default();

    let mut changes = Vec::new();
    let (mut from_count, mut to_count) = (0, 0);
    for op in group {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {
                from_count += old_range.len();
                to_count += new_range.len();
                changes.extend(old_range.map(|o| LineChange::Context(o + 1, old[o].to_string())));
            }
            DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => {
                from_count += old_range.len();
                to_count += new_range.len();
                changes.extend(old_range.map(|o| LineChange::Deleted(o + 1, old[o].to_string())));
                changes.extend(new_range.map(|n| LineChange::Added(n + 1, new[n].to_string())));
            }
        }
    }

    // Unified-diff convention: an empty side starts at the line before.
    let from_line = if from_count == 0 { old_start } else { old_start + 1 };
    let to_line = if to_count == 0 { new_start } else { new_start + 1 };

    DiffHunk {
        from_line,
        from_count,
        to_line,
        to_count,
        changes,
    }
}
