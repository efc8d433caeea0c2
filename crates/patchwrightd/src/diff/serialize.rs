//! Rendering diffs as unified diff text.

use super::types::{Hunk, UnifiedDiff};

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

pub(super) fn serialize(diff: &UnifiedDiff) -> String {
    let mut out = String::new();
    out.push_str("--- ");
    out.push_str(&label(&diff.old_path, "a/"));
    out.push('\n');
    out.push_str("+++ ");
    out.push_str(&label(&diff.new_path, "b/"));
    out.push('\n');
    for hunk in &diff.hunks {
        write_hunk(&mut out, hunk);
    }
    out
}

fn label(path: &str, prefix: &str) -> String {
    if path == UnifiedDiff::DEV_NULL {
        path.to_owned()
    } else {
        format!("{prefix}{path}")
    }
}

fn write_hunk(out: &mut String, hunk: &Hunk) {
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
    ));
    for line in &hunk.lines {
        out.push(line.kind.prefix());
        out.push_str(&line.text);
        out.push('\n');
        if line.missing_newline {
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

pub(super) const fn no_newline_marker() -> &'static str {
    NO_NEWLINE_MARKER
}
