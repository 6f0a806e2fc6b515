use std::fs;
use std::path::Path;

use nexora_protocol::EditContext;

use crate::error::EditError;
use crate::matcher::EditOutcome;
use crate::matcher::line_delta;

/// Replaces lines `[start, end]` (1-indexed, inclusive) with `new_text`. It
/// never fails on whitespace because it does not pattern-match — the only
/// failure mode is an out-of-bounds range.

pub fn smart_edit(path: &Path, ctx: &mut EditContext, start: usize, end: usize, new_text: &str) -> Result<EditOutcome, EditError> {
    let raw = fs::read(path)?;
    let mtime = fs::metadata(path)?.modified()?;
    if ctx.last_read.is_none() {
        return Err(EditError::NotRead);
    }
    if !ctx.is_current_against(mtime) {
        return Err(EditError::Stale);
    }

    let crlf = raw.windows(2).any(|w| w == b"\r\n");
    let raw_content = String::from_utf8_lossy(&raw).into_owned();
    let file_content = if crlf { raw_content.replace("\r\n", "\n") } else { raw_content };

    let lines: Vec<&str> = file_content.lines().collect();
    if start == 0 || start > end || end > lines.len() {
        return Err(EditError::LineRangeOutOfBounds { start, end, len: lines.len() });
    }

    let mut new_lines: Vec<&str> = lines[..start - 1].to_vec();
    let replacement_lines: Vec<&str> = new_text.lines().collect();
    new_lines.extend(replacement_lines);
    new_lines.extend(lines[end..].to_vec());
    let new_content = new_lines.join("\n") + if file_content.ends_with('\n') { "\n" } else { "" };

    let (additions, removals) = line_delta(&file_content, &new_content);

    let on_disk_content = if crlf { new_content.replace('\n', "\r\n") } else { new_content.clone() };
    fs::write(path, &on_disk_content)?;
    ctx.mark_written(fs::metadata(path)?.modified()?);
    ctx.crlf = crlf;

    Ok(EditOutcome { new_content, additions, removals, diagnostics: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_and_mark(path: &Path) -> EditContext {
        let mut ctx = EditContext::unread(path.to_path_buf());
        let mtime = fs::metadata(path).expect("metadata").modified().expect("mtime");
        ctx.mark_read(mtime, false);
        ctx
    }

    #[test]
    fn replaces_a_line_range_regardless_of_whitespace() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "one\ntwo\nthree\nfour\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let outcome = smart_edit(&path, &mut ctx, 2, 3, "TWO\nTHREE").expect("should apply");
        assert_eq!(outcome.new_content, "one\nTWO\nTHREE\nfour\n");
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "one\ntwo\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let err = smart_edit(&path, &mut ctx, 1, 5, "x").expect_err("out of range");
        assert_eq!(err.kind(), "LINE_RANGE_OUT_OF_BOUNDS");
    }

    #[test]
    fn never_fails_on_whitespace_mismatches() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "\t\tone\n  two\n").expect("write");
        let mut ctx = read_and_mark(&path);

        smart_edit(&path, &mut ctx, 1, 1, "replacement").expect("whitespace never blocks smart_edit");
    }
}
