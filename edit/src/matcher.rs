use std::fs;
use std::path::Path;

use nexora_protocol::EditContext;
use nexora_protocol::SessionId;
use similar::ChangeTag;
use similar::TextDiff;

use crate::circuit_breaker::EditCircuitBreaker;
use crate::collaborators::DiagnosticsProvider;
use crate::collaborators::ExternalResolver;
use crate::collaborators::FileHistory;
use crate::diff::closest_region_diff;
use crate::error::EditError;
use crate::strategies::PIPELINE;
use crate::strategies::Replacement;

const SELF_HEAL_CONTEXT_LINES: usize = 3;
const EXTERNAL_RESOLVER_MIN_CONFIDENCE: f64 = 0.80;

#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub new_content: String,
    pub additions: usize,
    pub removals: usize,
    pub diagnostics: Vec<String>,
}

/// Orchestrates the resolution pipeline, the multiple-match policy, the
/// read/mtime precondition and the file-history + circuit-breaker
/// side-effects. Collaborators are optional: a bare `EditMatcher::new()`
/// still implements strategies 1-4 and 6.
#[derive(Default)]
pub struct EditMatcher<'a> {
    pub breaker: Option<&'a EditCircuitBreaker>,
    pub external: Option<&'a dyn ExternalResolver>,
    pub history: Option<&'a dyn FileHistory>,
    pub diagnostics: Option<&'a dyn DiagnosticsProvider>,
}

impl<'a> EditMatcher<'a> {
    pub fn new() -> Self {
        Self { breaker: None, external: None, history: None, diagnostics: None }
    }

    pub fn apply(
        &self,
        session_id: SessionId,
        path: &Path,
        ctx: &mut EditContext,
        old_text: &str,
        new_text: &str,
        replace_all: bool,
    ) -> Result<EditOutcome, EditError> {
        if let Some(breaker) = self.breaker {
            if let Some(failures) = breaker.check(session_id, &path.to_path_buf()) {
                return Err(EditError::CircuitOpen { path: path.display().to_string(), failures });
            }
        }

        let result = self.apply_inner(session_id, path, ctx, old_text, new_text, replace_all);

        if let Some(breaker) = self.breaker {
            match &result {
                Ok(_) => breaker.record_success(session_id, &path.to_path_buf()),
                Err(EditError::CircuitOpen { .. }) => {}
                Err(_) => breaker.record_failure(session_id, &path.to_path_buf()),
            }
        }
        result
    }

    fn apply_inner(
        &self,
        session_id: SessionId,
        path: &Path,
        ctx: &mut EditContext,
        old_text: &str,
        new_text: &str,
        replace_all: bool,
    ) -> Result<EditOutcome, EditError> {
        if old_text == new_text {
            return Err(EditError::NoChange);
        }

        if old_text.is_empty() {
            return self.create_file(session_id, path, ctx, new_text);
        }

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

        let Some(replacement) = self.resolve(&file_content, old_text, new_text) else {
            return Err(EditError::PatternNotFound {
                path: path.display().to_string(),
                diff: closest_region_diff(&file_content, old_text),
            });
        };
        let count = file_content.matches(replacement.resolved_old_text.as_str()).count();
        if count == 0 {
            return Err(EditError::PatternNotFound {
                path: path.display().to_string(),
                diff: closest_region_diff(&file_content, old_text),
            });
        }
        if count > 1 && !replace_all {
            return Err(EditError::MultipleMatches { count });
        }

        let new_content = if replace_all {
            file_content.replace(replacement.resolved_old_text.as_str(), new_text)
        } else {
            file_content.replacen(replacement.resolved_old_text.as_str(), new_text, 1)
        };

        let (additions, removals) = line_delta(&file_content, &new_content);

        let on_disk_content = if crlf { new_content.replace('\n', "\r\n") } else { new_content.clone() };
        fs::write(path, &on_disk_content)?;

        let was_first_edit = ctx.last_written.is_none();
        ctx.mark_written(fs::metadata(path)?.modified()?);
        ctx.crlf = crlf;

        if let Some(history) = self.history {
            if was_first_edit {
                history.create(session_id, path, &file_content);
            }
            history.create_version(session_id, path, &new_content);
        }

        let diagnostics = self.diagnostics.and_then(|d| d.notify_write(path)).unwrap_or_default();

        Ok(EditOutcome { new_content, additions, removals, diagnostics })
    }

    fn create_file(
        &self,
        session_id: SessionId,
        path: &Path,
        ctx: &mut EditContext,
        new_text: &str,
    ) -> Result<EditOutcome, EditError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, new_text)?;
        ctx.mark_written(fs::metadata(path)?.modified()?);

        if let Some(history) = self.history {
            history.create(session_id, path, "");
            history.create_version(session_id, path, new_text);
        }

        let (additions, _) = line_delta("", new_text);
        let diagnostics = self.diagnostics.and_then(|d| d.notify_write(path)).unwrap_or_default();
        Ok(EditOutcome { new_content: new_text.to_string(), additions, removals: 0, diagnostics })
    }

    /// Runs strategies 1-4, then the external resolver, then the self-heal
    /// retry, stopping at the first accepted proposal. The self-heal retry
    /// deliberately replaces the whole widened window with `new_text` when
    /// it later gets applied — it is a blunt last resort, not a
    /// context-preserving splice.
    fn resolve(&self, file_content: &str, old_text: &str, new_text: &str) -> Option<Replacement> {
        for strategy in PIPELINE {
            if let Some(r) = strategy(file_content, old_text) {
                return Some(r);
            }
        }

        if let Some(external) = self.external {
            if let Some(r) = external.resolve(file_content, old_text, new_text) {
                if r.confidence >= EXTERNAL_RESOLVER_MIN_CONFIDENCE {
                    return Some(r);
                }
            }
        }

        if let Some(window) = self_heal_window(file_content, old_text) {
            for strategy in PIPELINE {
                if let Some(r) = strategy(file_content, &window) {
                    return Some(r);
                }
            }
        }

        None
    }
}

/// Strategy 6: locate a file line containing `old_text`'s first line and
/// extract a 7-line window (3 before, 3 after) as an improved `old_text`
/// for one retry through the pipeline.
fn self_heal_window(file_content: &str, old_text: &str) -> Option<String> {
    let first_line = old_text.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    let file_lines: Vec<&str> = file_content.lines().collect();
    let anchor = file_lines.iter().position(|l| l.contains(first_line))?;
    let start = anchor.saturating_sub(SELF_HEAL_CONTEXT_LINES);
    let end = (anchor + SELF_HEAL_CONTEXT_LINES + 1).min(file_lines.len());
    Some(file_lines[start..end].join("\n"))
}

pub(crate) fn line_delta(before: &str, after: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(before, after);
    let mut additions = 0;
    let mut removals = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => removals += 1,
            ChangeTag::Equal => {}
        }
    }
    (additions, removals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn read_and_mark(path: &Path) -> EditContext {
        let mut ctx = EditContext::unread(path.to_path_buf());
        let mtime = fs::metadata(path).expect("metadata").modified().expect("mtime");
        ctx.mark_read(mtime, false);
        ctx
    }

    #[test]
    fn rejects_edit_without_prior_read() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello\n").expect("write");
        let mut ctx = EditContext::unread(path.clone());

        let matcher = EditMatcher::new();
        let err = matcher
            .apply(SessionId::new(), &path, &mut ctx, "hello", "world", false)
            .expect_err("must fail without a prior read");
        assert_eq!(err.kind(), "EDIT_PRECONDITION_FAILED");
    }

    #[test]
    fn rejects_stale_read() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello\n").expect("write");
        let mut ctx = EditContext::unread(path.clone());
        ctx.mark_read(std::time::SystemTime::UNIX_EPOCH, false);

        let matcher = EditMatcher::new();
        let err = matcher
            .apply(SessionId::new(), &path, &mut ctx, "hello", "world", false)
            .expect_err("must fail on a stale read");
        assert_eq!(err.kind(), "EDIT_PRECONDITION_FAILED");
    }

    #[test]
    fn exact_match_replaces_and_updates_context() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello world\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        let outcome = matcher
            .apply(SessionId::new(), &path, &mut ctx, "hello", "goodbye", false)
            .expect("should apply");
        assert_eq!(outcome.new_content, "goodbye world\n");
        assert!(ctx.last_written.is_some());
    }

    #[test]
    fn multiple_matches_without_replace_all_fails() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "x\nx\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        let err = matcher
            .apply(SessionId::new(), &path, &mut ctx, "x", "y", false)
            .expect_err("ambiguous match must fail");
        assert_eq!(err.kind(), "MULTIPLE_MATCHES");
    }

    #[test]
    fn replace_all_handles_every_occurrence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "x\nx\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        let outcome = matcher
            .apply(SessionId::new(), &path, &mut ctx, "x", "y", true)
            .expect("should apply");
        assert_eq!(outcome.new_content, "y\ny\n");
    }

    #[test]
    fn self_heal_recovers_when_old_text_has_drifted_context() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n").expect("write");
        let mut ctx = read_and_mark(&path);

        // The caller's `old_text` pairs the unique anchor line with a
        // trailing line that never appears verbatim in the file (wrong
        // indentation *and* wrong trailing punctuation), so none of
        // strategies 1-4 match. The self-heal window keys off the anchor
        // line alone and should still resolve the edit.
        let old = "let x = 1;\nsomething that is not actually here;";
        let matcher = EditMatcher::new();
        let outcome = matcher
            .apply(SessionId::new(), &path, &mut ctx, old, "let x = 2;", false)
            .expect("self-heal should recover the match");
        assert!(outcome.new_content.contains("let x = 2;"));
    }

    #[test]
    fn unresolvable_pattern_reports_pattern_not_found_with_a_diff() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn main() {\n    let x = 1;\n}\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        let err = matcher
            .apply(SessionId::new(), &path, &mut ctx, "totally absent pattern", "y", false)
            .expect_err("should fail to resolve");
        assert_eq!(err.kind(), "PATTERN_NOT_FOUND");
    }

    #[test]
    fn empty_old_text_creates_the_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("new.txt");
        let mut ctx = EditContext::unread(path.clone());

        let matcher = EditMatcher::new();
        let outcome = matcher
            .apply(SessionId::new(), &path, &mut ctx, "", "fresh content\n", false)
            .expect("creation should succeed");
        assert_eq!(outcome.new_content, "fresh content\n");
        let on_disk = fs::read_to_string(&path).expect("read back");
        assert_eq!(on_disk, "fresh content\n");
    }

    #[test]
    fn identical_old_and_new_text_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "same\n").expect("write");
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        let err = matcher
            .apply(SessionId::new(), &path, &mut ctx, "same", "same", false)
            .expect_err("no-op edit must fail");
        assert_eq!(err.kind(), "PATTERN_FORMAT_MISMATCH");
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let mut f = File::create(&path).expect("create");
        f.write_all(b"hello\r\nworld\r\n").expect("write");
        drop(f);
        let mut ctx = read_and_mark(&path);

        let matcher = EditMatcher::new();
        matcher
            .apply(SessionId::new(), &path, &mut ctx, "hello", "goodbye", false)
            .expect("should apply");

        let raw = fs::read(&path).expect("read back");
        assert!(raw.windows(2).any(|w| w == b"\r\n"));
    }
}
