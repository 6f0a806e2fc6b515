//! Named, total, independently-testable resolution strategies for turning an
//! approximate `old_text` into a string that is actually present in the
//! file. Each strategy returns `Option<Replacement>` and never panics; the
//! matcher runs them in order and stops at the first `Some`.

const FULL_NORMALIZATION_SIZE_LIMIT: usize = 50 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// The text to search for in the file content — may differ from the
    /// caller-supplied `old_text` once a strategy has normalized it.
    pub resolved_old_text: String,
    pub confidence: f64,
}

impl Replacement {
    fn new(resolved_old_text: impl Into<String>, confidence: f64) -> Self {
        Self { resolved_old_text: resolved_old_text.into(), confidence }
    }
}

/// Strategy 1: exact substring match. Confidence 1.0 — no normalization was
/// needed.
pub fn exact(file_content: &str, old_text: &str) -> Option<Replacement> {
    file_content
        .contains(old_text)
        .then(|| Replacement::new(old_text, 1.0))
}

/// Strategy 2: some models emit a literal `→` (optionally followed by a
/// tab character) where the file actually has a tab. Normalize both forms
/// to a real tab and re-match.
pub fn display_tab_normalization(file_content: &str, old_text: &str) -> Option<Replacement> {
    if !old_text.contains('→') {
        return None;
    }
    let normalized = old_text.replace("→\t", "\t").replace('→', "\t");
    file_content
        .contains(normalized.as_str())
        .then(|| Replacement::new(normalized, 0.95))
}

/// Strategy 3: compare trimmed lines on both sides and locate the first
/// contiguous run in the file whose trimmed lines equal `old_text`'s
/// trimmed lines. Returns the file's actual (indented) lines as the
/// resolved pattern, so indentation differences never block a match.
pub fn line_content_match(file_content: &str, old_text: &str) -> Option<Replacement> {
    let old_lines: Vec<&str> = old_text.lines().collect();
    if old_lines.is_empty() {
        return None;
    }
    let old_trimmed: Vec<&str> = old_lines.iter().map(|l| l.trim()).collect();
    let file_lines: Vec<&str> = file_content.lines().collect();
    if file_lines.len() < old_trimmed.len() {
        return None;
    }

    for start in 0..=(file_lines.len() - old_trimmed.len()) {
        let window = &file_lines[start..start + old_trimmed.len()];
        if window.iter().map(|l| l.trim()).eq(old_trimmed.iter().copied()) {
            let resolved = window.join("\n");
            return Some(Replacement::new(resolved, 0.90));
        }
    }
    None
}

/// Strategy 4: replace tabs with four spaces on both sides and re-match.
/// Skipped on files larger than 50 KB, where a full-content rewrite of the
/// search space would be wasteful for a strategy this far down the
/// pipeline.
pub fn full_whitespace_normalization(file_content: &str, old_text: &str) -> Option<Replacement> {
    if file_content.len() > FULL_NORMALIZATION_SIZE_LIMIT {
        return None;
    }
    let normalized_old = old_text.replace('\t', "    ");
    let normalized_file = file_content.replace('\t', "    ");
    normalized_file
        .contains(normalized_old.as_str())
        .then(|| Replacement::new(normalized_old, 0.80))
}

/// The ordered pipeline. Strategy order is significant: exact match must be
/// tried before any normalization so a caller that already supplied a
/// correct pattern never pays for a weaker match.
pub const PIPELINE: &[fn(&str, &str) -> Option<Replacement>] = &[
    exact,
    display_tab_normalization,
    line_content_match,
    full_whitespace_normalization,
];
