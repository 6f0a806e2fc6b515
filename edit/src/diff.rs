use similar::ChangeTag;
use similar::TextDiff;

/// Produces a minimal line-level visual diff between `old_text` (what the
/// caller supplied) and the closest matching region of `file_content` so a
/// `PATTERN_NOT_FOUND` error can point at what actually differs.
pub fn closest_region_diff(file_content: &str, old_text: &str) -> String {
    let window = closest_window(file_content, old_text);
    let diff = TextDiff::from_lines(old_text, &window);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let marker = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        out.push(marker);
        out.push(' ');
        out.push_str(change.value().trim_end_matches('\n'));
        out.push('\n');
    }
    out
}

/// Finds the file region whose line count matches `old_text` and that
/// shares the most lines with it (by a cheap ratio-of-matching-lines
/// score), so the diff above is anchored near the intended edit site
/// rather than at an arbitrary location.
fn closest_window(file_content: &str, old_text: &str) -> String {
    let old_lines: Vec<&str> = old_text.lines().collect();
    let file_lines: Vec<&str> = file_content.lines().collect();
    if old_lines.is_empty() || file_lines.is_empty() {
        return String::new();
    }
    let window_len = old_lines.len().min(file_lines.len()).max(1);

    let mut best_start = 0usize;
    let mut best_score = -1.0f64;
    for start in 0..=(file_lines.len().saturating_sub(window_len)) {
        let candidate = &file_lines[start..start + window_len];
        let matches = candidate
            .iter()
            .zip(old_lines.iter())
            .filter(|(a, b)| a.trim() == b.trim())
            .count();
        let score = matches as f64 / window_len as f64;
        if score > best_score {
            best_score = score;
            best_start = start;
        }
    }
    file_lines[best_start..best_start + window_len].join("\n") + "\n"
}
