//! Output Manager: decides whether raw tool output is returned
//! unchanged, truncated to a per-tool token budget, or spilled to a
//! session-scoped file when it is too large for the context window.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use nexora_protocol::SessionId;

use crate::error::NexoraErr;
use crate::error::Result;

/// Token budget tier for a tool.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetTier {
    Small,
    Medium,
    Large,
}

impl BudgetTier {
    pub fn tokens(self) -> usize {
        match self {
            BudgetTier::Small => 4_000,
            BudgetTier::Medium => 12_000,
            BudgetTier::Large => 28_000,
        }
    }
}

/// Output large enough that even the largest tier cannot hold it; always
/// spills to disk rather than truncating in-context.
const SPILL_THRESHOLD_TOKENS: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDecision {
    Returned(String),
    Truncated(String),
    WrittenToFile(PathBuf),
}

/// Approximate token count: whitespace-delimited words plus a fractional
/// charge per punctuation character, since an exact tokenizer is out of
/// scope.

pub fn approx_token_count(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    let punctuation_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    word_count + punctuation_count / 4
}

fn session_output_dir(working_dir: &Path, session_id: SessionId) -> PathBuf {
    working_dir.join(format!("nexora-output-{session_id}"))
}

/// Decides how to present `raw_output` for `tool_name`, spilling to
/// `<working_dir>/nexora-output-<session_id>/<ts>-<tool>.txt` when the
/// content is too large even for the largest budget tier.
pub fn manage_output(raw_output: &str, tool_name: &str, tier: BudgetTier, working_dir: &Path, session_id: SessionId, timestamp: &str) -> Result<OutputDecision> {
    let tokens = approx_token_count(raw_output);
    if tokens <= tier.tokens() {
        return Ok(OutputDecision::Returned(raw_output.to_string()));
    }
    if tokens < SPILL_THRESHOLD_TOKENS {
        return Ok(OutputDecision::Truncated(truncate_to_budget(raw_output, tier.tokens())));
    }

    let dir = session_output_dir(working_dir, session_id);
    fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }
    let path = dir.join(format!("{timestamp}-{tool_name}.txt"));
    fs::write(&path, raw_output)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(OutputDecision::WrittenToFile(path))
}

/// Head/tail truncation preserving the start and end of the content, with a
/// `… [N lines truncated] …` marker in between. Reused for the token-budget
/// case.
fn truncate_to_budget(content: &str, token_budget: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return content.to_string();
    }
    let keep_each_side = (token_budget / 20).max(5).min(lines.len() / 2 + 1);
    if lines.len() <= keep_each_side * 2 {
        return content.to_string();
    }
    let head = &lines[..keep_each_side];
    let tail = &lines[lines.len() - keep_each_side..];
    let truncated = lines.len() - keep_each_side * 2;
    format!("{}\n… [{truncated} lines truncated] …\n{}", head.join("\n"), tail.join("\n"))
}

/// Formats tool output: truncate, prepend error/exit code, replace empty
/// output with a sentinel, append the normalized CWD trailer.
pub fn format_tool_output(stdout: &str, stderr: &str, exit_code: Option<i32>, cwd: &Path) -> String {
    let mut body = String::new();
    if let Some(code) = exit_code {
        if code != 0 {
            if !stderr.is_empty() {
                body.push_str(stderr);
                body.push('\n');
            }
            body.push_str(&format!("exit code: {code}\n"));
        }
    }
    body.push_str(stdout);
    if body.trim().is_empty() {
        body = "no output".to_string();
    }
    format!("{}\n<cwd>{}</cwd>", body.trim_end(), cwd.display())
}

/// Removes the session's spill directory entirely.

pub fn cleanup(working_dir: &Path, session_id: SessionId) -> Result<()> {
    let dir = session_output_dir(working_dir, session_id);
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(NexoraErr::from)?;
    }
    Ok(())
}
