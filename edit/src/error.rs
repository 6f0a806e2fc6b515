use thiserror::Error;

/// Kind-tagged edit errors. The `Display` impl is the actionable message
/// surfaced to the model; callers that need the bare classification should
/// match on the variant instead of the message text.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("you must read the file before editing it")]
    NotRead,

    #[error("file has been modified since it was last read; read it again before editing")]
    Stale,

    #[error(
        "TAB_MISMATCH: old_string contains a visual tab marker that does not match the file's actual tabs"
    )]
    TabMismatch,

    #[error("SPACE_MISMATCH: old_string's whitespace does not match the file after normalization")]
    SpaceMismatch,

    #[error("PATTERN_NOT_FOUND: old_string was not found in {path}\n{diff}")]
    PatternNotFound { path: String, diff: String },

    #[error("MULTIPLE_MATCHES: old_string matches {count} locations; add more context or set replace_all")]
    MultipleMatches { count: usize },

    #[error("PATTERN_FORMAT_MISMATCH: old_string and new_string are identical; nothing to change")]
    NoChange,

    #[error(
        "edits to {path} are temporarily blocked after {failures} consecutive failures; try smart_edit or write instead"
    )]
    CircuitOpen { path: String, failures: u32 },

    #[error("line range {start}-{end} is out of bounds for a file with {len} lines")]
    LineRangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditError {
    pub fn kind(&self) -> &'static str {
        match self {
            EditError::NotRead | EditError::Stale => "EDIT_PRECONDITION_FAILED",
            EditError::TabMismatch => "TAB_MISMATCH",
            EditError::SpaceMismatch => "SPACE_MISMATCH",
            EditError::PatternNotFound { .. } => "PATTERN_NOT_FOUND",
            EditError::MultipleMatches { .. } => "MULTIPLE_MATCHES",
            EditError::NoChange => "PATTERN_FORMAT_MISMATCH",
            EditError::CircuitOpen { .. } => "EDIT_CIRCUIT_OPEN",
            EditError::LineRangeOutOfBounds { .. } => "LINE_RANGE_OUT_OF_BOUNDS",
            EditError::Io(_) => "IO_ERROR",
        }
    }
}
