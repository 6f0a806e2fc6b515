use std::path::Path;

use nexora_protocol::SessionId;

use crate::strategies::Replacement;

/// Optional external resolver collaborator. Given the full file content
/// plus the caller's `old_text`/`new_text`, it may propose an exact
/// replacement string with a confidence; the matcher accepts proposals at
/// or above 0.80.
pub trait ExternalResolver: Send + Sync {
    fn resolve(&self, file_content: &str, old_text: &str, new_text: &str) -> Option<Replacement>;
}

/// File-version history collaborator. `create` captures the content the
/// file had before this session touched it; `create_version` snapshots
/// every subsequent write.
pub trait FileHistory: Send + Sync {
    fn create(&self, session_id: SessionId, path: &Path, content: &str);
    fn create_version(&self, session_id: SessionId, path: &Path, content: &str);
}

/// LSP client set collaborator: notified of writes, optionally returning a
/// short diagnostics summary to append to the edit result.
pub trait DiagnosticsProvider: Send + Sync {
    fn notify_write(&self, path: &Path) -> Option<Vec<String>>;
}
