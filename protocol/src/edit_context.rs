use std::path::PathBuf;
use std::time::SystemTime;

/// Per-file bookkeeping the Edit Matcher consults before applying a patch.
/// The required invariant: an edit fails unless `last_read >= file_mtime`
/// at the moment the edit begins — the model must have observed the
/// current file.
#[derive(Debug, Clone)]
pub struct EditContext {
    pub path: PathBuf,
    pub last_read: Option<SystemTime>,
    pub last_written: Option<SystemTime>,
    pub crlf: bool,
}

impl EditContext {
    pub fn unread(path: PathBuf) -> Self {
        Self { path, last_read: None, last_written: None, crlf: false }
    }

    pub fn mark_read(&mut self, at: SystemTime, crlf: bool) {
        self.last_read = Some(at);
        self.crlf = crlf;
    }

    pub fn mark_written(&mut self, at: SystemTime) {
        self.last_written = Some(at);
        self.last_read = Some(at);
    }

    /// True when the file has been read in this session and that read is
    /// not stale relative to `mtime`.
    pub fn is_current_against(&self, mtime: SystemTime) -> bool {
        match self.last_read {
            Some(read) => read >= mtime,
            None => false,
        }
    }
}
