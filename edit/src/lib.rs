//! The self-healing edit matcher: exact → normalized → fuzzy →
//! self-heal resolution of an approximate `old_text`/`new_text` patch
//! against live file contents, plus the per-file circuit breaker that
//! forces alternative tools after repeated failures.

pub mod circuit_breaker;
pub mod collaborators;
pub mod diff;
pub mod error;
mod matcher;
pub mod smart_edit;
pub mod strategies;

pub use circuit_breaker::EditCircuitBreaker;
pub use collaborators::DiagnosticsProvider;
pub use collaborators::ExternalResolver;
pub use collaborators::FileHistory;
pub use error::EditError;
pub use matcher::EditMatcher;
pub use matcher::EditOutcome;
pub use smart_edit::smart_edit;
