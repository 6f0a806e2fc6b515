//! Prepared-step hook: applied once before each streamed
//! attempt opens. Newly queued user messages are folded in by the per-turn
//! queue drain already built into `SessionAgent::run_one_turn` — each
//! queued prompt becomes its own step rather than being spliced into an
//! in-flight one, which keeps the window handed to the model free of
//! half-applied edits. Per-message provider options have no field to strip
//! in this protocol's `Message` beyond the bookkeeping `model`/`provider`
//! tags, since concrete provider wire formats sit behind the `LanguageModel`
//! boundary; what remains here is the system-prefix
//! prepend and the cache-annotation pass.

use nexora_protocol::Message;
use nexora_protocol::MessageId;

/// Cache-control annotator collaborator. The core never interprets the
/// returned tag, an opaque provider-keyed string; it is forwarded to the
/// model adapter as-is.
pub trait CacheAnnotator: Send + Sync {
    fn annotate(&self, index: usize, total: usize) -> Option<String>;
}

pub struct PreparedStep {
    pub system_prompt: Option<String>,
    pub history: Vec<Message>,
    /// Tags for the system message slot and the last two messages of the
    /// window, keyed by message id.
    pub cache_annotations: Vec<(MessageId, String)>,
}

pub fn prepare_step(system_prompt: Option<&str>, system_prefix: Option<&str>, history: Vec<Message>, disable_prompt_caching: bool, annotator: Option<&dyn CacheAnnotator>) -> PreparedStep {
    let system_prompt = match (system_prefix, system_prompt) {
        (Some(prefix), Some(base)) => Some(format!("{prefix}\n\n{base}")),
        (Some(prefix), None) => Some(prefix.to_string()),
        (None, base) => base.map(str::to_string),
    };

    let mut cache_annotations = Vec::new();
    if !disable_prompt_caching {
        if let Some(annotator) = annotator {
            let total = history.len();
            for (index, message) in history.iter().enumerate() {
                if total.saturating_sub(index) <= 2 {
                    if let Some(tag) = annotator.annotate(index, total) {
                        cache_annotations.push((message.id, tag));
                    }
                }
            }
        }
    }

    PreparedStep { system_prompt, history, cache_annotations }
}
