//! Single-HTTP-attempt event loop: consumes one
//! [`ModelEvent`] stream, executes tool calls as they arrive, accumulates
//! the assistant message being built, updates the session state machine
//! with tool outcomes, and decides whether the step ends in a normal
//! finish, a stuck condition, or a stream error.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_channel::Receiver;
use async_trait::async_trait;
use nexora_protocol::FinishReason;
use nexora_protocol::ToolCallId;
use nexora_protocol::ToolOutcome;
use nexora_protocol::ToolResultContent;
use nexora_protocol::ToolResultPart;
use nexora_protocol::message::AssistantPart;
use nexora_protocol::message::ToolCallPart;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::collaborators::DriftDetector;
use crate::collaborators::LoopDetector;
use crate::collaborators::ModelEvent;
use crate::collaborators::ProviderFinishReason;
use crate::collaborators::StreamErrorReason;
use crate::state::SessionStateMachine;
use crate::state::StuckReason;

const CONTINUATION_SIGNALS: &[&str] = &["let me ", "let's ", "next, i'll", "next i'll", "i need to", "i'll now", "i will now"];
/// How many recent tool outcomes the loop/drift detectors see.
const DETECTOR_RING_SIZE: usize = 10;

/// Executes a resolved tool call. The Session Agent's implementation wraps
/// the Tool Registry plus the safety gate and permission service; tests use
/// a fixed-response double.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, id: ToolCallId, tool_name: &str, input: &Value) -> ToolResultContent;
}

pub struct StepOutcome {
    pub parts: Vec<AssistantPart>,
    pub tool_results: Vec<ToolResultPart>,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub produced_tool_result: bool,
    pub pending_tool_call_ids: Vec<ToolCallId>,
    pub continuation_signal: bool,
    pub stuck: Option<StuckReason>,
    pub system_notices: Vec<String>,
    pub stream_error: Option<StreamErrorReason>,
}

fn push_text(parts: &mut [AssistantPart], text: &str) -> bool {
    if let Some(AssistantPart::Text { text: existing }) = parts.last_mut() {
        existing.push_str(text);
        return true;
    }
    false
}

fn push_reasoning(parts: &mut [AssistantPart], text: &str) -> bool {
    if let Some(AssistantPart::Reasoning { text: existing, .. }) = parts.last_mut() {
        existing.push_str(text);
        return true;
    }
    false
}

fn map_finish_reason(reason: ProviderFinishReason) -> FinishReason {
    match reason {
        ProviderFinishReason::MaxTokens => FinishReason::MaxTokens,
        ProviderFinishReason::EndTurn => FinishReason::EndTurn,
        ProviderFinishReason::ToolUse => FinishReason::ToolUse,
        ProviderFinishReason::Unknown => FinishReason::Unknown,
    }
}

/// Runs one streamed attempt to completion, a stuck condition, or a stream
/// error (including cancellation) — whichever comes first.
#[allow(clippy::too_many_arguments)]
pub async fn run_step(events: Receiver<ModelEvent>, cancel: CancellationToken, executor: &dyn ToolExecutor, state: &mut SessionStateMachine, loop_detector: Option<&dyn LoopDetector>, drift_detector: Option<&dyn DriftDetector>, task_context: &str) -> StepOutcome {
    let mut parts: Vec<AssistantPart> = Vec::new();
    let mut tool_results: Vec<ToolResultPart> = Vec::new();
    let mut text_started = false;
    let mut last_text = String::new();
    let mut pending_tool_ids: HashMap<ToolCallId, ()> = HashMap::new();
    let mut produced_tool_result = false;
    let mut prompt_tokens = 0u64;
    let mut completion_tokens = 0u64;
    let mut cost = 0.0f64;
    let mut finish_reason = FinishReason::Unknown;
    let mut stuck = None;
    let mut system_notices = Vec::new();
    let mut recent_outcomes: VecDeque<ToolOutcome> = VecDeque::new();
    let mut stream_error = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream_error = Some(StreamErrorReason::Canceled);
                break;
            }
            received = events.recv() => match received {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            ModelEvent::ReasoningStart => parts.push(AssistantPart::Reasoning { text: String::new(), signature: None }),
            ModelEvent::ReasoningDelta { text } => {
                if !push_reasoning(&mut parts, &text) {
                    parts.push(AssistantPart::Reasoning { text, signature: None });
                }
            }
            ModelEvent::ReasoningEnd { signature } => {
                if let Some(AssistantPart::Reasoning { signature: slot, .. }) = parts.last_mut() {
                    *slot = signature;
                }
            }
            ModelEvent::TextDelta { text } => {
                let chunk = if !text_started { text.strip_prefix('\n').unwrap_or(&text).to_string() } else { text };
                text_started = true;
                last_text.push_str(&chunk);
                if !push_text(&mut parts, &chunk) {
                    parts.push(AssistantPart::Text { text: chunk });
                }
            }
            ModelEvent::ToolInputStart { .. } => {}
            ModelEvent::ToolCall { id, tool_name, input } => {
                parts.push(AssistantPart::ToolCall(ToolCallPart { id, tool_name: tool_name.clone(), input: input.clone(), finished: false, provider_executed: false }));
                pending_tool_ids.insert(id, ());

                let content = executor.execute(id, &tool_name, &input).await;
                produced_tool_result = true;
                if let Some(AssistantPart::ToolCall(call)) = parts.iter_mut().rev().find(|p| matches!(p, AssistantPart::ToolCall(c) if c.id == id)) {
                    call.finished = true;
                }
                pending_tool_ids.remove(&id);

                let succeeded = !content.is_error();
                let argument_hash = {
                    use std::hash::Hash;
                    use std::hash::Hasher;
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    tool_name.hash(&mut hasher);
                    input.to_string().hash(&mut hasher);
                    hasher.finish()
                };
                let outcome = ToolOutcome { tool_name: tool_name.clone(), argument_hash, succeeded };
                tool_results.push(ToolResultPart { tool_call_id: id, content, metadata: None });

                if let Some(reason) = state.record_outcome_and_check_stuck(outcome.clone()) {
                    stuck = Some(reason);
                    break;
                }

                recent_outcomes.push_back(outcome);
                while recent_outcomes.len() > DETECTOR_RING_SIZE {
                    recent_outcomes.pop_front();
                }
                let ring: Vec<ToolOutcome> = recent_outcomes.iter().cloned().collect();
                if let Some(detector) = loop_detector {
                    if let Some(notice) = detector.detect(&ring).await {
                        system_notices.push(notice);
                    }
                }
                if let Some(detector) = drift_detector {
                    if let Some(notice) = detector.detect(&last_text, task_context).await {
                        system_notices.push(notice);
                    }
                }
            }
            ModelEvent::ToolResult { id, .. } => {
                // A provider that resolves tool calls itself; we did not execute
                // it, so there is nothing to account beyond marking it closed.
                if let Some(AssistantPart::ToolCall(call)) = parts.iter_mut().rev().find(|p| matches!(p, AssistantPart::ToolCall(c) if c.id == id)) {
                    call.finished = true;
                }
                pending_tool_ids.remove(&id);
            }
            ModelEvent::StepFinish { reason, prompt_tokens: pt, completion_tokens: ct, cost: c, .. } => {
                finish_reason = map_finish_reason(reason);
                prompt_tokens = pt;
                completion_tokens = ct;
                cost = c;
                break;
            }
            ModelEvent::Retry { .. } => {}
            ModelEvent::Error(reason) => {
                stream_error = Some(reason);
                break;
            }
        }
    }

    let pending_tool_call_ids: Vec<ToolCallId> = pending_tool_ids.into_keys().collect();
    let lower_text = last_text.to_ascii_lowercase();
    let continuation_signal = CONTINUATION_SIGNALS.iter().any(|s| lower_text.contains(s));

    StepOutcome { parts, tool_results, finish_reason, prompt_tokens, completion_tokens, cost, produced_tool_result, pending_tool_call_ids, continuation_signal, stuck, system_notices, stream_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ProviderFinishReason;
    use crate::config::Config;

    fn config() -> Config {
        Config::default()
    }

    struct FixedExecutor(ToolResultContent);

    #[async_trait]
    impl ToolExecutor for FixedExecutor {
        async fn execute(&self, _id: ToolCallId, _tool_name: &str, _input: &Value) -> ToolResultContent {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn plain_text_reply_ends_at_step_finish() {
        let (tx, rx) = async_channel::unbounded();
        tx.send(ModelEvent::TextDelta { text: "\nHello there".into() }).await.expect("send");
        tx.send(ModelEvent::StepFinish { reason: ProviderFinishReason::EndTurn, prompt_tokens: 100, completion_tokens: 10, cost: 0.001, cache_metadata: None }).await.expect("send");
        drop(tx);

        let mut state = SessionStateMachine::new(&config());
        let executor = FixedExecutor(ToolResultContent::Text("unused".into()));
        let outcome = run_step(rx, CancellationToken::new(), &executor, &mut state, None, None, "task").await;

        assert_eq!(outcome.finish_reason, FinishReason::EndTurn);
        assert!(matches!(&outcome.parts[0], AssistantPart::Text { text } if text == "Hello there"));
        assert!(!outcome.continuation_signal);
        assert!(outcome.stream_error.is_none());
    }

    #[tokio::test]
    async fn tool_call_is_executed_inline_and_marked_finished() {
        let (tx, rx) = async_channel::unbounded();
        let id = ToolCallId::new();
        tx.send(ModelEvent::ToolCall { id, tool_name: "bash".into(), input: serde_json::json!({}) }).await.expect("send");
        tx.send(ModelEvent::StepFinish { reason: ProviderFinishReason::ToolUse, prompt_tokens: 50, completion_tokens: 5, cost: 0.0, cache_metadata: None }).await.expect("send");
        drop(tx);

        let mut state = SessionStateMachine::new(&config());
        let executor = FixedExecutor(ToolResultContent::Text("ok".into()));
        let outcome = run_step(rx, CancellationToken::new(), &executor, &mut state, None, None, "task").await;

        assert!(outcome.produced_tool_result);
        assert!(outcome.pending_tool_call_ids.is_empty());
        assert_eq!(outcome.tool_results.len(), 1);
        let AssistantPart::ToolCall(ToolCallPart { finished, .. }) = &outcome.parts[0] else { panic!("expected tool call part") };
        assert!(*finished);
    }

    #[tokio::test]
    async fn continuation_signal_is_detected_in_trailing_text() {
        let (tx, rx) = async_channel::unbounded();
        tx.send(ModelEvent::TextDelta { text: "Let me check the logs next.".into() }).await.expect("send");
        tx.send(ModelEvent::StepFinish { reason: ProviderFinishReason::EndTurn, prompt_tokens: 10, completion_tokens: 5, cost: 0.0, cache_metadata: None }).await.expect("send");
        drop(tx);

        let mut state = SessionStateMachine::new(&config());
        let executor = FixedExecutor(ToolResultContent::Text("unused".into()));
        let outcome = run_step(rx, CancellationToken::new(), &executor, &mut state, None, None, "task").await;
        assert!(outcome.continuation_signal);
    }

    #[tokio::test]
    async fn stream_error_event_short_circuits_the_step() {
        let (tx, rx) = async_channel::unbounded();
        tx.send(ModelEvent::Error(StreamErrorReason::Canceled)).await.expect("send");
        drop(tx);

        let mut state = SessionStateMachine::new(&config());
        let executor = FixedExecutor(ToolResultContent::Text("unused".into()));
        let outcome = run_step(rx, CancellationToken::new(), &executor, &mut state, None, None, "task").await;
        assert!(matches!(outcome.stream_error, Some(StreamErrorReason::Canceled)));
    }

    #[tokio::test]
    async fn cancellation_token_ends_the_step_with_a_canceled_reason() {
        let (_tx, rx) = async_channel::unbounded();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut state = SessionStateMachine::new(&config());
        let executor = FixedExecutor(ToolResultContent::Text("unused".into()));
        let outcome = run_step(rx, cancel, &executor, &mut state, None, None, "task").await;
        assert!(matches!(outcome.stream_error, Some(StreamErrorReason::Canceled)));
    }

    #[tokio::test]
    async fn repeated_tool_failures_trip_stuck_detection_before_step_finish() {
        let (tx, rx) = async_channel::unbounded();
        for _ in 0..6 {
            let id = ToolCallId::new();
            tx.send(ModelEvent::ToolCall { id, tool_name: "bash".into(), input: serde_json::json!({"n": rand::random::<u32>()}) }).await.expect("send");
        }
        drop(tx);

        let mut config = config();
        config.stuck_consecutive_same_tool_failures = 5;
        let mut state = SessionStateMachine::new(&config);
        let executor = FixedExecutor(ToolResultContent::Error("boom".into()));
        let outcome = run_step(rx, CancellationToken::new(), &executor, &mut state, None, None, "task").await;
        assert!(outcome.stuck.is_some());
    }
}
