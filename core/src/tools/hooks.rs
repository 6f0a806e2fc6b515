//! The hook chain wrapping every tool invocation: ordered `BeforeCall` hooks
//! may veto, ordered `AfterCall` hooks may transform the response, ordered
//! `OnError` hooks observe failures. Built-in hooks cover Security
//! (allow-list + denied-path list) and Metrics (per-tool counters).

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use nexora_protocol::ToolResultContent;
use serde_json::Value;

use crate::error::NexoraErr;

/// A read-only view of the call a hook is being consulted about.
pub struct ToolCallView<'a> {
    pub tool_name: &'a str,
    pub input: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    Veto(String),
}

pub trait BeforeCallHook: Send + Sync {
    fn before_call(&self, call: &ToolCallView<'_>) -> HookDecision;
}

pub trait AfterCallHook: Send + Sync {
    fn after_call(&self, call: &ToolCallView<'_>, result: ToolResultContent) -> ToolResultContent;
}

pub trait OnErrorHook: Send + Sync {
    fn on_error(&self, call: &ToolCallView<'_>, error: &NexoraErr);
}

/// Built-in allow-list + denied-path hook. An empty allow-list means every
/// tool is allowed; a denied path match on any string-valued input field
/// vetoes the call outright.
pub struct SecurityHook {
    allowed_tools: Option<HashSet<String>>,
    denied_paths: Vec<PathBuf>,
}

impl SecurityHook {
    pub fn new(allowed_tools: Option<HashSet<String>>, denied_paths: Vec<PathBuf>) -> Self {
        Self { allowed_tools, denied_paths }
    }

    fn touches_denied_path(&self, input: &Value) -> bool {
        let Some(obj) = input.as_object() else { return false };
        obj.values().filter_map(Value::as_str).any(|candidate| self.denied_paths.iter().any(|denied| PathBuf::from(candidate).starts_with(denied)))
    }
}

impl BeforeCallHook for SecurityHook {
    fn before_call(&self, call: &ToolCallView<'_>) -> HookDecision {
        if let Some(allowed) = &self.allowed_tools {
            if !allowed.contains(call.tool_name) {
                return HookDecision::Veto(format!("tool {} is not on the allow-list", call.tool_name));
            }
        }
        if self.touches_denied_path(call.input) {
            return HookDecision::Veto("path is on the denied-path list".to_string());
        }
        HookDecision::Proceed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolMetrics {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
}

/// Built-in call/success/error counter hook.

#[derive(Default)]
pub struct MetricsHook {
    counts: Mutex<HashMap<String, ToolMetrics>>,
}

impl MetricsHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, tool_name: &str) -> ToolMetrics {
        self.counts.lock().unwrap_or_else(|p| p.into_inner()).get(tool_name).copied().unwrap_or_default()
    }

    fn bump(&self, tool_name: &str, f: impl FnOnce(&mut ToolMetrics)) {
        let mut guard = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        f(guard.entry(tool_name.to_string()).or_default());
    }
}

impl BeforeCallHook for MetricsHook {
    fn before_call(&self, call: &ToolCallView<'_>) -> HookDecision {
        self.bump(call.tool_name, |m| m.calls += 1);
        HookDecision::Proceed
    }
}

impl AfterCallHook for MetricsHook {
    fn after_call(&self, call: &ToolCallView<'_>, result: ToolResultContent) -> ToolResultContent {
        let is_error = result.is_error();
        self.bump(call.tool_name, |m| if is_error { m.errors += 1 } else { m.successes += 1 });
        result
    }
}

impl OnErrorHook for MetricsHook {
    fn on_error(&self, call: &ToolCallView<'_>, _error: &NexoraErr) {
        self.bump(call.tool_name, |m| m.errors += 1);
    }
}
