//! Canonical tool names, the alias map, and the invocation pipeline that
//! resolves a requested name, runs the hook chain, and enforces a
//! per-tool-kind timeout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nexora_protocol::SessionId;
use nexora_protocol::ToolResultContent;
use regex_lite::Regex;
use serde_json::Value;

use crate::config::Config;
use crate::error::NexoraErr;
use crate::error::Result;
use crate::tools::hooks::AfterCallHook;
use crate::tools::hooks::BeforeCallHook;
use crate::tools::hooks::HookDecision;
use crate::tools::hooks::OnErrorHook;
use crate::tools::hooks::ToolCallView;
use crate::tools::spec::ToolSpec;

/// Which timeout bucket a tool falls into.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadOnly,
    Edit,
    Bash,
    Fetch,
}

impl ToolKind {
    pub fn timeout(self, config: &Config) -> Duration {
        match self {
            ToolKind::ReadOnly => config.readonly_tool_timeout,
            ToolKind::Edit => config.edit_tool_timeout,
            ToolKind::Bash => config.bash_tool_timeout,
            ToolKind::Fetch => config.fetch_http_timeout,
        }
    }
}

pub struct ToolInvocationContext {
    pub session_id: SessionId,
    pub cwd: PathBuf,
    pub permission_granted: bool,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;
    fn kind(&self) -> ToolKind;
    async fn invoke(&self, ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent>;
}

/// Strips stray serialization artifacts some models emit around a bare tool
/// name, e.g. a trailing `</tool_call>` or a dangling `"}` left over from a
/// malformed JSON envelope.

fn sanitize_name(raw: &str) -> String {
    static TAG_RE_SRC: &str = r"</?[A-Za-z_][\w:-]*>\s*$";
    let tag_re = Regex::new(TAG_RE_SRC).expect("static regex");
    let mut name = raw.trim();
    while let Some(m) = tag_re.find(name) {
        name = name[..m.start()].trim();
    }
    name.trim_matches(|c: char| c == '"' || c == '\'' || c == '{' || c == '}' || c.is_whitespace()).to_ascii_lowercase()
}

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("curl", "fetch"),
    ("wget", "fetch"),
    ("http-get", "fetch"),
    ("read", "view"),
    ("cat", "view"),
    ("open", "view"),
    ("shell", "bash"),
    ("exec", "bash"),
    ("run", "bash"),
    ("jobs", "job_output"),
    ("kill", "job_kill"),
];

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    aliases: Mutex<HashMap<String, String>>,
    before_hooks: Vec<Arc<dyn BeforeCallHook>>,
    after_hooks: Vec<Arc<dyn AfterCallHook>>,
    error_hooks: Vec<Arc<dyn OnErrorHook>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut by_name = HashMap::new();
        for tool in tools {
            by_name.insert(tool.spec().name.to_string(), tool);
        }
        let aliases = DEFAULT_ALIASES.iter().map(|(alias, canonical)| (alias.to_string(), canonical.to_string())).collect();
        Self { tools: by_name, aliases: Mutex::new(aliases), before_hooks: Vec::new(), after_hooks: Vec::new(), error_hooks: Vec::new() }
    }

    pub fn with_before_hook(mut self, hook: Arc<dyn BeforeCallHook>) -> Self {
        self.before_hooks.push(hook);
        self
    }

    pub fn with_after_hook(mut self, hook: Arc<dyn AfterCallHook>) -> Self {
        self.after_hooks.push(hook);
        self
    }

    pub fn with_error_hook(mut self, hook: Arc<dyn OnErrorHook>) -> Self {
        self.error_hooks.push(hook);
        self
    }

    pub fn add_alias(&self, alias: &str, canonical: &str) {
        self.aliases.lock().unwrap_or_else(|p| p.into_inner()).insert(alias.to_ascii_lowercase(), canonical.to_string());
    }

    pub fn remove_alias(&self, alias: &str) {
        self.aliases.lock().unwrap_or_else(|p| p.into_inner()).remove(&alias.to_ascii_lowercase());
    }

    pub fn list_aliases(&self) -> Vec<(String, String)> {
        let guard = self.aliases.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<_> = guard.iter().map(|(a, c)| (a.clone(), c.clone())).collect();
        entries.sort();
        entries
    }

    /// Resolves a (possibly aliased, possibly artifact-laden) requested name
    /// to its canonical tool name. Idempotent: `resolve(resolve(x)) ==
    /// resolve(x)`, and a canonical name always resolves to itself.
    pub fn resolve(&self, requested: &str) -> String {
        let sanitized = sanitize_name(requested);
        if self.tools.contains_key(&sanitized) {
            return sanitized;
        }
        self.aliases.lock().unwrap_or_else(|p| p.into_inner()).get(&sanitized).cloned().unwrap_or(sanitized)
    }

    pub async fn invoke(&self, ctx: &ToolInvocationContext, config: &Config, requested_name: &str, input: Value) -> Result<ToolResultContent> {
        let canonical = self.resolve(requested_name);
        let Some(tool) = self.tools.get(&canonical) else {
            return Err(NexoraErr::ToolExecutionFailed { tool_name: canonical, detail: "unknown tool".to_string() });
        };
        let view = ToolCallView { tool_name: &canonical, input: &input };

        for hook in &self.before_hooks {
            if let HookDecision::Veto(reason) = hook.before_call(&view) {
                let err = NexoraErr::PermissionDenied { tool_name: canonical.clone() };
                for error_hook in &self.error_hooks {
                    error_hook.on_error(&view, &err);
                }
                tracing::warn!(tool = %canonical, reason, "tool call vetoed by before-call hook");
                return Err(err);
            }
        }

        let timeout = tool.kind().timeout(config);
        let outcome = tokio::time::timeout(timeout, tool.invoke(ctx, input.clone())).await;

        match outcome {
            Ok(Ok(mut content)) => {
                for hook in &self.after_hooks {
                    content = hook.after_call(&view, content);
                }
                Ok(content)
            }
            Ok(Err(err)) => {
                for hook in &self.error_hooks {
                    hook.on_error(&view, &err);
                }
                Err(err)
            }
            Err(_elapsed) => {
                let err = NexoraErr::ToolTimeout { tool_name: canonical.clone(), elapsed_ms: timeout.as_millis() as u64 };
                for hook in &self.error_hooks {
                    hook.on_error(&view, &err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::ToolSpec;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> &ToolSpec {
            static SPEC: std::sync::OnceLock<ToolSpec> = std::sync::OnceLock::new();
            SPEC.get_or_init(|| ToolSpec::new("view", "reads a file", json!({"type": "object"})))
        }

        fn kind(&self) -> ToolKind {
            ToolKind::ReadOnly
        }

        async fn invoke(&self, _ctx: &ToolInvocationContext, input: Value) -> Result<ToolResultContent> {
            Ok(ToolResultContent::Text(input.to_string()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn spec(&self) -> &ToolSpec {
            static SPEC: std::sync::OnceLock<ToolSpec> = std::sync::OnceLock::new();
            SPEC.get_or_init(|| ToolSpec::new("bash", "runs a command", json!({"type": "object"})))
        }

        fn kind(&self) -> ToolKind {
            ToolKind::Bash
        }

        async fn invoke(&self, _ctx: &ToolInvocationContext, _input: Value) -> Result<ToolResultContent> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ToolResultContent::Text("too slow".into()))
        }
    }

    fn ctx() -> ToolInvocationContext {
        ToolInvocationContext { session_id: SessionId::new(), cwd: PathBuf::from("/tmp"), permission_granted: true }
    }

    #[test]
    fn aliases_resolve_case_insensitively_and_idempotently() {
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]);
        assert_eq!(registry.resolve("CAT"), "view");
        assert_eq!(registry.resolve("view"), "view");
        assert_eq!(registry.resolve(&registry.resolve("read")), registry.resolve("read"));
    }

    #[test]
    fn sanitizer_strips_trailing_serialization_artifacts() {
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]);
        assert_eq!(registry.resolve("view</tool_call>"), "view");
        assert_eq!(registry.resolve("\"view\""), "view");
    }

    #[test]
    fn runtime_alias_mutation_add_remove_list() {
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]);
        registry.add_alias("peek", "view");
        assert_eq!(registry.resolve("peek"), "view");
        registry.remove_alias("peek");
        assert_eq!(registry.resolve("peek"), "peek");
        assert!(registry.list_aliases().iter().any(|(a, c)| a == "cat" && c == "view"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_invoking_anything() {
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]);
        let err = registry.invoke(&ctx(), &Config::default(), "nonexistent", json!({})).await.expect_err("unknown");
        assert_eq!(err.kind(), "ToolExecutionFailed");
    }

    #[tokio::test]
    async fn timeout_surfaces_a_typed_timeout_error() {
        let config = Config { bash_tool_timeout: Duration::from_millis(10), ..Config::default() };
        let registry = ToolRegistry::new(vec![Arc::new(SlowTool)]);
        let err = registry.invoke(&ctx(), &config, "bash", json!({})).await.expect_err("should time out");
        assert_eq!(err.kind(), "ToolTimeout");
    }

    #[tokio::test]
    async fn before_hook_veto_prevents_invocation() {
        use crate::tools::hooks::SecurityHook;
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool)]).with_before_hook(Arc::new(SecurityHook::new(Some(std::collections::HashSet::new()), vec![])));
        let err = registry.invoke(&ctx(), &Config::default(), "view", json!({})).await.expect_err("vetoed");
        assert_eq!(err.kind(), "PermissionDenied");
    }
}
