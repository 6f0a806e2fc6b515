use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const CONFIG_TOML_FILE: &str = "config.toml";
const DISABLE_PROMPT_CACHING_ENV: &str = "NEXORA_DISABLE_PROMPT_CACHING";

/// Runtime configuration for the session agent core. Loaded from
/// `<config_dir>/config.toml` and overlaid with a handful of environment
/// toggles; every field has a sane default so a missing file is not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Size of the large model's context window, in tokens.
    pub context_window: u64,

    /// Auto-summarize when remaining context drops below
    /// `max(summarize_floor, summarize_fraction * context_window)`.
    pub summarize_floor: u64,
    pub summarize_fraction: f64,
    pub auto_summarize_enabled: bool,

    /// Safety toggles.
    pub safety_gate_enabled: bool,
    pub require_permission_for_unsafe_commands: bool,

    /// Tool-kind timeouts.
    pub readonly_tool_timeout: Duration,
    pub edit_tool_timeout: Duration,
    pub bash_tool_timeout: Duration,
    pub fetch_http_timeout: Duration,

    /// Shell Executor thresholds.
    pub shell_auto_background_threshold: Duration,
    pub shell_explicit_background_grace: Duration,

    /// Resource Monitor thresholds.
    pub resource_cpu_percent_threshold: f64,
    pub resource_rss_bytes_threshold: u64,
    pub resource_free_disk_bytes_threshold: u64,

    /// Session queue cap.
    pub session_queue_cap: usize,

    /// Stuck-detection thresholds.
    pub stuck_consecutive_same_tool_failures: usize,
    pub stuck_repeated_call_threshold: usize,
    pub stuck_failure_ratio_threshold: f64,

    /// Edit circuit breaker thresholds.
    pub edit_circuit_breaker_threshold: u32,
    pub edit_circuit_breaker_reset_window: Duration,

    /// External connection manager backoff.
    pub connection_retry_initial_backoff: Duration,
    pub connection_retry_multiplier: f64,
    pub connection_retry_cap: Duration,
    pub connection_retry_max_attempts: u32,
    pub connection_health_check_interval: Duration,
    pub connection_health_failures_before_reconnect: u32,

    /// Disables provider cache-control annotations end to end.
    pub disable_prompt_caching: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            summarize_floor: 20_000,
            summarize_fraction: 0.2,
            auto_summarize_enabled: true,
            safety_gate_enabled: true,
            require_permission_for_unsafe_commands: true,
            readonly_tool_timeout: Duration::from_secs(30),
            edit_tool_timeout: Duration::from_secs(120),
            bash_tool_timeout: Duration::from_secs(300),
            fetch_http_timeout: Duration::from_secs(120),
            shell_auto_background_threshold: Duration::from_secs(60),
            shell_explicit_background_grace: Duration::from_secs(1),
            resource_cpu_percent_threshold: 90.0,
            resource_rss_bytes_threshold: 4 * 1024 * 1024 * 1024,
            resource_free_disk_bytes_threshold: 500 * 1024 * 1024,
            session_queue_cap: 50,
            stuck_consecutive_same_tool_failures: 5,
            stuck_repeated_call_threshold: 3,
            stuck_failure_ratio_threshold: 0.8,
            edit_circuit_breaker_threshold: 3,
            edit_circuit_breaker_reset_window: Duration::from_secs(5 * 60),
            connection_retry_initial_backoff: Duration::from_secs(1),
            connection_retry_multiplier: 2.0,
            connection_retry_cap: Duration::from_secs(30),
            connection_retry_max_attempts: 3,
            connection_health_check_interval: Duration::from_secs(30),
            connection_health_failures_before_reconnect: 3,
            disable_prompt_caching: false,
        }
    }
}

/// Mirrors [`Config`] field-for-field but with everything optional, for
/// deserializing a partial `config.toml` that only overrides a few values.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    context_window: Option<u64>,
    summarize_floor: Option<u64>,
    summarize_fraction: Option<f64>,
    auto_summarize_enabled: Option<bool>,
    safety_gate_enabled: Option<bool>,
    require_permission_for_unsafe_commands: Option<bool>,
    readonly_tool_timeout_secs: Option<u64>,
    edit_tool_timeout_secs: Option<u64>,
    bash_tool_timeout_secs: Option<u64>,
    fetch_http_timeout_secs: Option<u64>,
    shell_auto_background_threshold_secs: Option<u64>,
    shell_explicit_background_grace_secs: Option<u64>,
    resource_cpu_percent_threshold: Option<f64>,
    resource_rss_bytes_threshold: Option<u64>,
    resource_free_disk_bytes_threshold: Option<u64>,
    session_queue_cap: Option<usize>,
    stuck_consecutive_same_tool_failures: Option<usize>,
    stuck_repeated_call_threshold: Option<usize>,
    stuck_failure_ratio_threshold: Option<f64>,
    edit_circuit_breaker_threshold: Option<u32>,
    edit_circuit_breaker_reset_window_secs: Option<u64>,
    connection_retry_initial_backoff_secs: Option<u64>,
    connection_retry_multiplier: Option<f64>,
    connection_retry_cap_secs: Option<u64>,
    connection_retry_max_attempts: Option<u32>,
    connection_health_check_interval_secs: Option<u64>,
    connection_health_failures_before_reconnect: Option<u32>,
}

impl Config {
    /// Loads `config.toml` from `config_dir` if present, merges environment
    /// overrides, and falls back to defaults for anything unset.
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let mut config = Config::default();
        let path = config_dir.join(CONFIG_TOML_FILE);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let parsed: ConfigToml = toml::from_str(&raw)?;
            config.apply_toml(parsed);
        }
        config.apply_env();
        Ok(config)
    }

    /// Default config directory, mirroring the conventional `~/.nexora`.
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".nexora"))
    }

    fn apply_toml(&mut self, toml: ConfigToml) {
        if let Some(v) = toml.context_window {
            self.context_window = v;
        }
        if let Some(v) = toml.summarize_floor {
            self.summarize_floor = v;
        }
        if let Some(v) = toml.summarize_fraction {
            self.summarize_fraction = v;
        }
        if let Some(v) = toml.auto_summarize_enabled {
            self.auto_summarize_enabled = v;
        }
        if let Some(v) = toml.safety_gate_enabled {
            self.safety_gate_enabled = v;
        }
        if let Some(v) = toml.require_permission_for_unsafe_commands {
            self.require_permission_for_unsafe_commands = v;
        }
        if let Some(v) = toml.readonly_tool_timeout_secs {
            self.readonly_tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = toml.edit_tool_timeout_secs {
            self.edit_tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = toml.bash_tool_timeout_secs {
            self.bash_tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = toml.fetch_http_timeout_secs {
            self.fetch_http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = toml.shell_auto_background_threshold_secs {
            self.shell_auto_background_threshold = Duration::from_secs(v);
        }
        if let Some(v) = toml.shell_explicit_background_grace_secs {
            self.shell_explicit_background_grace = Duration::from_secs(v);
        }
        if let Some(v) = toml.resource_cpu_percent_threshold {
            self.resource_cpu_percent_threshold = v;
        }
        if let Some(v) = toml.resource_rss_bytes_threshold {
            self.resource_rss_bytes_threshold = v;
        }
        if let Some(v) = toml.resource_free_disk_bytes_threshold {
            self.resource_free_disk_bytes_threshold = v;
        }
        if let Some(v) = toml.session_queue_cap {
            self.session_queue_cap = v;
        }
        if let Some(v) = toml.stuck_consecutive_same_tool_failures {
            self.stuck_consecutive_same_tool_failures = v;
        }
        if let Some(v) = toml.stuck_repeated_call_threshold {
            self.stuck_repeated_call_threshold = v;
        }
        if let Some(v) = toml.stuck_failure_ratio_threshold {
            self.stuck_failure_ratio_threshold = v;
        }
        if let Some(v) = toml.edit_circuit_breaker_threshold {
            self.edit_circuit_breaker_threshold = v;
        }
        if let Some(v) = toml.edit_circuit_breaker_reset_window_secs {
            self.edit_circuit_breaker_reset_window = Duration::from_secs(v);
        }
        if let Some(v) = toml.connection_retry_initial_backoff_secs {
            self.connection_retry_initial_backoff = Duration::from_secs(v);
        }
        if let Some(v) = toml.connection_retry_multiplier {
            self.connection_retry_multiplier = v;
        }
        if let Some(v) = toml.connection_retry_cap_secs {
            self.connection_retry_cap = Duration::from_secs(v);
        }
        if let Some(v) = toml.connection_retry_max_attempts {
            self.connection_retry_max_attempts = v;
        }
        if let Some(v) = toml.connection_health_check_interval_secs {
            self.connection_health_check_interval = Duration::from_secs(v);
        }
        if let Some(v) = toml.connection_health_failures_before_reconnect {
            self.connection_health_failures_before_reconnect = v;
        }
    }

    fn apply_env(&mut self) {
        if env::var(DISABLE_PROMPT_CACHING_ENV).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            self.disable_prompt_caching = true;
        }
    }

    /// Context budget below which the Session Agent stops streaming and
    /// triggers summarization.
    pub fn summarize_threshold(&self) -> u64 {
        let fractional = (self.summarize_fraction * self.context_window as f64) as u64;
        self.summarize_floor.max(fractional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("config.toml"), "context_window = 50000\nauto_summarize_enabled = false\n").expect("write");
        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.context_window, 50_000);
        assert!(!config.auto_summarize_enabled);
        assert_eq!(config.summarize_floor, Config::default().summarize_floor);
    }

    #[test]
    fn summarize_threshold_matches_spec_formula() {
        let mut config = Config::default();
        config.context_window = 200_000;
        config.summarize_floor = 20_000;
        config.summarize_fraction = 0.2;
        assert_eq!(config.summarize_threshold(), 40_000);

        config.context_window = 50_000;
        assert_eq!(config.summarize_threshold(), 20_000);
    }
}
