use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Provider credentials keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Per-model price overrides keyed by model id (or model id prefix).
    #[serde(default)]
    pub pricing: HashMap<String, PricingConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout budget handed to each node dispatch, unless the workflow sets one.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    /// Abort the rest of the run when an input node fails.
    #[serde(default = "default_abort_on_input_failure")]
    pub abort_on_input_failure: bool,
    /// Defaults for llm nodes that do not set them.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: default_node_timeout_ms(),
            abort_on_input_failure: default_abort_on_input_failure(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

fn default_node_timeout_ms() -> u64 { 30_000 }
fn default_abort_on_input_failure() -> bool { true }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 1000 }

/// How package snippets are isolated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Worker process when a worker program is configured or the
    /// `weft-sandbox-worker` binary can be found, inline otherwise.
    #[default]
    Auto,
    /// Worker process; inline only when no worker exists or it cannot spawn.
    Process,
    /// Embedded engine on a dedicated thread, interrupted on timeout.
    Inline,
}

/// Sandbox configuration for package nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_allowed_packages")]
    pub allowed_packages: Vec<String>,
    /// Worker executable for process isolation. Only set this to a program
    /// that speaks the worker protocol (`weft` or `weft-sandbox-worker`).
    #[serde(default)]
    pub worker_program: Option<String>,
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,
    /// Directory of `<package>.js` implementations tried before the builtin mocks.
    #[serde(default)]
    pub package_dir: Option<String>,
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_loop_iteration_limit")]
    pub loop_iteration_limit: u64,
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

fn default_sandbox_timeout_ms() -> u64 { 5_000 }
fn default_allowed_packages() -> Vec<String> {
    ["lodash", "uuid", "moment", "validator"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_worker_args() -> Vec<String> { vec!["sandbox-worker".to_string()] }
fn default_max_code_bytes() -> usize { 64 * 1024 }
fn default_max_output_bytes() -> usize { 1024 * 1024 }
fn default_loop_iteration_limit() -> u64 { 50_000_000 }
fn default_recursion_limit() -> usize { 512 }

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            timeout_ms: default_sandbox_timeout_ms(),
            allowed_packages: default_allowed_packages(),
            worker_program: None,
            worker_args: default_worker_args(),
            package_dir: None,
            max_code_bytes: default_max_code_bytes(),
            max_output_bytes: default_max_output_bytes(),
            loop_iteration_limit: default_loop_iteration_limit(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

/// Credentials and endpoint for one provider.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Retry configuration for provider requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// JSONL run log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ./weft-runs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Verbosity: 1=workflow summary, 2=node lifecycle, 3=node outputs.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "weft-runs".to_string() }
fn default_log_level() -> u8 { 2 }

impl WeftConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Run log verbosity, when logging is enabled.
    pub fn log_level(&self) -> u8 {
        self.log.as_ref().map(|l| l.level).unwrap_or_else(default_log_level)
    }

    /// Resolve the run log directory (expand ~).
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref().filter(|l| l.enabled)?;
        if let Some(rest) = log.log_dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(&log.log_dir))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
