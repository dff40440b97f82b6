use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use weft_core::config::{SandboxConfig, SandboxMode};
use weft_core::error::{Result, WeftError};

use crate::isolation::{InlineIsolation, Isolation, IsolationError, ProcessIsolation};
use crate::packages::PackageRegistry;
use crate::protocol::{Limits, StartMessage};

/// Error text reported when a snippet overruns its timeout.
pub const TIMEOUT_MESSAGE: &str = "Execution timeout";

/// Outcome of one sandbox execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Rough estimate: code, serialized input and serialized output bytes.
    pub memory_bytes: u64,
}

impl SandboxOutcome {
    fn ok(output: Value, elapsed: Duration, memory_bytes: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time_ms: elapsed.as_millis() as u64,
            memory_bytes,
        }
    }

    fn failed(error: impl Into<String>, elapsed: Duration, memory_bytes: u64) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            execution_time_ms: elapsed.as_millis() as u64,
            memory_bytes,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_MESSAGE)
    }
}

/// Runs package snippets behind an allow-list and an isolation strategy.
pub struct SandboxExecutor {
    config: SandboxConfig,
    allowed: BTreeSet<String>,
    packages: PackageRegistry,
    primary: Arc<dyn Isolation>,
    fallback: Option<Arc<dyn Isolation>>,
}

impl SandboxExecutor {
    /// Build an executor from config, choosing isolation by `mode`.
    ///
    /// `auto` and `process` use a worker process: `worker_program` if set,
    /// else the `weft-sandbox-worker` binary found by
    /// [`ProcessIsolation::locate`]. Without either, `auto` evaluates inline
    /// and `process` logs a warning and does the same.
    pub fn new(config: SandboxConfig) -> Self {
        let worker = match &config.worker_program {
            Some(program) => Some(ProcessIsolation::new(
                program.clone(),
                config.worker_args.clone(),
            )),
            None if config.mode == SandboxMode::Inline => None,
            None => ProcessIsolation::locate(),
        };

        let primary: Arc<dyn Isolation> = match (config.mode, worker) {
            (SandboxMode::Inline, _) => Arc::new(InlineIsolation),
            (_, Some(process)) => Arc::new(process),
            (SandboxMode::Auto, None) => {
                debug!("No sandbox worker found, evaluating snippets inline");
                Arc::new(InlineIsolation)
            }
            (SandboxMode::Process, None) => {
                warn!("Process isolation requested but no sandbox worker is configured, using inline sandbox");
                Arc::new(InlineIsolation)
            }
        };

        let mut packages = PackageRegistry::with_builtin_mocks();
        if let Some(dir) = &config.package_dir {
            packages = packages.with_package_dir(dir);
        }

        let allowed = config.allowed_packages.iter().cloned().collect();
        let fallback: Option<Arc<dyn Isolation>> = if primary.name() == "inline" {
            None
        } else {
            Some(Arc::new(InlineIsolation))
        };

        info!(isolation = primary.name(), timeout_ms = config.timeout_ms, "Sandbox ready");

        Self {
            config,
            allowed,
            packages,
            primary,
            fallback,
        }
    }

    /// Replace the primary isolation strategy.
    pub fn with_isolation(mut self, isolation: Arc<dyn Isolation>) -> Self {
        self.primary = isolation;
        self
    }

    /// Replace (or remove) the fallback used when the primary is unavailable.
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn Isolation>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_packages(mut self, packages: PackageRegistry) -> Self {
        self.packages = packages;
        self
    }

    pub fn allow_package(&mut self, name: impl Into<String>) {
        self.allowed.insert(name.into());
    }

    pub fn is_allowed(&self, package: &str) -> bool {
        self.allowed.contains(package)
    }

    pub fn allowed_packages(&self) -> Vec<&str> {
        self.allowed.iter().map(|s| s.as_str()).collect()
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    pub fn isolation_name(&self) -> &'static str {
        self.primary.name()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Run `code` against `input` with the configured timeout.
    ///
    /// Fails only when `package` is not allow-listed; every other failure is a
    /// `success: false` outcome.
    pub async fn execute(&self, package: &str, code: &str, input: &Value) -> Result<SandboxOutcome> {
        self.execute_with_timeout(package, code, input, self.timeout())
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        package: &str,
        code: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<SandboxOutcome> {
        if !self.is_allowed(package) {
            return Err(WeftError::PackageNotAllowed(package.to_string()));
        }

        let start = Instant::now();
        let input_bytes = serde_json::to_vec(input).map(|v| v.len()).unwrap_or(0);
        let base_memory = (code.len() + input_bytes) as u64;

        if code.len() > self.config.max_code_bytes {
            return Ok(SandboxOutcome::failed(
                format!(
                    "Code too large: {} bytes (max {})",
                    code.len(),
                    self.config.max_code_bytes
                ),
                start.elapsed(),
                0,
            ));
        }

        let binding = match self.packages.resolve(package).await {
            Ok(binding) => binding,
            Err(e) => return Ok(SandboxOutcome::failed(e.to_string(), start.elapsed(), 0)),
        };

        let msg = StartMessage {
            package_name: package.to_string(),
            code: code.to_string(),
            input: input.clone(),
            binding_names: binding.binding_names,
            binding_source: binding.source,
            limits: Limits::from(&self.config),
        };

        debug!(%package, isolation = self.primary.name(), "Executing snippet");

        let mut result = self.primary.run(msg.clone(), timeout).await;
        if let (Err(IsolationError::Unavailable(reason)), Some(fallback)) = (&result, &self.fallback) {
            warn!(%package, %reason, fallback = fallback.name(), "Primary isolation unavailable, falling back");
            let remaining = timeout.saturating_sub(start.elapsed());
            result = fallback.run(msg, remaining).await;
        }

        let elapsed = start.elapsed();
        let outcome = match result {
            Ok(message) if message.success => {
                let output_bytes = serde_json::to_vec(&message.output)
                    .map(|v| v.len())
                    .unwrap_or(0);
                if output_bytes > self.config.max_output_bytes {
                    SandboxOutcome::failed(
                        format!(
                            "Output too large: {} bytes (max {})",
                            output_bytes, self.config.max_output_bytes
                        ),
                        elapsed,
                        base_memory,
                    )
                } else {
                    SandboxOutcome::ok(message.output, elapsed, base_memory + output_bytes as u64)
                }
            }
            Ok(message) => SandboxOutcome::failed(
                message.error.unwrap_or_else(|| "Snippet failed".into()),
                elapsed,
                base_memory,
            ),
            Err(IsolationError::Timeout(_)) => {
                SandboxOutcome::failed(TIMEOUT_MESSAGE, elapsed, base_memory)
            }
            Err(e) => SandboxOutcome::failed(e.to_string(), elapsed, base_memory),
        };

        debug!(
            %package,
            success = outcome.success,
            elapsed_ms = outcome.execution_time_ms,
            "Snippet finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::protocol::ResultMessage;

    fn inline_executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig {
            mode: SandboxMode::Inline,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_lodash_snippet_doubles() {
        let executor = inline_executor();
        let outcome = executor
            .execute("lodash", "return _.map(input, x => x * 2);", &json!([1, 2, 3]))
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.output, json!([2, 4, 6]));
        assert!(outcome.memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_package_not_allowed() {
        let executor = inline_executor();
        let err = executor
            .execute("child_process", "return 1;", &json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::PackageNotAllowed(_)));
    }

    #[tokio::test]
    async fn test_allowed_but_unavailable_package() {
        let mut executor = inline_executor();
        executor.allow_package("left-pad");
        let outcome = executor
            .execute("left-pad", "return input;", &json!("x"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("left-pad"));
    }

    #[tokio::test]
    async fn test_throwing_snippet() {
        let executor = inline_executor();
        let outcome = executor
            .execute("lodash", "throw new Error('nope');", &json!(null))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.output, Value::Null);
        assert_eq!(outcome.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_timeout_outcome() {
        let executor = inline_executor();
        let outcome = executor
            .execute_with_timeout("lodash", "while (true) {}", &json!(null), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.is_timeout());
        assert_eq!(outcome.error.as_deref(), Some("Execution timeout"));
    }

    #[tokio::test]
    async fn test_process_mode_without_worker_program_runs_snippet() {
        let executor = SandboxExecutor::new(SandboxConfig {
            mode: SandboxMode::Process,
            ..Default::default()
        });
        let outcome = executor
            .execute("lodash", "return input.map(x => x * 2);", &json!([1, 2, 3]))
            .await
            .unwrap();
        assert!(outcome.success, "{}: {:?}", executor.isolation_name(), outcome.error);
        assert_eq!(outcome.output, json!([2, 4, 6]));
    }

    #[tokio::test]
    async fn test_code_size_limit() {
        let executor = SandboxExecutor::new(SandboxConfig {
            mode: SandboxMode::Inline,
            max_code_bytes: 8,
            ..Default::default()
        });
        let outcome = executor
            .execute("lodash", "return input; // long", &json!(1))
            .await
            .unwrap();
        assert!(outcome.error.unwrap().starts_with("Code too large"));
    }

    #[tokio::test]
    async fn test_output_size_limit() {
        let executor = SandboxExecutor::new(SandboxConfig {
            mode: SandboxMode::Inline,
            max_output_bytes: 16,
            ..Default::default()
        });
        let outcome = executor
            .execute("lodash", "return _.range(100);", &json!(null))
            .await
            .unwrap();
        assert!(outcome.error.unwrap().starts_with("Output too large"));
    }

    struct Unavailable(AtomicBool);

    impl Isolation for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn run(
            &self,
            _msg: StartMessage,
            _timeout: Duration,
        ) -> BoxFuture<'_, std::result::Result<ResultMessage, IsolationError>> {
            self.0.store(true, Ordering::SeqCst);
            Box::pin(async { Err(IsolationError::Unavailable("no workers".into())) })
        }
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_unavailable() {
        let primary = Arc::new(Unavailable(AtomicBool::new(false)));
        let executor = inline_executor()
            .with_isolation(primary.clone())
            .with_fallback(Some(Arc::new(InlineIsolation)));

        let outcome = executor
            .execute("uuid", "return uuid.validate(uuid.v4());", &json!(null))
            .await
            .unwrap();
        assert!(primary.0.load(Ordering::SeqCst));
        assert_eq!(outcome.output, json!(true));
    }

    #[tokio::test]
    async fn test_default_snippets_run() {
        let executor = inline_executor();
        for package in ["lodash", "uuid", "moment", "validator"] {
            let outcome = executor
                .execute(package, crate::default_snippet(package), &json!("user@example.com"))
                .await
                .unwrap();
            assert!(outcome.success, "{}: {:?}", package, outcome.error);
        }
    }
}
