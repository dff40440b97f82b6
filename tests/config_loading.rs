use std::sync::Arc;

use serde_json::json;

use weft_core::config::{SandboxMode, WeftConfig};
use weft_core::error::WeftError;
use weft_core::types::WorkflowStatus;
use weft_engine::WorkflowExecutor;
use weft_test_utils::{llm_workflow, write_config, ScriptedProvider};

#[test]
fn test_load_full_config_from_file() {
    let (_dir, path) = write_config(
        r#"
[engine]
node_timeout_ms = 1500
abort_on_input_failure = false
default_temperature = 0.2
default_max_tokens = 64

[sandbox]
mode = "process"
timeout_ms = 800
allowed_packages = ["lodash", "uuid"]
worker_program = "/usr/local/bin/weft"
package_dir = "/opt/weft/packages"

[providers.openai]
api_key = "sk-test-key"

[providers.ollama]
base_url = "http://localhost:11434/v1/chat/completions"

[pricing."acme-small"]
input_per_million = 10.0
output_per_million = 20.0

[retry]
max_retries = 5

[log]
log_dir = "/tmp/weft-logs"
level = 3
"#,
    );

    let config = WeftConfig::load(&path).expect("load config");

    assert_eq!(config.engine.node_timeout_ms, 1500);
    assert!(!config.engine.abort_on_input_failure);
    assert_eq!(config.engine.default_max_tokens, 64);
    assert_eq!(config.sandbox.mode, SandboxMode::Process);
    assert_eq!(config.sandbox.allowed_packages, vec!["lodash", "uuid"]);
    assert_eq!(config.sandbox.worker_program.as_deref(), Some("/usr/local/bin/weft"));
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.providers["openai"].api_key.as_deref(), Some("sk-test-key"));
    assert_eq!(config.pricing["acme-small"].input_per_million, 10.0);

    let retry = config.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 1000);

    let log = config.log.as_ref().expect("log present");
    assert!(log.enabled);
    assert_eq!(config.log_level(), 3);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEFT_TEST_API_KEY", "expanded-key-value");

    let (_dir, path) = write_config(
        r#"
[providers.anthropic]
api_key = "${WEFT_TEST_API_KEY}"
"#,
    );

    let config = WeftConfig::load(&path).expect("load config");
    assert_eq!(
        config.providers["anthropic"].api_key.as_deref(),
        Some("expanded-key-value")
    );

    std::env::remove_var("WEFT_TEST_API_KEY");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = WeftConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, WeftError::ConfigNotFound(_)));
}

#[test]
fn test_log_dir_disabled() {
    let (_dir, path) = write_config("[log]\nenabled = false\n");
    let config = WeftConfig::load(&path).unwrap();
    assert!(config.log_dir().is_none());
}

#[test]
fn test_executor_from_config_registers_providers() {
    let (_dir, path) = write_config(
        r#"
[providers.openai]
api_key = "sk-a"

[providers.Groq]
api_key = "gsk-b"
"#,
    );
    let config = WeftConfig::load(&path).unwrap();
    let executor = WorkflowExecutor::from_config(&config);

    assert_eq!(executor.providers().names(), vec!["groq", "openai"]);
    assert!(executor.providers().get("GROQ").is_some());
}

#[tokio::test]
async fn test_pricing_override_drives_node_cost() {
    let (_dir, path) = write_config(
        r#"
[sandbox]
mode = "inline"

[pricing."acme-small"]
input_per_million = 1000000.0
output_per_million = 0.0
"#,
    );
    let config = WeftConfig::load(&path).unwrap();
    let executor = WorkflowExecutor::from_config(&config);
    executor.providers().register_adapter(
        "acme",
        Arc::new(ScriptedProvider::new("acme", "ok").with_usage(3, 7)),
    );

    let result = executor.execute(&llm_workflow("acme"), json!("hi")).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.results["llm"].metrics.cost, 3.0);
    assert_eq!(result.total_cost, 3.0);
}
