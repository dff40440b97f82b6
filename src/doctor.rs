use std::path::Path;

use serde_json::json;

use weft_core::config::WeftConfig;
use weft_llm::providers::presets::get_preset;
use weft_sandbox::SandboxExecutor;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn issue(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Print a health report. Returns the number of issues found.
pub async fn run_doctor(config: &WeftConfig, sandbox: &SandboxExecutor) -> usize {
    let checks = vec![
        check_providers(config),
        check_pricing(config),
        check_package_dir(config),
        check_sandbox(sandbox).await,
        check_log_dir(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;
    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count
}

fn check_providers(config: &WeftConfig) -> CheckResult {
    if config.providers.is_empty() {
        return CheckResult::ok("Providers", "None configured (use --mock-providers for dry runs)");
    }

    let mut missing = Vec::new();
    let mut names: Vec<&String> = config.providers.keys().collect();
    names.sort();
    for name in &names {
        let provider = &config.providers[*name];
        let has_key = provider
            .api_key
            .as_ref()
            .is_some_and(|k| !k.is_empty() && !k.starts_with("${"));
        // Local presets such as ollama run without a key
        let keyless = get_preset(name).is_some_and(|p| !p.needs_api_key);
        if !has_key && !keyless {
            missing.push(name.as_str());
        }
    }

    let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    if missing.is_empty() {
        CheckResult::ok("Providers", names.join(", "))
    } else {
        CheckResult::issue("Providers", format!("No API key for: {}", missing.join(", ")))
    }
}

fn check_pricing(config: &WeftConfig) -> CheckResult {
    let bad: Vec<&str> = config
        .pricing
        .iter()
        .filter(|(_, p)| p.input_per_million < 0.0 || p.output_per_million < 0.0)
        .map(|(model, _)| model.as_str())
        .collect();
    if bad.is_empty() {
        CheckResult::ok("Pricing", format!("{} overrides", config.pricing.len()))
    } else {
        CheckResult::issue("Pricing", format!("Negative prices for: {}", bad.join(", ")))
    }
}

fn check_package_dir(config: &WeftConfig) -> CheckResult {
    match &config.sandbox.package_dir {
        None => CheckResult::ok("Packages", "Builtin implementations only"),
        Some(dir) if Path::new(dir).is_dir() => CheckResult::ok("Packages", dir.clone()),
        Some(dir) => CheckResult::issue("Packages", format!("{} (does not exist)", dir)),
    }
}

async fn check_sandbox(sandbox: &SandboxExecutor) -> CheckResult {
    let label = "Sandbox";
    match sandbox
        .execute("lodash", "return _.sum(input);", &json!([1, 2, 3]))
        .await
    {
        Ok(outcome) if outcome.success && outcome.output == json!(6) => CheckResult::ok(
            label,
            format!(
                "{} isolation, {}ms round trip",
                sandbox.isolation_name(),
                outcome.execution_time_ms
            ),
        ),
        Ok(outcome) => CheckResult::issue(
            label,
            format!(
                "Self-test failed: {}",
                outcome.error.unwrap_or_else(|| format!("got {}", outcome.output))
            ),
        ),
        Err(e) => CheckResult::issue(label, format!("Self-test failed: {}", e)),
    }
}

fn check_log_dir(config: &WeftConfig) -> CheckResult {
    let Some(dir) = config.log_dir() else {
        return CheckResult::ok("Run logs", "Disabled");
    };
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return CheckResult::issue("Run logs", format!("{} ({})", dir.display(), e));
    }
    let probe = dir.join(".doctor_test");
    match std::fs::write(&probe, "test") {
        Ok(_) => {
            std::fs::remove_file(&probe).ok();
            CheckResult::ok("Run logs", dir.display().to_string())
        }
        Err(e) => CheckResult::issue(
            "Run logs",
            format!("{} (not writable: {})", dir.display(), e),
        ),
    }
}
