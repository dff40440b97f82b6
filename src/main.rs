mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::{ProviderConfig, SandboxMode, WeftConfig};
use weft_core::event::EventBus;
use weft_core::types::{NodeKind, RunId, Workflow, WorkflowResult, WorkflowStatus};
use weft_engine::{scheduler, suggestions, summarize, templates, RunLogger, RunOptions, WorkflowExecutor};
use weft_sandbox::{default_snippet, SandboxExecutor};

#[derive(Parser)]
#[command(name = "weft", version, about = "Run DAG workflows of model calls and package snippets")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml", env = "WEFT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow and print its result as JSON
    Run {
        /// Workflow definition (JSON)
        workflow: PathBuf,
        /// Initial input: JSON, or a plain string if it does not parse
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,
        /// Read the initial input from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Answer every model call with the offline mock provider
        #[arg(long)]
        mock_providers: bool,
        /// Append analytics and suggestions to the output
        #[arg(long)]
        analyze: bool,
        /// Run snippets in-process instead of in a worker process
        #[arg(long)]
        inline_sandbox: bool,
    },
    /// Check a workflow and print its execution order
    Validate {
        workflow: PathBuf,
    },
    /// Summarize a saved workflow result
    Analyze {
        /// Result JSON as printed by `weft run`
        result: PathBuf,
    },
    /// List builtin workflow templates, or print one
    Templates {
        name: Option<String>,
    },
    /// Run a single snippet in the sandbox
    Snippet {
        #[arg(long)]
        package: String,
        /// Snippet body; defaults to the package's default snippet
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        inline_sandbox: bool,
    },
    /// Run configuration health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Serve one sandbox execution over stdin/stdout
    #[command(hide = true)]
    SandboxWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The worker speaks the sandbox protocol on stdout; nothing else may write there
    if let Commands::SandboxWorker = cli.command {
        weft_sandbox::worker::serve_stdio()?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weft", &mut std::io::stdout());
            Ok(())
        }
        Commands::Templates { name } => print_templates(name.as_deref()),
        Commands::Validate { workflow } => validate(&load_workflow(&workflow)?),
        Commands::Analyze { result } => analyze(&result),
        Commands::Run {
            workflow,
            input,
            input_file,
            mock_providers,
            analyze,
            inline_sandbox,
        } => {
            let mut config = load_config(&cli.config)?;
            prepare_sandbox(&mut config, inline_sandbox);
            let workflow = load_workflow(&workflow)?;
            let input = match (input, input_file) {
                (Some(raw), _) => parse_input(&raw),
                (None, Some(path)) => read_json(&path)?,
                (None, None) => Value::Null,
            };
            let result = run(&config, &workflow, input, mock_providers).await;

            let output = if analyze {
                let analytics = summarize(&result);
                json!({
                    "result": result,
                    "suggestions": suggestions(&analytics),
                    "analytics": analytics,
                })
            } else {
                serde_json::to_value(&result)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);

            if result.status == WorkflowStatus::Failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Snippet {
            package,
            code,
            input,
            inline_sandbox,
        } => {
            let mut config = load_config(&cli.config)?;
            prepare_sandbox(&mut config, inline_sandbox);
            let sandbox = SandboxExecutor::new(config.sandbox);
            let code = code.unwrap_or_else(|| default_snippet(&package).to_string());
            let input = input.as_deref().map(parse_input).unwrap_or(Value::Null);

            let outcome = sandbox.execute(&package, &code, &input).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Doctor => {
            let mut config = load_config(&cli.config)?;
            prepare_sandbox(&mut config, false);
            let sandbox = SandboxExecutor::new(config.sandbox.clone());
            println!("weft doctor ({})\n", cli.config.display());
            let issues = doctor::run_doctor(&config, &sandbox).await;
            if issues > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::SandboxWorker => Ok(()),
    }
}

async fn run(config: &WeftConfig, workflow: &Workflow, input: Value, mock_providers: bool) -> WorkflowResult {
    let executor = WorkflowExecutor::from_config(config);
    if mock_providers {
        for provider in referenced_providers(workflow) {
            executor.providers().register_mock(&provider);
        }
    }

    let bus = Arc::new(EventBus::default());
    let run_id = RunId::new();
    let logger = config.log_dir().map(|dir| {
        let rx = bus.subscribe();
        tokio::spawn(
            RunLogger::new(dir, config.log_level()).run(rx, run_id.clone(), CancellationToken::new()),
        )
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let options = RunOptions::new()
        .with_run_id(run_id)
        .with_sink(bus.clone())
        .with_cancel(cancel);
    let result = executor.execute_with(workflow, input, options).await;

    if let Some(handle) = logger {
        if let Ok(Some(path)) = handle.await {
            info!(path = %path.display(), "Run log written");
        }
    }
    result
}

/// Provider names used by the workflow's llm nodes, deduplicated.
fn referenced_providers(workflow: &Workflow) -> Vec<String> {
    let mut names: Vec<String> = workflow
        .nodes
        .iter()
        .filter_map(|n| match &n.kind {
            NodeKind::Llm { provider, .. } => Some(provider.to_ascii_lowercase()),
            _ => None,
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

fn validate(workflow: &Workflow) -> anyhow::Result<()> {
    let order = scheduler::execution_order(workflow)?;
    let levels = scheduler::levels(&workflow.nodes, &workflow.edges)?;

    println!("Workflow '{}' is valid ({} nodes, {} edges)", workflow.name, workflow.nodes.len(), workflow.edges.len());
    let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
    println!("Execution order: {}", ids.join(" -> "));
    for (depth, level) in levels.iter().enumerate() {
        let ids: Vec<String> = level
            .iter()
            .map(|n| format!("{} ({})", n.id, n.kind.type_name()))
            .collect();
        println!("  Level {}: {}", depth, ids.join(", "));
    }
    Ok(())
}

fn analyze(path: &Path) -> anyhow::Result<()> {
    let value = read_json(path)?;
    // Accept both a bare result and the `--analyze` envelope
    let value = if value.get("analytics").is_some() {
        value.get("result").cloned().unwrap_or(value)
    } else {
        value
    };
    let result: WorkflowResult =
        serde_json::from_value(value).context("file is not a workflow result")?;
    let analytics = summarize(&result);
    let output = json!({
        "analytics": analytics,
        "suggestions": suggestions(&analytics),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_templates(name: Option<&str>) -> anyhow::Result<()> {
    match name {
        None => {
            for workflow in templates::all() {
                println!(
                    "  {:<16} {}",
                    workflow.name,
                    workflow.description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Some(name) => match templates::get(name) {
            Some(workflow) => {
                println!("{}", serde_json::to_string_pretty(&workflow)?);
                Ok(())
            }
            None => bail!(
                "Unknown template '{}'. Available: {}",
                name,
                templates::names().join(", ")
            ),
        },
    }
}

/// Use a worker process (this binary) unless inline isolation is requested.
fn prepare_sandbox(config: &mut WeftConfig, inline: bool) {
    if inline {
        config.sandbox.mode = SandboxMode::Inline;
        return;
    }
    if config.sandbox.mode != SandboxMode::Inline && config.sandbox.worker_program.is_none() {
        match std::env::current_exe() {
            Ok(exe) => config.sandbox.worker_program = Some(exe.display().to_string()),
            Err(e) => warn!(error = %e, "Cannot locate own executable, using inline sandbox"),
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<WeftConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        return Ok(WeftConfig::load(path)?);
    }
    debug!(path = %path.display(), "No config file, using defaults and environment");
    Ok(create_env_config())
}

/// Default config with providers for whichever API keys are in the environment.
fn create_env_config() -> WeftConfig {
    let mut config = WeftConfig::default();
    for (provider, var) in [
        ("openai", "OPENAI_API_KEY"),
        ("anthropic", "ANTHROPIC_API_KEY"),
        ("groq", "GROQ_API_KEY"),
        ("openrouter", "OPENROUTER_API_KEY"),
        ("mistral", "MISTRAL_API_KEY"),
        ("deepseek", "DEEPSEEK_API_KEY"),
    ] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                config.providers.insert(
                    provider.to_string(),
                    ProviderConfig {
                        api_key: Some(key),
                        ..Default::default()
                    },
                );
            }
        }
    }
    config
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let value = read_json(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("{} is not a workflow definition", path.display()))
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
