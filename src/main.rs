//! toolexec: run batches of tool calls the way a coding agent would.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use dotenvy::dotenv;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use toolexec::config::Config;
use toolexec::core::turn::{ConversationLoop, ModelReply, ScriptedModel};
use toolexec::core::{BatchExecutor, Classifier, Event, parse_batch_json};
use toolexec::error_taxonomy::ErrorEnvelope;
use toolexec::logging;
use toolexec::tools::{ToolContext, ToolRegistry, ToolRegistryBuilder};

#[derive(Parser, Debug)]
#[command(
    name = "toolexec",
    author,
    version,
    about = "Run batches of agent tool calls with bounded concurrency"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a batch file (JSON array of {id?, name, input})
    Run(RunArgs),
    /// Drive the conversation loop from a file of canned model replies
    Replay(ReplayArgs),
    /// Show how tool names are classified
    Classify {
        /// Tool names to classify
        #[arg(required = true)]
        tools: Vec<String>,
    },
    /// List registered tools
    Tools {
        /// Print JSON including each tool's input schema
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
struct ExecutorArgs {
    /// Workspace directory for file operations
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Maximum number of concurrently running tools
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Batch file
    batch: PathBuf,

    #[command(flatten)]
    executor: ExecutorArgs,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// JSON array of model replies ({text, tool_calls})
    script: PathBuf,

    /// Opening user message
    #[arg(short, long, default_value = "")]
    prompt: String,

    #[command(flatten)]
    executor: ExecutorArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
        Commands::Run(args) => {
            let config = Config::load(cli.config)?;
            run_batch(&config, &args).await
        }
        Commands::Replay(args) => {
            let config = Config::load(cli.config)?;
            run_replay(&config, &args).await
        }
        Commands::Classify { tools } => {
            let config = Config::load(cli.config)?;
            let registry = build_registry(&config, None)?;
            let classifier = config.apply_overrides(Classifier::from_registry(&registry));
            for name in tools {
                let name = toolexec::core::normalize_tool_name(&name);
                println!("{name}\t{}", classifier.classify(&name));
            }
            Ok(())
        }
        Commands::Tools { json } => {
            let config = Config::load(cli.config)?;
            let registry = build_registry(&config, None)?;
            let classifier = config.apply_overrides(Classifier::from_registry(&registry));
            if json {
                let listing: Vec<serde_json::Value> = registry
                    .specs()
                    .map(|spec| {
                        json!({
                            "name": spec.name(),
                            "description": spec.description(),
                            "classification": classifier.classify(spec.name()),
                            "capabilities": spec.capabilities(),
                            "input_schema": spec.input_schema(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
                return Ok(());
            }
            for spec in registry.specs() {
                let capabilities: Vec<String> = spec
                    .capabilities()
                    .iter()
                    .map(|cap| json!(cap).as_str().unwrap_or_default().to_string())
                    .collect();
                println!(
                    "{:<12} {:<10} [{}] {}",
                    spec.name(),
                    classifier.classify(spec.name()),
                    capabilities.join(", "),
                    spec.description()
                );
            }
            Ok(())
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "toolexec", &mut io::stdout());
}

fn build_registry(config: &Config, workspace: Option<&Path>) -> Result<ToolRegistry> {
    let context = match workspace {
        Some(workspace) => {
            ToolContext::new(workspace).with_shell_timeout(config.shell_timeout_secs())
        }
        None => config.tool_context()?,
    };
    Ok(ToolRegistryBuilder::new(context).with_builtin_tools().build())
}

fn build_executor(config: &Config, args: &ExecutorArgs) -> Result<BatchExecutor> {
    if args.max_concurrency == Some(0) {
        anyhow::bail!("--max-concurrency must be at least 1");
    }
    let registry = build_registry(config, args.workspace.as_deref())?;
    let classifier = config.apply_overrides(Classifier::from_registry(&registry));
    let mut executor = BatchExecutor::from_registry(registry)
        .with_classifier(classifier)
        .with_max_concurrency(args.max_concurrency.unwrap_or(config.max_concurrency()));
    if let Some(audit) = config.audit_log() {
        executor = executor.with_audit(audit);
    }
    Ok(executor)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logging::warn("Interrupted; cancelling running tools");
            token.cancel();
        }
    });
}

/// Forward executor events to the debug log.
fn log_events() -> mpsc::Sender<Event> {
    let (tx_event, mut rx_event) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = rx_event.recv().await {
            logging::debug(format!("{event:?}"));
        }
    });
    tx_event
}

async fn run_batch(config: &Config, args: &RunArgs) -> Result<()> {
    let text = fs::read_to_string(&args.batch)
        .with_context(|| format!("Failed to read batch file: {}", args.batch.display()))?;
    let batch = parse_batch_json(&text)
        .with_context(|| format!("Invalid batch file: {}", args.batch.display()))?;
    let executor = build_executor(config, &args.executor)?.with_events(log_events());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    match executor.execute_batch(&batch, &cancel).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.report())?);
            Ok(())
        }
        Err(err) => {
            let report = json!({ "error": ErrorEnvelope::from(&err) });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Err(err).context("Batch aborted")
        }
    }
}

async fn run_replay(config: &Config, args: &ReplayArgs) -> Result<()> {
    let text = fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script: {}", args.script.display()))?;
    let replies: Vec<ModelReply> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid script: {}", args.script.display()))?;
    let executor = build_executor(config, &args.executor)?.with_events(log_events());
    let turn = ConversationLoop::new(ScriptedModel::new(replies), executor)
        .with_max_steps(config.max_steps());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let outcome = turn.run(args.prompt.clone(), &cancel).await;
    let report = json!({
        "status": outcome.status,
        "steps": outcome.steps,
        "final_text": outcome.final_text,
        "error": outcome.error,
        "messages": outcome.messages,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
