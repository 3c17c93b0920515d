mod trigger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dispatch_core::{DispatchConfig, RunOutcome};
use orchestrator::WorkflowDispatcher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::trigger::TriggerFile;

const DISPATCH_DIR: &str = ".wfdispatch";
const CONFIG_FILE: &str = "config.toml";
const EXAMPLE_TRIGGER_FILE: &str = "trigger.example.toml";

#[derive(Parser)]
#[command(name = "wfdispatch")]
#[command(about = "Plan and run the workflows matched by one trigger", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: .wfdispatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and an example trigger file
    Init,
    /// Print the execution plan for a trigger file without running it
    Plan { trigger: PathBuf },
    /// Run every workflow in a trigger file and print the execution summary
    Run {
        trigger: PathBuf,

        #[arg(long)]
        preview: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_project().await,
        Commands::Plan { trigger } => {
            init_tracing();
            plan(cli.config.as_deref(), &trigger).await
        }
        Commands::Run { trigger, preview } => {
            init_tracing();
            run(cli.config.as_deref(), &trigger, preview).await
        }
    }
}

async fn init_project() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let dispatch_dir = cwd.join(DISPATCH_DIR);
    let config_path = dispatch_dir.join(CONFIG_FILE);

    if config_path.exists() {
        println!("Already initialized at {}", dispatch_dir.display());
        return Ok(());
    }

    tokio::fs::create_dir_all(&dispatch_dir).await?;

    let config_content = toml::to_string_pretty(&DispatchConfig::default())?;
    tokio::fs::write(&config_path, config_content).await?;

    let example_path = dispatch_dir.join(EXAMPLE_TRIGGER_FILE);
    let example_content = toml::to_string_pretty(&TriggerFile::example())?;
    tokio::fs::write(&example_path, example_content).await?;

    println!("Initialized wfdispatch in {}", cwd.display());
    println!();
    println!("Created:");
    println!("  {}/", DISPATCH_DIR);
    println!("  ├── {}", CONFIG_FILE);
    println!("  └── {}", EXAMPLE_TRIGGER_FILE);
    println!();
    println!("Set enable_multi_workflow = true in {} to run more than one workflow per trigger.", CONFIG_FILE);

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    let explicit = path.is_some();
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?.join(DISPATCH_DIR).join(CONFIG_FILE),
    };

    if !path.exists() {
        if explicit {
            bail!("Config file {} not found", path.display());
        }
        tracing::info!("No config at {}, using defaults", path.display());
        return Ok(DispatchConfig::default());
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: DispatchConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

async fn plan(config_path: Option<&Path>, trigger_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    let trigger = TriggerFile::load(trigger_path).await?;

    let dispatcher = WorkflowDispatcher::new(config, Arc::new(trigger.adapter()));
    let plan_created = dispatcher
        .preview(&trigger.trigger, trigger.candidates())
        .context("Failed to build execution plan")?;

    println!("{}", serde_json::to_string_pretty(&plan_created)?);
    Ok(())
}

async fn run(config_path: Option<&Path>, trigger_path: &Path, preview: bool) -> Result<()> {
    let mut config = load_config(config_path).await?;
    if preview {
        config = config.with_preview_only(true);
    }
    let trigger = TriggerFile::load(trigger_path).await?;

    let dispatcher = WorkflowDispatcher::new(config, Arc::new(trigger.adapter()));
    let report = dispatcher
        .dispatch(&trigger.trigger, trigger.candidates())
        .await
        .context("Dispatch failed")?;

    println!("{}", serde_json::to_string_pretty(&report.summary)?);

    let line = format!(
        "{} {} ({} workflows, {} artifacts)",
        report.plan.plan_id(),
        report.outcome.as_str(),
        report.plan.workflow_count(),
        report.manifest.entries.len()
    );
    match report.outcome {
        RunOutcome::Completed => eprintln!("{}", line.green()),
        RunOutcome::PartiallyCompleted => eprintln!("{}", line.yellow()),
        RunOutcome::Aborted => {
            eprintln!("{}", line.red());
            bail!("Plan {} aborted", report.plan.plan_id());
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wfdispatch=info,orchestrator=info".into()),
        )
        .init();
}
