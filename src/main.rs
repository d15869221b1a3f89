use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use vibe_agent::config::AgentConfig;
use vibe_agent::orchestrator::Orchestrator;
use vibe_agent::providers::openai_compat::OpenAiCompatClient;
use vibe_agent::ui::ConsoleUi;

#[derive(Debug, Parser)]
#[command(name = "vibe-agent", about = "Policy-gated coding agent loop")]
struct Args {
    /// Task for the agent to carry out.
    #[arg(long)]
    goal: String,

    /// Workspace root (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Model id override.
    #[arg(long)]
    model: Option<String>,

    /// Chat endpoint base URL override.
    #[arg(long)]
    base_url: Option<String>,

    /// Iteration cap override.
    #[arg(long)]
    max_iterations: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let mut config = AgentConfig::from_env(&workspace)?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }

    let client = Arc::new(OpenAiCompatClient::new(
        config.base_url.clone(),
        config.api_key.clone().unwrap_or_default(),
        config.model.clone(),
    ));
    let orchestrator = Orchestrator::new(config, client);
    let ui = ConsoleUi::new();
    let outcome = orchestrator.run_task(&args.goal, &ui).await?;
    if outcome.aborted {
        std::process::exit(1);
    }
    Ok(())
}
