use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticketflow::analysis::Collaborators;
use ticketflow::config::AppConfig;
use ticketflow::queue::{run_queue_processor, AnalysisQueue};
use ticketflow::server::{create_router, AppState};
use ticketflow::shutdown::{graceful_shutdown, wait_for_shutdown};
use ticketflow::workflow::{TicketAnalysisWorkflow, WorkflowStatus};

#[derive(Parser)]
#[command(name = "ticketflow", about = "Bug ticket analysis pipeline")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept Jira webhooks and analyse tickets in the background
    Serve,
    /// Analyse one ticket read from a JSON file and print the result
    Analyze {
        /// File containing {tenant_id, ticket_id, ticket_data, assignee_id}
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for `analyze` output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            cli.json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Analyze { file } => analyze(config, &file).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        min_confidence = config.workflow.min_confidence,
        "Starting ticketflow server"
    );
    if config.webhook_secret().is_empty() {
        tracing::warn!("webhook.secret is not set, every webhook will be rejected");
    }

    let (queue, receiver) = AnalysisQueue::channel();
    let state = Arc::new(AppState::new(config.clone(), queue)?);

    // Start the analysis queue processor
    tokio::spawn(run_queue_processor(Arc::clone(&state), receiver));

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    // Let running analyses finish
    graceful_shutdown(&state).await;

    Ok(())
}

async fn analyze(config: AppConfig, file: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let input: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    let collaborators = Collaborators::from_config(&config)?;
    let workflow = TicketAnalysisWorkflow::new(collaborators, &config.workflow)?;
    let state = workflow.analyze_value(input).await?;

    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.workflow_status == WorkflowStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
