mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentfleet::models::TaskPriority;

use commands::{Context, PushParams};

#[derive(Parser)]
#[command(
    name = "agentfleet",
    version,
    about = "Operator tool for the agentfleet task queue and credential pool",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a task into a label's queue
    Push {
        /// Routing label (e.g. crawler:xhs)
        #[arg(short, long)]
        label: String,

        /// Task payload as JSON
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Priority (low, medium, high)
        #[arg(long, default_value = "medium")]
        priority: TaskPriority,

        /// Retry budget (defaults to 3)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Parent job id for grouping
        #[arg(long)]
        parent_job: Option<String>,
    },

    /// Show pending task counts
    QueueLen {
        /// Labels to inspect
        #[arg(required = true)]
        labels: Vec<String>,
    },

    /// List dead-lettered tasks
    DeadLetters {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show worker liveness
    Workers,

    /// Manage platform credentials
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Inspect pipeline phases
    Phase {
        #[command(subcommand)]
        action: PhaseAction,
    },

    /// Print Prometheus metrics, refreshing queue depth for the given labels
    Metrics {
        /// Labels whose depth gauge should be refreshed
        labels: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Register a new credential
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        platform: String,

        /// Access material (cookie, token)
        #[arg(long)]
        secret: String,
    },

    /// List credentials for a platform
    List {
        #[arg(long)]
        platform: String,
    },

    /// Put a deactivated credential back in rotation
    Reactivate { id: String },
}

#[derive(Subcommand)]
enum PhaseAction {
    /// Show the current phase of an entity
    Show {
        /// Entity type (e.g. topic, user)
        entity_type: String,

        entity_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    let ctx = Context::connect(config).await?;

    match cli.command {
        Commands::Push {
            label,
            payload,
            priority,
            max_retries,
            parent_job,
        } => {
            tracing::info!(label = %label, priority = %priority, "Starting push command");
            commands::push(
                &ctx,
                PushParams {
                    label,
                    payload,
                    priority,
                    max_retries,
                    parent_job,
                },
            )
            .await?;
        }

        Commands::QueueLen { labels } => commands::queue_len(&ctx, &labels).await?,

        Commands::DeadLetters { limit } => commands::dead_letters(&ctx, limit).await?,

        Commands::Workers => commands::workers(&ctx).await?,

        Commands::Credential { action } => match action {
            CredentialAction::Add {
                id,
                platform,
                secret,
            } => {
                tracing::info!(credential_id = %id, platform = %platform, "Adding credential");
                commands::add_credential(&ctx, id, platform, secret).await?;
            }
            CredentialAction::List { platform } => {
                commands::list_credentials(&ctx, &platform).await?
            }
            CredentialAction::Reactivate { id } => {
                tracing::info!(credential_id = %id, "Reactivating credential");
                commands::reactivate_credential(&ctx, &id).await?;
            }
        },

        Commands::Phase { action } => match action {
            PhaseAction::Show {
                entity_type,
                entity_id,
            } => commands::phase_show(&ctx, entity_type, entity_id).await?,
        },

        Commands::Metrics { labels } => commands::metrics(&ctx, &labels).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("agentfleet=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("agentfleet={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
