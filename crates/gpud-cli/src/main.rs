//! gpuctl
//!
//! Command-line interface for interacting with the gpud daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

/// gpuctl - operator client for the gpud orchestrator
#[derive(Parser, Debug)]
#[command(name = "gpuctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8200", global = true)]
    api: String,

    /// API key (defaults to the INTERNAL_API_KEY environment variable)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a pre-defined task and stream its events
    Run {
        /// Task name from the catalog (e.g. loading-test)
        task_name: String,

        /// Override the task difficulty (low or high)
        #[arg(long)]
        difficulty: Option<String>,

        /// Override the task timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Reuse an existing session
        #[arg(long)]
        session: Option<Uuid>,

        /// Create (or reuse) a session for this task
        #[arg(long)]
        create_session: bool,

        /// Metadata entries as KEY=VALUE, repeatable
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// List active sessions
    Sessions,

    /// Show one session
    Session {
        /// Session id
        id: Uuid,
    },

    /// Kill a session
    Kill {
        /// Session id
        id: Uuid,
    },

    /// Reset a session's idle timeout
    Keepalive {
        /// Session id
        id: Uuid,
    },

    /// Show service health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let api_key = cli
        .api_key
        .or_else(|| std::env::var("INTERNAL_API_KEY").ok())
        .unwrap_or_default();
    let client = commands::ApiClient::new(&cli.api, &api_key);

    match cli.command {
        Commands::Run {
            task_name,
            difficulty,
            timeout,
            session,
            create_session,
            metadata,
        } => {
            commands::run(
                &client,
                task_name,
                difficulty,
                timeout,
                session,
                create_session,
                metadata,
            )
            .await?;
        }
        Commands::Sessions => {
            commands::sessions(&client).await?;
        }
        Commands::Session { id } => {
            commands::session(&client, id).await?;
        }
        Commands::Kill { id } => {
            commands::kill(&client, id).await?;
        }
        Commands::Keepalive { id } => {
            commands::keepalive(&client, id).await?;
        }
        Commands::Health => {
            commands::health(&client).await?;
        }
    }

    Ok(())
}
