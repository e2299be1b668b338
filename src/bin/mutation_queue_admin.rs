use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mutation_queue::{
    AppConfig, ConnectionPool, MutationStatus, MutationStore, RetentionPolicy,
    SqliteMutationStore,
};
use serde_json::json;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mutation-queue-admin")]
#[command(about = "Inspect and maintain the local mutation queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite URL of the queue database
    #[arg(long, env = "MUTATION_QUEUE_DATABASE_URL")]
    database_url: Option<String>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print queue counts per status
    Stats,
    /// List queued mutations in enqueue order
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },
    /// Move every failed mutation back to pending
    RetryFailed,
    /// Delete terminal mutations outside the retention bounds
    Prune {
        /// Remove completed entries older than this many seconds
        #[arg(long)]
        completed_max_age_secs: Option<u64>,
        /// Keep only the newest N completed entries
        #[arg(long)]
        completed_max_count: Option<u32>,
        /// Remove failed entries older than this many seconds
        #[arg(long)]
        failed_max_age_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<StatusArg> for MutationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => MutationStatus::Pending,
            StatusArg::Processing => MutationStatus::Processing,
            StatusArg::Completed => MutationStatus::Completed,
            StatusArg::Failed => MutationStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(url) = cli.database_url.as_deref() {
        config.database.url = url.to_string();
    }

    let pool = ConnectionPool::new(&config.database.url, 1)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    pool.migrate().await.context("failed to apply migrations")?;
    let store = SqliteMutationStore::new(pool.get_pool().clone());

    let output = match cli.command {
        Commands::Stats => serde_json::to_value(store.stats().await?)?,
        Commands::List { status, limit } => {
            let entries = store.list(status.map(Into::into), limit).await?;
            serde_json::to_value(entries)?
        }
        Commands::RetryFailed => json!({ "reset": store.retry_failed().await? }),
        Commands::Prune {
            completed_max_age_secs,
            completed_max_count,
            failed_max_age_secs,
        } => {
            let policy = RetentionPolicy {
                completed_max_age: completed_max_age_secs.map(Duration::from_secs),
                completed_max_count,
                failed_max_age: failed_max_age_secs.map(Duration::from_secs),
            };
            if policy.is_noop() {
                bail!("prune needs at least one retention bound");
            }
            json!({ "removed": store.prune(&policy).await? })
        }
    };

    pool.close().await;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}
