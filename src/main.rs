//! Postline: scheduled Instagram publishing
//!
//! Subcommands:
//! - `serve`: HTTP surface for token acquisition plus every background worker
//! - `tick`, `cleanup-stuck`, `retry-failed`, `refresh-tokens`: one-shot runs
//!   of the orchestrator passes
//! - `token-status`, `import`, `import-progress`: token and import operations

mod config;
mod constants;
mod domain;
mod jobs;
mod logging;
mod routes;
mod scheduler;
mod services;
#[cfg(test)]
mod testing;

use std::future::IntoFuture;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

use config::{Config, ConfigError};
use domain::{PgStore, Store, StoreError};
use jobs::{JobStorages, WorkerError};
use scheduler::importer::import_progress;
use scheduler::tokens::{TokenError, TokenSelection};
use scheduler::{BatchImporter, Orchestrator};
use services::clock::{Clock, SystemClock};
use services::graph::GraphClient;
use services::queue::{ApalisQueue, QueueError};

/// Shared state for HTTP handlers
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub importer: Arc<BatchImporter>,
    pub graph: GraphClient,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Parser)]
#[command(name = "postline")]
#[command(about = "Scheduled Instagram publishing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the OAuth endpoints and run all background workers
    Serve,

    /// Evaluate every active schedule once
    Tick,

    /// Reset items stuck in the queue back to draft
    CleanupStuck {
        /// Items queued longer than this are reset
        #[arg(long, default_value = "30")]
        minutes: i64,
    },

    /// Requeue recent failures that are worth retrying
    RetryFailed {
        /// How far back to look for failed items
        #[arg(long, default_value = "60")]
        minutes: i64,
    },

    /// Refresh account tokens (only those close to expiry unless told otherwise)
    RefreshTokens {
        /// Refresh a single account
        #[arg(long, conflicts_with = "all")]
        account_id: Option<i64>,

        /// Refresh every active account
        #[arg(long)]
        all: bool,

        /// Report what would be refreshed without calling the remote
        #[arg(long)]
        dry_run: bool,
    },

    /// Print token expiry counts across active accounts
    TokenStatus,

    /// Start importing the accounts visible to a user access token
    Import {
        #[arg(long, env = "INSTAGRAM_USER_ACCESS_TOKEN")]
        access_token: String,
    },

    /// Print how many accounts are active and recently synced
    ImportProgress,
}

/// Everything a command needs, wired against Postgres and the real Graph API.
struct Runtime {
    config: Config,
    store: PgStore,
    storages: JobStorages,
    graph: GraphClient,
    orchestrator: Orchestrator,
}

impl Runtime {
    async fn connect(config: Config) -> Result<Self, CliError> {
        let store = PgStore::connect(&config.database_url).await?;
        store.migrate().await?;
        let storages = JobStorages::setup(store.pool()).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let graph = GraphClient::new(config.graph.clone());
        let queue = Arc::new(ApalisQueue::new(
            storages.publish.clone(),
            storages.import.clone(),
            clock.clone(),
        ));
        let orchestrator = Orchestrator::new(
            Arc::new(store.clone()),
            Arc::new(graph.clone()),
            queue,
            clock,
            &config,
        );

        Ok(Self {
            config,
            store,
            storages,
            graph,
            orchestrator,
        })
    }
}

async fn serve(runtime: Runtime) -> Result<(), CliError> {
    let state = Arc::new(AppState {
        store: runtime.orchestrator.store.clone(),
        clock: runtime.orchestrator.clock.clone(),
        importer: runtime.orchestrator.importer.clone(),
        graph: runtime.graph,
    });
    let app = routes::build_routes().with_state(state);

    let addr = format!("0.0.0.0:{}", runtime.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    let workers = jobs::run_workers(
        runtime.store.pool().clone(),
        runtime.orchestrator,
        runtime.storages,
    );

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        result = workers => result?,
    }
    Ok(())
}

async fn refresh_tokens(
    orchestrator: &Orchestrator,
    selection: TokenSelection,
    dry_run: bool,
) -> Result<(), CliError> {
    let tokens = &orchestrator.tokens;
    let accounts = tokens.select(selection).await?;
    println!("{} account(s) selected", accounts.len());

    let (mut refreshed, mut failed) = (0, 0);
    for account in accounts {
        let expires = account
            .token_expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        if dry_run {
            println!(
                "  [{}] @{} expires {} needs refresh: {}",
                account.id,
                account.username,
                expires,
                tokens.needs_refresh(&account)
            );
            continue;
        }
        match tokens.refresh(&account).await {
            Ok(true) => {
                refreshed += 1;
                println!("  [{}] @{} refreshed", account.id, account.username);
            }
            Ok(false) => {
                failed += 1;
                println!("  [{}] @{} rejected, account deactivated", account.id, account.username);
            }
            Err(e) => {
                failed += 1;
                println!("  [{}] @{} failed: {}", account.id, account.username, e);
            }
        }
    }

    if !dry_run {
        println!("Refreshed {}, failed {}", refreshed, failed);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_env()?;
    let runtime = Runtime::connect(config).await?;
    let orchestrator = runtime.orchestrator.clone();

    match cli.command {
        Commands::Serve => serve(runtime).await?,
        Commands::Tick => {
            let report = orchestrator.evaluator.tick().await?;
            println!(
                "Evaluated {}, dispatched {}, completed {}, failed {}",
                report.evaluated, report.dispatched, report.completed, report.failed
            );
        }
        Commands::CleanupStuck { minutes } => {
            let reset = orchestrator
                .maintenance
                .reset_stuck_items(chrono::Duration::minutes(minutes))
                .await?;
            println!("Reset {} stuck item(s)", reset);
        }
        Commands::RetryFailed { minutes } => {
            let report = orchestrator
                .maintenance
                .requeue_failures(chrono::Duration::minutes(minutes))
                .await?;
            println!(
                "Requeued {}, skipped {} permanent and {} without an active account, {} error(s)",
                report.requeued, report.permanent, report.no_account, report.errors
            );
        }
        Commands::RefreshTokens {
            account_id,
            all,
            dry_run,
        } => {
            let selection = match (account_id, all) {
                (Some(id), _) => TokenSelection::Account(id),
                (None, true) => TokenSelection::All,
                (None, false) => TokenSelection::NeedsRefresh,
            };
            refresh_tokens(&orchestrator, selection, dry_run).await?;
        }
        Commands::TokenStatus => {
            let summary = orchestrator.tokens.status_summary().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Import { access_token } => {
            orchestrator.importer.start(&access_token).await?;
            println!("Import queued");
        }
        Commands::ImportProgress => {
            let progress =
                import_progress(orchestrator.store.as_ref(), orchestrator.clock.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "postline failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
