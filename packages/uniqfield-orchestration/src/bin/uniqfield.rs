//! Uniqfield CLI
//!
//! Runs the field-uniqueness engine against a local SQLite document store.
//!
//! # Usage
//!
//! ```bash
//! # Apply one mutation request (JSON from a file or stdin)
//! echo '{"change":"CREATE","collection":"users","fieldName":"username","document":{"id":"123","username":"johnDoe"}}' \
//!   | uniqfield apply --db users.db --uid alice
//!
//! # Backfill the configured collection
//! BACKFILL_COLLECTION=users BACKFILL_FIELD_NAME=username uniqfield backfill --db users.db
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use uniqfield_orchestration::{
    drain_backfill, init_logging, BackfillOrchestrator, BackfillTask, CallContext,
    ExtensionConfig, FieldUniquenessService, LocalTaskQueue, LogReporter, MutationRequest,
    RetryPolicy,
};
use uniqfield_storage::SqliteDocumentStore;

#[derive(Parser)]
#[command(name = "uniqfield")]
#[command(about = "Enforce unique field values in a document collection", long_about = None)]
struct Cli {
    /// YAML configuration file (defaults to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directives (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply one mutation request
    Apply {
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,

        /// Request JSON file (stdin when omitted)
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Caller identity
        #[arg(long, conflicts_with = "anonymous")]
        uid: Option<String>,

        /// Call without an identity
        #[arg(long)]
        anonymous: bool,
    },

    /// Check existing documents of the backfill collection
    Backfill {
        /// SQLite database file
        #[arg(long)]
        db: PathBuf,

        /// Attempts per page before giving up
        #[arg(long, default_value = "3")]
        max_attempts: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => ExtensionConfig::from_yaml_file(path)?,
        None => ExtensionConfig::from_env()?,
    };

    match cli.command {
        Commands::Apply {
            db,
            request,
            uid,
            anonymous,
        } => {
            let ctx = match uid {
                Some(uid) if !anonymous => CallContext::authenticated(uid),
                _ => CallContext::anonymous(),
            };
            apply(&config, db, request, ctx).await
        }
        Commands::Backfill { db, max_attempts } => backfill(&config, db, max_attempts).await,
    }
}

async fn apply(
    config: &ExtensionConfig,
    db: PathBuf,
    request: Option<PathBuf>,
    ctx: CallContext,
) -> anyhow::Result<()> {
    let body = match request {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read request {}", path.display()))?,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Cannot read request from stdin")?;
            body
        }
    };
    let request = MutationRequest::from_json(&body)?;

    let store = Arc::new(SqliteDocumentStore::open(&db)?);
    let service = FieldUniquenessService::from_config(config, store);

    match service.handle(&request, &ctx).await {
        Ok(response) => {
            println!("{}", serde_json::to_string(&response)?);
            Ok(())
        }
        Err(e) => {
            let error = serde_json::json!({"code": e.code(), "message": e.to_string()});
            println!("{}", error);
            bail!("{}: {}", e.code(), e)
        }
    }
}

async fn backfill(config: &ExtensionConfig, db: PathBuf, max_attempts: u32) -> anyhow::Result<()> {
    let store = Arc::new(SqliteDocumentStore::open(&db)?);
    let queue = Arc::new(LocalTaskQueue::new());
    let orchestrator =
        BackfillOrchestrator::from_config(config, store, queue.clone(), Arc::new(LogReporter));

    queue.push(BackfillTask::initial());
    let summary = drain_backfill(&orchestrator, &queue, RetryPolicy { max_attempts }).await;

    if let Some(e) = summary.abandoned {
        bail!("Backfill stopped after {} step(s): {}", summary.steps, e);
    }
    match summary.report {
        Some(report) => {
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
        None => bail!("Backfill ended without a processing state"),
    }
}
