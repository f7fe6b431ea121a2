use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticket_dispatch::batch::{BatchCoordinator, Selection};
use ticket_dispatch::code;
use ticket_dispatch::compose::ArtifactComposer;
use ticket_dispatch::config::{self, Config};
use ticket_dispatch::db::{self, RecipientStore, SqliteStore, TableLayout};
use ticket_dispatch::dispatch::{DispatchOutcome, Dispatcher};
use ticket_dispatch::mailer::SmtpMailer;
use ticket_dispatch::model::BatchSummary;

#[derive(Debug, Parser)]
#[command(author, version, about = "Mail personalized QR tickets to every unprocessed recipient")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send tickets to every recipient without a ticket code
    Bulk {
        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Send a ticket to one recipient, adding the row if needed
    Single {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Re-send to recipients whose code is set but whose mail never went out
    Resend {
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Print the ticket code for an email
    Code { email: String },
    /// Report emails in the table that derive the same ticket code
    CheckCodes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    if let Command::Code { email } = &args.command {
        println!("{}", code::derive(email));
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;
    init_tracing(cfg.log_file().as_deref())?;

    let store = Arc::new(open_store(&cfg).await?);

    match args.command {
        Command::Bulk { summary } => run_batch(&cfg, store, Selection::Unprocessed, summary).await,
        Command::Resend { summary } => run_batch(&cfg, store, Selection::Stranded, summary).await,
        Command::Single { name, email } => {
            let dispatcher = build_dispatcher(&cfg, store.clone())?;
            let report = dispatcher.dispatch_individual(&name, &email).await;
            store.close().await;
            match report.outcome {
                DispatchOutcome::Sent { code } => {
                    println!("Mail sent to {} (code {})", report.email, code);
                    Ok(())
                }
                DispatchOutcome::Failed(err) => bail!("failed to send to {}: {}", report.email, err),
            }
        }
        Command::CheckCodes => {
            let emails = store.all_emails().await?;
            store.close().await;
            let collisions = code::find_collisions(emails.iter().map(String::as_str));
            if collisions.is_empty() {
                println!("{} emails, no code collisions", emails.len());
                return Ok(());
            }
            for collision in &collisions {
                println!("{}: {}", collision.code, collision.emails.join(", "));
            }
            bail!("{} colliding ticket codes", collisions.len())
        }
        Command::Code { .. } => Ok(()),
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).compact())
        .with(file_layer)
        .init();
    Ok(())
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let pool = db::init_pool(&cfg.store.database_url, cfg.store.max_connections)
        .await
        .context("failed to connect to recipient store")?;
    if cfg.store.migrate {
        db::run_migrations(&pool).await?;
    }
    Ok(SqliteStore::new(
        pool,
        TableLayout::from_config(&cfg.store, &cfg.message),
    ))
}

fn build_dispatcher(cfg: &Config, store: Arc<SqliteStore>) -> Result<Dispatcher> {
    let composer = ArtifactComposer::from_config(&cfg.message)?;
    let mailer = SmtpMailer::from_config(&cfg.smtp)?;
    Ok(Dispatcher::new(store, Arc::new(composer), Arc::new(mailer)))
}

async fn run_batch(
    cfg: &Config,
    store: Arc<SqliteStore>,
    selection: Selection,
    summary_path: Option<PathBuf>,
) -> Result<()> {
    let dispatcher = build_dispatcher(cfg, store.clone())?;
    let coordinator = BatchCoordinator::new(store, dispatcher, cfg.app.concurrency);
    let summary = coordinator.run_selection(selection).await?;

    print_summary(&summary);
    if let Some(path) = summary_path {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write summary {}", path.display()))?;
        info!(path = %path.display(), "summary written");
    }
    if !summary.failed.is_empty() {
        warn!(failed = summary.failed.len(), "some recipients were not sent");
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Processed {} recipients: {} sent, {} failed",
        summary.total,
        summary.sent.len(),
        summary.failed.len()
    );
    for (email, code) in &summary.sent {
        println!("  sent    {email} {code}");
    }
    for failed in &summary.failed {
        println!("  failed  {} [{}] {}", failed.email, failed.kind.as_str(), failed.reason);
    }
}
