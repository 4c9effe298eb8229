mod config;
mod cycle;
mod dedup;
mod error;
mod evaluator;
mod market;
mod model;
mod notifier;
mod quote;
mod remote;
mod server;
mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use cycle::AlertSource;
use dedup::{NotificationTracker, SystemClock};
use evaluator::EvaluateOptions;
use notifier::Notifier;
use notifier::email::{EmailNotifier, RetryPolicy, SmtpMailer};
use notifier::terminal::TerminalNotifier;
use quote::PriceSource;
use quote::yahoo::YahooQuoteSource;
use remote::AlertApiClient;
use server::ServerState;
use storage::NotificationStore;
use storage::json::JsonFileStore;
use storage::sqlite::SqliteStore;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("notifier error")]
    Notifier,
    #[display("evaluation cycle failed")]
    Cycle,
    #[display("server error")]
    Server,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "stockmon", about = "Stock price threshold monitor")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "stockmon.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one evaluation cycle and send notifications
    Check {
        /// Print notifications instead of emailing them and persist nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve the alert-check API
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl+c received, shutting down");
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Command::Check { dry_run } => {
            let span = info_span!("cycle", id = %uuid::Uuid::new_v4(), dry_run);
            check(&config, dry_run, &cancel).instrument(span).await
        }
        Command::Serve => serve(&config, cancel).await,
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn price_source(config: &AppConfig) -> Arc<dyn PriceSource> {
    Arc::new(YahooQuoteSource::new(
        Duration::from_secs(config.monitor.lookup_timeout_secs),
        config.monitor.requests_per_second,
    ))
}

fn evaluate_options(config: &AppConfig) -> EvaluateOptions {
    EvaluateOptions {
        window_hours: config.monitor.window_hours,
        concurrency: config.monitor.concurrency,
    }
}

/// A dry run never writes, so the SQLite store is then opened read-only and
/// no database or data directory is created.
async fn open_store(
    config: &AppConfig,
    dry_run: bool,
) -> Result<Arc<dyn NotificationStore>, Report<AppError>> {
    let path = config.store.resolved_path(&config.general.data_dir);

    let store: Arc<dyn NotificationStore> = match config.store.backend.as_str() {
        "sqlite" if dry_run => Arc::new(
            SqliteStore::open_read_only(&path).change_context(AppError::Storage)?,
        ),
        "sqlite" => Arc::new(
            SqliteStore::open(&path)
                .await
                .change_context(AppError::Storage)?,
        ),
        _ => {
            let store = JsonFileStore::new(path);
            info!(path = %store.path().display(), "using JSON notification history");
            Arc::new(store)
        }
    };
    Ok(store)
}

fn build_notifier(
    config: &AppConfig,
    dry_run: bool,
) -> Result<Arc<dyn Notifier>, Report<AppError>> {
    if dry_run {
        return Ok(Arc::new(TerminalNotifier));
    }

    let settings = config.email.settings().change_context(AppError::Config)?;
    let mailer = SmtpMailer::new(&settings).change_context(AppError::Notifier)?;
    Ok(Arc::new(EmailNotifier::new(
        mailer,
        RetryPolicy::new(settings.max_attempts),
    )))
}

fn alert_source(config: &AppConfig) -> Result<AlertSource, Report<AppError>> {
    match &config.client.api_url {
        Some(url) => {
            let api_key = config
                .server
                .required_api_key()
                .change_context(AppError::Config)?;
            info!(url = %url, "evaluating through remote alert API");
            Ok(AlertSource::Remote(AlertApiClient::new(url.clone(), api_key)))
        }
        None => Ok(AlertSource::Local {
            source: price_source(config),
            options: evaluate_options(config),
        }),
    }
}

async fn check(
    config: &AppConfig,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<(), Report<AppError>> {
    if config.tickers.is_empty() {
        tracing::warn!("no tickers configured; nothing to do");
        return Ok(());
    }

    // Fail fast on missing credentials before any network work.
    let notifier = build_notifier(config, dry_run)?;
    let alerts = alert_source(config)?;

    let store = open_store(config, dry_run).await?;
    let mut tracker =
        NotificationTracker::open(store, config.monitor.silence_hours, Arc::new(SystemClock))
            .await;

    cycle::run_cycle(
        &config.tickers,
        &alerts,
        &mut tracker,
        notifier.as_ref(),
        dry_run,
        cancel,
    )
    .await
    .change_context(AppError::Cycle)?;

    Ok(())
}

async fn serve(config: &AppConfig, cancel: CancellationToken) -> Result<(), Report<AppError>> {
    let api_key = config
        .server
        .required_api_key()
        .change_context(AppError::Config)?;

    let state = ServerState {
        source: price_source(config),
        options: evaluate_options(config),
        api_key: Arc::from(api_key),
        shutdown: cancel.clone(),
    };

    let bind = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .change_context(AppError::Server)
        .attach_with(|| format!("bind: {bind}"))?;

    info!(bind = %bind, "stockmon API listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .change_context(AppError::Runtime)?;

    info!("shutdown complete");
    Ok(())
}
