//! stickerstash - sticker collection bot

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stickerstash_core::store::{EtcdStore, MemoryStore};
use stickerstash_core::{reconcile, Allocator, ContentStore, IngestionPipeline, Ledger};
use stickerstash_server::bot::{self, BotContext};
use stickerstash_server::codec::ImageCodec;
use stickerstash_server::config::{ServiceConfig, StoreBackend, StoreConfig};
use stickerstash_server::localization::Localization;
use stickerstash_server::observability::{self, TracingConfig};
use stickerstash_server::telegram::TelegramClient;
use stickerstash_server::{api, version};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "stickerstash")]
#[command(about = "Telegram bot that collects cloned stickers into per-user sets")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Log output format, "text" or "json" (overrides LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot and the statistics API
    Run,
    /// Compare per-user counters with the aggregate usage totals
    Reconcile {
        /// Overwrite the aggregate totals with the per-user sums
        #[arg(long)]
        apply: bool,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::Version = command {
        println!("{}", version::build_info());
        return Ok(());
    }

    let mut tracing_config = TracingConfig::from_env();
    if let Some(format) = cli.log_format {
        tracing_config.log_format = format;
    }
    observability::init_tracing(&tracing_config).map_err(|e| anyhow::anyhow!(e))?;

    let result = match command {
        Commands::Run => run().await,
        Commands::Reconcile { apply } => run_reconcile(apply).await,
        Commands::Version => Ok(()),
    };

    if let Err(e) = &result {
        error!(error = %e, "stickerstash exited with an error");
    }
    observability::shutdown_tracing();
    result
}

async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn ContentStore>> {
    match config.backend {
        StoreBackend::Etcd => {
            info!(endpoints = ?config.etcd_endpoints, prefix = %config.prefix, "Connecting to etcd");
            let store =
                EtcdStore::connect(&config.etcd_endpoints, &config.prefix, &config.connect_backoff)
                    .await?;
            info!("Connected to etcd");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_reconcile(apply: bool) -> anyhow::Result<()> {
    let config = StoreConfig::from_env()?;
    let store = connect_store(&config).await?;

    let report = reconcile::scan(store.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.is_consistent() {
        info!(users = report.users_scanned, "Usage totals are consistent");
    } else if apply {
        reconcile::apply(store.as_ref(), &report).await?;
        info!(users = report.users_scanned, "Usage totals rewritten");
    } else {
        warn!(
            drifted = report.drifted().len(),
            "Usage totals drifted, rerun with --apply to fix"
        );
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    info!(version = %version::full_version(), "Starting stickerstash");

    let metrics_state = match observability::init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let store = connect_store(&config.store).await?;

    let localization = Localization::load(&config.localization_path)?;
    if localization.languages().is_empty() {
        bail!(
            "{} defines no languages",
            config.localization_path.display()
        );
    }
    let localization = Arc::new(localization);

    let client = TelegramClient::new(
        &config.telegram_api_url,
        &config.bot_token,
        config.request_timeout,
    )?;
    let me = client.get_me().await.context("getMe failed, check BOT_TOKEN")?;
    let Some(bot_username) = me.username else {
        bail!("the bot account has no username");
    };
    info!(bot = %bot_username, "Authenticated with the Bot API");

    let client = Arc::new(client);
    let ledger = Arc::new(Ledger::new(store.clone(), config.default_language.clone()));
    let allocator = Arc::new(Allocator::new(
        client.clone(),
        bot_username,
        config.capacity,
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        allocator,
        ledger.clone(),
        client.clone(),
        client.clone(),
        Arc::new(ImageCodec::new(config.limits.max_input_bytes as usize)),
        config.limits,
    ));

    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let context = Arc::new(BotContext {
        ledger: ledger.clone(),
        pipeline,
        localization,
        messenger: client.clone(),
        debug_commands: config.debug_commands,
        capacity_race_retries: config.capacity_race_retries,
        shutdown,
    });

    let readiness = Arc::new(AtomicBool::new(false));
    let app = api::create_router(api::AppState {
        ledger,
        metrics_state,
        readiness: readiness.clone(),
    });

    info!(bind_addr = %config.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let signal_context = context.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_context.request_shutdown();
            }
            Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    readiness.store(true, Ordering::Release);
    bot::run_polling(client.as_ref().clone(), context, config.poll_timeout).await;
    readiness.store(false, Ordering::Release);

    server.await??;
    info!("stickerstash stopped");
    Ok(())
}
