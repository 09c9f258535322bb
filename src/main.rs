use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ditto::server::{self, AppState};
use ditto::{HttpSource, Settings, Store, SyncJob};

#[derive(Parser, Debug)]
#[command(name = "ditto", version, about = "Rotating quote image server for e-ink frames")]
struct Args {
    /// YAML settings file
    #[arg(short, long, env = "DITTO_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the settings file
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database file, overrides the settings file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Do not pull from the content source
    #[arg(long)]
    no_sync: bool,

    /// Debug logging for ditto itself
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "info,ditto=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::from_env().context("reading settings from the environment")?,
    };
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if let Some(database) = args.database {
        settings.database_path = database;
    }

    let store = Store::open(&settings.database_path)
        .with_context(|| format!("opening database {}", settings.database_path.display()))?;
    let stats = store.stats()?;
    tracing::info!(
        database = %settings.database_path.display(),
        quotes = stats.quote_count,
        eligible = stats.eligible_count,
        clients = stats.client_count,
        "Opened quote store"
    );

    let state = Arc::new(AppState::new(store.clone(), settings.clone())?);

    match (&settings.sync.source_url, args.no_sync) {
        (Some(url), false) => start_sync(url, &settings, store, state.cache()).await,
        (Some(_), true) => tracing::info!("Content sync disabled by --no-sync"),
        (None, _) => tracing::info!("No content source configured, serving the stored catalog"),
    }

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("binding {}", settings.bind))?;
    tracing::info!(addr = %settings.bind, "ditto listening");

    axum::serve(
        listener,
        server::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn start_sync(
    url: &str,
    settings: &Settings,
    store: Store,
    cache: Option<Arc<ditto::RenderCache>>,
) {
    let mut source = HttpSource::new(url);
    if let Some(token) = &settings.sync.source_token {
        source = source.with_token(token);
    }
    let job = SyncJob::new(source, store)
        .with_cache(cache)
        .with_schedule(settings.sync.schedule.clone());

    if settings.sync.sync_on_startup {
        if let Err(err) = job.run_once().await {
            tracing::error!(error = %err, "Startup sync failed, serving the stored catalog");
        }
    }
    tokio::spawn(job.run_forever());
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
