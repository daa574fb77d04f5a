//! Tracker - rendezvous server for interconnect daemons

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracker::{
    cache::{self, MemoryCache, TokenCache},
    config::{Args, Command},
    db::{MongoClient, Repositories},
    mail::LogMailer,
    nats::NatsClient,
    server::{self, AppState, BindConfig, Settings},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match args.command() {
        Command::Run => run(args).await,
        Command::CreateDb => create_db(&args).await,
        Command::ClearCache => clear_cache(&args).await,
    }
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tracker={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("======================================");
    info!("  Tracker");
    info!("======================================");
    info!("TCP: {}", args.listen);
    info!("UDP: {}", args.udp_listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("NATS: {}", args.nats.nats_url);
    info!("Punch timeout: {}ms", args.punch_timeout_ms);
    info!("======================================");

    let repos = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => Repositories::mongo(&client).await?,
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory repositories): {}", e);
                Repositories::memory()
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let nats = match NatsClient::new(&args.nats, "tracker").await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, cache stays local): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let settings = Settings::from_args(&args);
    let backend: Arc<dyn cache::Cache> = Arc::new(MemoryCache::new(settings.cache_ttl));
    let token_cache = TokenCache::new(backend.clone(), nats.clone());
    let state = Arc::new(AppState::new(
        settings,
        repos,
        token_cache,
        Arc::new(LogMailer),
    ));

    let handle = server::start_server(state, BindConfig::from_args(&args)).await?;

    let invalidations = match &nats {
        Some(nats) => Some(
            cache::spawn_invalidation_listener(nats, backend, handle.shutdown_token()).await?,
        ),
        None => None,
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");

    handle.stop().await;
    if let Some(task) = invalidations {
        let _ = task.await;
    }
    Ok(())
}

async fn create_db(args: &Args) -> anyhow::Result<()> {
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    Repositories::mongo(&client).await?;
    info!("Indexes applied to database '{}'", client.db_name());
    Ok(())
}

async fn clear_cache(args: &Args) -> anyhow::Result<()> {
    let nats = NatsClient::new(&args.nats, "tracker-cli").await?;
    nats.publish(
        tracker::nats::CACHE_INVALIDATE_SUBJECT,
        bytes::Bytes::from_static(cache::keys::ALL_KEYS.as_bytes()),
    )
    .await?;
    nats.flush().await?;
    info!("Cache clear published on {}", tracker::nats::CACHE_INVALIDATE_SUBJECT);
    Ok(())
}
