//! # Pool Syncer Service
//!
//! Keeps the pool state store in step with the chain.
//!
//! ## Overview
//!
//! This service:
//! - Refreshes the pool catalog from the configured indexing endpoints
//! - Runs an incremental sync cycle every `sync.interval_seconds`
//! - Handles graceful shutdown on Ctrl+C
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin pool_syncer -- --config Config.toml
//! cargo run --bin pool_syncer -- --once
//! cargo run --bin pool_syncer -- --reset-cursor 0 --once
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pool_sync_sdk::{
    chain_client::{ChainClient, EthersChainClient, FailoverChainClient},
    indexing_client_pool::IndexingClientPool,
    metrics,
    settings::Settings,
    storage::MemoryStore,
    subgraph::{HttpIndexingClient, IndexingClient},
    sync_orchestrator::SyncOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "pool_syncer", about = "Incremental pool state synchronization")]
struct Args {
    /// Settings file (defaults to Config.toml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Overrides `sync.category`
    #[arg(long)]
    category: Option<String>,

    /// Sets the cursor to this block before syncing
    #[arg(long)]
    reset_cursor: Option<u64>,

    /// Skip the catalog refresh on startup
    #[arg(long)]
    skip_catalog: bool,
}

fn init_logging(settings: &Settings) -> Result<()> {
    #[cfg(feature = "observability")]
    {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log.level)),
            )
            .try_init()
            .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

        if let Some(addr) = &settings.metrics.listen_addr {
            let addr = addr
                .parse()
                .with_context(|| format!("Invalid metrics.listen_addr {}", addr))?;
            metrics::install_prometheus_exporter(addr)?;
        }
    }
    #[cfg(not(feature = "observability"))]
    {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(settings.log.level.as_str()),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {}", e))?;
    }
    metrics::describe_metrics();
    Ok(())
}

fn indexing_pool(settings: &Settings) -> Result<Option<Arc<IndexingClientPool<dyn IndexingClient>>>> {
    if settings.subgraph.urls.is_empty() {
        return Ok(None);
    }
    let timeout = Duration::from_secs(settings.subgraph.timeout_seconds);
    let clients = settings
        .subgraph
        .urls
        .iter()
        .map(|url| {
            HttpIndexingClient::new(url, timeout).map(|c| Arc::new(c) as Arc<dyn IndexingClient>)
        })
        .collect::<Result<Vec<_>>>()?;
    let pool = IndexingClientPool::new(clients, settings.subgraph.max_attempts)
        .with_attempt_timeout(timeout)
        .with_retry_delay(Duration::from_millis(settings.subgraph.retry_delay_ms));
    Ok(Some(Arc::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::from_file(path),
        None => Settings::new(),
    }
    .context("Failed to load settings")?;
    init_logging(&settings)?;

    let category = args
        .category
        .clone()
        .unwrap_or_else(|| settings.sync.category.clone());
    let chain = settings.chain.name.clone();
    log::info!("Starting pool syncer for {}/{}", category, chain);

    let endpoints = settings
        .rpc
        .http_urls
        .iter()
        .map(|url| {
            EthersChainClient::from_url(
                url,
                settings.rpc.qps_limit,
                settings.rpc.max_concurrency,
                settings.rpc.request_timeout(),
            )
            .map(|c| Arc::new(c) as Arc<dyn ChainClient>)
        })
        .collect::<Result<Vec<_>>>()?;
    let failover = FailoverChainClient::new(endpoints)?;
    log::info!("Using {} RPC endpoints", failover.endpoint_count());
    let chain_client: Arc<dyn ChainClient> = Arc::new(failover);

    let store = Arc::new(MemoryStore::new());
    let shutdown = CancellationToken::new();

    let mut orchestrator = SyncOrchestrator::from_settings(
        &settings,
        chain_client,
        store.clone(),
        store.clone(),
        store.clone(),
    )
    .with_shutdown(shutdown.child_token());
    let indexing = indexing_pool(&settings)?;
    if let Some(pool) = &indexing {
        orchestrator = orchestrator.with_indexing_pool(pool.clone());
    }

    if indexing.is_some() && !args.skip_catalog {
        let count = orchestrator
            .refresh_catalog(settings.subgraph.page_size)
            .await
            .context("Catalog refresh failed")?;
        log::info!("Catalog loaded with {} pools", count);
    } else {
        log::warn!("No pool catalog loaded; changed pools will be skipped");
    }

    if let Some(block) = args.reset_cursor {
        orchestrator.reset_cursor(&category, &chain, block).await?;
    }

    if args.once {
        let outcome = orchestrator.sync_changed_pools(&category, &chain).await?;
        log::info!(
            "Synced {} pools, cursor at block {}",
            outcome.updated_pool_ids.len(),
            outcome.cursor
        );
        return Ok(());
    }

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    orchestrator
        .run(
            &category,
            &chain,
            Duration::from_secs(settings.sync.interval_seconds),
        )
        .await;
    log::info!(
        "Pool syncer stopped with {} pool records",
        store.pool_states().len()
    );
    Ok(())
}
