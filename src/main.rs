//! tableflow - typed ledger table projection server

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tableflow::{
    config::Args,
    projection::MutationEvent,
    schema::{MetadataStore, SchemaRegistry, TablesConfig},
    server::{self, AppState},
    TableflowContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tableflow={},info", args.log_level).into());
    let subscriber = tracing_subscriber::registry().with(filter);
    if args.json_logs() {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  tableflow - ledger table projection");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Tables config: {}", args.tables_config.display());
    info!("Metadata file: {}", args.metadata.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".into()));
    info!("Events file: {}", args.events.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".into()));
    info!("Subscriber queue: {}", args.subscriber_queue_capacity);
    info!("Page size: {} (max {})", args.default_page_size, args.max_page_size);
    info!("======================================");

    let mut registry = SchemaRegistry::new();
    if let Some(path) = &args.metadata {
        registry = registry.with_metadata_store(MetadataStore::new(path));
        let restored = registry
            .restore_metadata()
            .with_context(|| format!("restoring metadata from {}", path.display()))?;
        info!(tables = restored, file = %path.display(), "Table metadata restored");
    }

    match TablesConfig::from_file(&args.tables_config) {
        Ok(config) => {
            registry
                .load_config(&config)
                .with_context(|| format!("loading tables from {}", args.tables_config.display()))?;
            info!(
                tables = registry.list_tables().len(),
                package = ?config.package_id,
                "Table schemas loaded"
            );
        }
        Err(e) if args.dev_mode || !registry.list_tables().is_empty() => {
            warn!("Tables config unavailable, continuing with known tables: {}", e);
        }
        Err(e) => {
            error!("Tables config error: {}", e);
            std::process::exit(1);
        }
    }
    registry.persist_metadata().context("writing table metadata")?;

    let ctx = Arc::new(TableflowContext::new(Arc::new(registry), args.context_config()));
    ctx.start().await;

    if let Some(path) = args.events.clone() {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            match replay_events(&ctx, &path).await {
                Ok(count) => info!(events = count, file = %path.display(), "Event replay finished"),
                Err(e) => error!("Event replay failed: {:#}", e),
            }
        });
    }

    let state = Arc::new(AppState::new(args, Arc::clone(&ctx)));
    let server_state = Arc::clone(&state);
    let server = tokio::spawn(async move { server::run(server_state).await });

    tokio::select! {
        result = server => {
            match result {
                Ok(Err(e)) => error!("Server error: {:?}", e),
                Err(e) => error!("Server task failed: {:?}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            state.shutdown();
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Feed a JSON-lines events file into the ingest queue
async fn replay_events(ctx: &TableflowContext, path: &PathBuf) -> anyhow::Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let mut count = 0;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = MutationEvent::from_json_line(line)
            .map_err(|e| anyhow::anyhow!("line {}: {}", line_no + 1, e))?;
        ctx.ingest(event).await?;
        count += 1;
    }
    Ok(count)
}
