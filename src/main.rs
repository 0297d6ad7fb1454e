//! Storefront Webhooks Server
//!
//! Receives payment processor webhooks on `POST /webhooks/payments`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use storefront_webhooks::domain::Collaborators;
use storefront_webhooks::server::serve;
use storefront_webhooks::webhook::{ExecutionMode, InMemoryLedger, WebhookConfig, WebhookPipeline};

/// Storefront payment webhook server
#[derive(Parser, Debug)]
#[command(name = "storefront-webhooks")]
#[command(version)]
#[command(about = "Payment webhook ingestion with idempotent, isolated processing")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3001")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Execution mode; overrides STOREFRONT_ENV
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Processing timeout in milliseconds; overrides STOREFRONT_WEBHOOK_TIMEOUT_MS
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Lease on `processing` reservations in milliseconds; overrides STOREFRONT_WEBHOOK_STALE_AFTER_MS
    #[arg(long)]
    stale_after_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose when set
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = WebhookConfig::from_env_with_mode(args.mode)
        .context("Invalid webhook configuration")?;
    if let Some(ms) = args.timeout_ms.filter(|ms| *ms > 0) {
        config = config.with_processing_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.stale_after_ms {
        config = config
            .with_stale_after(Duration::from_millis(ms))
            .context("Invalid --stale-after-ms")?;
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

    tracing::info!(
        mode = config.mode().as_str(),
        signature_header = config.signature_header(),
        timeout_ms = config.processing_timeout().as_millis() as u64,
        stale_after_ms = config.stale_after().as_millis() as u64,
        "Storefront webhook server starting on {}",
        addr
    );

    let pipeline = Arc::new(WebhookPipeline::new(
        config,
        Arc::new(InMemoryLedger::new()),
        Collaborators::in_memory(),
    ));

    serve(addr, pipeline).await?;
    Ok(())
}
