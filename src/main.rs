use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trace_explorer::aggregator;
use trace_explorer::api::{self, AppState};
use trace_explorer::chain::ChainReader;
use trace_explorer::config;
use trace_explorer::poller;
use trace_explorer::rpc::HttpTransport;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Trace explorer starting...");

    let cfg = config::load()?;
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Contract: {}", cfg.contract_address);
    info!("  Event topic: {}", cfg.event_topic);
    info!("  From block: {}", cfg.from_block);
    info!("  Port: {}", cfg.port);

    let reader = Arc::new(ChainReader::new(HttpTransport::new(cfg.rpc_http_url.clone())));
    let source = cfg.event_source();

    // Latest position per product, refreshed often
    let snapshot_poller = poller::spawn("latest-products", cfg.snapshot_interval, cfg.poll_timeout, {
        let reader = Arc::clone(&reader);
        let source = source.clone();
        move || {
            let reader = Arc::clone(&reader);
            let source = source.clone();
            async move { Some(aggregator::latest_per_product(&reader, &source).await) }
        }
    });

    // Dashboard counters, refreshed rarely
    let stats_poller = poller::spawn("dashboard-stats", cfg.stats_interval, cfg.poll_timeout, {
        let reader = Arc::clone(&reader);
        let source = source.clone();
        move || {
            let reader = Arc::clone(&reader);
            let source = source.clone();
            async move { aggregator::dashboard_stats(&reader, &source).await }
        }
    });

    let state = AppState {
        reader: Arc::clone(&reader),
        source,
        page_size: cfg.page_size,
        fetch_concurrency: cfg.fetch_concurrency,
        latest_products: snapshot_poller.slot(),
        stats: stats_poller.slot(),
    };

    let api_handle = tokio::spawn(api::serve(cfg.port, state));

    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    snapshot_poller.stop().await;
    stats_poller.stop().await;

    info!("Trace explorer stopped.");
    Ok(())
}
