use anyhow::{bail, Context};
use clap::Parser;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use window_signals::exchange::{BinanceDepthFeed, PolymarketBookFeed, StreamIngestor};
use window_signals::utils::{init_from_config, Config};
use window_signals::SignalEngine;

/// Stream exchange and prediction-market books and log window signals
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file (defaults to CONFIG_FILE or config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides logging.level
    #[arg(long)]
    log_level: Option<String>,

    /// Window tokens as asset:up_token:down_token, repeatable
    #[arg(long = "tokens", value_name = "ASSET:UP:DOWN")]
    tokens: Vec<String>,
}

fn parse_tokens(entry: &str) -> anyhow::Result<(&str, &str, &str)> {
    let mut parts = entry.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(asset), Some(up), Some(down)) if !asset.is_empty() && !up.is_empty() && !down.is_empty() => {
            Ok((asset, up, down))
        }
        _ => bail!("expected ASSET:UP:DOWN, got {entry:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("configuration rejected")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_from_config(&config.logging)?;

    info!(
        environment = %config.general.environment,
        assets = config.assets.len(),
        threshold = config.scorer.threshold,
        "configuration loaded"
    );

    let settings = config.ingestor_settings();
    let binance = Arc::new(StreamIngestor::new(
        BinanceDepthFeed::new(
            config.feeds.binance_ws_endpoint.clone(),
            config.feeds.binance_depth_levels,
            config.feeds.binance_update_speed_ms,
        ),
        settings.clone(),
    )?);
    let polymarket = Arc::new(StreamIngestor::new(
        PolymarketBookFeed::new(config.feeds.polymarket_ws_endpoint.clone()),
        settings,
    )?);

    let registry = Registry::new();
    binance.metrics().register(&registry)?;
    polymarket.metrics().register(&registry)?;

    let mut engine = SignalEngine::new(&config, binance.cache(), polymarket.cache())?
        .with_market_feed(Arc::clone(&polymarket));
    for entry in &args.tokens {
        let (asset, up, down) = parse_tokens(entry)?;
        if !engine.set_window_tokens(asset, up, down) {
            warn!(asset, "tokens not applied");
        }
    }
    binance.update_subscriptions(engine.symbols());

    binance.start();
    polymarket.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let samplers = engine.spawn_imbalance_samplers(shutdown_rx);

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("monitoring, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.tick();
                for decision in report.fired() {
                    info!(
                        asset = %decision.asset,
                        direction = %decision.score.direction,
                        score = decision.adjusted_score,
                        size_multiplier = decision.size_multiplier,
                        seconds_remaining = report.seconds_remaining,
                        "FIRE"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    shutdown_tx.send_replace(true);
    let timeout = config.stop_timeout();
    tokio::join!(binance.stop(timeout), polymarket.stop(timeout));
    for sampler in samplers {
        if let Err(e) = sampler.await {
            warn!("imbalance sampler ended abnormally: {}", e);
        }
    }

    for (feed, metrics) in [(binance.name(), binance.metrics()), (polymarket.name(), polymarket.metrics())] {
        info!(
            feed,
            received = metrics.messages_received.get(),
            dropped = metrics.messages_dropped.get(),
            reconnects = metrics.reconnects.get(),
            "feed summary"
        );
    }
    info!(metric_families = registry.gather().len(), "stopped");
    Ok(())
}
