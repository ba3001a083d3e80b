use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Candle, Config, Interval, StrategyId};
use engine::{Engine, EngineHandle, LogSink};
use strategy::{StrategyFileConfig, StrategyRegistry};

/// One line of the JSONL replay feed. The live exchange transport is a
/// separate collaborator; this reader stands at the same boundary and
/// feeds the engine one closed candle per line.
#[derive(Debug, Deserialize)]
struct FeedRecord {
    symbol: String,
    interval: Interval,
    #[serde(flatten)]
    candle: Candle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(interval = %cfg.default_interval, "SigBot starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)
        .with_context(|| format!("loading strategy config at '{}'", cfg.strategy_config_path))?;
    let configured: Vec<StrategyId> = strategy_file
        .strategies
        .iter()
        .map(|s| StrategyId::from_str(&s.strategy_type))
        .collect::<Result<_, _>>()
        .context("strategy config names an unknown strategy")?;
    let registry = StrategyRegistry::from_config(&strategy_file)?;

    // ── Engine ────────────────────────────────────────────────────────────────
    let (mut engine, handle) = Engine::new(registry, cfg.default_interval);
    engine.on_aggregated_signal(Arc::new(LogSink));
    tokio::spawn(engine.run());

    // Every configured strategy starts active for all tracked symbols.
    let active = handle.subscribe(None, &configured).await;
    info!(?active, "strategies subscribed");
    for symbol in &cfg.symbols {
        handle.subscribe(Some(symbol.as_str()), &[]).await;
    }

    // ── Feed ──────────────────────────────────────────────────────────────────
    let feed_handle = handle.clone();
    let feed_path = cfg.feed_path.clone();
    tokio::spawn(async move {
        match feed_path {
            Some(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => run_feed(BufReader::new(file), feed_handle).await,
                Err(e) => warn!(path = %path, error = %e, "cannot open feed file"),
            },
            None => {
                info!("reading candle feed from stdin");
                run_feed(BufReader::new(tokio::io::stdin()), feed_handle).await;
            }
        }
    });

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    Ok(())
}

async fn run_feed<R>(reader: BufReader<R>, handle: EngineHandle)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count: u64 = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedRecord>(line) {
                    Ok(record) => {
                        handle
                            .ingest(record.symbol, record.interval, record.candle)
                            .await;
                        count += 1;
                    }
                    Err(e) => warn!(error = %e, "skipping malformed feed line"),
                }
            }
            Ok(None) => {
                info!(candles = count, "feed drained");
                return;
            }
            Err(e) => {
                warn!(error = %e, "feed read error");
                return;
            }
        }
    }
}
