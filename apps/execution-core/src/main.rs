//! Execution Core Binary
//!
//! Starts the execution layer over the paper venue. Upstream signals
//! arrive as newline-delimited JSON on stdin; execution events leave as
//! newline-delimited JSON on stdout; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-core
//!
//! echo '{"type":"ENTRY_SIGNAL","instrument":"BTC-USD","direction":"LONG","price":"43250.50","quantity":"0.5","stop_loss":"42000"}' \
//!     | cargo run --bin execution-core
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `EXECUTION_CONFIG`: Config file path (default: config.yaml; a missing
//!   default file falls back to built-in paper-trading defaults)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use execution_core::config::{self, Config, ConfigError};
use execution_core::engine::ExecutionManager;
use execution_core::events::EventBus;
use execution_core::models::SignalEvent;
use execution_core::position::{PositionManager, Reconciler};
use execution_core::router::OrderRouter;
use execution_core::venue::{ExecutionVenue, PaperVenue};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    execution_core::observability::init_tracing();

    tracing::info!("starting execution core");

    let config = load_configuration()?;
    log_config(&config);

    let events = EventBus::new(config.engine.event_bus_capacity);
    let venue = Arc::new(PaperVenue::new(config.venue.clone()));
    let positions = Arc::new(PositionManager::new(events.clone()));
    let limits = config.risk.to_risk_limits();
    let max_drawdown = limits.max_drawdown;

    let router = OrderRouter::new(
        venue.clone(),
        limits,
        positions.clone(),
        events.clone(),
        config.retry.clone(),
        &config.engine,
    );
    let reconcile_trigger = router.reconcile_signal();

    let manager = Arc::new(ExecutionManager::new(
        router,
        positions.clone(),
        events.clone(),
        config.venue.initial_capital,
        max_drawdown,
    ));
    manager.spawn_event_loop();

    spawn_event_printer(&events);
    spawn_price_ticker(&venue, &positions);
    if config.reconciliation.enabled {
        spawn_reconciler(&positions, &venue, &events, &config, reconcile_trigger);
    }

    tracing::info!(venue = venue.venue_name(), "execution core ready, reading signals from stdin");

    tokio::select! {
        () = run_signal_loop(&manager) => {
            tracing::info!("signal input closed");
        }
        result = signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("execution core stopped");
    Ok(())
}

/// Load .env from the working directory when one is present.
fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Load configuration from `EXECUTION_CONFIG` or the default path.
///
/// A missing file at the default path is not an error: the built-in
/// paper-trading defaults apply. An explicitly configured path that
/// cannot be read is fatal.
fn load_configuration() -> anyhow::Result<Config> {
    let explicit = std::env::var("EXECUTION_CONFIG").ok();
    let path = explicit.as_deref().unwrap_or("config.yaml");
    match config::load_config(Some(path)) {
        Ok(config) => Ok(config),
        Err(ConfigError::ReadError { .. }) if explicit.is_none() => {
            tracing::warn!(path, "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to load configuration from {path}")),
    }
}

/// Log the effective configuration.
fn log_config(config: &Config) {
    tracing::info!(
        initial_capital = %config.venue.initial_capital,
        slippage_pct = %config.venue.slippage_pct,
        max_daily_orders = config.risk.max_daily_orders,
        max_open_positions = config.risk.max_open_positions,
        reconciliation_enabled = config.reconciliation.enabled,
        auto_sync = config.reconciliation.auto_sync,
        "configuration loaded"
    );
}

/// Forward every execution event to stdout as one JSON line.
fn spawn_event_printer(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "event not serializable"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event output lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Step the venue price walk on its configured interval and refresh the
/// unrealized marks of open positions.
fn spawn_price_ticker(
    venue: &Arc<PaperVenue>,
    positions: &Arc<PositionManager>,
) -> JoinHandle<()> {
    let venue = Arc::clone(venue);
    let positions = Arc::clone(positions);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(venue.tick_interval());
        loop {
            ticker.tick().await;
            match venue.tick() {
                Ok(marks) => {
                    for (instrument, price) in marks {
                        positions.update_price(&instrument, price);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "price tick failed"),
            }
        }
    })
}

/// Run periodic position reconciliation against the venue, with
/// out-of-band passes whenever the router degrades an order.
fn spawn_reconciler(
    positions: &Arc<PositionManager>,
    venue: &Arc<PaperVenue>,
    events: &EventBus,
    config: &Config,
    trigger: Arc<Notify>,
) -> JoinHandle<()> {
    let reconciler = Reconciler::new(
        Arc::clone(positions),
        venue.clone(),
        events.clone(),
        config.reconciliation.clone(),
    );
    tokio::spawn(async move { reconciler.run_loop(trigger).await })
}

/// Read newline-delimited JSON signals from stdin until EOF.
///
/// A malformed line or a refused signal is logged and skipped; the
/// handlers already published the matching EXECUTION_ERROR events.
async fn run_signal_loop(manager: &Arc<ExecutionManager>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<SignalEvent>(line) {
                    Ok(signal) => {
                        if let Err(error) = manager.handle_signal(&signal).await {
                            tracing::warn!(%error, "signal not executed");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, line, "unparseable signal line");
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::error!(%error, "stdin read failed");
                break;
            }
        }
    }
}
