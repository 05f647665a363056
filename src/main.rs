use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use equitybot::account::validate_account;
use equitybot::api::{AlpacaClient, Brokerage};
use equitybot::clock::TokioSleeper;
use equitybot::config::{Cli, Settings};
use equitybot::execution::Executor;
use equitybot::ledger::TradeLedger;
use equitybot::scheduler::{ScheduleConfig, TradingLoop};
use equitybot::strategy::{SmaCrossover, Strategy};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("Failed to load settings")?;
    setup_logging(&settings);

    tracing::info!("🚀 EquityBot starting");
    log_settings(&settings);

    let credentials = settings.credentials()?;
    let client = Arc::new(AlpacaClient::new(credentials, settings.paper)?);
    tracing::info!("Connected to {}", client.trading_base());

    validate_account(client.as_ref(), settings.min_cash).await?;
    log_positions(client.as_ref()).await;

    let strategy = SmaCrossover::new(settings.strategy.clone())?;
    let executor = Executor::new(
        client.clone(),
        Arc::new(TokioSleeper),
        TradeLedger::new(&settings.ledger_path),
        &settings.symbol,
        settings.monitor_config(),
    );
    let trading_loop = TradingLoop::new(
        Box::new(strategy),
        executor,
        client.clone(),
        client.clone(),
        settings.market_clock()?,
        Arc::new(TokioSleeper),
        ScheduleConfig::from(&settings),
    );

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = trading_loop.run() => {
            tracing::error!("Trading loop exited unexpectedly");
        }
    }

    tracing::info!("👋 EquityBot stopped");
    Ok(())
}

fn setup_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_settings(settings: &Settings) {
    let strategy = &settings.strategy;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {}", settings.symbol);
    tracing::info!(
        "  Account: {}",
        if settings.paper { "paper" } else { "LIVE" }
    );
    tracing::info!(
        "  SMA windows: {} / {} days",
        strategy.short_window,
        strategy.long_window
    );
    tracing::info!(
        "  Multipliers: buy {} / sell {} / tie {}",
        strategy.buy_multiplier,
        strategy.sell_multiplier,
        strategy.tie_multiplier
    );
    tracing::info!(
        "  Order wait: {}s (poll every {}s)",
        settings.max_wait_secs,
        settings.poll_interval_secs
    );
    tracing::info!("  Ledger: {}", settings.ledger_path.display());
    if settings.quick_test {
        tracing::info!("  Quick test: market hours ignored, cycle every {}s", settings.fast_interval_secs);
    } else {
        tracing::info!("  Cadence: every {} trading days", settings.cycle_trading_days);
    }
}

async fn log_positions(broker: &dyn Brokerage) {
    match broker.get_all_positions().await {
        Ok(positions) if positions.is_empty() => tracing::info!("No open positions"),
        Ok(positions) => {
            tracing::info!("Open positions:");
            for position in positions {
                tracing::info!("  {}: {} shares", position.symbol, position.qty);
            }
        }
        Err(e) => tracing::warn!("Failed to fetch positions: {}", e),
    }
}
