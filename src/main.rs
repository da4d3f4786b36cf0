// src/main.rs
use exchange_aggregator::{
    aggregator::{AggregatorSettings, MarketAggregator},
    arbitrage::ArbitrageDetector,
    config::Config,
    exchange::get_all_clients_arc,
    health::HealthRegistry,
    utils::setup_logging,
};
use log::{error, info, warn};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    setup_logging().expect("Failed to initialize logging");
    info!("🚀 Exchange aggregation engine starting...");

    // --- Configuration & Initialization ---
    let config = Config::from_env();
    config.validate_and_log();

    let clients = get_all_clients_arc();
    let identities: Vec<_> = clients.iter().map(|c| c.identity().clone()).collect();
    let health = Arc::new(HealthRegistry::new(
        &identities,
        config.failure_threshold,
        Duration::from_secs(config.cooldown_secs),
    ));
    let detector = ArbitrageDetector::new(
        config.min_spread_pct,
        Duration::from_secs(config.freshness_window_secs),
        config.round_trip_fee_pct,
    );
    let aggregator = MarketAggregator::new(
        clients,
        health,
        detector,
        AggregatorSettings::from(&config),
    );

    info!(
        "📡 Watching {} symbols across {} exchanges every {}s",
        config.watch_symbols.len(),
        identities.len(),
        config.cycle_interval_secs
    );

    // --- Scan Loop ---
    let mut ticker = tokio::time::interval(Duration::from_secs(config.cycle_interval_secs));
    loop {
        ticker.tick().await;

        for (exchange, state) in aggregator.health_report() {
            info!(
                "health: {} is {} ({} consecutive failures)",
                exchange,
                state.state.as_str(),
                state.consecutive_failures
            );
        }

        match aggregator.get_summary(None).await {
            Ok(summary) => {
                info!(
                    "summary: {} snapshots, {}/{} exchanges contributing",
                    summary.snapshots.len(),
                    summary.contributing_exchanges.len(),
                    summary.total_exchanges
                );
                for exclusion in &summary.excluded_exchanges {
                    warn!("excluded {}: {:?}", exclusion.exchange, exclusion.reason);
                }
            }
            Err(err) => {
                error!("summary fan-out failed: {}", err);
                continue;
            }
        }

        match aggregator.find_arbitrage(None).await {
            Ok(opportunities) if opportunities.is_empty() => {
                info!("no arbitrage opportunities this cycle");
            }
            Ok(opportunities) => {
                for opp in &opportunities {
                    info!(
                        "💰 {}: buy {} @ {:.4}, sell {} @ {:.4} → {:.3}% spread",
                        opp.symbol,
                        opp.buy_exchange,
                        opp.buy_price,
                        opp.sell_exchange,
                        opp.sell_price,
                        opp.spread_pct
                    );
                }
            }
            Err(err) => error!("arbitrage scan failed: {}", err),
        }
    }
}
