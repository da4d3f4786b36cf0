use std::sync::Arc;
use std::time::Duration;

use exchange_aggregator::aggregator::{
    AggregatorSettings, ExchangeScope, ExclusionReason, MarketAggregator,
};
use exchange_aggregator::arbitrage::ArbitrageDetector;
use exchange_aggregator::error::EngineError;
use exchange_aggregator::exchange::ExchangeClient;
use exchange_aggregator::health::{CircuitState, HealthRegistry};
use exchange_aggregator::testing::{InFlightGauge, MockBehavior, MockExchange};
use pretty_assertions::assert_eq;

fn settings(max_in_flight: usize) -> AggregatorSettings {
    AggregatorSettings {
        request_deadline: Duration::from_millis(500),
        per_call_timeout: Duration::from_millis(200),
        max_in_flight,
        // Zero TTLs so every call hits the mocks; the cache unit tests
        // cover TTL behavior on their own.
        snapshot_cache_ttl: Duration::from_millis(0),
        summary_cache_ttl: Duration::from_millis(0),
        default_symbols: vec!["BTCUSDT".to_string()],
        default_interval: "1h".to_string(),
        candle_limit: 5,
    }
}

fn build_engine(
    mocks: Vec<Arc<MockExchange>>,
    failure_threshold: u32,
    cooldown: Duration,
    max_in_flight: usize,
) -> MarketAggregator {
    let clients: Vec<Arc<dyn ExchangeClient>> = mocks
        .iter()
        .map(|m| Arc::clone(m) as Arc<dyn ExchangeClient>)
        .collect();
    let identities: Vec<_> = clients.iter().map(|c| c.identity().clone()).collect();
    let health = Arc::new(HealthRegistry::new(&identities, failure_threshold, cooldown));
    let detector = ArbitrageDetector::new(0.3, Duration::from_secs(5), None);
    MarketAggregator::new(clients, health, detector, settings(max_in_flight))
}

#[tokio::test]
async fn summary_reports_partial_success_with_reasons() {
    let good = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 100.0 },
    ));
    let failing = Arc::new(MockExchange::new(
        "beta",
        2,
        MockBehavior::Fail(EngineError::RemoteUnavailable("503".to_string())),
    ));
    let slow = Arc::new(MockExchange::new(
        "gamma",
        3,
        MockBehavior::Delay {
            price: 100.0,
            latency: Duration::from_secs(2),
        },
    ));
    let engine = build_engine(
        vec![good.clone(), failing.clone(), slow.clone()],
        5,
        Duration::from_secs(30),
        4,
    );

    let summary = engine.get_summary(None).await.unwrap();
    assert_eq!(summary.contributing_exchanges, vec!["alpha".to_string()]);
    assert_eq!(summary.total_exchanges, 3);
    assert_eq!(summary.snapshots.len(), 1);
    assert_eq!(summary.snapshots[0].exchange, "alpha");

    assert_eq!(summary.excluded_exchanges.len(), 2);
    let beta = summary
        .excluded_exchanges
        .iter()
        .find(|e| e.exchange == "beta")
        .unwrap();
    match &beta.reason {
        ExclusionReason::Failed(reason) => assert!(reason.contains("503")),
        other => panic!("expected Failed for beta, got {:?}", other),
    }
    let gamma = summary
        .excluded_exchanges
        .iter()
        .find(|e| e.exchange == "gamma")
        .unwrap();
    assert_eq!(gamma.reason, ExclusionReason::Timeout);
}

#[tokio::test]
async fn open_breaker_shows_as_circuit_open_exclusion() {
    let good = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 100.0 },
    ));
    let failing = Arc::new(MockExchange::new(
        "beta",
        2,
        MockBehavior::Fail(EngineError::RemoteUnavailable("503".to_string())),
    ));
    // Threshold 1: beta's breaker opens on its first failure.
    let engine = build_engine(
        vec![good, failing.clone()],
        1,
        Duration::from_secs(60),
        4,
    );

    let first = engine.get_summary(None).await.unwrap();
    assert!(matches!(
        first.excluded_exchanges[0].reason,
        ExclusionReason::Failed(_)
    ));
    assert_eq!(failing.call_count(), 1);

    let second = engine.get_summary(None).await.unwrap();
    assert_eq!(second.excluded_exchanges.len(), 1);
    assert_eq!(second.excluded_exchanges[0].exchange, "beta");
    assert_eq!(
        second.excluded_exchanges[0].reason,
        ExclusionReason::CircuitOpen
    );
    // The open breaker kept the call off the wire.
    assert_eq!(failing.call_count(), 1);
}

#[tokio::test]
async fn indicator_fn_decorates_successful_snapshots() {
    let mock = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 100.0 },
    ));
    let clients: Vec<Arc<dyn ExchangeClient>> = vec![Arc::clone(&mock) as Arc<dyn ExchangeClient>];
    let identities: Vec<_> = clients.iter().map(|c| c.identity().clone()).collect();
    let health = Arc::new(HealthRegistry::new(&identities, 5, Duration::from_secs(30)));
    let detector = ArbitrageDetector::new(0.3, Duration::from_secs(5), None);
    let engine = MarketAggregator::new(clients, health, detector, settings(4)).with_indicator_fn(
        Arc::new(|candles: &[exchange_aggregator::exchange::Candle]| {
            let mut out = std::collections::HashMap::new();
            out.insert("candle_count".to_string(), candles.len() as f64);
            out
        }),
    );

    let snapshot = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Any)
        .await
        .unwrap();
    let indicators = snapshot.indicators.expect("indicators should be attached");
    assert_eq!(indicators["candle_count"], snapshot.candles.len() as f64);
}

#[tokio::test]
async fn breaker_trips_after_threshold_and_short_circuits() {
    let failing = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Fail(EngineError::RemoteUnavailable("down".to_string())),
    ));
    let threshold = 3;
    let engine = build_engine(
        vec![failing.clone()],
        threshold,
        Duration::from_secs(60),
        4,
    );

    for _ in 0..threshold {
        let err = engine
            .get_snapshot("BTCUSDT", None, ExchangeScope::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AllExchangesUnavailable));
    }
    assert_eq!(failing.call_count(), threshold as usize);
    assert_eq!(
        engine.health_report().get("alpha").unwrap().state,
        CircuitState::Open
    );

    // Open breaker: no further calls reach the adapter.
    for _ in 0..5 {
        let _ = engine.get_snapshot("BTCUSDT", None, ExchangeScope::Any).await;
    }
    assert_eq!(failing.call_count(), threshold as usize);
}

#[tokio::test]
async fn half_open_probe_recovers_the_exchange() {
    let mock = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Fail(EngineError::RemoteUnavailable("down".to_string())),
    ));
    let cooldown = Duration::from_millis(100);
    let engine = build_engine(vec![mock.clone()], 2, cooldown, 4);

    for _ in 0..2 {
        let _ = engine.get_snapshot("BTCUSDT", None, ExchangeScope::Any).await;
    }
    assert_eq!(
        engine.health_report().get("alpha").unwrap().state,
        CircuitState::Open
    );

    // Exchange comes back while the breaker cools down.
    mock.set_behavior(MockBehavior::Success { price: 42.0 });
    tokio::time::sleep(cooldown + Duration::from_millis(20)).await;

    let snapshot = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Any)
        .await
        .unwrap();
    assert_eq!(snapshot.price, 42.0);
    assert_eq!(
        engine.health_report().get("alpha").unwrap().state,
        CircuitState::Closed
    );
}

#[tokio::test]
async fn fan_out_respects_max_in_flight() {
    let gauge = Arc::new(InFlightGauge::default());
    let mocks: Vec<Arc<MockExchange>> = (0..5)
        .map(|i| {
            Arc::new(
                MockExchange::new(
                    &format!("ex{}", i),
                    i as u8 + 1,
                    MockBehavior::Delay {
                        price: 100.0,
                        latency: Duration::from_millis(50),
                    },
                )
                .with_gauge(Arc::clone(&gauge)),
            )
        })
        .collect();
    let engine = build_engine(mocks, 5, Duration::from_secs(30), 2);

    let summary = engine.get_summary(None).await.unwrap();
    assert_eq!(summary.contributing_exchanges.len(), 5);
    assert!(
        gauge.peak() <= 2,
        "observed {} concurrent calls with a bound of 2",
        gauge.peak()
    );
}

#[tokio::test]
async fn arbitrage_detected_across_exchanges() {
    let cheap = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 100.0 },
    ));
    let pricey = Arc::new(MockExchange::new(
        "beta",
        2,
        MockBehavior::Success { price: 100.5 },
    ));
    let engine = build_engine(vec![cheap, pricey], 5, Duration::from_secs(30), 4);

    let opportunities = engine.find_arbitrage(None).await.unwrap();
    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];
    assert_eq!(opp.symbol, "BTCUSDT");
    assert_eq!(opp.buy_exchange, "alpha");
    assert_eq!(opp.sell_exchange, "beta");
    assert!((opp.spread_pct - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn preferred_scope_pins_a_single_exchange() {
    let primary = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 100.0 },
    ));
    let secondary = Arc::new(MockExchange::new(
        "beta",
        2,
        MockBehavior::Success { price: 200.0 },
    ));
    let engine = build_engine(vec![primary.clone(), secondary.clone()], 5, Duration::from_secs(30), 4);

    let snapshot = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Preferred("beta".to_string()))
        .await
        .unwrap();
    assert_eq!(snapshot.exchange, "beta");
    assert_eq!(snapshot.price, 200.0);
    assert_eq!(primary.call_count(), 0);

    let err = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Preferred("nope".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn best_price_follows_exchange_priority() {
    let low_priority = Arc::new(MockExchange::new(
        "zeta",
        9,
        MockBehavior::Success { price: 1.0 },
    ));
    let high_priority = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Success { price: 2.0 },
    ));
    let engine = build_engine(vec![low_priority, high_priority], 5, Duration::from_secs(30), 4);

    let snapshot = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Any)
        .await
        .unwrap();
    assert_eq!(snapshot.exchange, "alpha");
}

#[tokio::test]
async fn late_failures_while_open_do_not_extend_cooldown() {
    // One slow exchange, three symbols, serial dispatch: the first call's
    // timeout trips the breaker (threshold 1) while the remaining calls,
    // already admitted, time out one by one against the open breaker at
    // ~200ms and ~300ms.
    let mock = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Delay {
            price: 100.0,
            latency: Duration::from_secs(1),
        },
    ));
    let clients: Vec<Arc<dyn ExchangeClient>> = vec![Arc::clone(&mock) as Arc<dyn ExchangeClient>];
    let identities: Vec<_> = clients.iter().map(|c| c.identity().clone()).collect();
    let cooldown = Duration::from_millis(600);
    let health = Arc::new(HealthRegistry::new(&identities, 1, cooldown));
    let detector = ArbitrageDetector::new(0.3, Duration::from_secs(5), None);
    let engine = MarketAggregator::new(
        clients,
        health,
        detector,
        AggregatorSettings {
            request_deadline: Duration::from_millis(500),
            per_call_timeout: Duration::from_millis(100),
            max_in_flight: 1,
            snapshot_cache_ttl: Duration::from_millis(0),
            summary_cache_ttl: Duration::from_millis(0),
            default_symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            default_interval: "1h".to_string(),
            candle_limit: 5,
        },
    );

    let err = engine.get_summary(None).await.unwrap_err();
    assert!(matches!(err, EngineError::AllExchangesUnavailable));
    assert_eq!(
        engine.health_report().get("alpha").unwrap().state,
        CircuitState::Open
    );

    // The breaker opened ~100ms in; the trailing failures landed while it
    // was already OPEN. Probing ~500ms after the summary returns sits past
    // the real cool-down but inside a cool-down restarted by the last late
    // failure, so a restart would reject the probe below.
    mock.set_behavior(MockBehavior::Success { price: 42.0 });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snapshot = engine
        .get_snapshot("BTCUSDT", None, ExchangeScope::Any)
        .await
        .unwrap();
    assert_eq!(snapshot.price, 42.0);
    assert_eq!(
        engine.health_report().get("alpha").unwrap().state,
        CircuitState::Closed
    );
}

#[tokio::test]
async fn symbols_listing_goes_through_the_breaker() {
    let mock = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Fail(EngineError::RemoteUnavailable("down".to_string())),
    ));
    let engine = build_engine(vec![mock.clone()], 1, Duration::from_secs(60), 4);

    // One failure trips the breaker at threshold 1.
    assert!(engine.list_symbols("alpha").await.is_err());
    let err = engine.list_symbols("alpha").await.unwrap_err();
    assert!(matches!(err, EngineError::CircuitOpen(_)));

    assert!(matches!(
        engine.list_symbols("nope").await.unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn every_exchange_down_is_a_hard_error() {
    let a = Arc::new(MockExchange::new(
        "alpha",
        1,
        MockBehavior::Fail(EngineError::RemoteUnavailable("503".to_string())),
    ));
    let b = Arc::new(MockExchange::new(
        "beta",
        2,
        MockBehavior::Fail(EngineError::RateLimited("429".to_string())),
    ));
    let engine = build_engine(vec![a, b], 5, Duration::from_secs(30), 4);

    let err = engine.get_summary(None).await.unwrap_err();
    assert!(matches!(err, EngineError::AllExchangesUnavailable));
}
