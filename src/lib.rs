pub mod aggregator;
pub mod arbitrage;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod health;
pub mod testing; // Testing infrastructure
pub mod utils;

// Re-export the engine surface consumers actually touch
pub use aggregator::{ExchangeScope, ExchangeSummary, MarketAggregator};
pub use arbitrage::{ArbitrageDetector, ArbitrageOpportunity};
pub use error::{EngineError, Result};
pub use exchange::{ExchangeClient, MarketSnapshot};
pub use health::{CircuitState, HealthRegistry};
