//! Deterministic test doubles for the engine.

pub mod mock_exchange;

pub use mock_exchange::{InFlightGauge, MockBehavior, MockExchange};
