//! Cross-venue arbitrage bot library.
//!
//! Watches AMI/USDT and APT/USDT prices on Bybit (websocket), MEXC (REST)
//! and Panora DEX on Aptos (swap quotes), detects two-venue and triangular
//! arbitrage opportunities, verifies them against fresh DEX quotes and
//! executes the legs as CEX market orders plus on-chain swaps.

pub mod aptos;
pub mod arbitrage;
pub mod collector;
pub mod config;
pub mod exchanges;
pub mod signals;
pub mod types;

// Re-export commonly used types
pub use arbitrage::{ArbEngine, TradeExecutor};
pub use collector::PriceStore;
pub use config::Settings;
pub use signals::{Signal, SignalLogger};
pub use types::{Quote, Venue};
