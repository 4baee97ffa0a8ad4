//! Arbitrage detection and execution.

pub mod cooldown;
pub mod engine;
pub mod executor;

pub use cooldown::VerifyCooldown;
pub use engine::{calc_profit, ArbEngine};
pub use executor::{coin_for, floor_qty, TradeExecutor, TriangularTask};
