//! Venue connectivity: market-data feeds, order clients and the DEX
//! quote/execution stack.

pub mod bybit_trader;
pub mod bybit_ws;
pub mod mexc_rest;
pub mod mexc_trader;
pub mod panora;
pub mod panora_executor;
pub mod panora_poller;

pub use bybit_trader::BybitTrader;
pub use bybit_ws::BybitFeed;
pub use mexc_rest::MexcFeed;
pub use mexc_trader::MexcTrader;
pub use panora::{PanoraClient, SwapQuote};
pub use panora_executor::PanoraExecutor;
pub use panora_poller::PanoraPoller;
