// Core data structures shared across feeds, engine and executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Default max quote age when a shape has no dedicated threshold
pub const DEFAULT_QUOTE_MAX_AGE_S: f64 = 10.0;

/// Order-book depth sentinel for DEX quotes (AMMs have no top-of-book qty)
pub const DEX_DEPTH_SENTINEL: f64 = 10_000.0;

/// Venues we collect prices from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Bybit,
    Mexc,
    Panora,
}

impl Venue {
    /// Returns true for centralized exchanges (order book + authenticated orders)
    pub fn is_cex(&self) -> bool {
        matches!(self, Venue::Bybit | Venue::Mexc)
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Venue::Bybit => write!(f, "Bybit"),
            Venue::Mexc => write!(f, "MEXC"),
            Venue::Panora => write!(f, "Panora"),
        }
    }
}

/// Direction of a two-venue DEX-CEX arbitrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexCexDirection {
    BuyDexSellCex,
    BuyCexSellDex,
}

impl fmt::Display for DexCexDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DexCexDirection::BuyDexSellCex => write!(f, "BUY_DEX_SELL_CEX"),
            DexCexDirection::BuyCexSellDex => write!(f, "BUY_CEX_SELL_DEX"),
        }
    }
}

/// Direction of a triangular arbitrage (which token leaves the Aptos wallet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriDirection {
    AptToAmi,
    AmiToApt,
}

impl fmt::Display for TriDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TriDirection::AptToAmi => write!(f, "APT_TO_AMI"),
            TriDirection::AmiToApt => write!(f, "AMI_TO_APT"),
        }
    }
}

/// Market order side; each venue client renders its own wire spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Top-of-book snapshot from one venue for one symbol.
///
/// On a DEX, bid == ask and both quantities are `DEX_DEPTH_SENTINEL`.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub timestamp: Instant,
}

impl Quote {
    pub fn new(bid: f64, ask: f64, bid_qty: f64, ask_qty: f64) -> Self {
        Self {
            bid,
            ask,
            bid_qty,
            ask_qty,
            timestamp: Instant::now(),
        }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Seconds since this quote was written
    pub fn age(&self) -> f64 {
        self.timestamp.elapsed().as_secs_f64()
    }

    pub fn is_stale(&self, max_age: f64) -> bool {
        self.age() > max_age
    }
}

/// Synthetic store key for one DEX swap direction: first four characters of
/// each token address, joined by `_`. The reversed direction swaps the
/// prefixes, so both directions of one pool live under independent keys.
pub fn dex_symbol(from_token: &str, to_token: &str) -> String {
    let f = &from_token[..from_token.len().min(4)];
    let t = &to_token[..to_token.len().min(4)];
    format!("{}_{}", f, t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_derived_fields() {
        let q = Quote::new(99.0, 101.0, 2.0, 3.0);
        assert!((q.mid() - 100.0).abs() < 1e-12);
        assert!((q.spread() - 2.0).abs() < 1e-12);
        assert!(!q.is_stale(10.0));
        assert!(q.age() >= 0.0);
    }

    #[test]
    fn test_quote_staleness() {
        let mut q = Quote::new(1.0, 1.0, 0.0, 0.0);
        q.timestamp = Instant::now() - std::time::Duration::from_secs(5);
        assert!(q.is_stale(2.0));
        assert!(!q.is_stale(10.0));
    }

    #[test]
    fn test_dex_symbol_prefixes() {
        let ami = "0xb36527754eb54d7ff55daf13bcb54b42b88ec484bd6f0e3b2e0d1db169de6451";
        let usdt = "0x357b0b74bc833e95a115ad22604854d6b0fca151cecd94111770e5d6ffc9dc2b";
        assert_eq!(dex_symbol(ami, usdt), "0xb3_0x35");
        assert_eq!(dex_symbol(usdt, ami), "0x35_0xb3");
    }

    #[test]
    fn test_dex_symbol_short_address() {
        assert_eq!(dex_symbol("0xa", "0x1::aptos_coin::AptosCoin"), "0xa_0x1:");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(DexCexDirection::BuyDexSellCex.to_string(), "BUY_DEX_SELL_CEX");
        assert_eq!(TriDirection::AmiToApt.to_string(), "AMI_TO_APT");
    }
}
