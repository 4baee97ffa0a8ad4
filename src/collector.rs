//! Central price storage for multiple venues and symbols.
//!
//! Feeds write top-of-book quotes, the arbitrage engine reads them.
//! The map is keyed symbol-first so one symbol's venues can be fetched
//! in a single lookup.

use crate::types::{Quote, Venue};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, warn};

/// `symbol -> venue -> Quote`. Entries are overwritten, never deleted.
///
/// Concurrency: dashmap locks per symbol entry, so an `update` replaces a
/// `(venue, symbol)` slot atomically and readers never observe a torn quote.
#[derive(Debug, Default)]
pub struct PriceStore {
    prices: DashMap<String, HashMap<Venue, Quote>>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a quote. Rejects non-positive prices.
    pub fn update(
        &self,
        venue: Venue,
        symbol: &str,
        bid: f64,
        ask: f64,
        bid_qty: f64,
        ask_qty: f64,
    ) {
        if bid <= 0.0 || ask <= 0.0 {
            warn!(
                "Skip invalid quote from {} {}: bid={} ask={}",
                venue, symbol, bid, ask
            );
            return;
        }

        self.prices
            .entry(symbol.to_string())
            .or_default()
            .insert(venue, Quote::new(bid, ask, bid_qty, ask_qty));
        debug!(
            "{} {} bid={} ask={} bid_qty={} ask_qty={}",
            venue, symbol, bid, ask, bid_qty, ask_qty
        );
    }

    /// All venue quotes for a symbol (empty map if the symbol is unknown)
    pub fn get(&self, symbol: &str) -> HashMap<Venue, Quote> {
        self.prices
            .get(symbol)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Quote for a specific venue/symbol, if present
    pub fn get_one(&self, symbol: &str, venue: Venue) -> Option<Quote> {
        self.prices
            .get(symbol)
            .and_then(|e| e.value().get(&venue).copied())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.prices.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_then_get() {
        let store = PriceStore::new();
        store.update(Venue::Bybit, "AMIUSDT", 0.0079, 0.0080, 1000.0, 2000.0);

        let q = store.get_one("AMIUSDT", Venue::Bybit).unwrap();
        assert_eq!(q.bid, 0.0079);
        assert_eq!(q.ask, 0.0080);
        assert_eq!(q.bid_qty, 1000.0);
        assert_eq!(q.ask_qty, 2000.0);
    }

    #[test]
    fn test_invalid_quote_never_observable() {
        let store = PriceStore::new();
        store.update(Venue::Mexc, "AMIUSDT", 0.0, 0.0080, 1.0, 1.0);
        store.update(Venue::Mexc, "AMIUSDT", -1.0, 0.0080, 1.0, 1.0);
        store.update(Venue::Mexc, "AMIUSDT", 0.0079, 0.0, 1.0, 1.0);
        assert!(store.get_one("AMIUSDT", Venue::Mexc).is_none());
        assert!(store.get("AMIUSDT").is_empty());
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let store = PriceStore::new();
        store.update(Venue::Panora, "0xb3_0x35", 0.007, 0.007, 10_000.0, 10_000.0);
        store.update(Venue::Panora, "0xb3_0x35", 0.008, 0.008, 10_000.0, 10_000.0);

        let q = store.get_one("0xb3_0x35", Venue::Panora).unwrap();
        assert_eq!(q.bid, 0.008);
        assert_eq!(q.ask, 0.008);
    }

    #[test]
    fn test_venues_are_independent() {
        let store = PriceStore::new();
        store.update(Venue::Bybit, "APTUSDT", 4.50, 4.51, 10.0, 10.0);
        store.update(Venue::Mexc, "APTUSDT", 4.52, 4.53, 20.0, 20.0);

        let all = store.get("APTUSDT");
        assert_eq!(all.len(), 2);
        assert_eq!(all[&Venue::Bybit].ask, 4.51);
        assert_eq!(all[&Venue::Mexc].bid, 4.52);
    }

    #[test]
    fn test_symbols_listing() {
        let store = PriceStore::new();
        store.update(Venue::Bybit, "AMIUSDT", 1.0, 1.1, 1.0, 1.0);
        store.update(Venue::Bybit, "APTUSDT", 1.0, 1.1, 1.0, 1.0);
        let mut syms = store.symbols();
        syms.sort();
        assert_eq!(syms, vec!["AMIUSDT", "APTUSDT"]);
    }
}
