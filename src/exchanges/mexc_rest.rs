//! MEXC polled order-book feed.
//!
//! Fixed-cadence loop: every tick, the bookTicker endpoint is fetched for
//! all configured symbols concurrently. Per-symbol failures are logged and
//! isolated; they never affect sibling symbols or the next tick.

use crate::collector::PriceStore;
use crate::config::Settings;
use crate::types::Venue;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
    bid_qty: Option<String>,
    ask_qty: Option<String>,
}

pub struct MexcFeed {
    store: Arc<PriceStore>,
    http: reqwest::Client,
    rest_url: String,
    symbols: Vec<String>,
    poll_interval: f64,
}

impl MexcFeed {
    pub fn new(store: Arc<PriceStore>, settings: &Settings, symbols: Vec<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            store,
            http,
            rest_url: settings.mexc_rest_url.clone(),
            symbols,
            poll_interval: settings.mexc_poll_interval,
        }
    }

    pub async fn run(self) {
        info!(
            "MEXC poller started | symbols={:?} | poll_interval={}s",
            self.symbols, self.poll_interval
        );
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.poll_interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            join_all(self.symbols.iter().map(|s| self.poll_symbol(s))).await;
        }
    }

    async fn poll_symbol(&self, symbol: &str) {
        let resp = match self
            .http
            .get(&self.rest_url)
            .query(&[("symbol", symbol)])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("MEXC REST network error [{}]: {}", symbol, e);
                return;
            }
        };

        if !resp.status().is_success() {
            warn!("MEXC HTTP {} for {}", resp.status().as_u16(), symbol);
            return;
        }

        let ticker: BookTicker = match resp.json().await {
            Ok(t) => t,
            Err(e) => {
                error!("MEXC REST parse error [{}]: {}", symbol, e);
                return;
            }
        };

        let bid = ticker.bid_price.parse::<f64>();
        let ask = ticker.ask_price.parse::<f64>();
        let (Ok(bid), Ok(ask)) = (bid, ask) else {
            error!(
                "MEXC REST invalid prices [{}]: bid={:?} ask={:?}",
                symbol, ticker.bid_price, ticker.ask_price
            );
            return;
        };
        let bid_qty = parse_qty(ticker.bid_qty.as_deref());
        let ask_qty = parse_qty(ticker.ask_qty.as_deref());

        self.store.update(
            Venue::Mexc,
            symbol,
            round8(bid),
            round8(ask),
            bid_qty,
            ask_qty,
        );
    }
}

fn parse_qty(raw: Option<&str>) -> f64 {
    raw.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}
