//! Panora DEX price poller.
//!
//! Periodically fetches a unit swap quote for one direction and writes the
//! derived price into the store as a pseudo order book (bid == ask, depth
//! sentinel quantities). With inverse derivation enabled, one poll also
//! covers the reverse direction of the same AMM pool at `1/price`.

use crate::collector::PriceStore;
use crate::config::Settings;
use crate::exchanges::panora::PanoraClient;
use crate::types::{dex_symbol, Venue, DEX_DEPTH_SENTINEL};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// One heartbeat line per this many successful polls
const HEARTBEAT_EVERY: u64 = 50;

pub struct PanoraPoller {
    store: Arc<PriceStore>,
    client: Arc<PanoraClient>,
    from_amount: f64,
    symbol: String,
    inverse_symbol: Option<String>,
    poll_interval: f64,
}

impl PanoraPoller {
    pub fn new(
        store: Arc<PriceStore>,
        settings: &Settings,
        from_token: &str,
        to_token: &str,
        also_update_inverse: bool,
    ) -> Self {
        let client = Arc::new(PanoraClient::new(settings, from_token, to_token));
        Self {
            store,
            client,
            from_amount: 1.0,
            symbol: dex_symbol(from_token, to_token),
            inverse_symbol: also_update_inverse.then(|| dex_symbol(to_token, from_token)),
            poll_interval: settings.panora_poll_interval,
        }
    }

    /// The underlying client, shared with the engine's verification path.
    pub fn client(&self) -> Arc<PanoraClient> {
        Arc::clone(&self.client)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub async fn run(self) {
        info!(
            "Panora poller started | symbol={} | poll_interval={}s | from_amount={}{}",
            self.symbol,
            self.poll_interval,
            self.from_amount,
            if self.inverse_symbol.is_some() {
                " | inverse=on"
            } else {
                ""
            }
        );

        let mut successes: u64 = 0;
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.poll_interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.client.get_price(self.from_amount).await {
                Some(price) => {
                    self.store.update(
                        Venue::Panora,
                        &self.symbol,
                        price,
                        price,
                        DEX_DEPTH_SENTINEL,
                        DEX_DEPTH_SENTINEL,
                    );
                    if let Some(inverse) = &self.inverse_symbol {
                        if price > 0.0 {
                            let inv = 1.0 / price;
                            self.store.update(
                                Venue::Panora,
                                inverse,
                                inv,
                                inv,
                                DEX_DEPTH_SENTINEL,
                                DEX_DEPTH_SENTINEL,
                            );
                        }
                    }

                    successes += 1;
                    if successes % HEARTBEAT_EVERY == 0 {
                        info!(
                            "Panora poller {} | polls={} | {}",
                            self.symbol,
                            successes,
                            self.client.rate_limit_stats()
                        );
                    }
                }
                None => {
                    if self.client.is_rate_limited() {
                        warn!(
                            "Panora price fetch skipped (rate limited) | {}",
                            self.client.rate_limit_stats()
                        );
                    } else {
                        error!("Panora price fetch failed | symbol={}", self.symbol);
                    }
                }
            }
        }
    }
}
