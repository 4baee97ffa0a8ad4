//! Panora DEX client with session reuse, quote caches and rate-limit
//! handling.
//!
//! The engine re-checks DEX prices every tick (10 Hz) while the poller only
//! samples every second or two; without the caches each verification would
//! cost an HTTP request and blow through the API's rate limit. Exact
//! repeats are served from the quote cache; different amounts in the same
//! direction are served as *synthetic* quotes from the unit-price cache.
//! Synthetic quotes carry no transaction payload, so the executor forces a
//! real quote at submit time.

use crate::config::Settings;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_RETRY_DELAY_S: f64 = 1.0;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A swap quote as returned by the API (or synthesized from the unit-price
/// cache). The raw value keeps the flexible response schema intact.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub raw: Value,
    pub synthetic: bool,
    pub fetched_at: Instant,
}

impl SwapQuote {
    fn real(raw: Value) -> Self {
        Self {
            raw,
            synthetic: false,
            fetched_at: Instant::now(),
        }
    }

    fn synthesized(to_amount: f64, unit_price: f64) -> Self {
        Self {
            raw: serde_json::json!({
                "toTokenAmount": to_amount.to_string(),
                "unitPrice": unit_price,
            }),
            synthetic: true,
            fetched_at: Instant::now(),
        }
    }

    pub fn age(&self) -> f64 {
        self.fetched_at.elapsed().as_secs_f64()
    }

    /// Output amount; the field lives top-level or under `quotes[0]`,
    /// as a string or a number.
    pub fn to_token_amount(&self) -> Option<f64> {
        probe_amount(&self.raw, "toTokenAmount")
    }

    pub fn from_token_amount(&self) -> Option<f64> {
        probe_amount(&self.raw, "fromTokenAmount")
    }
}

fn probe_amount(raw: &Value, field: &str) -> Option<f64> {
    for candidate in [&raw[field], &raw["quotes"][0][field]] {
        match candidate {
            Value::Number(n) => return n.as_f64(),
            Value::String(s) => return s.parse::<f64>().ok(),
            _ => {}
        }
    }
    None
}

/// Round to six significant figures so near-identical quantities share a
/// cache slot.
fn round6(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return 0.0;
    }
    let magnitude = x.abs().log10().floor();
    let factor = 10f64.powf(5.0 - magnitude);
    (x * factor).round() / factor
}

type QuoteKey = (String, String, u64);

/// Unified Panora DEX HTTP front-end. One instance per monitored direction;
/// the poller and the engine verification path share it.
pub struct PanoraClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_token: String,
    to_token: String,
    to_wallet: Mutex<Option<String>>,

    max_retries: u32,
    base_retry_delay: f64,
    cache_ttl: f64,
    min_call_interval: f64,

    // key: (from, to, round6(amount) bits) → (raw response, fetched_at)
    quote_cache: Mutex<HashMap<QuoteKey, (Value, Instant)>>,
    // key: (from, to) → (to_amount / from_amount, fetched_at)
    unit_price_cache: Mutex<HashMap<(String, String), (f64, Instant)>>,
    // serializes real HTTP calls so consecutive requests stay spaced out
    last_call: tokio::sync::Mutex<Option<Instant>>,

    rate_limited: AtomicBool,
    total_requests: AtomicU64,
    total_rate_limits: AtomicU64,
    cache_hits: AtomicU64,
}

impl PanoraClient {
    pub fn new(settings: &Settings, from_token: &str, to_token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            api_url: settings.panora_api_url.clone(),
            api_key: settings.panora_api_key.clone(),
            from_token: from_token.to_string(),
            to_token: to_token.to_string(),
            to_wallet: Mutex::new(
                (!settings.aptos_wallet_address.is_empty())
                    .then(|| settings.aptos_wallet_address.clone()),
            ),
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY_S,
            cache_ttl: settings.panora_poll_interval,
            min_call_interval: settings.panora_api_min_interval,
            quote_cache: Mutex::new(HashMap::new()),
            unit_price_cache: Mutex::new(HashMap::new()),
            last_call: tokio::sync::Mutex::new(None),
            rate_limited: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            total_rate_limits: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Default (from, to) direction this client monitors
    pub fn direction(&self) -> (&str, &str) {
        (&self.from_token, &self.to_token)
    }

    /// Register the wallet so quotes come back with executable payloads
    /// addressed to it.
    pub fn set_to_wallet(&self, wallet: &str) {
        *self.to_wallet.lock().unwrap_or_else(|e| e.into_inner()) = Some(wallet.to_string());
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::Relaxed)
    }

    fn cache_key(from: &str, to: &str, amount: f64) -> QuoteKey {
        (from.to_string(), to.to_string(), round6(amount).to_bits())
    }

    fn get_cached_quote(&self, from: &str, to: &str, amount: f64) -> Option<(Value, Instant)> {
        let cache = self.quote_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(&Self::cache_key(from, to, amount))
            .filter(|(_, at)| at.elapsed().as_secs_f64() < self.cache_ttl)
            .cloned()
    }

    fn store_cached_quote(&self, from: &str, to: &str, amount: f64, quote: &Value) {
        let mut cache = self.quote_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            Self::cache_key(from, to, amount),
            (quote.clone(), Instant::now()),
        );
        // Evict entries past 2x TTL to bound growth
        let horizon = self.cache_ttl * 2.0;
        cache.retain(|_, (_, at)| at.elapsed().as_secs_f64() < horizon);
    }

    /// Cached price-per-unit, only while still fresh
    pub fn get_unit_price(&self, from: &str, to: &str) -> Option<f64> {
        let cache = self
            .unit_price_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        cache
            .get(&(from.to_string(), to.to_string()))
            .filter(|(_, at)| at.elapsed().as_secs_f64() < self.cache_ttl)
            .map(|(price, _)| *price)
    }

    fn store_unit_price(&self, from: &str, to: &str, from_amount: f64, to_amount: f64) {
        if from_amount > 0.0 && to_amount > 0.0 {
            let mut cache = self
                .unit_price_cache
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            cache.insert(
                (from.to_string(), to.to_string()),
                (to_amount / from_amount, Instant::now()),
            );
        }
    }

    /// Get a swap quote, serving from cache when possible.
    ///
    /// `force_fresh` bypasses all caches; the executor uses it because it needs
    /// a real response with transaction data rather than a synthetic quote.
    pub async fn get_swap_quote(
        &self,
        from_amount: f64,
        from_token: Option<&str>,
        to_token: Option<&str>,
        force_fresh: bool,
        slippage_pct: Option<f64>,
    ) -> Option<SwapQuote> {
        let from = from_token.unwrap_or(&self.from_token).to_string();
        let to = to_token.unwrap_or(&self.to_token).to_string();

        if !force_fresh {
            if let Some((cached, fetched_at)) = self.get_cached_quote(&from, &to, from_amount) {
                let hits = self.cache_hits.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Panora quote cache hit | from={} to={} amount={} (hits={})",
                    prefix(&from),
                    prefix(&to),
                    from_amount,
                    hits
                );
                return Some(SwapQuote {
                    raw: cached,
                    synthetic: false,
                    fetched_at,
                });
            }

            if let Some(unit_price) = self.get_unit_price(&from, &to) {
                let synthetic_amount = unit_price * from_amount;
                let hits = self.cache_hits.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Panora unit-price cache hit | unit_price={:.8} x {} = {:.6} (hits={})",
                    unit_price, from_amount, synthetic_amount, hits
                );
                return Some(SwapQuote::synthesized(synthetic_amount, unit_price));
            }
        }

        self.fetch_quote(&from, &to, from_amount, slippage_pct).await
    }

    async fn fetch_quote(
        &self,
        from: &str,
        to: &str,
        from_amount: f64,
        slippage_pct: Option<f64>,
    ) -> Option<SwapQuote> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut params: Vec<(&str, String)> = vec![
            ("fromTokenAddress", from.to_string()),
            ("toTokenAddress", to.to_string()),
            ("fromTokenAmount", from_amount.to_string()),
        ];
        if let Some(wallet) = self
            .to_wallet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            params.push(("toWalletAddress", wallet));
        }
        if let Some(slip) = slippage_pct {
            params.push(("slippagePercentage", slip.to_string()));
        }

        for attempt in 0..self.max_retries {
            self.throttle().await;

            let mut req = self.http.post(&self.api_url).query(&params);
            if !self.api_key.is_empty() {
                req = req.header("x-api-key", &self.api_key);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    error!(
                        "Panora API timeout - attempt {}/{}",
                        attempt + 1,
                        self.max_retries
                    );
                    if attempt + 1 < self.max_retries {
                        sleep(Duration::from_secs_f64(
                            self.base_retry_delay * 2f64.powi(attempt as i32),
                        ))
                        .await;
                        continue;
                    }
                    return None;
                }
                Err(e) => {
                    error!("Panora API network error: {}", e);
                    return None;
                }
            };

            let status = resp.status().as_u16();
            if status == 200 {
                if self.rate_limited.swap(false, Ordering::Relaxed) {
                    info!("Panora API recovered from rate limiting");
                }
                let quote: Value = match resp.json().await {
                    Ok(v) => v,
                    Err(e) => {
                        error!("Panora API invalid JSON: {}", e);
                        return None;
                    }
                };
                self.store_cached_quote(from, to, from_amount, &quote);
                let swap = SwapQuote::real(quote);
                if let Some(to_amount) = swap.to_token_amount() {
                    self.store_unit_price(from, to, from_amount, to_amount);
                }
                return Some(swap);
            }

            if status == 429 || status == 503 {
                self.total_rate_limits.fetch_add(1, Ordering::Relaxed);
                self.rate_limited.store(true, Ordering::Relaxed);

                let retry_after = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok());
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    "🚫 PANORA RATE LIMITED | HTTP {} | attempt {}/{} | total_limits={}/{} reqs | Retry-After={} | body={}",
                    status,
                    attempt + 1,
                    self.max_retries,
                    self.total_rate_limits.load(Ordering::Relaxed),
                    self.total_requests.load(Ordering::Relaxed),
                    retry_after.map(|v| v.to_string()).unwrap_or_else(|| "N/A".into()),
                    body.chars().take(100).collect::<String>()
                );

                if attempt + 1 < self.max_retries {
                    let wait = retry_after
                        .unwrap_or_else(|| self.base_retry_delay * 2f64.powi(attempt as i32));
                    info!("⏳ Panora backoff: waiting {:.1}s before retry...", wait);
                    sleep(Duration::from_secs_f64(wait)).await;
                    continue;
                }
                error!(
                    "❌ Panora rate limited after {} attempts. Consider increasing PANORA_POLL_INTERVAL",
                    self.max_retries
                );
                return None;
            }

            let body = resp.text().await.unwrap_or_default();
            error!(
                "Panora API HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
            return None;
        }

        None
    }

    // Minimum spacing between real API calls; callers queue on the lock so
    // the interval holds across concurrent tasks.
    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed().as_secs_f64();
            if elapsed < self.min_call_interval {
                sleep(Duration::from_secs_f64(self.min_call_interval - elapsed)).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// DEX price for the client's default direction: quote `amount` in,
    /// price = out / amount. A DEX has no order book, so bid == ask.
    pub async fn get_price(&self, amount: f64) -> Option<f64> {
        let quote = self.get_swap_quote(amount, None, None, false, None).await?;
        let out = quote.to_token_amount().filter(|v| *v > 0.0)?;
        Some(out / amount)
    }

    // Warm the unit-price cache without an HTTP round-trip
    #[cfg(test)]
    pub(crate) fn seed_unit_price(&self, from: &str, to: &str, unit_price: f64) {
        self.store_unit_price(from, to, 1.0, unit_price);
    }

    /// Human-readable counters for operational heartbeats
    pub fn rate_limit_stats(&self) -> String {
        let total = self.total_requests.load(Ordering::Relaxed);
        let limits = self.total_rate_limits.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let pct = if total > 0 {
            limits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let total_with_hits = total + hits;
        let saved_pct = if total_with_hits > 0 {
            hits as f64 / total_with_hits as f64 * 100.0
        } else {
            0.0
        };
        format!(
            "requests={} cache_hits={} (saved {:.0}%) rate_limits={} ({:.1}%) currently_limited={}",
            total,
            hits,
            saved_pct,
            limits,
            pct,
            self.is_rate_limited()
        )
    }
}

fn prefix(addr: &str) -> &str {
    &addr[..addr.len().min(16)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        let mut s = Settings::from_env().unwrap();
        s.panora_poll_interval = 1.33;
        s.panora_api_min_interval = 0.0;
        s
    }

    #[test]
    fn test_round6_significant_figures() {
        assert_eq!(round6(1.2345678), 1.23457);
        assert_eq!(round6(123456.789), 123457.0);
        assert_eq!(round6(0.000123456789), 0.000123457);
        assert_eq!(round6(0.0), 0.0);
        // Near-identical quantities share a slot
        assert_eq!(round6(10.0000001), round6(10.0000002));
    }

    #[test]
    fn test_probe_amount_both_shapes() {
        let top = SwapQuote::real(serde_json::json!({"toTokenAmount": "12.5"}));
        assert_eq!(top.to_token_amount(), Some(12.5));

        let nested = SwapQuote::real(serde_json::json!({
            "quotes": [{"toTokenAmount": 3.25, "fromTokenAmount": "1"}]
        }));
        assert_eq!(nested.to_token_amount(), Some(3.25));
        assert_eq!(nested.from_token_amount(), Some(1.0));

        let malformed = SwapQuote::real(serde_json::json!({"quotes": []}));
        assert_eq!(malformed.to_token_amount(), None);
    }

    #[tokio::test]
    async fn test_synthetic_quote_is_exact_product() {
        let settings = test_settings();
        let client = PanoraClient::new(&settings, "0xami", "0xusdt");

        client.store_unit_price("0xami", "0xusdt", 1.0, 0.00705);
        let quote = client
            .get_swap_quote(1234.0, Some("0xami"), Some("0xusdt"), false, None)
            .await
            .unwrap();

        assert!(quote.synthetic);
        assert_eq!(quote.to_token_amount(), Some(0.00705 * 1234.0));
        assert_eq!(client.cache_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_exact_cache_hit_preferred_over_unit_price() {
        let settings = test_settings();
        let client = PanoraClient::new(&settings, "0xami", "0xusdt");

        let raw = serde_json::json!({"toTokenAmount": "7.0", "quotes": [{"txData": {}}]});
        client.store_cached_quote("0xami", "0xusdt", 1000.0, &raw);
        client.store_unit_price("0xami", "0xusdt", 1.0, 0.0070);

        let quote = client
            .get_swap_quote(1000.0, Some("0xami"), Some("0xusdt"), false, None)
            .await
            .unwrap();
        assert!(!quote.synthetic);
        assert_eq!(quote.to_token_amount(), Some(7.0));
    }

    #[test]
    fn test_stale_unit_price_never_used() {
        let mut settings = test_settings();
        settings.panora_poll_interval = 0.0; // zero TTL: everything is stale
        let client = PanoraClient::new(&settings, "0xami", "0xusdt");

        client.store_unit_price("0xami", "0xusdt", 1.0, 0.0070);
        assert_eq!(client.get_unit_price("0xami", "0xusdt"), None);
    }

    #[test]
    fn test_unit_price_directions_independent() {
        let settings = test_settings();
        let client = PanoraClient::new(&settings, "0xami", "0xusdt");

        client.store_unit_price("0xami", "0xusdt", 1.0, 0.0070);
        assert!(client.get_unit_price("0xusdt", "0xami").is_none());
        assert_eq!(client.get_unit_price("0xami", "0xusdt"), Some(0.0070));
    }

    #[test]
    fn test_rate_limit_stats_format() {
        let settings = test_settings();
        let client = PanoraClient::new(&settings, "0xami", "0xusdt");
        let stats = client.rate_limit_stats();
        assert!(stats.contains("requests=0"));
        assert!(stats.contains("currently_limited=false"));
    }
}
