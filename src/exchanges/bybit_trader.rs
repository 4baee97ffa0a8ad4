//! Bybit spot order executor (REST API V5).
//!
//! Requests are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + body` (POST bodies) or the query
//! string (GET requests), sent in the `X-BAPI-*` header set.

use crate::config::Settings;
use crate::types::Side;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW: &str = "5000";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BybitTrader {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
}

impl BybitTrader {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: settings.bybit_api_key.clone(),
            api_secret: settings.bybit_api_secret.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let message = format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, payload);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, timestamp: &str, signature: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-BAPI-API-KEY", self.api_key.clone()),
            ("X-BAPI-SIGN", signature.to_string()),
            ("X-BAPI-SIGN-TYPE", "2".to_string()),
            ("X-BAPI-TIMESTAMP", timestamp.to_string()),
            ("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string()),
        ]
    }

    /// Place a spot market order. Returns the order id, or None on failure.
    ///
    /// `market_unit` selects how `qty` is denominated:
    /// buy with USDT → `quoteCoinQty`, sell base coin → `baseCoinQty`.
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        market_unit: &str,
    ) -> Option<String> {
        if !self.is_configured() {
            error!("BybitTrader: API key/secret not configured");
            return None;
        }

        let side_str = match side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };
        // The signature covers the exact body string, so it is built by hand
        // rather than through a map with unstable key order.
        let body = format!(
            r#"{{"category":"spot","symbol":"{}","side":"{}","orderType":"Market","qty":"{}","marketUnit":"{}"}}"#,
            symbol, side_str, qty, market_unit
        );
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &body);

        let mut req = self
            .http
            .post(format!("{}/v5/order/create", BASE_URL))
            .header("Content-Type", "application/json")
            .body(body.clone());
        for (k, v) in self.auth_headers(&timestamp, &signature) {
            req = req.header(k, v);
        }

        let data: Value = match req.send().await {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("❌ Bybit order response parse error: {}", e);
                    return None;
                }
            },
            Err(e) => {
                error!("❌ Bybit order request error: {}", e);
                return None;
            }
        };

        if data["retCode"].as_i64() == Some(0) {
            let order_id = data["result"]["orderId"].as_str().unwrap_or("?").to_string();
            info!(
                "✅ Bybit order placed | {} {} {} | orderId={}",
                side_str, qty, symbol, order_id
            );
            Some(order_id)
        } else {
            error!(
                "❌ Bybit order failed | retCode={} retMsg={} | body={}",
                data["retCode"], data["retMsg"], body
            );
            None
        }
    }

    /// Spot wallet balances as `coin -> free qty`. When `coins` is
    /// non-empty, only those coins are returned (missing ones as 0.0).
    /// Returns an empty map on error.
    pub async fn get_balance(&self, coins: &[&str]) -> HashMap<String, f64> {
        if !self.is_configured() {
            error!("BybitTrader.get_balance: API key/secret not configured");
            return HashMap::new();
        }

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let query = "accountType=UNIFIED";
        let signature = self.sign(&timestamp, query);

        let mut req = self
            .http
            .get(format!("{}/v5/account/wallet-balance?{}", BASE_URL, query));
        for (k, v) in self.auth_headers(&timestamp, &signature) {
            req = req.header(k, v);
        }

        let data: Value = match req.send().await {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("BybitTrader.get_balance parse error: {}", e);
                    return HashMap::new();
                }
            },
            Err(e) => {
                error!("BybitTrader.get_balance request error: {}", e);
                return HashMap::new();
            }
        };

        if data["retCode"].as_i64() != Some(0) {
            error!(
                "BybitTrader.get_balance error: retCode={} retMsg={}",
                data["retCode"], data["retMsg"]
            );
            return HashMap::new();
        }

        let mut result = HashMap::new();
        if let Some(accounts) = data["result"]["list"].as_array() {
            for account in accounts {
                if let Some(coin_list) = account["coin"].as_array() {
                    for coin_data in coin_list {
                        let coin = coin_data["coin"].as_str().unwrap_or("").to_string();
                        let free = ["availableToWithdraw", "free"]
                            .iter()
                            .find_map(|k| parse_numeric(&coin_data[*k]))
                            .unwrap_or(0.0);
                        result.insert(coin, free);
                    }
                }
            }
        }

        if coins.is_empty() {
            result
        } else {
            coins
                .iter()
                .map(|c| (c.to_string(), result.get(*c).copied().unwrap_or(0.0)))
                .collect()
        }
    }
}

// Bybit reports numbers as strings; tolerate both.
fn parse_numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader_with_creds() -> BybitTrader {
        let mut settings = Settings::from_env().unwrap();
        settings.bybit_api_key = "test-key".to_string();
        settings.bybit_api_secret = "test-secret".to_string();
        BybitTrader::new(&settings)
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let trader = trader_with_creds();
        let a = trader.sign("1700000000000", r#"{"category":"spot"}"#);
        let b = trader.sign("1700000000000", r#"{"category":"spot"}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        // Different payloads must produce different signatures
        assert_ne!(a, trader.sign("1700000000000", "accountType=UNIFIED"));
    }

    #[test]
    fn test_is_configured() {
        let mut settings = Settings::from_env().unwrap();
        settings.bybit_api_key = String::new();
        settings.bybit_api_secret = String::new();
        assert!(!BybitTrader::new(&settings).is_configured());
        assert!(trader_with_creds().is_configured());
    }

    #[test]
    fn test_parse_numeric_variants() {
        assert_eq!(parse_numeric(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(parse_numeric(&serde_json::json!(2)), Some(2.0));
        assert_eq!(parse_numeric(&serde_json::json!("")), None);
        assert_eq!(parse_numeric(&Value::Null), None);
    }
}
