//! MEXC spot order executor (REST API v3).
//!
//! Requests are signed with HMAC-SHA256 over the url-encoded parameter
//! string; the signature is appended as a `signature` parameter and the API
//! key travels in the `X-MEXC-APIKEY` header.

use crate::config::Settings;
use crate::types::Side;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://api.mexc.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MexcTrader {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
}

impl MexcTrader {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: settings.mexc_api_key.clone(),
            api_secret: settings.mexc_api_secret.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Place a spot market order. Returns the order id, or None on failure.
    ///
    /// `is_quote_qty` selects `quoteOrderQty` (buy denominated in USDT)
    /// over `quantity` (base coin).
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        is_quote_qty: bool,
    ) -> Option<String> {
        if !self.is_configured() {
            error!("MexcTrader: API key/secret not configured");
            return None;
        }

        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let qty_key = if is_quote_qty { "quoteOrderQty" } else { "quantity" };
        let params: Vec<(&str, String)> = vec![
            ("symbol", symbol.to_string()),
            ("side", side_str.to_string()),
            ("type", "MARKET".to_string()),
            ("timestamp", timestamp),
            (qty_key, qty.to_string()),
        ];
        let signed = self.signed_params(params);

        let data: Value = match self
            .http
            .post(format!("{}/api/v3/order", BASE_URL))
            .header("X-MEXC-APIKEY", &self.api_key)
            .query(&signed)
            .send()
            .await
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("❌ MEXC order response parse error: {}", e);
                    return None;
                }
            },
            Err(e) => {
                error!("❌ MEXC order request error: {}", e);
                return None;
            }
        };

        match &data["orderId"] {
            Value::Null => {
                error!(
                    "❌ MEXC order failed | code={} msg={} | symbol={} side={} qty={}",
                    data["code"], data["msg"], symbol, side_str, qty
                );
                None
            }
            id => {
                let order_id = match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                info!(
                    "✅ MEXC order placed | {} {} {} | orderId={}",
                    side_str, qty, symbol, order_id
                );
                Some(order_id)
            }
        }
    }

    /// Spot account balances as `coin -> free qty`. When `coins` is
    /// non-empty, only those coins are returned (missing ones as 0.0).
    /// Returns an empty map on error.
    pub async fn get_balance(&self, coins: &[&str]) -> HashMap<String, f64> {
        if !self.is_configured() {
            error!("MexcTrader.get_balance: API key/secret not configured");
            return HashMap::new();
        }

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signed = self.signed_params(vec![("timestamp", timestamp)]);

        let data: Value = match self
            .http
            .get(format!("{}/api/v3/account", BASE_URL))
            .header("X-MEXC-APIKEY", &self.api_key)
            .query(&signed)
            .send()
            .await
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    error!("MexcTrader.get_balance parse error: {}", e);
                    return HashMap::new();
                }
            },
            Err(e) => {
                error!("MexcTrader.get_balance request error: {}", e);
                return HashMap::new();
            }
        };

        if data["code"].as_i64().is_some_and(|c| c != 200) {
            error!(
                "MexcTrader.get_balance error: code={} msg={}",
                data["code"], data["msg"]
            );
            return HashMap::new();
        }

        let mut result = HashMap::new();
        if let Some(balances) = data["balances"].as_array() {
            for bal in balances {
                let asset = bal["asset"].as_str().unwrap_or("").to_string();
                let free = match &bal["free"] {
                    Value::String(s) => s.parse::<f64>().unwrap_or(0.0),
                    Value::Number(n) => n.as_f64().unwrap_or(0.0),
                    _ => 0.0,
                };
                if free > 0.0 || coins.contains(&asset.as_str()) {
                    result.insert(asset, free);
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

    // Sign the url-encoded parameter string and append the signature.
    fn signed_params(&self, params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let query_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let mut signed = params;
        signed.push(("signature", self.sign(&query_string)));
        signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader_with_creds() -> MexcTrader {
        let mut settings = Settings::from_env().unwrap();
        settings.mexc_api_key = "test-key".to_string();
        settings.mexc_api_secret = "test-secret".to_string();
        MexcTrader::new(&settings)
    }

    #[test]
    fn test_signed_params_appends_signature_last() {
        let trader = trader_with_creds();
        let signed = trader.signed_params(vec![
            ("symbol", "AMIUSDT".to_string()),
            ("side", "SELL".to_string()),
            ("type", "MARKET".to_string()),
            ("timestamp", "1700000000000".to_string()),
            ("quantity", "1222".to_string()),
        ]);
        assert_eq!(signed.len(), 6);
        assert_eq!(signed.last().unwrap().0, "signature");
        assert_eq!(signed.last().unwrap().1.len(), 64);
    }

    #[test]
    fn test_signature_depends_on_param_order() {
        let trader = trader_with_creds();
        let a = trader.sign("symbol=AMIUSDT&side=SELL");
        let b = trader.sign("side=SELL&symbol=AMIUSDT");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_configured() {
        let mut settings = Settings::from_env().unwrap();
        settings.mexc_api_key = String::new();
        settings.mexc_api_secret = String::new();
        assert!(!MexcTrader::new(&settings).is_configured());
        assert!(trader_with_creds().is_configured());
    }
}
