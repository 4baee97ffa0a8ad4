//! Configuration management
//! Load settings from environment / .env file once at startup.

use anyhow::{Context, Result};
use std::str::FromStr;

/// Process-wide frozen configuration.
///
/// Built once in `main` and passed to constructors by `Arc`; no component
/// reads the environment after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    // Panora DEX
    pub panora_api_key: String,
    pub panora_api_url: String,

    // Token addresses
    pub ami_token_address: String,
    pub usdt_token_address: String,
    pub apt_token_address: String,

    // CEX settings
    pub cex_symbol: String,
    pub apt_cex_symbol: String,
    pub bybit_ws_url: String,
    pub mexc_rest_url: String,

    // Fees (proportional rates, e.g. 0.001 = 0.1%)
    pub bybit_fee: f64,
    pub mexc_fee: f64,
    pub panora_fee: f64,

    // Slippage tolerance (percent; converted to a rate where used)
    pub slippage_tolerance_pct: f64,
    pub panora_api_slippage_pct: f64,

    // Loop cadences (seconds)
    pub panora_poll_interval: f64,
    pub mexc_poll_interval: f64,
    pub arb_check_interval: f64,
    pub panora_api_min_interval: f64,

    // Minimum USDT profit to surface an opportunity
    pub min_profit_threshold: f64,

    // Trade execution
    pub dry_run: bool,
    pub trade_amount_usdt: f64,
    pub skip_panora_verify: bool,

    // Quote freshness thresholds (seconds)
    pub exec_quote_max_age_s: f64,
    pub dex_cex_quote_max_age_s: f64,
    pub tri_quote_max_age_s: f64,
    pub quote_price_deviation_threshold_pct: f64,

    // Bybit API credentials
    pub bybit_api_key: String,
    pub bybit_api_secret: String,

    // MEXC API credentials
    pub mexc_api_key: String,
    pub mexc_api_secret: String,

    // Aptos / Panora wallet
    pub aptos_private_key: String,
    pub aptos_wallet_address: String,
    pub aptos_node_url: String,
    pub aptos_max_gas: u64,
}

impl Settings {
    /// Load settings from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            panora_api_key: env_or("PANORA_API_KEY", ""),
            panora_api_url: env_or("PANORA_API_URL", "https://api.panora.exchange/swap"),

            ami_token_address: env_or(
                "AMI_TOKEN_ADDRESS",
                "0xb36527754eb54d7ff55daf13bcb54b42b88ec484bd6f0e3b2e0d1db169de6451",
            ),
            usdt_token_address: env_or(
                "USDT_TOKEN_ADDRESS",
                "0x357b0b74bc833e95a115ad22604854d6b0fca151cecd94111770e5d6ffc9dc2b",
            ),
            apt_token_address: env_or("APT_TOKEN_ADDRESS", "0x1::aptos_coin::AptosCoin"),

            cex_symbol: env_or("CEX_SYMBOL", "AMIUSDT"),
            apt_cex_symbol: env_or("APT_CEX_SYMBOL", "APTUSDT"),
            bybit_ws_url: env_or("BYBIT_WS_URL", "wss://stream.bybit.com/v5/public/spot"),
            mexc_rest_url: env_or(
                "MEXC_REST_URL",
                "https://api.mexc.com/api/v3/ticker/bookTicker",
            ),

            bybit_fee: env_parse("BYBIT_FEE", 0.001)?,
            mexc_fee: env_parse("MEXC_FEE", 0.001)?,
            panora_fee: env_parse("PANORA_FEE", 0.001)?,

            slippage_tolerance_pct: env_parse("SLIPPAGE_TOLERANCE_PCT", 0.1)?,
            panora_api_slippage_pct: env_parse("PANORA_API_SLIPPAGE_PCT", 0.1)?,

            panora_poll_interval: env_parse("PANORA_POLL_INTERVAL", 1.33)?,
            mexc_poll_interval: env_parse("MEXC_POLL_INTERVAL", 0.4)?,
            arb_check_interval: env_parse("ARB_CHECK_INTERVAL", 0.1)?,
            panora_api_min_interval: env_parse("PANORA_API_MIN_INTERVAL", 0.91)?,

            min_profit_threshold: env_parse("MIN_PROFIT_THRESHOLD", 1.0)?,

            // DRY_RUN defaults to true; only an explicit "false" enables live trading
            dry_run: env_or("DRY_RUN", "true").to_lowercase() != "false",
            trade_amount_usdt: env_parse("TRADE_AMOUNT_USDT", 10.0)?,
            skip_panora_verify: env_or("SKIP_PANORA_VERIFY", "false").to_lowercase() == "true",

            exec_quote_max_age_s: env_parse("EXEC_QUOTE_MAX_AGE_S", 2.0)?,
            dex_cex_quote_max_age_s: env_parse("DEX_CEX_QUOTE_MAX_AGE_S", 1.5)?,
            tri_quote_max_age_s: env_parse("TRI_QUOTE_MAX_AGE_S", 2.5)?,
            quote_price_deviation_threshold_pct: env_parse(
                "QUOTE_PRICE_DEVIATION_THRESHOLD_PCT",
                0.5,
            )?,

            bybit_api_key: env_or("BYBIT_API_KEY", ""),
            bybit_api_secret: env_or("BYBIT_API_SECRET", ""),

            mexc_api_key: env_or("MEXC_API_KEY", ""),
            mexc_api_secret: env_or("MEXC_API_SECRET", ""),

            aptos_private_key: env_or("APTOS_PRIVATE_KEY", ""),
            aptos_wallet_address: env_or("APTOS_WALLET_ADDRESS", ""),
            aptos_node_url: env_or(
                "APTOS_NODE_URL",
                "https://fullnode.mainnet.aptoslabs.com/v1",
            ),
            aptos_max_gas: env_parse("APTOS_MAX_GAS", 200_000)?,
        })
    }

    /// Fee rate for a CEX venue
    pub fn cex_fee(&self, venue: crate::types::Venue) -> f64 {
        match venue {
            crate::types::Venue::Bybit => self.bybit_fee,
            crate::types::Venue::Mexc => self.mexc_fee,
            crate::types::Venue::Panora => self.panora_fee,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // No env vars set in the test environment for these keys
        let s = Settings::from_env().unwrap();
        assert_eq!(s.cex_symbol, "AMIUSDT");
        assert_eq!(s.apt_cex_symbol, "APTUSDT");
        assert!(s.dry_run);
        assert!((s.bybit_fee - 0.001).abs() < 1e-12);
        assert!((s.arb_check_interval - 0.1).abs() < 1e-12);
        assert_eq!(s.aptos_max_gas, 200_000);
    }

    #[test]
    fn test_env_parse_invalid_is_error() {
        std::env::set_var("AMI_ARB_TEST_F64", "not-a-number");
        let r: Result<f64> = env_parse("AMI_ARB_TEST_F64", 1.0);
        assert!(r.is_err());
        std::env::remove_var("AMI_ARB_TEST_F64");
    }
}
