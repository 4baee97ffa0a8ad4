//! Execute Panora DEX swaps by signing and submitting Aptos BCS
//! transactions.
//!
//! Flow:
//!   1. Reuse the verified quote when it still carries transaction data,
//!      otherwise fetch a fresh one (bypassing every cache).
//!   2. Extract the entry-function payload from the response.
//!   3. BCS-encode the router arguments against the fixed 20-slot schema.
//!   4. Pre-flight: read the wallet's APT balance and cap max_gas_amount so
//!      small wallets don't hit INSUFFICIENT_BALANCE_FOR_FEE.
//!   5. Sign, submit, wait for confirmation.

use crate::aptos::client::Error as AptosError;
use crate::aptos::{bcs, AptosClient, EntryFunction, LocalAccount, RawTransaction, TypeTag};
use crate::config::Settings;
use crate::exchanges::panora::{PanoraClient, SwapQuote};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// Panora router_entry parameter types (20 args, excluding the implicit
// &signer). Must match the on-chain function exactly; if the router's
// signature changes, this table (and only this table) changes.
const ROUTER_PARAM_TYPES: [&str; 20] = [
    "0x1::option::Option<signer>",                                    // [0]  integrator signer (always none)
    "address",                                                        // [1]  to_wallet
    "u64",                                                            // [2]
    "u8",                                                             // [3]  num_splits
    "vector<u8>",                                                     // [4]  pool_type_vec
    "vector<vector<vector<u8>>>",                                     // [5]  pool_info
    "vector<vector<vector<u64>>>",                                    // [6]  pool_amounts
    "vector<vector<vector<bool>>>",                                   // [7]  pool_flags
    "vector<vector<u8>>",                                             // [8]
    "vector<vector<vector<address>>>",                                // [9]  pool_addrs
    "vector<vector<address>>",                                        // [10] from_addrs
    "vector<vector<address>>",                                        // [11] to_addrs
    "0x1::option::Option<vector<vector<vector<vector<vector<u8>>>>>>", // [12]
    "vector<vector<vector<u64>>>",                                    // [13] min_output_amounts
    "0x1::option::Option<vector<vector<vector<u8>>>>",                // [14]
    "address",                                                        // [15] output_token
    "vector<u64>",                                                    // [16] amounts
    "u64",                                                            // [17] from_amount
    "u64",                                                            // [18] min_out
    "address",                                                        // [19] fee_addr
];

const GAS_UNIT_PRICE: u64 = 100; // octas per gas unit
const MIN_GAS_UNITS: u64 = 5_000; // minimum for a Panora swap (~0.005 APT)
const APT_DECIMALS: u32 = 8;
const TXN_EXPIRY_S: u64 = 600;

// Spellings of the native coin accepted in token-address config
const APT_ALIASES: [&str; 3] = [
    "0x1::aptos_coin::AptosCoin",
    "0x000000000000000000000000000000000000000000000000000000000000000a",
    "0xa",
];

/// Signs and submits Aptos transactions for Panora DEX swaps.
pub struct PanoraExecutor {
    panora: Arc<PanoraClient>,
    aptos: AptosClient,
    account: Option<LocalAccount>,
    max_gas_units: u64,
    exec_quote_max_age_s: f64,
    price_deviation_threshold_pct: f64,
}

impl PanoraExecutor {
    pub fn new(panora: Arc<PanoraClient>, settings: &Settings) -> Self {
        let account = if settings.aptos_private_key.is_empty() {
            None
        } else {
            match Self::load_account(settings) {
                Ok(acct) => Some(acct),
                Err(e) => {
                    error!("PanoraExecutor: failed to load Aptos key: {}", e);
                    None
                }
            }
        };

        Self {
            panora,
            aptos: AptosClient::new(settings.aptos_node_url.clone()),
            account,
            max_gas_units: settings.aptos_max_gas,
            exec_quote_max_age_s: settings.exec_quote_max_age_s,
            price_deviation_threshold_pct: settings.quote_price_deviation_threshold_pct,
        }
    }

    fn load_account(settings: &Settings) -> anyhow::Result<LocalAccount> {
        let account = LocalAccount::from_private_key_hex(&settings.aptos_private_key)?;
        if settings.aptos_wallet_address.is_empty() {
            Ok(account)
        } else {
            account.with_address(&settings.aptos_wallet_address)
        }
    }

    pub fn wallet_address(&self) -> Option<String> {
        self.account.as_ref().map(|a| a.address())
    }

    /// Execute a Panora swap. Returns the confirmed Aptos tx hash, or None.
    ///
    /// A prefetched quote (from price verification) is reused as long as it
    /// is real, young enough and close to the current unit price, so no second
    /// API call. Synthetic or stale quotes force a fresh fetch.
    pub async fn execute_swap(
        &self,
        from_amount: f64,
        from_token: &str,
        to_token: &str,
        prefetched: Option<SwapQuote>,
    ) -> Option<String> {
        let Some(account) = &self.account else {
            error!("PanoraExecutor: APTOS_PRIVATE_KEY not set — cannot execute swap");
            return None;
        };
        let wallet = account.address();

        // Quotes fetched from here on carry payloads addressed to the wallet
        self.panora.set_to_wallet(&wallet);

        let quote = match prefetched {
            Some(q) if self.quote_usable(&q, from_token, to_token, from_amount) => {
                debug!(
                    "PanoraExecutor: reusing prefetched quote — skipping API call (from={} amount={})",
                    &from_token[..from_token.len().min(16)],
                    from_amount
                );
                q
            }
            other => {
                if other.is_some() {
                    debug!(
                        "PanoraExecutor: prefetched quote unusable — fetching execution quote with force_fresh"
                    );
                }
                match self
                    .panora
                    .get_swap_quote(from_amount, Some(from_token), Some(to_token), true, None)
                    .await
                {
                    Some(q) => q,
                    None => {
                        error!("PanoraExecutor: swap quote request failed");
                        return None;
                    }
                }
            }
        };

        let Some(payload) = extract_payload(&quote.raw) else {
            error!(
                "PanoraExecutor: no transaction payload in response keys={:?}",
                quote.raw.as_object().map(|o| o.keys().collect::<Vec<_>>())
            );
            return None;
        };

        let func = payload["function"]
            .as_str()
            .or_else(|| payload["fn"].as_str())
            .unwrap_or("");
        if func.is_empty() {
            error!("PanoraExecutor: empty function field in payload");
            return None;
        }
        let type_arg_strs = payload["typeArguments"]
            .as_array()
            .or_else(|| payload["type_arguments"].as_array())
            .cloned()
            .unwrap_or_default();
        let raw_args = payload["functionArguments"]
            .as_array()
            .or_else(|| payload["arguments"].as_array())
            .cloned()
            .unwrap_or_default();

        if raw_args.len() != ROUTER_PARAM_TYPES.len() {
            error!(
                "PanoraExecutor: expected {} args, got {}",
                ROUTER_PARAM_TYPES.len(),
                raw_args.len()
            );
            return None;
        }

        let mut bcs_args = Vec::with_capacity(raw_args.len());
        for (i, (t, v)) in ROUTER_PARAM_TYPES.iter().zip(raw_args.iter()).enumerate() {
            match bcs::encode_move_value(t, v) {
                Ok(encoded) => bcs_args.push(encoded),
                Err(e) => {
                    error!("PanoraExecutor: BCS encoding failed at arg[{}]: {:#}", i, e);
                    return None;
                }
            }
        }

        let mut type_tags = Vec::with_capacity(type_arg_strs.len());
        for t in &type_arg_strs {
            let s = t.as_str().unwrap_or("");
            match TypeTag::parse(s) {
                Ok(tag) => type_tags.push(tag),
                Err(e) => {
                    error!("PanoraExecutor: type tag parsing failed for {:?}: {:#}", s, e);
                    return None;
                }
            }
        }

        let entry_fn = match EntryFunction::from_qualified_name(func, type_tags, bcs_args) {
            Ok(ef) => ef,
            Err(e) => {
                error!("PanoraExecutor: bad entry function {:?}: {:#}", func, e);
                return None;
            }
        };

        // Pre-flight: APT balance → max_gas_amount
        let apt_octas = self.apt_balance_octas(&wallet).await;
        let max_gas = self.compute_max_gas(apt_octas);
        if let Some(octas) = apt_octas {
            let apt_human = octas as f64 / 10f64.powi(APT_DECIMALS as i32);
            if max_gas < MIN_GAS_UNITS {
                error!(
                    "PanoraExecutor: insufficient APT for gas | balance={:.6} APT  need >={:.4} APT",
                    apt_human,
                    (MIN_GAS_UNITS * GAS_UNIT_PRICE) as f64 / 10f64.powi(APT_DECIMALS as i32)
                );
                return None;
            }
            if max_gas < self.max_gas_units {
                warn!(
                    "PanoraExecutor: low APT ({:.6}) — capping max_gas={} units",
                    apt_human, max_gas
                );
            }
        }

        self.sign_and_submit(account, entry_fn, max_gas, from_token, from_amount)
            .await
    }

    async fn sign_and_submit(
        &self,
        account: &LocalAccount,
        entry_fn: EntryFunction,
        max_gas: u64,
        from_token: &str,
        from_amount: f64,
    ) -> Option<String> {
        let wallet = account.address();
        let sequence_number = match self.aptos.sequence_number(&wallet).await {
            Ok(seq) => seq,
            Err(e) => {
                error!("PanoraExecutor: sequence number fetch failed: {}", e);
                return None;
            }
        };
        let chain_id = match self.aptos.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                error!("PanoraExecutor: chain id fetch failed: {}", e);
                return None;
            }
        };

        let raw = RawTransaction {
            sender: account.address_bytes(),
            sequence_number,
            payload: entry_fn,
            max_gas_amount: max_gas,
            gas_unit_price: GAS_UNIT_PRICE,
            expiration_timestamp_secs: chrono::Utc::now().timestamp() as u64 + TXN_EXPIRY_S,
            chain_id,
        };
        let signature = account.sign(&raw.signing_message());
        let signed = raw.into_signed_bytes(&account.public_key_bytes(), &signature);

        let txn_hash = match self.aptos.submit_signed_bcs(signed).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("❌ PanoraExecutor submit failed: {}", e);
                return None;
            }
        };
        info!("⏳ Panora swap submitted | tx={}", txn_hash);

        match self.aptos.wait_for_transaction(&txn_hash).await {
            Ok(()) => {
                info!(
                    "✅ Panora swap confirmed | from={}  amount={} | tx={}",
                    &from_token[..from_token.len().min(16)],
                    from_amount,
                    txn_hash
                );
                Some(txn_hash)
            }
            Err(AptosError::VmStatus(status)) => {
                error!("❌ PanoraExecutor swap failed: {}", status);
                None
            }
            Err(e) => {
                error!("❌ PanoraExecutor swap failed: {}", e);
                None
            }
        }
    }

    // A prefetched quote is reused only when it is real, fresh, and its
    // implied price hasn't drifted from the latest known unit price.
    fn quote_usable(&self, quote: &SwapQuote, from: &str, to: &str, from_amount: f64) -> bool {
        if quote.synthetic {
            return false;
        }
        if quote.age() > self.exec_quote_max_age_s {
            debug!(
                "PanoraExecutor: prefetched quote too old ({:.2}s > {:.2}s)",
                quote.age(),
                self.exec_quote_max_age_s
            );
            return false;
        }
        if let (Some(out), Some(current)) =
            (quote.to_token_amount(), self.panora.get_unit_price(from, to))
        {
            if from_amount > 0.0 && current > 0.0 {
                let implied = out / from_amount;
                let deviation_pct = ((implied - current) / current).abs() * 100.0;
                if deviation_pct > self.price_deviation_threshold_pct {
                    warn!(
                        "PanoraExecutor: quote price drifted {:.3}% (> {:.3}%) — refetching",
                        deviation_pct, self.price_deviation_threshold_pct
                    );
                    return false;
                }
            }
        }
        true
    }

    async fn apt_balance_octas(&self, wallet: &str) -> Option<u64> {
        match self
            .aptos
            .view(
                "0x1::coin::balance",
                &["0x1::aptos_coin::AptosCoin"],
                &[json!(wallet)],
            )
            .await
        {
            Ok(data) => parse_view_u64(&data),
            Err(e) => {
                warn!("PanoraExecutor: could not check APT balance: {}", e);
                None
            }
        }
    }

    fn compute_max_gas(&self, apt_octas: Option<u64>) -> u64 {
        match apt_octas {
            None => self.max_gas_units,
            Some(octas) => self
                .max_gas_units
                .min((octas as f64 * 0.9) as u64 / GAS_UNIT_PRICE),
        }
    }

    /// Human-readable token balance for any Aptos coin or fungible asset.
    ///
    /// APT goes through `0x1::coin::balance`. Other tokens try the FA
    /// primary-store view first, then fall back to the legacy
    /// `0x1::coin::balance<T>`. Returns None when no view succeeds.
    pub async fn get_token_balance(
        &self,
        wallet: &str,
        token_address: &str,
        decimals: u32,
    ) -> Option<f64> {
        if APT_ALIASES.contains(&token_address) {
            let octas = self.apt_balance_octas(wallet).await?;
            return Some(octas as f64 / 10f64.powi(APT_DECIMALS as i32));
        }

        // FA tokens are addressed by the bare object address
        let fa_addr = token_address.split("::").next().unwrap_or(token_address);
        match self
            .aptos
            .view(
                "0x1::primary_fungible_store::balance",
                &["0x1::fungible_asset::Metadata"],
                &[json!(wallet), json!(fa_addr)],
            )
            .await
        {
            Ok(data) => {
                if let Some(raw) = parse_view_u64(&data) {
                    return Some(raw as f64 / 10f64.powi(decimals as i32));
                }
            }
            Err(e) => debug!(
                "PanoraExecutor: FA balance view failed for {}: {}",
                token_address, e
            ),
        }

        match self
            .aptos
            .view("0x1::coin::balance", &[token_address], &[json!(wallet)])
            .await
        {
            Ok(data) => {
                parse_view_u64(&data).map(|raw| raw as f64 / 10f64.powi(decimals as i32))
            }
            Err(e) => {
                warn!(
                    "PanoraExecutor.get_token_balance {} failed: {}",
                    token_address, e
                );
                None
            }
        }
    }
}

/// Extract the entry-function payload from a swap API response.
///
/// Primary path: `quotes[0].txData`; legacy key paths are probed as
/// fallbacks.
pub fn extract_payload(data: &Value) -> Option<&Value> {
    let tx_data = &data["quotes"][0]["txData"];
    if tx_data.is_object() && !tx_data["function"].is_null() {
        return Some(tx_data);
    }

    for candidate in [&data["data"], &data["txData"], &data["payload"], &data["swap"], data] {
        if candidate.is_object()
            && (!candidate["function"].is_null() || !candidate["fn"].is_null())
        {
            return Some(candidate);
        }
    }
    None
}

// View results arrive as `["12345"]`: a one-element array with a
// stringified u64 (or occasionally a bare number).
fn parse_view_u64(data: &Value) -> Option<u64> {
    match &data[0] {
        Value::String(s) => s.parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payload_primary_path() {
        let data = json!({
            "quotes": [{
                "toTokenAmount": "7.0",
                "txData": {
                    "function": "0x1::router_entry::swap",
                    "type_arguments": [],
                    "arguments": []
                }
            }]
        });
        let payload = extract_payload(&data).unwrap();
        assert_eq!(payload["function"], "0x1::router_entry::swap");
    }

    #[test]
    fn test_extract_payload_fallback_paths() {
        let top = json!({"function": "0x1::m::f", "arguments": []});
        assert!(extract_payload(&top).is_some());

        let nested = json!({"payload": {"function": "0x1::m::f"}});
        assert_eq!(extract_payload(&nested).unwrap()["function"], "0x1::m::f");

        let legacy = json!({"data": {"fn": "0x1::m::f"}});
        assert!(extract_payload(&legacy).is_some());
    }

    #[test]
    fn test_extract_payload_rejects_malformed() {
        assert!(extract_payload(&json!({})).is_none());
        assert!(extract_payload(&json!({"quotes": []})).is_none());
        assert!(extract_payload(&json!({"quotes": [{"txData": "not-an-object"}]})).is_none());
    }

    #[test]
    fn test_parse_view_u64() {
        assert_eq!(parse_view_u64(&json!(["12345"])), Some(12345));
        assert_eq!(parse_view_u64(&json!([42])), Some(42));
        assert_eq!(parse_view_u64(&json!([])), None);
        assert_eq!(parse_view_u64(&json!(["not-a-number"])), None);
    }

    #[test]
    fn test_router_schema_shape() {
        assert_eq!(ROUTER_PARAM_TYPES.len(), 20);
        assert_eq!(ROUTER_PARAM_TYPES[0], "0x1::option::Option<signer>");
        // Every schema entry must be encodable (spot-check parse support)
        for t in ROUTER_PARAM_TYPES {
            assert!(
                t == "address"
                    || t.starts_with("u")
                    || t.starts_with("vector<")
                    || t.starts_with("0x1::option::Option<"),
                "unexpected schema type {}",
                t
            );
        }
    }

    #[test]
    fn test_compute_max_gas() {
        let settings = Settings::from_env().unwrap();
        let panora = Arc::new(PanoraClient::new(&settings, "0xami", "0xusdt"));
        let exec = PanoraExecutor::new(panora, &settings);

        // No balance info → default cap
        assert_eq!(exec.compute_max_gas(None), 200_000);
        // Large balance → default cap
        assert_eq!(exec.compute_max_gas(Some(10_0000_0000)), 200_000);
        // 0.01 APT = 1_000_000 octas → 0.9 * 1e6 / 100 = 9000 units
        assert_eq!(exec.compute_max_gas(Some(1_000_000)), 9_000);
        // Dust → below the minimum floor
        assert!(exec.compute_max_gas(Some(10_000)) < MIN_GAS_UNITS);
    }

    #[test]
    fn test_schema_arity_validation_boundary() {
        // 20 nulls of the right shapes should all encode; a shorter list is
        // rejected by the arity check in execute_swap (tested via lengths).
        let args: Vec<Value> = vec![
            Value::Null,                  // Option<signer>
            json!("0x1"),                 // address
            json!("0"),                   // u64
            json!(1),                     // u8
            json!([1]),                   // vector<u8>
            json!([[[1]]]),               // vector<vector<vector<u8>>>
            json!([[["1"]]]),             // vector<vector<vector<u64>>>
            json!([[[true]]]),            // vector<vector<vector<bool>>>
            json!([[1]]),                 // vector<vector<u8>>
            json!([[["0x1"]]]),           // vector<vector<vector<address>>>
            json!([["0x1"]]),             // vector<vector<address>>
            json!([["0x1"]]),             // vector<vector<address>>
            Value::Null,                  // Option<...>
            json!([[["0"]]]),             // vector<vector<vector<u64>>>
            Value::Null,                  // Option<...>
            json!("0x1"),                 // address
            json!(["1"]),                 // vector<u64>
            json!("100"),                 // u64
            json!("99"),                  // u64
            json!("0x1"),                 // address
        ];
        assert_eq!(args.len(), ROUTER_PARAM_TYPES.len());
        for (t, v) in ROUTER_PARAM_TYPES.iter().zip(args.iter()) {
            bcs::encode_move_value(t, v).unwrap();
        }
    }
}
