//! Trade executor — orchestrates order placement for arbitrage legs.
//!
//! Modes:
//!   dry_run = true (default): emit a structured signal, place no orders.
//!   dry_run = false         : execute real orders.
//!
//! CEX-CEX arb  → both market orders fired concurrently.
//! DEX-CEX arb  → Panora swap + CEX market order fired concurrently.
//! Triangular   → Panora swap first, then the CEX hedge leg, sequential
//!                with a per-leg timeout and a pre-execution balance gate.

use crate::config::Settings;
use crate::exchanges::{BybitTrader, MexcTrader, PanoraExecutor, SwapQuote};
use crate::signals::{GateOutcome, Signal, SignalKind, SignalLogger};
use crate::types::{DexCexDirection, Side, TriDirection, Venue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

// Per-leg execution timeout. Abort if a single leg takes longer.
const LEG_TIMEOUT: Duration = Duration::from_secs(30);

const AMI_DECIMALS: u32 = 8;

/// One dispatched triangular opportunity.
///
/// For `AptToAmi`: `qty_from` is APT, bought on the CEX at `cex_buy_price`
/// (APT ask) and hedged by selling AMI at `cex_sell_price` (AMI bid).
/// For `AmiToApt` the roles are mirrored.
#[derive(Debug, Clone)]
pub struct TriangularTask {
    pub direction: TriDirection,
    pub cex: Venue,
    pub apt_symbol: String,
    pub ami_symbol: String,
    pub qty_from: f64,
    pub cex_buy_price: f64,
    pub cex_sell_price: f64,
    pub prefetched: Option<SwapQuote>,
}

/// Coordinates simultaneous (or sequential) execution of arbitrage legs.
pub struct TradeExecutor {
    settings: Arc<Settings>,
    bybit: BybitTrader,
    mexc: MexcTrader,
    panora_executor: Option<Arc<PanoraExecutor>>,
    signals: SignalLogger,
    dry_run: bool,
    // One triangular execution at a time; contending signals are dropped
    tri_lock: tokio::sync::Mutex<()>,
}

impl TradeExecutor {
    pub fn new(
        settings: Arc<Settings>,
        panora_executor: Option<Arc<PanoraExecutor>>,
        signals: SignalLogger,
    ) -> Self {
        let dry_run = settings.dry_run;
        let mode = if dry_run { "DRY-RUN (paper)" } else { "🔴 LIVE TRADING" };
        info!(
            "TradeExecutor initialised | mode={} max_trade={} USDT",
            mode, settings.trade_amount_usdt
        );

        Self {
            bybit: BybitTrader::new(&settings),
            mexc: MexcTrader::new(&settings),
            panora_executor,
            signals,
            dry_run,
            tri_lock: tokio::sync::Mutex::new(()),
            settings,
        }
    }

    fn emit_signal(&self, kind: SignalKind) {
        let signal = Signal::now(self.dry_run, kind);
        if let Err(e) = self.signals.emit(&signal) {
            warn!("signal emission failed: {:#}", e);
        }
    }

    // ------------------------------------------------------------------ //
    //  CEX <-> CEX
    // ------------------------------------------------------------------ //

    /// Place the buy and sell market orders simultaneously.
    ///
    /// Quantity is capped at `trade_amount_usdt / buy_price`. Returns true
    /// only if both legs succeeded.
    pub async fn execute_cex_cex(
        &self,
        buy_exchange: Venue,
        sell_exchange: Venue,
        symbol: &str,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
    ) -> bool {
        let max_qty = self.settings.trade_amount_usdt / buy_price;
        let safe_qty = qty.min(max_qty);

        let buy_fee = self.settings.cex_fee(buy_exchange);
        let sell_fee = self.settings.cex_fee(sell_exchange);
        let net_profit_est = (sell_price - buy_price) * safe_qty
            - buy_price * safe_qty * buy_fee
            - sell_price * safe_qty * sell_fee;

        info!(
            "{} CEX-CEX EXECUTE | BUY {} @ {:.8}  SELL {} @ {:.8}  QTY={:.6} {}  PROFIT_EST={:.4} USDT",
            self.mode_tag(),
            buy_exchange,
            buy_price,
            sell_exchange,
            sell_price,
            safe_qty,
            symbol,
            net_profit_est
        );

        if self.dry_run {
            self.emit_signal(SignalKind::CexCex {
                symbol: symbol.to_string(),
                buy_exchange: buy_exchange.to_string(),
                sell_exchange: sell_exchange.to_string(),
                buy_price,
                sell_price,
                qty: safe_qty,
                buy_volume_usdt: buy_price * safe_qty,
                sell_volume_usdt: sell_price * safe_qty,
                profit_usdt: net_profit_est,
            });
            return true;
        }

        let (buy_id, sell_id) = tokio::join!(
            self.cex_buy(buy_exchange, symbol, safe_qty),
            self.cex_sell(sell_exchange, symbol, safe_qty),
        );

        match (&buy_id, &sell_id) {
            (Some(b), Some(s)) => {
                info!("✅ CEX-CEX executed | buy={} sell={}", b, s);
                true
            }
            _ => {
                error!(
                    "❌ CEX-CEX partial fill | buy_ok={} sell_ok={} → manual intervention may be required",
                    buy_id.is_some(),
                    sell_id.is_some()
                );
                false
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  DEX <-> CEX
    // ------------------------------------------------------------------ //

    /// Execute one Panora leg and one CEX leg in parallel.
    ///
    /// `BuyDexSellCex`: buy AMI on Panora (USDT→AMI), sell AMI on the CEX.
    /// `BuyCexSellDex`: buy AMI on the CEX, sell AMI on Panora (AMI→USDT).
    pub async fn execute_dex_cex(
        &self,
        direction: DexCexDirection,
        cex: Venue,
        symbol: &str,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
        prefetched: Option<SwapQuote>,
    ) -> bool {
        let Some(panora_executor) = &self.panora_executor else {
            error!("TradeExecutor: no PanoraExecutor — cannot execute DEX leg");
            return false;
        };

        let max_qty = self.settings.trade_amount_usdt / buy_price;
        let safe_qty = qty.min(max_qty);

        let notional_buy = buy_price * safe_qty;
        let notional_sell = sell_price * safe_qty;
        let cex_fee = self.settings.cex_fee(cex);
        let net_profit_est = notional_sell
            - notional_buy
            - notional_buy * self.settings.panora_fee
            - notional_sell * cex_fee;

        info!(
            "{} DEX-CEX EXECUTE | dir={} cex={} buy@{:.8} sell@{:.8} QTY={:.6} PROFIT_EST={:.4} USDT",
            self.mode_tag(),
            direction,
            cex,
            buy_price,
            sell_price,
            safe_qty,
            net_profit_est
        );

        if self.dry_run {
            self.emit_signal(SignalKind::DexCex {
                direction: direction.to_string(),
                cex: cex.to_string(),
                symbol: symbol.to_string(),
                buy_price,
                sell_price,
                qty: safe_qty,
                buy_volume_usdt: notional_buy,
                sell_volume_usdt: notional_sell,
                profit_usdt: net_profit_est,
            });
            return true;
        }

        let (dex_result, cex_result) = match direction {
            DexCexDirection::BuyDexSellCex => {
                // Panora: spend USDT, receive AMI; CEX: sell the AMI hedge
                let usdt_to_spend = safe_qty * buy_price;
                tokio::join!(
                    panora_executor.execute_swap(
                        usdt_to_spend,
                        &self.settings.usdt_token_address,
                        &self.settings.ami_token_address,
                        prefetched,
                    ),
                    self.cex_sell(cex, symbol, safe_qty),
                )
            }
            DexCexDirection::BuyCexSellDex => {
                let (cex_result, dex_result) = tokio::join!(
                    self.cex_buy(cex, symbol, safe_qty),
                    panora_executor.execute_swap(
                        safe_qty,
                        &self.settings.ami_token_address,
                        &self.settings.usdt_token_address,
                        prefetched,
                    ),
                );
                (dex_result, cex_result)
            }
        };

        match (&dex_result, &cex_result) {
            (Some(tx), Some(order)) => {
                info!("✅ DEX-CEX executed | dex_tx={} cex_order={}", tx, order);
                true
            }
            _ => {
                error!(
                    "❌ DEX-CEX partial fill | dex_ok={} cex_ok={} → manual intervention may be required",
                    dex_result.is_some(),
                    cex_result.is_some()
                );
                false
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  Triangular (Panora swap + CEX hedge)
    // ------------------------------------------------------------------ //

    /// Execute a triangular arb sequentially: Panora swap, then the CEX
    /// hedge order against the pre-positioned balance.
    ///
    /// Guards:
    ///   - execution lock: an overlapping triangular signal is dropped;
    ///   - balance gate before any leg (Aptos wallet + CEX hedge balance);
    ///   - per-leg timeout; a Panora failure aborts the CEX leg.
    pub async fn execute_triangular(&self, task: TriangularTask) -> bool {
        let Some(panora_executor) = self.panora_executor.clone() else {
            error!("TradeExecutor: no PanoraExecutor — cannot execute triangular");
            return false;
        };

        let Ok(_guard) = self.tri_lock.try_lock() else {
            warn!(
                "TradeExecutor: triangular trade already in progress — skipping {}",
                task.direction
            );
            return false;
        };

        self.execute_triangular_locked(&panora_executor, task).await
    }

    async fn execute_triangular_locked(
        &self,
        panora_executor: &PanoraExecutor,
        task: TriangularTask,
    ) -> bool {
        let wallet = panora_executor.wallet_address();

        let safe_qty = task
            .qty_from
            .min(self.settings.trade_amount_usdt / task.cex_buy_price.max(1e-12));
        // Hedge quantity derived from the CEX cross rate
        let hedge_qty = safe_qty * (task.cex_buy_price / task.cex_sell_price.max(1e-12));

        let (tag, from_token, to_token, hedge_symbol) = match task.direction {
            TriDirection::AptToAmi => (
                "TRI-DIR1",
                self.settings.apt_token_address.clone(),
                self.settings.ami_token_address.clone(),
                task.ami_symbol.clone(),
            ),
            TriDirection::AmiToApt => (
                "TRI-DIR2",
                self.settings.ami_token_address.clone(),
                self.settings.apt_token_address.clone(),
                task.apt_symbol.clone(),
            ),
        };

        info!(
            "{} {} | {} | Panora {:.4} {} then sell ~{:.4} @ {:.8}",
            self.mode_tag(),
            tag,
            task.cex,
            safe_qty,
            task.direction,
            hedge_qty,
            task.cex_sell_price
        );

        let gate = self
            .check_tri_balances(&task, wallet.as_deref(), safe_qty, hedge_qty)
            .await;

        if self.dry_run {
            let outcome = if gate { GateOutcome::Pass } else { GateOutcome::Fail };
            let notional_in = safe_qty * task.cex_buy_price;
            let notional_out = hedge_qty * task.cex_sell_price;
            let net_profit = notional_out
                - notional_in
                - notional_in * self.settings.panora_fee
                - notional_out * self.settings.cex_fee(task.cex);
            let wallet_str = wallet.unwrap_or_else(|| "N/A".to_string());

            let kind = match task.direction {
                TriDirection::AptToAmi => SignalKind::TriAptToAmi {
                    cex: task.cex.to_string(),
                    apt_qty: safe_qty,
                    apt_buy_price: task.cex_buy_price,
                    ami_qty_est: hedge_qty,
                    ami_sell_price: task.cex_sell_price,
                    notional_in_usdt: notional_in,
                    notional_out_usdt: notional_out,
                    profit_usdt: net_profit,
                    balance_gate: outcome,
                    wallet: wallet_str,
                },
                TriDirection::AmiToApt => SignalKind::TriAmiToApt {
                    cex: task.cex.to_string(),
                    ami_qty: safe_qty,
                    ami_buy_price: task.cex_buy_price,
                    apt_qty_est: hedge_qty,
                    apt_sell_price: task.cex_sell_price,
                    notional_in_usdt: notional_in,
                    notional_out_usdt: notional_out,
                    profit_usdt: net_profit,
                    balance_gate: outcome,
                    wallet: wallet_str,
                },
            };
            self.emit_signal(kind);
            // Dry-run reports the gate outcome in the record and succeeds
            return true;
        }

        if !gate {
            error!("❌ {}: balance gate failed — aborting before any leg", tag);
            return false;
        }

        // Leg 1: Panora swap
        let swap = timeout(
            LEG_TIMEOUT,
            panora_executor.execute_swap(safe_qty, &from_token, &to_token, task.prefetched.clone()),
        )
        .await;
        let tx = match swap {
            Err(_) => {
                error!(
                    "❌ {}: Panora {} timed out after {}s — aborting",
                    tag,
                    task.direction,
                    LEG_TIMEOUT.as_secs()
                );
                return false;
            }
            Ok(None) => {
                error!("❌ {}: Panora swap {} failed → aborting CEX leg", tag, task.direction);
                return false;
            }
            Ok(Some(tx)) => tx,
        };
        info!("✅ {} Leg1 done | tx={}", tag, tx);

        // Leg 2: CEX hedge sell
        let order = timeout(LEG_TIMEOUT, self.cex_sell(task.cex, &hedge_symbol, hedge_qty)).await;
        match order {
            Err(_) => {
                error!(
                    "❌ {}: CEX sell timed out (Panora tx={}) — manual rebalance required",
                    tag, tx
                );
                false
            }
            Ok(None) => {
                error!(
                    "❌ {}: CEX sell failed (Panora swap done tx={}) — manual rebalance required",
                    tag, tx
                );
                false
            }
            Ok(Some(order_id)) => {
                info!("✅ {} complete | panora_tx={} cex_order={}", tag, tx, order_id);
                true
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  Balance gates (triangular)
    // ------------------------------------------------------------------ //

    // True only if the Aptos wallet holds enough of the input token and the
    // CEX holds enough of the hedge asset. A wallet read that fails outright
    // is treated as unknown rather than blocking.
    async fn check_tri_balances(
        &self,
        task: &TriangularTask,
        wallet: Option<&str>,
        safe_qty: f64,
        hedge_qty: f64,
    ) -> bool {
        let mut ok = true;
        let (tag, input_token, hedge_coin_symbol) = match task.direction {
            TriDirection::AptToAmi => ("TRI-DIR1", &self.settings.apt_token_address, &task.ami_symbol),
            TriDirection::AmiToApt => ("TRI-DIR2", &self.settings.ami_token_address, &task.apt_symbol),
        };

        if let (Some(wallet), Some(panora_executor)) = (wallet, &self.panora_executor) {
            let bal = panora_executor
                .get_token_balance(wallet, input_token, AMI_DECIMALS)
                .await;
            match bal {
                Some(bal) if bal < safe_qty => {
                    warn!(
                        "⚠️  Balance gate FAILED: Aptos wallet={:.6} < needed {:.6} → aborting {}",
                        bal, safe_qty, tag
                    );
                    ok = false;
                }
                bal => debug!("Balance gate wallet: {:?} need={:.6}", bal, safe_qty),
            }
        }

        let hedge_coin = coin_for(hedge_coin_symbol);
        let cex_bals = self.cex_balances(task.cex, &[hedge_coin]).await;
        let hedge_bal = cex_bals.get(hedge_coin).copied().unwrap_or(0.0);
        if hedge_bal < hedge_qty {
            warn!(
                "⚠️  Balance gate FAILED: {} {}={:.6} < needed {:.6} → aborting {}",
                task.cex, hedge_coin, hedge_bal, hedge_qty, tag
            );
            ok = false;
        } else {
            debug!(
                "Balance gate {} {}: {:.6} >= {:.6}",
                task.cex, hedge_coin, hedge_bal, hedge_qty
            );
        }

        ok
    }

    async fn cex_balances(&self, venue: Venue, coins: &[&str]) -> HashMap<String, f64> {
        match venue {
            Venue::Bybit => self.bybit.get_balance(coins).await,
            Venue::Mexc => self.mexc.get_balance(coins).await,
            Venue::Panora => {
                warn!("cex_balances called for a non-CEX venue");
                HashMap::new()
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  Internal helpers
    // ------------------------------------------------------------------ //

    async fn cex_buy(&self, venue: Venue, symbol: &str, qty: f64) -> Option<String> {
        let qty = floor_qty(qty);
        if qty <= 0.0 {
            error!("cex_buy: qty rounded to zero for {}", symbol);
            return None;
        }
        match venue {
            Venue::Bybit => {
                self.bybit
                    .place_market_order(symbol, Side::Buy, qty, "baseCoinQty")
                    .await
            }
            Venue::Mexc => self.mexc.place_market_order(symbol, Side::Buy, qty, false).await,
            Venue::Panora => {
                error!("cex_buy: {} is not a CEX", venue);
                None
            }
        }
    }

    async fn cex_sell(&self, venue: Venue, symbol: &str, qty: f64) -> Option<String> {
        let qty = floor_qty(qty);
        if qty <= 0.0 {
            error!("cex_sell: qty rounded to zero for {}", symbol);
            return None;
        }
        match venue {
            Venue::Bybit => {
                self.bybit
                    .place_market_order(symbol, Side::Sell, qty, "baseCoinQty")
                    .await
            }
            Venue::Mexc => {
                self.mexc
                    .place_market_order(symbol, Side::Sell, qty, false)
                    .await
            }
            Venue::Panora => {
                error!("cex_sell: {} is not a CEX", venue);
                None
            }
        }
    }

    fn mode_tag(&self) -> &'static str {
        if self.dry_run {
            "[DRY]"
        } else {
            "[LIVE]"
        }
    }
}

// ---------------------------------------------------------------------------
// Module-level helpers
// ---------------------------------------------------------------------------

/// Extract the base coin from a CEX pair symbol: "AMIUSDT" → "AMI".
pub fn coin_for(cex_symbol: &str) -> &str {
    for quote in ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH"] {
        if let Some(base) = cex_symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return base;
            }
        }
    }
    cex_symbol
}

/// Floor a quantity to exchange-friendly lot precision.
///
///   qty >= 100  → integer
///   qty >= 1    → 2 decimal places
///   qty >= 0.01 → 4 decimal places
///   otherwise   → 6 decimal places
pub fn floor_qty(qty: f64) -> f64 {
    if qty >= 100.0 {
        qty.floor()
    } else if qty >= 1.0 {
        (qty * 100.0).floor() / 100.0
    } else if qty >= 0.01 {
        (qty * 10_000.0).floor() / 10_000.0
    } else {
        (qty * 1_000_000.0).floor() / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_qty_ladder() {
        assert_eq!(floor_qty(1222.3), 1222.0);
        assert_eq!(floor_qty(10.416), 10.41);
        assert_eq!(floor_qty(0.2083), 0.2083);
        assert_eq!(floor_qty(0.0012345), 0.001234);
        assert_eq!(floor_qty(0.0), 0.0);
    }

    #[test]
    fn test_floor_qty_idempotent() {
        for qty in [1222.3, 99.999, 10.416, 1.0, 0.2083, 0.0099999, 0.0012345] {
            let once = floor_qty(qty);
            assert_eq!(floor_qty(once), once, "not idempotent for {}", qty);
        }
    }

    #[test]
    fn test_floor_qty_boundaries() {
        assert_eq!(floor_qty(100.0), 100.0);
        assert_eq!(floor_qty(99.999), 99.99);
        assert_eq!(floor_qty(1.0), 1.0);
        assert_eq!(floor_qty(0.01), 0.01);
        assert_eq!(floor_qty(0.009999), 0.009999);
    }

    #[test]
    fn test_coin_for_strips_known_quotes() {
        assert_eq!(coin_for("AMIUSDT"), "AMI");
        assert_eq!(coin_for("APTUSDT"), "APT");
        assert_eq!(coin_for("BTCUSDC"), "BTC");
        assert_eq!(coin_for("SOLETH"), "SOL");
        // Unknown quote suffix stays untouched
        assert_eq!(coin_for("AMIDOGE"), "AMIDOGE");
        // Bare quote symbol is not stripped to empty
        assert_eq!(coin_for("USDT"), "USDT");
    }

    fn dry_run_executor(dir: &std::path::Path) -> TradeExecutor {
        let mut settings = Settings::from_env().unwrap();
        settings.dry_run = true;
        settings.trade_amount_usdt = 10.0;
        settings.bybit_api_key = String::new();
        settings.mexc_api_key = String::new();
        TradeExecutor::new(
            Arc::new(settings),
            None,
            SignalLogger::new(dir).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_dry_run_cex_cex_emits_signal_with_cap() {
        let dir = tempfile::tempdir().unwrap();
        let exec = dry_run_executor(dir.path());

        let ok = exec
            .execute_cex_cex(Venue::Bybit, Venue::Mexc, "AMIUSDT", 0.008, 0.0082, 1_000_000.0)
            .await;
        assert!(ok);

        let records = exec.signals.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "CEX_CEX");
        // qty capped at trade_amount_usdt / buy_price = 10 / 0.008 = 1250
        assert!((records[0]["qty"].as_f64().unwrap() - 1250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_triangular_without_panora_executor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = dry_run_executor(dir.path());

        let ok = exec
            .execute_triangular(TriangularTask {
                direction: TriDirection::AptToAmi,
                cex: Venue::Bybit,
                apt_symbol: "APTUSDT".to_string(),
                ami_symbol: "AMIUSDT".to_string(),
                qty_from: 1.5,
                cex_buy_price: 4.5,
                cex_sell_price: 0.008,
                prefetched: None,
            })
            .await;
        assert!(!ok);
        assert!(exec.signals.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_triangular_reports_gate_failure_and_succeeds() {
        use crate::exchanges::{PanoraClient, PanoraExecutor};

        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::from_env().unwrap();
        settings.dry_run = true;
        settings.aptos_private_key = String::new(); // no wallet
        settings.mexc_api_key = String::new(); // no CEX creds either
        settings.mexc_api_secret = String::new();
        let settings = Arc::new(settings);

        let panora = Arc::new(PanoraClient::new(
            &settings,
            &settings.ami_token_address,
            &settings.usdt_token_address,
        ));
        let exec = TradeExecutor::new(
            Arc::clone(&settings),
            Some(Arc::new(PanoraExecutor::new(panora, &settings))),
            SignalLogger::new(dir.path()).unwrap(),
        );

        let ok = exec
            .execute_triangular(TriangularTask {
                direction: TriDirection::AmiToApt,
                cex: Venue::Mexc,
                apt_symbol: "APTUSDT".to_string(),
                ami_symbol: "AMIUSDT".to_string(),
                qty_from: 1000.0,
                cex_buy_price: 0.008,
                cex_sell_price: 4.5,
                prefetched: None,
            })
            .await;
        // Dry-run still succeeds; the record carries the gate outcome
        assert!(ok);

        let records = exec.signals.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "TRI_AMI_TO_APT");
        assert_eq!(records[0]["balance_gate"], "FAIL");
        assert_eq!(records[0]["dry_run"], true);
    }

    #[tokio::test]
    async fn test_dex_cex_without_panora_executor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = dry_run_executor(dir.path());

        let ok = exec
            .execute_dex_cex(
                DexCexDirection::BuyDexSellCex,
                Venue::Mexc,
                "AMIUSDT",
                0.007,
                0.008,
                100.0,
                None,
            )
            .await;
        assert!(!ok);
    }
}
