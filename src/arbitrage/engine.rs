//! Arbitrage detection engine.
//!
//! Every tick (typically 100 ms) the engine reads the latest store
//! snapshot and checks three shapes: CEX-CEX, DEX-CEX and triangular.
//! Promising DEX candidates are re-verified against a freshly computed
//! quote (cooldown-gated per direction) before execution is dispatched as
//! a detached task.

use crate::arbitrage::cooldown::VerifyCooldown;
use crate::arbitrage::executor::{TradeExecutor, TriangularTask};
use crate::collector::PriceStore;
use crate::config::Settings;
use crate::exchanges::panora::{PanoraClient, SwapQuote};
use crate::types::{
    dex_symbol, DexCexDirection, Quote, TriDirection, Venue, DEFAULT_QUOTE_MAX_AGE_S,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Minimum seconds between verify calls per direction
const VERIFY_COOLDOWN: Duration = Duration::from_secs(3);

/// Price summary heartbeat interval
const PRICE_LOG_INTERVAL_S: f64 = 5.0;

/// Net profit of buying `qty` at `buy_price` and selling at `sell_price`
/// under proportional fees. Returns (buy_volume, sell_volume, profit).
pub fn calc_profit(
    buy_price: f64,
    sell_price: f64,
    qty: f64,
    buy_fee_rate: f64,
    sell_fee_rate: f64,
) -> (f64, f64, f64) {
    let buy_vol = qty * buy_price;
    let sell_vol = qty * sell_price;
    let profit = sell_vol - buy_vol - buy_vol * buy_fee_rate - sell_vol * sell_fee_rate;
    (buy_vol, sell_vol, profit)
}

fn log_opportunity(
    buy_exchange: Venue,
    sell_exchange: Venue,
    buy_price: f64,
    sell_price: f64,
    qty: f64,
    buy_vol: f64,
    sell_vol: f64,
    profit: f64,
) {
    info!(
        "🎯 ARB OPPORTUNITY  BUY {} @ {:.8}  SELL {} @ {:.8}  QTY={:.6}  BUY_VOL={:.4}  SELL_VOL={:.4}  PROFIT={:.4}",
        buy_exchange, buy_price, sell_exchange, sell_price, qty, buy_vol, sell_vol, profit
    );
}

/// Detects arbitrage opportunities between Bybit, MEXC and Panora DEX.
pub struct ArbEngine {
    store: Arc<PriceStore>,
    settings: Arc<Settings>,
    // One client per DEX direction so each direction's unit-price cache is
    // warmed and hit independently
    panora_client: Option<Arc<PanoraClient>>,         // AMI→USDT
    panora_apt_client: Option<Arc<PanoraClient>>,     // APT→AMI
    panora_ami_apt_client: Option<Arc<PanoraClient>>, // AMI→APT
    executor: Option<Arc<TradeExecutor>>,
    cooldown: VerifyCooldown,
    enable_panora_arb: bool,
    enable_bybit_arb: bool,
    enable_mexc_arb: bool,
    slippage_tolerance: f64, // rate, e.g. 0.001
    sym_ami_usdt: String,
    sym_apt_ami: String,
    sym_ami_apt: String,
}

impl ArbEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PriceStore>,
        settings: Arc<Settings>,
        panora_client: Option<Arc<PanoraClient>>,
        panora_apt_client: Option<Arc<PanoraClient>>,
        panora_ami_apt_client: Option<Arc<PanoraClient>>,
        executor: Option<Arc<TradeExecutor>>,
        enable_panora_arb: bool,
        enable_bybit_arb: bool,
        enable_mexc_arb: bool,
    ) -> Self {
        let sym_ami_usdt = dex_symbol(&settings.ami_token_address, &settings.usdt_token_address);
        let sym_apt_ami = dex_symbol(&settings.apt_token_address, &settings.ami_token_address);
        let sym_ami_apt = dex_symbol(&settings.ami_token_address, &settings.apt_token_address);
        let slippage_tolerance = settings.slippage_tolerance_pct / 100.0;

        Self {
            store,
            panora_client,
            panora_apt_client,
            panora_ami_apt_client,
            executor,
            cooldown: VerifyCooldown::new(VERIFY_COOLDOWN),
            enable_panora_arb,
            enable_bybit_arb,
            enable_mexc_arb,
            slippage_tolerance,
            sym_ami_usdt,
            sym_apt_ami,
            sym_ami_apt,
            settings,
        }
    }

    pub async fn run(&self) {
        let s = &self.settings;
        info!(
            "ArbitrageEngine started | symbol={} bybit_fee={:.2}% mexc_fee={:.2}% panora_fee={:.2}% | panora_arb={} bybit_arb={} mexc_arb={}",
            s.cex_symbol,
            s.bybit_fee * 100.0,
            s.mexc_fee * 100.0,
            s.panora_fee * 100.0,
            on_off(self.enable_panora_arb),
            on_off(self.enable_bybit_arb),
            on_off(self.enable_mexc_arb)
        );

        let mut last_price_log = Instant::now() - Duration::from_secs(3600);
        let mut ticker =
            tokio::time::interval(Duration::from_secs_f64(s.arb_check_interval.max(0.01)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let cex_prices = self.store.get(&s.cex_symbol);
            let bybit = cex_prices.get(&Venue::Bybit).copied();
            let mexc = cex_prices.get(&Venue::Mexc).copied();

            // ── Shape A: CEX-CEX (Bybit <-> MEXC, same symbol) ──
            if self.enable_bybit_arb && self.enable_mexc_arb {
                if let (Some(b), Some(m)) = (bybit, mexc) {
                    self.check_cex_cex(b, m);
                }
            }

            if self.enable_panora_arb {
                // ── Shape B: DEX-CEX (Panora AMI/USDT vs each CEX) ──
                if let Some(panora) = self.store.get_one(&self.sym_ami_usdt, Venue::Panora) {
                    if self.enable_bybit_arb {
                        if let Some(b) = bybit {
                            self.check_dex_cex(panora, b, Venue::Bybit).await;
                        }
                    }
                    if self.enable_mexc_arb {
                        if let Some(m) = mexc {
                            self.check_dex_cex(panora, m, Venue::Mexc).await;
                        }
                    }
                }

                // ── Shape C: triangular (Panora APT/AMI vs CEX implied rate) ──
                if self.panora_apt_client.is_some() {
                    let apt_prices = self.store.get(&s.apt_cex_symbol);
                    let bybit_apt = apt_prices.get(&Venue::Bybit).copied();
                    let mexc_apt = apt_prices.get(&Venue::Mexc).copied();

                    if last_price_log.elapsed().as_secs_f64() >= PRICE_LOG_INTERVAL_S {
                        last_price_log = Instant::now();
                        self.log_price_summary(bybit, mexc, bybit_apt, mexc_apt);
                    }

                    if self.enable_bybit_arb {
                        if let (Some(ami), Some(apt)) = (bybit, bybit_apt) {
                            self.check_triangular(ami, apt, Venue::Bybit).await;
                        }
                    }
                    if self.enable_mexc_arb {
                        if let (Some(ami), Some(apt)) = (mexc, mexc_apt) {
                            self.check_triangular(ami, apt, Venue::Mexc).await;
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  CEX-CEX
    // ------------------------------------------------------------------ //

    fn check_cex_cex(&self, bybit: Quote, mexc: Quote) {
        if bybit.is_stale(DEFAULT_QUOTE_MAX_AGE_S) || mexc.is_stale(DEFAULT_QUOTE_MAX_AGE_S) {
            return;
        }
        let s = &self.settings;

        // Direction 1: buy Bybit ask → sell MEXC bid
        let qty = bybit.ask_qty.min(mexc.bid_qty);
        if qty > 0.0 {
            let (bv, sv, profit) = calc_profit(bybit.ask, mexc.bid, qty, s.bybit_fee, s.mexc_fee);
            if profit > s.min_profit_threshold {
                log_opportunity(Venue::Bybit, Venue::Mexc, bybit.ask, mexc.bid, qty, bv, sv, profit);
                self.dispatch_cex_cex(Venue::Bybit, Venue::Mexc, bybit.ask, mexc.bid, qty);
            }
        }

        // Direction 2: buy MEXC ask → sell Bybit bid
        let qty = mexc.ask_qty.min(bybit.bid_qty);
        if qty > 0.0 {
            let (bv, sv, profit) = calc_profit(mexc.ask, bybit.bid, qty, s.mexc_fee, s.bybit_fee);
            if profit > s.min_profit_threshold {
                log_opportunity(Venue::Mexc, Venue::Bybit, mexc.ask, bybit.bid, qty, bv, sv, profit);
                self.dispatch_cex_cex(Venue::Mexc, Venue::Bybit, mexc.ask, bybit.bid, qty);
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  DEX-CEX (Panora AMI/USDT vs a CEX)
    // ------------------------------------------------------------------ //

    /// Verify selling AMI on Panora: send `qty` AMI → receive ? USDT.
    /// Returns (verified price per AMI, quote) so the caller can reuse the
    /// quote for on-chain submission without a second API call.
    async fn verify_panora_sell(&self, qty: f64) -> Option<(f64, SwapQuote)> {
        let client = self.panora_client.as_ref()?;
        let s = &self.settings;
        let quote = client
            .get_swap_quote(
                qty,
                Some(&s.ami_token_address),
                Some(&s.usdt_token_address),
                false,
                None,
            )
            .await?;
        let usdt_out = quote.to_token_amount().filter(|v| *v > 0.0)?;
        Some((usdt_out / qty, quote))
    }

    /// Verify buying AMI from Panora: send USDT → receive ? AMI.
    /// Returns (verified price, verified AMI qty, quote).
    async fn verify_panora_buy(
        &self,
        qty: f64,
        estimated_price: f64,
    ) -> Option<(f64, f64, SwapQuote)> {
        let client = self.panora_client.as_ref()?;
        let s = &self.settings;
        let usdt_to_spend = qty * estimated_price;
        let quote = client
            .get_swap_quote(
                usdt_to_spend,
                Some(&s.usdt_token_address),
                Some(&s.ami_token_address),
                false,
                None,
            )
            .await?;
        let ami_out = quote.to_token_amount().filter(|v| *v > 0.0)?;
        Some((usdt_to_spend / ami_out, ami_out, quote))
    }

    async fn check_dex_cex(&self, panora: Quote, cex: Quote, cex_name: Venue) {
        let s = &self.settings;
        let max_age = s.dex_cex_quote_max_age_s;
        if panora.is_stale(max_age) || cex.is_stale(max_age) {
            return;
        }
        let cex_fee = s.cex_fee(cex_name);

        // Direction 1: buy Panora (ask) → sell CEX (bid)
        let qty = panora.ask_qty.min(cex.bid_qty);
        if qty > 0.0 {
            let (_bv, _sv, profit) = calc_profit(panora.ask, cex.bid, qty, s.panora_fee, cex_fee);
            if profit > s.min_profit_threshold {
                if s.skip_panora_verify {
                    warn!(
                        "⚠️ SKIP VERIFY | BUY Panora → SELL {} | est_price={:.8} qty={:.6} est_profit={:.4}",
                        cex_name, panora.ask, qty, profit
                    );
                    let prefetched = match self.panora_client.as_ref() {
                        Some(client) => {
                            client
                                .get_swap_quote(
                                    qty * panora.ask,
                                    Some(&s.usdt_token_address),
                                    Some(&s.ami_token_address),
                                    false,
                                    Some(s.panora_api_slippage_pct),
                                )
                                .await
                        }
                        None => None,
                    };
                    self.dispatch_dex_cex(
                        DexCexDirection::BuyDexSellCex,
                        cex_name,
                        panora.ask,
                        cex.bid,
                        qty,
                        prefetched,
                    );
                    return;
                }
                if !self.cooldown.try_begin(&format!("DEX_BUY_{}", cex_name)) {
                    return;
                }
                info!(
                    "🔍 Verifying Panora price | BUY Panora → SELL {} | est_price={:.8} qty={:.6} est_profit={:.4}",
                    cex_name, panora.ask, qty, profit
                );
                match self.verify_panora_buy(qty, panora.ask).await {
                    Some((v_price, v_qty, v_quote)) => {
                        let slippage = (v_price - panora.ask) / panora.ask * 100.0;
                        let (bv2, sv2, profit2) =
                            calc_profit(v_price, cex.bid, v_qty, s.panora_fee, cex_fee);
                        if profit2 > s.min_profit_threshold {
                            info!(
                                "✅ VERIFIED ARB  BUY Panora @ {:.8} (est {:.8}, slip {:+.3}%)  SELL {} @ {:.8}  QTY={:.6}  BUY_VOL={:.4}  SELL_VOL={:.4}  PROFIT={:.4}",
                                v_price, panora.ask, slippage, cex_name, cex.bid, v_qty, bv2, sv2, profit2
                            );
                            self.dispatch_dex_cex(
                                DexCexDirection::BuyDexSellCex,
                                cex_name,
                                v_price,
                                cex.bid,
                                v_qty,
                                Some(v_quote),
                            );
                        } else {
                            warn!(
                                "❌ ARB CANCELED after verify | BUY Panora @ {:.8} (est {:.8}, slip {:+.3}%) → profit {:.4} < threshold",
                                v_price, panora.ask, slippage, profit2
                            );
                        }
                    }
                    None => {
                        warn!(
                            "⚠️ ARB UNVERIFIED (Panora API fail) | BUY Panora @ {:.8} SELL {} @ {:.8} est_profit={:.4}",
                            panora.ask, cex_name, cex.bid, profit
                        );
                    }
                }
            }
        }

        // Direction 2: buy CEX (ask) → sell Panora (bid)
        let qty = cex.ask_qty.min(panora.bid_qty);
        if qty > 0.0 {
            let (_bv, _sv, profit) = calc_profit(cex.ask, panora.bid, qty, cex_fee, s.panora_fee);
            if profit > s.min_profit_threshold {
                if s.skip_panora_verify {
                    warn!(
                        "⚠️ SKIP VERIFY | BUY {} → SELL Panora | est_price={:.8} qty={:.6} est_profit={:.4}",
                        cex_name, panora.bid, qty, profit
                    );
                    let prefetched = match self.panora_client.as_ref() {
                        Some(client) => {
                            client
                                .get_swap_quote(
                                    qty,
                                    Some(&s.ami_token_address),
                                    Some(&s.usdt_token_address),
                                    false,
                                    Some(s.panora_api_slippage_pct),
                                )
                                .await
                        }
                        None => None,
                    };
                    self.dispatch_dex_cex(
                        DexCexDirection::BuyCexSellDex,
                        cex_name,
                        cex.ask,
                        panora.bid,
                        qty,
                        prefetched,
                    );
                    return;
                }
                if !self.cooldown.try_begin(&format!("DEX_SELL_{}", cex_name)) {
                    return;
                }
                info!(
                    "🔍 Verifying Panora price | BUY {} → SELL Panora | est_price={:.8} qty={:.6} est_profit={:.4}",
                    cex_name, panora.bid, qty, profit
                );
                match self.verify_panora_sell(qty).await {
                    Some((v_price, v_quote)) => {
                        let slippage = (v_price - panora.bid) / panora.bid * 100.0;
                        let (bv2, sv2, profit2) =
                            calc_profit(cex.ask, v_price, qty, cex_fee, s.panora_fee);
                        if profit2 > s.min_profit_threshold {
                            info!(
                                "✅ VERIFIED ARB  BUY {} @ {:.8}  SELL Panora @ {:.8} (est {:.8}, slip {:+.3}%)  QTY={:.6}  BUY_VOL={:.4}  SELL_VOL={:.4}  PROFIT={:.4}",
                                cex_name, cex.ask, v_price, panora.bid, slippage, qty, bv2, sv2, profit2
                            );
                            self.dispatch_dex_cex(
                                DexCexDirection::BuyCexSellDex,
                                cex_name,
                                cex.ask,
                                v_price,
                                qty,
                                Some(v_quote),
                            );
                        } else {
                            warn!(
                                "❌ ARB CANCELED after verify | SELL Panora @ {:.8} (est {:.8}, slip {:+.3}%) → profit {:.4} < threshold",
                                v_price, panora.bid, slippage, profit2
                            );
                        }
                    }
                    None => {
                        warn!(
                            "⚠️ ARB UNVERIFIED (Panora API fail) | BUY {} @ {:.8} SELL Panora @ {:.8} est_profit={:.4}",
                            cex_name, cex.ask, panora.bid, profit
                        );
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  Triangular (Panora APT/AMI vs CEX implied rate)
    // ------------------------------------------------------------------ //

    /// Send `qty_apt` APT → receive ? AMI on Panora. Returns (AMI per APT, quote).
    async fn verify_apt_to_ami(&self, qty_apt: f64) -> Option<(f64, SwapQuote)> {
        let client = self.panora_apt_client.as_ref()?;
        let s = &self.settings;
        let quote = client
            .get_swap_quote(
                qty_apt,
                Some(&s.apt_token_address),
                Some(&s.ami_token_address),
                false,
                None,
            )
            .await?;
        let ami_out = quote.to_token_amount().filter(|v| *v > 0.0)?;
        Some((ami_out / qty_apt, quote))
    }

    /// Send `qty_ami` AMI → receive ? APT on Panora. Returns (APT per AMI, quote).
    /// Prefers the AMI→APT client so that direction's unit-price cache is
    /// hit correctly.
    async fn verify_ami_to_apt(&self, qty_ami: f64) -> Option<(f64, SwapQuote)> {
        let client = self
            .panora_ami_apt_client
            .as_ref()
            .or(self.panora_apt_client.as_ref())?;
        let s = &self.settings;
        let quote = client
            .get_swap_quote(
                qty_ami,
                Some(&s.ami_token_address),
                Some(&s.apt_token_address),
                false,
                None,
            )
            .await?;
        let apt_out = quote.to_token_amount().filter(|v| *v > 0.0)?;
        Some((apt_out / qty_ami, quote))
    }

    async fn check_triangular(&self, cex_ami: Quote, cex_apt: Quote, cex_name: Venue) {
        let s = &self.settings;
        let max_age = s.tri_quote_max_age_s;
        if cex_ami.is_stale(max_age) || cex_apt.is_stale(max_age) {
            return;
        }
        if self.panora_apt_client.is_none() {
            return;
        }

        let cex_fee = s.cex_fee(cex_name);
        let notional = s.trade_amount_usdt;

        // ── Direction 1: buy APT on CEX → APT→AMI on Panora → sell AMI on CEX ──
        let pan_apt_ami = self
            .store
            .get_one(&self.sym_apt_ami, Venue::Panora)
            .filter(|q| !q.is_stale(max_age));

        if let Some(pan) = pan_apt_ami {
            let qty_apt_est = notional / cex_apt.ask;
            let ami_est = qty_apt_est * pan.ask;
            let usdt_out_est = ami_est * cex_ami.bid;
            let fees_est = notional * cex_fee + notional * s.panora_fee + usdt_out_est * cex_fee;
            let profit_est = usdt_out_est - notional - fees_est;

            // CEX-implied APT/AMI rate vs Panora
            let cex_implied = cex_apt.bid / cex_ami.ask;
            let spread_pct = (pan.ask - cex_implied) / cex_implied * 100.0;

            if profit_est > s.min_profit_threshold {
                if s.skip_panora_verify {
                    warn!(
                        "⚠️ [TRI-DIR1] SKIP VERIFY | {} | est_profit={:.4} USDT",
                        cex_name, profit_est
                    );
                    let prefetched = match self.panora_apt_client.as_ref() {
                        Some(client) => {
                            client
                                .get_swap_quote(
                                    qty_apt_est,
                                    Some(&s.apt_token_address),
                                    Some(&s.ami_token_address),
                                    false,
                                    Some(s.panora_api_slippage_pct),
                                )
                                .await
                        }
                        None => None,
                    };
                    self.dispatch_triangular(
                        TriDirection::AptToAmi,
                        cex_name,
                        qty_apt_est,
                        cex_apt.ask,
                        cex_ami.bid,
                        prefetched,
                    );
                    return;
                }
                info!(
                    "🔍 [TRI-DIR1] {} | Panora APT→AMI={:.4}  CEX-implied={:.4}  spread={:+.3}%  est_profit={:.4} USDT",
                    cex_name, pan.ask, cex_implied, spread_pct, profit_est
                );
                if !self.cooldown.try_begin(&format!("TRI_DIR1_{}", cex_name)) {
                    return;
                }
                match self.verify_apt_to_ami(qty_apt_est).await {
                    Some((v_rate, v_quote)) => {
                        let slippage = (v_rate - pan.ask) / pan.ask * 100.0;

                        // Worse than tolerance → reprice pessimistically from
                        // the store estimate instead of trusting the outlier
                        let adjusted_rate = if slippage < -self.slippage_tolerance * 100.0 {
                            warn!(
                                "⚠️ [TRI-DIR1] Slippage {:.3}% exceeds tolerance {:.3}% — using conservative rate",
                                slippage,
                                -self.slippage_tolerance * 100.0
                            );
                            pan.ask * (1.0 - self.slippage_tolerance)
                        } else {
                            v_rate
                        };

                        let v_ami_out = qty_apt_est * adjusted_rate;
                        let v_usdt_out = v_ami_out * cex_ami.bid;
                        let v_fees =
                            notional * cex_fee + notional * s.panora_fee + v_usdt_out * cex_fee;
                        let v_profit = v_usdt_out - notional - v_fees;

                        if v_profit > s.min_profit_threshold {
                            info!(
                                "✅ [TRI-DIR1] VERIFIED | {} | buy {:.4} APT @ {:.4} USDT → Panora APT→AMI @ {:.4} (est {:.4}, slip {:+.3}%) → sell {:.2} AMI @ {:.8} USDT | PROFIT={:.4} USDT",
                                cex_name, qty_apt_est, cex_apt.ask, v_rate, pan.ask, slippage, v_ami_out, cex_ami.bid, v_profit
                            );
                            self.dispatch_triangular(
                                TriDirection::AptToAmi,
                                cex_name,
                                qty_apt_est,
                                cex_apt.ask,
                                cex_ami.bid,
                                Some(v_quote),
                            );
                        } else {
                            warn!(
                                "❌ [TRI-DIR1] CANCELED after verify | Panora rate={:.4} (slip {:+.3}%) → profit {:.4} < threshold",
                                v_rate, slippage, v_profit
                            );
                        }
                    }
                    None => {
                        warn!(
                            "⚠️ [TRI-DIR1] UNVERIFIED (Panora API fail) | est_profit={:.4}",
                            profit_est
                        );
                    }
                }
            }
        }

        // ── Direction 2: buy AMI on CEX → AMI→APT on Panora → sell APT on CEX ──
        let pan_ami_apt = self
            .store
            .get_one(&self.sym_ami_apt, Venue::Panora)
            .filter(|q| !q.is_stale(max_age));

        if let Some(pan) = pan_ami_apt {
            let qty_ami_est = notional / cex_ami.ask;
            let apt_est = qty_ami_est * pan.ask;
            let usdt_out_est = apt_est * cex_apt.bid;
            let fees_est = notional * cex_fee + notional * s.panora_fee + usdt_out_est * cex_fee;
            let profit_est = usdt_out_est - notional - fees_est;

            let cex_implied_rev = cex_ami.bid / cex_apt.ask;
            let spread_pct_rev = (pan.ask - cex_implied_rev) / cex_implied_rev * 100.0;

            if profit_est > s.min_profit_threshold {
                if s.skip_panora_verify {
                    warn!(
                        "⚠️ [TRI-DIR2] SKIP VERIFY | {} | est_profit={:.4} USDT",
                        cex_name, profit_est
                    );
                    let client = self
                        .panora_ami_apt_client
                        .as_ref()
                        .or(self.panora_apt_client.as_ref());
                    let prefetched = match client {
                        Some(client) => {
                            client
                                .get_swap_quote(
                                    qty_ami_est,
                                    Some(&s.ami_token_address),
                                    Some(&s.apt_token_address),
                                    false,
                                    Some(s.panora_api_slippage_pct),
                                )
                                .await
                        }
                        None => None,
                    };
                    self.dispatch_triangular(
                        TriDirection::AmiToApt,
                        cex_name,
                        qty_ami_est,
                        cex_ami.ask,
                        cex_apt.bid,
                        prefetched,
                    );
                    return;
                }
                info!(
                    "🔍 [TRI-DIR2] {} | Panora AMI→APT={:.8}  CEX-implied={:.8}  spread={:+.3}%  est_profit={:.4} USDT",
                    cex_name, pan.ask, cex_implied_rev, spread_pct_rev, profit_est
                );
                if !self.cooldown.try_begin(&format!("TRI_DIR2_{}", cex_name)) {
                    return;
                }
                match self.verify_ami_to_apt(qty_ami_est).await {
                    Some((v_rate, v_quote)) => {
                        let slippage = (v_rate - pan.ask) / pan.ask * 100.0;
                        let adjusted_rate = if slippage < -self.slippage_tolerance * 100.0 {
                            warn!(
                                "⚠️ [TRI-DIR2] Slippage {:.3}% exceeds tolerance {:.3}% — using conservative rate",
                                slippage,
                                -self.slippage_tolerance * 100.0
                            );
                            pan.ask * (1.0 - self.slippage_tolerance)
                        } else {
                            v_rate
                        };

                        let v_apt_out = qty_ami_est * adjusted_rate;
                        let v_usdt_out = v_apt_out * cex_apt.bid;
                        let v_fees =
                            notional * cex_fee + notional * s.panora_fee + v_usdt_out * cex_fee;
                        let v_profit = v_usdt_out - notional - v_fees;

                        if v_profit > s.min_profit_threshold {
                            info!(
                                "✅ [TRI-DIR2] VERIFIED | {} | buy {:.2} AMI @ {:.8} USDT → Panora AMI→APT @ {:.8} (est {:.8}, slip {:+.3}%) → sell {:.4} APT @ {:.4} USDT | PROFIT={:.4} USDT",
                                cex_name, qty_ami_est, cex_ami.ask, v_rate, pan.ask, slippage, v_apt_out, cex_apt.bid, v_profit
                            );
                            self.dispatch_triangular(
                                TriDirection::AmiToApt,
                                cex_name,
                                qty_ami_est,
                                cex_ami.ask,
                                cex_apt.bid,
                                Some(v_quote),
                            );
                        } else {
                            warn!(
                                "❌ [TRI-DIR2] CANCELED after verify | Panora rate={:.8} (slip {:+.3}%) → profit {:.4} < threshold",
                                v_rate, slippage, v_profit
                            );
                        }
                    }
                    None => {
                        warn!(
                            "⚠️ [TRI-DIR2] UNVERIFIED (Panora API fail) | est_profit={:.4}",
                            profit_est
                        );
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------ //
    //  Dispatch + heartbeat
    // ------------------------------------------------------------------ //

    fn dispatch_cex_cex(
        &self,
        buy_exchange: Venue,
        sell_exchange: Venue,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
    ) {
        if let Some(executor) = &self.executor {
            let executor = Arc::clone(executor);
            let symbol = self.settings.cex_symbol.clone();
            tokio::spawn(async move {
                executor
                    .execute_cex_cex(buy_exchange, sell_exchange, &symbol, buy_price, sell_price, qty)
                    .await;
            });
        }
    }

    fn dispatch_dex_cex(
        &self,
        direction: DexCexDirection,
        cex: Venue,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
        prefetched: Option<SwapQuote>,
    ) {
        if let Some(executor) = &self.executor {
            let executor = Arc::clone(executor);
            let symbol = self.settings.cex_symbol.clone();
            tokio::spawn(async move {
                executor
                    .execute_dex_cex(direction, cex, &symbol, buy_price, sell_price, qty, prefetched)
                    .await;
            });
        }
    }

    fn dispatch_triangular(
        &self,
        direction: TriDirection,
        cex: Venue,
        qty_from: f64,
        cex_buy_price: f64,
        cex_sell_price: f64,
        prefetched: Option<SwapQuote>,
    ) {
        if let Some(executor) = &self.executor {
            let executor = Arc::clone(executor);
            let task = TriangularTask {
                direction,
                cex,
                apt_symbol: self.settings.apt_cex_symbol.clone(),
                ami_symbol: self.settings.cex_symbol.clone(),
                qty_from,
                cex_buy_price,
                cex_sell_price,
                prefetched,
            };
            tokio::spawn(async move {
                executor.execute_triangular(task).await;
            });
        }
    }

    fn log_price_summary(
        &self,
        bybit_ami: Option<Quote>,
        mexc_ami: Option<Quote>,
        bybit_apt: Option<Quote>,
        mexc_apt: Option<Quote>,
    ) {
        let max_age = self.settings.tri_quote_max_age_s;
        let ami = bybit_ami.or(mexc_ami);
        let apt = bybit_apt.or(mexc_apt);

        let apt_str = apt
            .map(|q| format!("{:.4}/{:.4}", q.bid, q.ask))
            .unwrap_or_else(|| "N/A".to_string());
        let ami_str = ami
            .map(|q| format!("{:.6}/{:.6}", q.bid, q.ask))
            .unwrap_or_else(|| "N/A".to_string());

        let pan_apt_ami = self
            .store
            .get_one(&self.sym_apt_ami, Venue::Panora)
            .filter(|q| !q.is_stale(max_age));
        let pan_ami_apt = self
            .store
            .get_one(&self.sym_ami_apt, Venue::Panora)
            .filter(|q| !q.is_stale(max_age));
        let apt_ami_str = pan_apt_ami
            .map(|q| format!("{:.4}", q.ask))
            .unwrap_or_else(|| "N/A".to_string());
        let ami_apt_str = pan_ami_apt
            .map(|q| format!("{:.8}", q.ask))
            .unwrap_or_else(|| "N/A".to_string());

        let implied_str = match (apt, ami) {
            (Some(apt), Some(ami)) if ami.ask > 0.0 && apt.ask > 0.0 => format!(
                "CEX-implied APT/AMI={:.4}  AMI/APT={:.8}",
                apt.bid / ami.ask,
                ami.bid / apt.ask
            ),
            _ => String::new(),
        };

        info!(
            "[PRICES] APT/USDT={}  AMI/USDT={}  Panora APT→AMI={}  AMI→APT={}  {}",
            apt_str, ami_str, apt_ami_str, ami_apt_str, implied_str
        );
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalLogger;

    #[test]
    fn test_profit_zero_fee_two_cex() {
        // Buy bybit @ 100 (ask_qty 2), sell mexc @ 102 (bid_qty 3)
        let qty = 2f64.min(3.0);
        let (bv, sv, profit) = calc_profit(100.0, 102.0, qty, 0.0, 0.0);
        assert_eq!(qty, 2.0);
        assert_eq!(bv, 200.0);
        assert_eq!(sv, 204.0);
        assert!((profit - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_negative_under_dex_fees() {
        // 0.25% spread cannot cover 0.3% DEX fee + 0.1% CEX fee
        let (_, _, profit) = calc_profit(0.00800, 0.00802, 10_000.0, 0.003, 0.001);
        assert!(profit < 0.0);
    }

    #[test]
    fn test_profit_monotonicity() {
        let base = calc_profit(100.0, 101.0, 5.0, 0.001, 0.001).2;
        // Non-decreasing in sell price
        assert!(calc_profit(100.0, 102.0, 5.0, 0.001, 0.001).2 >= base);
        // Non-increasing in buy price
        assert!(calc_profit(100.5, 101.0, 5.0, 0.001, 0.001).2 <= base);
        // Non-decreasing in qty while gross is positive
        assert!(calc_profit(100.0, 101.0, 6.0, 0.001, 0.001).2 >= base);
    }

    #[test]
    fn test_profit_matches_recompute_at_detection() {
        // Recomputing from the same inputs reproduces the detected profit
        let (_, _, a) = calc_profit(0.0070, 0.0080, 50.0, 0.001, 0.001);
        let (_, _, b) = calc_profit(0.0070, 0.0080, 50.0, 0.001, 0.001);
        assert!((a - b).abs() <= 1e-6);
    }

    fn engine_with_dry_executor(dir: &std::path::Path) -> ArbEngine {
        let mut settings = Settings::from_env().unwrap();
        settings.dry_run = true;
        settings.min_profit_threshold = 0.0;
        settings.bybit_fee = 0.0;
        settings.mexc_fee = 0.0;
        settings.trade_amount_usdt = 1_000.0;
        let settings = Arc::new(settings);

        let executor = Arc::new(TradeExecutor::new(
            Arc::clone(&settings),
            None,
            SignalLogger::new(dir).unwrap(),
        ));
        ArbEngine::new(
            Arc::new(PriceStore::new()),
            settings,
            None,
            None,
            None,
            Some(executor),
            false,
            true,
            true,
        )
    }

    #[tokio::test]
    async fn test_cex_cex_detection_dispatches_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dry_executor(dir.path());

        // Bybit ask 100 x2, MEXC bid 102 x3; the reverse direction has no
        // sellable quantity
        let bybit = Quote::new(99.0, 100.0, 1.0, 2.0);
        let mexc = Quote::new(102.0, 102.5, 3.0, 0.0);
        engine.check_cex_cex(bybit, mexc);

        // Execution runs as a detached task
        tokio::time::sleep(Duration::from_millis(100)).await;

        let logger = SignalLogger::new(dir.path()).unwrap();
        let records = logger.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "CEX_CEX");
        assert_eq!(records[0]["buy_exchange"], "Bybit");
        assert_eq!(records[0]["sell_exchange"], "MEXC");
        assert!((records[0]["qty"].as_f64().unwrap() - 2.0).abs() < 1e-9);
        assert!((records[0]["profit_usdt"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    }

    fn engine_with_panora(
        dir: &std::path::Path,
        usdt_per_ami_unit_price: f64,
    ) -> (ArbEngine, Arc<Settings>) {
        let mut settings = Settings::from_env().unwrap();
        settings.dry_run = true;
        settings.min_profit_threshold = 0.0;
        settings.bybit_fee = 0.0;
        settings.mexc_fee = 0.0;
        settings.panora_fee = 0.0;
        settings.trade_amount_usdt = 1_000.0;
        settings.panora_api_min_interval = 0.0;
        settings.bybit_api_key = String::new();
        settings.mexc_api_key = String::new();
        let settings = Arc::new(settings);

        let client = Arc::new(PanoraClient::new(
            &settings,
            &settings.ami_token_address,
            &settings.usdt_token_address,
        ));
        // Verification of "buy on Panora" spends USDT for AMI, so the warmed
        // direction is USDT→AMI at 1/price AMI per USDT
        client.seed_unit_price(
            &settings.usdt_token_address,
            &settings.ami_token_address,
            1.0 / usdt_per_ami_unit_price,
        );

        let executor = Arc::new(TradeExecutor::new(
            Arc::clone(&settings),
            None,
            SignalLogger::new(dir).unwrap(),
        ));
        let engine = ArbEngine::new(
            Arc::new(PriceStore::new()),
            Arc::clone(&settings),
            Some(client),
            None,
            None,
            Some(executor),
            true,
            true,
            true,
        );
        (engine, settings)
    }

    #[tokio::test]
    async fn test_dex_cex_verified_within_slippage_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        // Store says 0.0070; the verified (synthetic) quote says 0.00705
        let (engine, _settings) = engine_with_panora(dir.path(), 0.00705);

        let panora = Quote::new(0.0070, 0.0070, 10_000.0, 10_000.0);
        let cex = Quote::new(0.0080, 0.0081, 50.0, 0.0);
        engine.check_dex_cex(panora, cex, Venue::Bybit).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let logger = SignalLogger::new(dir.path()).unwrap();
        let records = logger.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "DEX_CEX");
        assert_eq!(records[0]["direction"], "BUY_DEX_SELL_CEX");
        // Execution reuses the verified price, not the store estimate
        let buy_price = records[0]["buy_price"].as_f64().unwrap();
        assert!((buy_price - 0.00705).abs() < 1e-9);
        assert!(records[0]["profit_usdt"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_dex_cex_verified_slippage_blowout_is_canceled() {
        let dir = tempfile::tempdir().unwrap();
        // Store says 0.0070, but verification reprices to 0.0090, above the
        // CEX bid, so the recomputed profit falls under the threshold
        let (engine, _settings) = engine_with_panora(dir.path(), 0.0090);

        let panora = Quote::new(0.0070, 0.0070, 10_000.0, 10_000.0);
        let cex = Quote::new(0.0080, 0.0081, 50.0, 0.0);
        engine.check_dex_cex(panora, cex, Venue::Bybit).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let logger = SignalLogger::new(dir.path()).unwrap();
        assert!(logger.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dex_cex_verify_cooldown_suppresses_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _settings) = engine_with_panora(dir.path(), 0.00705);

        let panora = Quote::new(0.0070, 0.0070, 10_000.0, 10_000.0);
        let cex = Quote::new(0.0080, 0.0081, 50.0, 0.0);
        engine.check_dex_cex(panora, cex, Venue::Bybit).await;
        // Same opportunity on the next tick: verification is cooldown-gated
        engine.check_dex_cex(panora, cex, Venue::Bybit).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let logger = SignalLogger::new(dir.path()).unwrap();
        assert_eq!(logger.read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_cex_quote_aborts_detection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dry_executor(dir.path());

        let mut bybit = Quote::new(99.0, 100.0, 1.0, 2.0);
        bybit.timestamp = Instant::now() - Duration::from_secs(30);
        let mexc = Quote::new(102.0, 102.5, 3.0, 0.0);
        engine.check_cex_cex(bybit, mexc);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let logger = SignalLogger::new(dir.path()).unwrap();
        assert!(logger.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprofitable_spread_not_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dry_executor(dir.path());

        // Inverted market: nothing to detect in either direction
        let bybit = Quote::new(99.0, 100.0, 5.0, 5.0);
        let mexc = Quote::new(98.0, 99.5, 5.0, 5.0);
        engine.check_cex_cex(bybit, mexc);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let logger = SignalLogger::new(dir.path()).unwrap();
        assert!(logger.read_all().unwrap().is_empty());
    }
}
