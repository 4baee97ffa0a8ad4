// Cross-venue arbitrage bot entry point.
//
// Wires the price-collection fabric (Bybit websocket, MEXC REST poller,
// Panora DEX pollers) to the arbitrage engine and the trade executor,
// then runs until SIGINT/SIGTERM.

use ami_arb_bot::aptos::LocalAccount;
use ami_arb_bot::arbitrage::{ArbEngine, TradeExecutor};
use ami_arb_bot::collector::PriceStore;
use ami_arb_bot::config::Settings;
use ami_arb_bot::exchanges::{BybitFeed, MexcFeed, PanoraClient, PanoraExecutor, PanoraPoller};
use ami_arb_bot::signals::SignalLogger;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Check which exchange accounts are configured and log the results.
///
/// Returns (enable_panora, enable_bybit, enable_mexc). An exchange is
/// enabled only when its credentials are present and parseable — the arb
/// engine skips disabled directions entirely.
fn validate_accounts(settings: &Settings) -> (bool, bool, bool) {
    let rule = "━".repeat(62);
    info!("{}  ACCOUNT VALIDATION  {}", &rule[..20 * 3], &rule[..20 * 3]);

    let mut enable_panora = false;
    if settings.aptos_private_key.is_empty() {
        warn!("[Panora/Aptos] ✗  APTOS_PRIVATE_KEY not set → DEX arb DISABLED");
    } else {
        match LocalAccount::from_private_key_hex(&settings.aptos_private_key) {
            Ok(account) => {
                enable_panora = true;
                let addr = account.address();
                info!(
                    "[Panora/Aptos] ✓  wallet loaded → {}…  (arb ENABLED)",
                    &addr[..addr.len().min(20)]
                );
            }
            Err(e) => {
                error!(
                    "[Panora/Aptos] ✗  APTOS_PRIVATE_KEY invalid ({:#}) → DEX arb DISABLED",
                    e
                );
            }
        }
    }

    let enable_bybit = !settings.bybit_api_key.is_empty() && !settings.bybit_api_secret.is_empty();
    if enable_bybit {
        info!(
            "[Bybit]        ✓  api_key={}  (arb ENABLED)",
            mask_key(&settings.bybit_api_key)
        );
    } else {
        warn!("[Bybit]        ✗  BYBIT_API_KEY / BYBIT_API_SECRET not set → Bybit arb DISABLED");
    }

    let enable_mexc = !settings.mexc_api_key.is_empty() && !settings.mexc_api_secret.is_empty();
    if enable_mexc {
        info!(
            "[MEXC]         ✓  api_key={}  (arb ENABLED)",
            mask_key(&settings.mexc_api_key)
        );
    } else {
        warn!("[MEXC]         ✗  MEXC_API_KEY / MEXC_API_SECRET not set → MEXC arb DISABLED");
    }

    let mut enabled = Vec::new();
    if enable_panora {
        enabled.push("Panora");
    }
    if enable_bybit {
        enabled.push("Bybit");
    }
    if enable_mexc {
        enabled.push("MEXC");
    }

    if enabled.is_empty() {
        error!("[Arb] No valid accounts found — bot will monitor prices only (no trades)");
    } else {
        if enable_panora && !(enable_bybit || enable_mexc) {
            warn!("[Arb] Panora enabled but no CEX credentials → DEX-CEX arb requires at least one of Bybit/MEXC");
        }
        if (enable_bybit || enable_mexc) && !enable_panora {
            warn!("[Arb] CEX(s) enabled but no Aptos wallet → only CEX-CEX arb (Bybit↔MEXC) will run");
        }
        info!("[Arb] Active exchanges: {}", enabled.join(", "));
    }
    info!("{}", rule);

    (enable_panora, enable_bybit, enable_mexc)
}

fn mask_key(key: &str) -> String {
    let visible = key.len().min(6);
    format!("{}{}", &key[..visible], "*".repeat(key.len() - visible))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let (enable_panora, enable_bybit, enable_mexc) = validate_accounts(&settings);

    let store = Arc::new(PriceStore::new());
    let symbols = vec![settings.cex_symbol.clone(), settings.apt_cex_symbol.clone()];

    // --- Market-data feeds ---
    let bybit_feed = BybitFeed::new(Arc::clone(&store), &settings, symbols.clone());
    let mexc_feed = MexcFeed::new(Arc::clone(&store), &settings, symbols);

    // DEX pollers: AMI→USDT, plus APT→AMI with inverse derivation so one
    // poll covers both directions of the APT/AMI pool
    let ami_usdt_poller = PanoraPoller::new(
        Arc::clone(&store),
        &settings,
        &settings.ami_token_address,
        &settings.usdt_token_address,
        false,
    );
    let apt_ami_poller = PanoraPoller::new(
        Arc::clone(&store),
        &settings,
        &settings.apt_token_address,
        &settings.ami_token_address,
        true,
    );
    let panora_client = ami_usdt_poller.client();
    let panora_apt_client = apt_ami_poller.client();
    // Dedicated AMI→APT client so that direction keeps its own quote caches
    let panora_ami_apt_client = Arc::new(PanoraClient::new(
        &settings,
        &settings.ami_token_address,
        &settings.apt_token_address,
    ));

    // --- Trade execution ---
    let panora_executor = Arc::new(PanoraExecutor::new(Arc::clone(&panora_client), &settings));
    let trade_executor = Arc::new(TradeExecutor::new(
        Arc::clone(&settings),
        enable_panora.then(|| Arc::clone(&panora_executor)),
        SignalLogger::new("logs")?,
    ));

    let engine = Arc::new(ArbEngine::new(
        Arc::clone(&store),
        Arc::clone(&settings),
        Some(panora_client),
        Some(panora_apt_client),
        Some(panora_ami_apt_client),
        Some(trade_executor),
        enable_panora,
        enable_bybit,
        enable_mexc,
    ));

    // --- Launch all tasks ---
    let engine_task = Arc::clone(&engine);
    let tasks = vec![
        tokio::spawn(bybit_feed.run()),
        tokio::spawn(mexc_feed.run()),
        tokio::spawn(ami_usdt_poller.run()),
        tokio::spawn(apt_ami_poller.run()),
        tokio::spawn(async move { engine_task.run().await }),
    ];

    info!(
        "Arb bot started | symbol={} bybit_fee={:.2}% mexc_fee={:.2}% panora_fee={:.2}%",
        settings.cex_symbol,
        settings.bybit_fee * 100.0,
        settings.mexc_fee * 100.0,
        settings.panora_fee * 100.0
    );

    shutdown_signal().await;
    info!("Shutdown signal received — stopping…");

    for task in &tasks {
        task.abort();
    }
    futures::future::join_all(tasks).await;

    info!("Arb bot shut down cleanly.");
    Ok(())
}
