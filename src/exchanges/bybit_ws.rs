//! Bybit streaming order-book feed.
//!
//! One persistent websocket, one subscription message covering every
//! configured symbol (topic `orderbook.1.<SYMBOL>`). Each push writes the
//! first bid/ask level into the price store. Reconnects forever with capped
//! exponential backoff; nothing here is fatal to the process.

use crate::collector::PriceStore;
use crate::config::Settings;
use crate::types::Venue;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_RECONNECT_DELAY_S: u64 = 60;
const HEARTBEAT_INTERVAL_S: f64 = 15.0;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Deserialize)]
struct BookMsg {
    topic: Option<String>,
    data: Option<BookData>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    b: Vec<Vec<String>>,
    #[serde(default)]
    a: Vec<Vec<String>>,
}

pub struct BybitFeed {
    store: Arc<PriceStore>,
    ws_url: String,
    symbols: Vec<String>,
}

impl BybitFeed {
    pub fn new(store: Arc<PriceStore>, settings: &Settings, symbols: Vec<String>) -> Self {
        Self {
            store,
            ws_url: settings.bybit_ws_url.clone(),
            symbols,
        }
    }

    pub async fn run(self) {
        let mut reconnect_delay = 1u64;
        loop {
            info!("Bybit WS connecting for {:?}...", self.symbols);
            match connect_async(self.ws_url.as_str()).await {
                Ok((mut ws, _)) => {
                    reconnect_delay = 1; // reset on successful connect

                    let topics: Vec<String> = self
                        .symbols
                        .iter()
                        .map(|s| format!("orderbook.1.{}", s))
                        .collect();
                    let sub = serde_json::json!({"op": "subscribe", "args": topics});
                    if let Err(e) = ws.send(Message::Text(sub.to_string())).await {
                        error!("Bybit WS subscribe failed: {}", e);
                    } else {
                        info!("Bybit WS subscribed to {} topics", self.symbols.len());
                        self.consume(&mut ws).await;
                    }
                }
                Err(e) => {
                    error!("Bybit WS connect error: {}", e);
                }
            }

            warn!("Bybit WS disconnected. Reconnecting in {}s...", reconnect_delay);
            sleep(Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY_S);
        }
    }

    async fn consume(&self, ws: &mut WsStream) {
        let mut last_heartbeat: HashMap<String, Instant> = HashMap::new();

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(raw)) => {
                    let parsed: BookMsg = match serde_json::from_str(&raw) {
                        Ok(p) => p,
                        Err(e) => {
                            debug!("Bybit WS unparsed frame: {} ({})", e, raw);
                            continue;
                        }
                    };
                    self.handle_push(parsed, &mut last_heartbeat);
                }
                Ok(Message::Ping(payload)) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(frame)) => {
                    warn!("Bybit WS closed by server: {:?}", frame);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Bybit WS error: {}", e);
                    return;
                }
            }
        }
        warn!("Bybit WS stream ended");
    }

    fn handle_push(&self, msg: BookMsg, last_heartbeat: &mut HashMap<String, Instant>) {
        let (Some(topic), Some(data)) = (msg.topic, msg.data) else {
            return; // subscription acks and pongs carry no book data
        };
        let Some(symbol) = topic.rsplit('.').next().map(str::to_string) else {
            return;
        };

        let (Some(bid_lvl), Some(ask_lvl)) = (data.b.first(), data.a.first()) else {
            return; // deltas may update only one side; top-of-book needs both
        };
        let parsed = (
            bid_lvl.first().and_then(|v| v.parse::<f64>().ok()),
            ask_lvl.first().and_then(|v| v.parse::<f64>().ok()),
            bid_lvl.get(1).and_then(|v| v.parse::<f64>().ok()),
            ask_lvl.get(1).and_then(|v| v.parse::<f64>().ok()),
        );
        let (Some(bid), Some(ask), Some(bid_qty), Some(ask_qty)) = parsed else {
            warn!("Bybit WS malformed levels for {}: {:?}", symbol, parsed);
            return;
        };

        self.store
            .update(Venue::Bybit, &symbol, bid, ask, bid_qty, ask_qty);

        let beat = last_heartbeat.entry(symbol.clone()).or_insert_with(Instant::now);
        if beat.elapsed().as_secs_f64() >= HEARTBEAT_INTERVAL_S {
            *beat = Instant::now();
            info!("Bybit {} bid={} ask={}", symbol, bid, ask);
        }
    }
}
