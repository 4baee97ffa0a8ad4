//! Aptos fullnode REST client.
//!
//! Thin wrapper over the node's HTTP API: view-function calls for balances,
//! account sequence numbers, BCS transaction submission and confirmation
//! polling. One persistent HTTP session per client.

use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Malformed(String),

    #[error("transaction rejected by VM: {0}")]
    VmStatus(String),

    #[error("timed out waiting for transaction {0}")]
    WaitTimeout(String),
}

pub struct AptosClient {
    http: reqwest::Client,
    base_url: String,
    chain_id: OnceCell<u8>,
}

impl AptosClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            chain_id: OnceCell::new(),
        }
    }

    /// Call a Move view function; returns the JSON result array.
    pub async fn view(
        &self,
        function: &str,
        type_arguments: &[&str],
        arguments: &[Value],
    ) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/view", self.base_url))
            .json(&json!({
                "function": function,
                "type_arguments": type_arguments,
                "arguments": arguments,
            }))
            .send()
            .await?;
        Self::json_or_status(resp).await
    }

    /// Ledger chain id, fetched once and cached for the process lifetime.
    pub async fn chain_id(&self) -> Result<u8> {
        if let Some(id) = self.chain_id.get() {
            return Ok(*id);
        }
        let resp = self.http.get(&self.base_url).send().await?;
        let info = Self::json_or_status(resp).await?;
        let id = info["chain_id"]
            .as_u64()
            .ok_or_else(|| Error::Malformed(format!("missing chain_id in {}", info)))?
            as u8;
        let _ = self.chain_id.set(id);
        Ok(id)
    }

    /// Current sequence number for an account
    pub async fn sequence_number(&self, address: &str) -> Result<u64> {
        let resp = self
            .http
            .get(format!("{}/accounts/{}", self.base_url, address))
            .send()
            .await?;
        let account = Self::json_or_status(resp).await?;
        account["sequence_number"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::Malformed(format!("missing sequence_number in {}", account)))
    }

    /// Submit a BCS-signed transaction; returns the pending transaction hash.
    pub async fn submit_signed_bcs(&self, signed_txn: Vec<u8>) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/transactions", self.base_url))
            .header("Content-Type", "application/x.aptos.signed_transaction+bcs")
            .body(signed_txn)
            .send()
            .await?;
        let pending = Self::json_or_status(resp).await?;
        pending["hash"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Malformed(format!("missing hash in {}", pending)))
    }

    /// Poll until the transaction leaves the pending state. Ok on VM success,
    /// `Error::VmStatus` with the parsed status message otherwise.
    pub async fn wait_for_transaction(&self, hash: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let resp = self
                .http
                .get(format!("{}/transactions/by_hash/{}", self.base_url, hash))
                .send()
                .await?;

            // 404 right after submission means the node hasn't seen it yet
            if resp.status().as_u16() != 404 {
                let txn = Self::json_or_status(resp).await?;
                if txn["type"].as_str() != Some("pending_transaction") {
                    if txn["success"].as_bool() == Some(true) {
                        return Ok(());
                    }
                    let status = txn["vm_status"]
                        .as_str()
                        .unwrap_or("unknown vm_status")
                        .to_string();
                    return Err(Error::VmStatus(status));
                }
                debug!("transaction {} still pending", hash);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::WaitTimeout(hash.to_string()));
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn json_or_status(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.chars().take(200).collect();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}
