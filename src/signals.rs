//! Structured signal records.
//!
//! Whenever the executor would (or does) fire an arbitrage, a signal record
//! is printed as a human-readable block and appended to an NDJSON file
//! (`logs/signals.jsonl`) for offline analysis. Dry-run and live records
//! share the same schema and are distinguished by the `dry_run` flag.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Balance-gate outcome carried by triangular signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateOutcome {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Shape-specific fields of a signal record
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SignalKind {
    #[serde(rename = "CEX_CEX")]
    CexCex {
        symbol: String,
        buy_exchange: String,
        sell_exchange: String,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
        buy_volume_usdt: f64,
        sell_volume_usdt: f64,
        profit_usdt: f64,
    },
    #[serde(rename = "DEX_CEX")]
    DexCex {
        direction: String,
        cex: String,
        symbol: String,
        buy_price: f64,
        sell_price: f64,
        qty: f64,
        buy_volume_usdt: f64,
        sell_volume_usdt: f64,
        profit_usdt: f64,
    },
    #[serde(rename = "TRI_APT_TO_AMI")]
    TriAptToAmi {
        cex: String,
        apt_qty: f64,
        apt_buy_price: f64,
        ami_qty_est: f64,
        ami_sell_price: f64,
        notional_in_usdt: f64,
        notional_out_usdt: f64,
        profit_usdt: f64,
        balance_gate: GateOutcome,
        wallet: String,
    },
    #[serde(rename = "TRI_AMI_TO_APT")]
    TriAmiToApt {
        cex: String,
        ami_qty: f64,
        ami_buy_price: f64,
        apt_qty_est: f64,
        apt_sell_price: f64,
        notional_in_usdt: f64,
        notional_out_usdt: f64,
        profit_usdt: f64,
        balance_gate: GateOutcome,
        wallet: String,
    },
}

/// One emitted signal: shape fields plus mode and wall-clock timestamp
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub ts: f64,
    pub dry_run: bool,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl Signal {
    pub fn now(dry_run: bool, kind: SignalKind) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            dry_run,
            kind,
        }
    }
}

/// Append-only NDJSON signal logger (one record per line)
pub struct SignalLogger {
    path: PathBuf,
}

impl SignalLogger {
    /// Create the logger; `dir` is created if missing.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create signal directory: {:?}", dir))?;
        Ok(Self {
            path: dir.join("signals.jsonl"),
        })
    }

    /// Print the signal block to the console and append it to the NDJSON file.
    pub fn emit(&self, signal: &Signal) -> Result<()> {
        self.print_block(signal);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open signal file: {:?}", self.path))?;
        let json = serde_json::to_string(signal).context("Failed to serialize signal")?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn print_block(&self, signal: &Signal) {
        let mode_tag = if signal.dry_run {
            "[DRY-SIGNAL]"
        } else {
            "[LIVE-SIGNAL]"
        };

        let mut lines = vec![format!("\n{}  {}", "━".repeat(56), mode_tag)];
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(signal) {
            for (k, v) in &map {
                if k == "dry_run" || k == "ts" {
                    continue;
                }
                match v {
                    serde_json::Value::Number(n) => {
                        lines.push(format!("  {:<22}: {}", k, n));
                    }
                    serde_json::Value::String(s) => {
                        lines.push(format!("  {:<22}: {}", k, s));
                    }
                    other => lines.push(format!("  {:<22}: {}", k, other)),
                }
            }
        }
        lines.push("━".repeat(64));
        info!("{}", lines.join("\n"));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back (offline analysis / tests)
    pub fn read_all(&self) -> Result<Vec<serde_json::Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                let v = serde_json::from_str(&line)
                    .with_context(|| format!("Failed to parse signal line: {}", line))?;
                records.push(v);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_emit_and_read_back() {
        let dir = tempdir().unwrap();
        let logger = SignalLogger::new(dir.path()).unwrap();

        let signal = Signal::now(
            true,
            SignalKind::CexCex {
                symbol: "AMIUSDT".to_string(),
                buy_exchange: "Bybit".to_string(),
                sell_exchange: "MEXC".to_string(),
                buy_price: 0.0080,
                sell_price: 0.0082,
                qty: 1000.0,
                buy_volume_usdt: 8.0,
                sell_volume_usdt: 8.2,
                profit_usdt: 0.1838,
            },
        );
        logger.emit(&signal).unwrap();
        logger.emit(&signal).unwrap();

        let records = logger.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "CEX_CEX");
        assert_eq!(records[0]["dry_run"], true);
        assert_eq!(records[0]["buy_exchange"], "Bybit");
        assert!(records[0]["ts"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_triangular_record_carries_gate_outcome() {
        let dir = tempdir().unwrap();
        let logger = SignalLogger::new(dir.path()).unwrap();

        let signal = Signal::now(
            true,
            SignalKind::TriAptToAmi {
                cex: "Bybit".to_string(),
                apt_qty: 1.5,
                apt_buy_price: 4.50,
                ami_qty_est: 840.0,
                ami_sell_price: 0.0081,
                notional_in_usdt: 6.75,
                notional_out_usdt: 6.80,
                profit_usdt: 0.03,
                balance_gate: GateOutcome::Fail,
                wallet: "0xabc".to_string(),
            },
        );
        logger.emit(&signal).unwrap();

        let records = logger.read_all().unwrap();
        assert_eq!(records[0]["type"], "TRI_APT_TO_AMI");
        assert_eq!(records[0]["balance_gate"], "FAIL");
        assert_eq!(records[0]["wallet"], "0xabc");
    }

    #[test]
    fn test_read_all_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let logger = SignalLogger::new(dir.path()).unwrap();
        assert!(logger.read_all().unwrap().is_empty());
    }
}
