//! Per-direction verification cooldown.
//!
//! An opportunity that persists across consecutive 100 ms engine ticks
//! would otherwise trigger a DEX verification call on every tick and
//! hammer the API. Each direction gets its own timer; a verify attempt is
//! admitted only when the previous one for the same direction is at least
//! the cooldown interval old.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct VerifyCooldown {
    interval: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl VerifyCooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records the attempt if the direction is outside its
    /// cooldown window; returns false (and records nothing) otherwise.
    pub fn try_begin(&self, direction: &str) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = last.get(direction) {
            if at.elapsed() < self.interval {
                return false;
            }
        }
        last.insert(direction.to_string(), Instant::now());
        true
    }

    /// Number of directions currently tracked
    pub fn tracked(&self) -> usize {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_admitted() {
        let cd = VerifyCooldown::new(Duration::from_millis(50));
        assert!(cd.try_begin("DEX_BUY_Bybit"));
        assert_eq!(cd.tracked(), 1);
    }

    #[test]
    fn test_within_window_denied() {
        let cd = VerifyCooldown::new(Duration::from_millis(200));
        assert!(cd.try_begin("TRI_DIR1_Bybit"));
        assert!(!cd.try_begin("TRI_DIR1_Bybit"));
        assert!(!cd.try_begin("TRI_DIR1_Bybit"));
    }

    #[test]
    fn test_admitted_after_expiry() {
        let cd = VerifyCooldown::new(Duration::from_millis(30));
        assert!(cd.try_begin("DEX_SELL_MEXC"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cd.try_begin("DEX_SELL_MEXC"));
    }

    #[test]
    fn test_directions_independent() {
        let cd = VerifyCooldown::new(Duration::from_millis(200));
        assert!(cd.try_begin("TRI_DIR1_Bybit"));
        assert!(cd.try_begin("TRI_DIR1_MEXC"));
        assert!(cd.try_begin("TRI_DIR2_Bybit"));
        assert!(!cd.try_begin("TRI_DIR1_Bybit"));
        assert_eq!(cd.tracked(), 3);
    }

    #[test]
    fn test_denied_attempt_does_not_extend_window() {
        let cd = VerifyCooldown::new(Duration::from_millis(60));
        assert!(cd.try_begin("D"));
        std::thread::sleep(Duration::from_millis(35));
        assert!(!cd.try_begin("D")); // denied at t=35ms
        std::thread::sleep(Duration::from_millis(35));
        // t=70ms from the *first* attempt: window expired despite the denial
        assert!(cd.try_begin("D"));
    }
}
