use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest number of tickers accepted in a single evaluation request.
pub const MAX_TICKERS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Buy,
    Sell,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buy/sell boundaries for one ticker. Either side may be absent; a spec with
/// neither side set is accepted but can never produce an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell: Option<f64>,
}

/// Ticker symbol to thresholds, ordered by symbol.
pub type Watchlist = BTreeMap<String, ThresholdSpec>;

/// Trailing-window price summary for one ticker.
///
/// `low <= high` holds for valid data; `last` is the most recent close and
/// may sit anywhere relative to the extremes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub low: f64,
    pub high: f64,
    pub last: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub ticker: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub threshold: f64,
    pub reached: f64,
    pub current: f64,
}

/// A ticker whose price lookup failed during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub ticker: String,
    #[serde(rename = "error")]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub alerts: Vec<Alert>,
    pub errors: Vec<ProcessingError>,
    pub market_open: bool,
    pub service_degraded: bool,
    pub checked_at: DateTime<Utc>,
}

/// Check the request-level rules for a watchlist: size cap and strictly
/// positive thresholds. Returns a human-readable reason on violation.
pub fn validate_watchlist(watchlist: &Watchlist) -> Result<(), String> {
    if watchlist.len() > MAX_TICKERS {
        return Err(format!(
            "Maximum {MAX_TICKERS} tickers allowed per request. Received {} tickers.",
            watchlist.len()
        ));
    }

    for (ticker, spec) in watchlist {
        for (side, value) in [("buy", spec.buy), ("sell", spec.sell)] {
            if let Some(v) = value {
                // Also rejects NaN.
                if !(v > 0.0) {
                    return Err(format!(
                        "{ticker}.{side}: threshold must be greater than 0 (got {v})"
                    ));
                }
            }
        }
    }

    Ok(())
}
