//! Signal Watchlist Data Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::TriggerType;

/// Promotion stage of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    /// Waiting for the hourly setup
    Watching,
    /// Hourly setup confirmed, waiting for the minute breakout
    Armed,
    /// Fired. Terminal.
    Executed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Watching => "WATCHING",
            CandidateStatus::Armed => "ARMED",
            CandidateStatus::Executed => "EXECUTED",
        }
    }
}

/// A ticker under observation for a potential entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCandidate {
    pub ticker: String,
    pub name: String,
    pub status: CandidateStatus,
    /// Strategy that nominated the ticker
    pub origin_strategy: String,
    pub score: f64,
    pub added_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl SignalCandidate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}

/// Which check produced the fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerFidelity {
    /// Minute-bar breakout check
    HighResolution,
    /// Quote volume and change fallback
    Fallback,
}

/// A candidate that passed its final check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub ticker: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub score: f64,
    pub origin_strategy: String,
    pub price: Option<f64>,
    pub change_rate: f64,
    /// Session volume from the quote; 0 when only minute bars were read
    pub volume: f64,
    /// Minute volume over its trailing average, when minute bars were available
    pub relative_volume: Option<f64>,
    pub details: String,
    pub fidelity: TriggerFidelity,
    pub fired_at: DateTime<Utc>,
}

/// Outcome of one scan pass
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub fired: Vec<FiredTrigger>,
    /// Tickers promoted WATCHING -> ARMED this pass
    pub promoted: Vec<String>,
    /// Tickers dropped for passing their expiry
    pub expired: Vec<String>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty() && self.promoted.is_empty() && self.expired.is_empty()
    }
}
