use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyStatus {
    Active,
    Probation,
}

/// Entry bar and sizing multiplier for one named strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub min_score_to_trade: f64,
    /// Scales the scout allocation (0.5 - 2.0)
    pub allocation_multiplier: f64,
    pub status: StrategyStatus,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, min_score_to_trade: f64, allocation_multiplier: f64) -> Self {
        Self {
            name: name.into(),
            min_score_to_trade,
            allocation_multiplier,
            status: StrategyStatus::Active,
        }
    }
}

/// Score an external insight needs to skip the staged watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassGate {
    pub threshold: f64,
    /// Percent of bypass trades that closed green
    pub success_rate: f64,
    pub total_trades: usize,
}

impl Default for BypassGate {
    fn default() -> Self {
        Self {
            threshold: 95.0,
            success_rate: 0.0,
            total_trades: 0,
        }
    }
}

/// One closed trade as seen by the feedback loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub strategy: String,
    pub pnl_percent: f64,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: String,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Mean winning trade, percent
    pub avg_win: f64,
    /// Mean losing trade magnitude, percent (positive)
    pub avg_loss: f64,
    pub expectancy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub strategy: String,
    pub expectancy: f64,
    pub before: StrategyConfig,
    pub after: StrategyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassChange {
    pub trades: usize,
    pub avg_return: f64,
    pub old_threshold: f64,
    pub new_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub sample_size: usize,
    pub win_rate: f64,
    /// Peak-to-trough of the compounded trade curve, as a negative percent
    pub max_drawdown_pct: f64,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub evaluated_trades: usize,
    pub stats: Vec<StrategyStats>,
    pub changes: Vec<ConfigChange>,
    pub bypass: Option<BypassChange>,
    pub health: HealthReport,
    pub at: DateTime<Utc>,
}
