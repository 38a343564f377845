use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::TrendTemplate;

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub ticker: String,
    pub initial_capital: f64,
    /// Bars skipped before the first decision, so long averages are defined.
    pub warmup_bars: usize,
    /// Fraction of equity risked per trade (0.01 = 1%)
    pub risk_per_trade: f64,
    pub atr_period: usize,
    /// Stop distance in ATR multiples
    pub atr_multiple: f64,
    /// Halt new entries once drawdown reaches this percent. None = never.
    #[serde(default)]
    pub max_drawdown_halt_percent: Option<f64>,
    #[serde(default)]
    pub template: TrendTemplate,
}

impl BacktestConfig {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            initial_capital: 100_000_000.0,
            warmup_bars: 200,
            risk_per_trade: 0.01,
            atr_period: 14,
            atr_multiple: 2.0,
            max_drawdown_halt_percent: None,
            template: TrendTemplate::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// One fill in the simulated trade history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub action: TradeAction,
    pub date: DateTime<Utc>,
    pub price: f64,
    pub quantity: u64,
    /// Set on sells
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub equity: f64,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub ticker: String,
    /// Closed round trips
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// 0.0 - 1.0
    pub win_rate: f64,
    /// Percent of initial capital
    pub total_return: f64,
    /// Largest peak-to-trough equity decline, positive percent
    pub max_drawdown: f64,
    /// Gross profit / gross loss; 999 when profitable with no losses
    pub profit_factor: f64,
    pub final_equity: f64,
    /// True when the drawdown halt stopped new entries
    pub halted: bool,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestResult {
    pub fn empty(ticker: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            ticker: ticker.into(),
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_return: 0.0,
            max_drawdown: 0.0,
            profit_factor: 0.0,
            final_equity: initial_capital,
            halted: false,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }
}
