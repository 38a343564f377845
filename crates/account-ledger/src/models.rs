use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::{pct_change, Market, StrategyPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// An open holding, keyed by (ticker, phase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub name: String,
    pub quantity: u64,
    /// Average execution price, slippage included
    pub avg_price: f64,
    pub current_price: f64,
    pub phase: StrategyPhase,
    pub origin_strategy: String,
    /// 0 = untouched, 1 = entry harvest taken, 2 = climax harvest taken
    pub harvest_level: u8,
    pub pyramid_count: u32,
    pub stop_loss_price: Option<f64>,
    pub max_price_since_entry: f64,
    pub entry_date: DateTime<Utc>,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.avg_price * self.quantity as f64
    }

    pub fn market_value(&self) -> f64 {
        self.current_price * self.quantity as f64
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.market_value() - self.cost_basis()
    }

    /// Unrealized P&L in percent of average cost.
    pub fn pnl_percent(&self) -> f64 {
        pct_change(self.current_price, self.avg_price)
    }
}

/// Append-only record of every fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub id: String,
    pub side: TradeSide,
    pub ticker: String,
    pub name: String,
    pub phase: StrategyPhase,
    pub strategy: String,
    /// Execution price after slippage
    pub price: f64,
    pub quantity: u64,
    pub fee: f64,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_percent: Option<f64>,
    pub reason: String,
    pub balance_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Buy request. Built with the chained setters.
#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub ticker: String,
    pub name: String,
    pub price: f64,
    pub quantity: u64,
    pub reason: String,
    pub stop_loss: Option<f64>,
    pub phase: StrategyPhase,
    pub strategy: String,
}

impl BuyOrder {
    pub fn new(ticker: impl Into<String>, name: impl Into<String>, price: f64, quantity: u64) -> Self {
        Self {
            ticker: ticker.into(),
            name: name.into(),
            price,
            quantity,
            reason: String::new(),
            stop_loss: None,
            phase: StrategyPhase::Hold,
            strategy: "MANUAL".to_string(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn stop_loss(mut self, stop: f64) -> Self {
        self.stop_loss = Some(stop);
        self
    }

    pub fn phase(mut self, phase: StrategyPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

/// Result of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub side: TradeSide,
    pub ticker: String,
    pub phase: StrategyPhase,
    pub execution_price: f64,
    pub quantity: u64,
    pub fee: f64,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_percent: Option<f64>,
    pub balance_after: f64,
    /// True when a sell emptied the position
    pub position_closed: bool,
}

/// Win rate and payoff over the trailing sells, used for sizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentPerformance {
    pub win_rate: f64,
    pub payoff_ratio: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub market: Market,
    pub cash: f64,
    pub initial_capital: f64,
    pub equity: f64,
    pub return_percent: f64,
    pub positions: Vec<Position>,
    pub trade_count: usize,
}
