use account_ledger::AccountLedger;
use adaptive_params::{BypassGate, StrategyBook};
use position_lifecycle::CircuitBreaker;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use trading_core::Market;

use crate::metrics::AgentMetrics;

/// Whether orders reach a real venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Paper => "PAPER",
            ExecutionMode::Live => "LIVE",
        }
    }
}

/// Mutable trading state for one market, shared by the entry gate and the
/// cycle loop.
///
/// Lock order when more than one is needed: breaker, then ledger.
pub struct TradingContext {
    pub market: Market,
    pub ledger: Mutex<AccountLedger>,
    pub breaker: Mutex<CircuitBreaker>,
    pub book: RwLock<StrategyBook>,
    pub bypass: RwLock<BypassGate>,
    pub metrics: parking_lot::Mutex<AgentMetrics>,
}

impl TradingContext {
    pub fn new(ledger: AccountLedger, breaker: CircuitBreaker, metrics: AgentMetrics) -> Self {
        Self {
            market: ledger.market(),
            ledger: Mutex::new(ledger),
            breaker: Mutex::new(breaker),
            book: RwLock::new(StrategyBook::default()),
            bypass: RwLock::new(BypassGate::default()),
            metrics: parking_lot::Mutex::new(metrics),
        }
    }
}
