use thiserror::Error;
use trading_core::StrategyPhase;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Insufficient cash: need {needed:.2}, have {available:.2}")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("No position for {0}")]
    PositionNotFound(String),

    #[error("No {phase} position for {ticker}")]
    PhaseNotFound { ticker: String, phase: StrategyPhase },

    #[error("Cannot sell {requested} of {ticker}, holding {held}")]
    InsufficientQuantity {
        ticker: String,
        requested: u64,
        held: u64,
    },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
