//! Simulated brokerage account.
//!
//! Fills apply adverse slippage and a flat fee, positions are keyed by
//! (ticker, phase) and every fill lands in an append-only trade log.

pub mod error;
pub mod fees;
pub mod ledger;
pub mod models;

pub use error::{LedgerError, LedgerResult};
pub use fees::FeeModel;
pub use ledger::AccountLedger;
pub use models::{
    AccountSnapshot, BuyOrder, Fill, Position, RecentPerformance, TradeLogEntry, TradeSide,
};
