//! Feedback loop from realized trades to entry thresholds and sizing.

pub mod book;
pub mod evolver;
pub mod models;

pub use book::{canonical_strategy, StrategyBook};
pub use evolver::{health_check, outcomes_from_log, strategy_stats, EvolverConfig, StrategyEvolver};
pub use models::{
    BypassChange, BypassGate, ConfigChange, EvolutionReport, HealthReport, StrategyConfig,
    StrategyStats, StrategyStatus, TradeOutcome,
};
