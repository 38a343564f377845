//! Autonomous trading control loop for one market.
//!
//! [`autopilot::Autopilot`] owns the cycle: regime refresh, watchlist scan,
//! position monitoring. Everything that opens a position goes through
//! [`signal_executor::SignalExecutor`].

pub mod advisor;
pub mod autopilot;
pub mod config;
pub mod context;
pub mod market_data;
pub mod metrics;
pub mod notifier;
pub mod scheduler;
pub mod signal_executor;
pub mod state_manager;

pub use autopilot::{Autopilot, AutopilotDeps, AutopilotStatus, CycleReport, ExternalInsight, InsightOutcome};
pub use context::{ExecutionMode, TradingContext};
pub use signal_executor::{EntryOutcome, EntrySignal, SignalExecutor};
