//! Smart Watchlist Module
//!
//! Signal promotion state machine. Strategies nominate tickers, an hourly
//! setup check arms them and a minute breakout check fires them into the
//! bound trigger sink.

pub mod models;
pub mod promotion;
pub mod watchlist;

pub use models::{CandidateStatus, FiredTrigger, ScanReport, SignalCandidate, TriggerFidelity};
pub use promotion::{breakout_reading, fallback_fires, setup_ready, BreakoutReading, PromotionConfig};
pub use watchlist::{SignalWatchlist, TriggerSink, WatchlistConfig};
