//! Phase state machine for open positions.
//!
//! Positions move ENTRY -> HOLD -> TREND, never backwards. Each phase has its
//! own exit, partial exit and pyramiding rules; a bullish-regime loss past the
//! hard floor force-exits and trips the [`CircuitBreaker`].

pub mod circuit_breaker;
pub mod manager;
pub mod rules;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker};
pub use manager::{PositionLifecycleManager, TransitionRecord};
pub use rules::{
    evaluate, LifecycleAction, LifecycleConfig, LifecycleRule, MarketView, RuleDecision,
    RuleOutcome, SizingContext,
};
