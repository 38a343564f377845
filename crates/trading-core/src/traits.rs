use async_trait::async_trait;

use crate::{Bar, Market, QualitativeSignal, QuoteSnapshot, Regime, StrategyFocus, Timeframe};

/// Source of quotes and candles.
///
/// Implementations never fail: on any upstream problem they return
/// `QuoteSnapshot::default()` or an empty series. Callers rely on the
/// invalid-price guard instead of error handling.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn latest_quote(&self, ticker: &str, market: Market) -> QuoteSnapshot;

    async fn candles(
        &self,
        ticker: &str,
        market: Market,
        timeframe: Timeframe,
        count: usize,
    ) -> Vec<Bar>;
}

/// Third-party reasoning service. Untrusted and possibly slow; every call is
/// routed through the request governor by the caller.
#[async_trait]
pub trait QualitativeAdvisor: Send + Sync {
    async fn classify_qualitative(&self, market: Market) -> anyhow::Result<QualitativeSignal>;

    async fn decide_strategy_focus(
        &self,
        regime: Regime,
        headlines: &[String],
        lessons: &[String],
    ) -> anyhow::Result<StrategyFocus>;
}
