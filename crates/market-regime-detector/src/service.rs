use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use request_governor::{Priority, RequestGovernor};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use trading_core::calendar;
use trading_core::{
    Market, QualitativeAdvisor, QuoteProvider, Regime, RegimeSnapshot, RegimeStatus,
};

use crate::scorer::RegimeScorer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeServiceConfig {
    /// How long a cached classification is served before re-scoring.
    pub cache_ttl_minutes: i64,
    /// Re-score on every call inside the closing-bell window.
    pub refresh_at_close: bool,
}

impl Default for RegimeServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 30,
            refresh_at_close: true,
        }
    }
}

/// Result of one regime lookup.
#[derive(Debug, Clone)]
pub struct RegimeUpdate {
    pub status: RegimeStatus,
    /// Label that was cached before this lookup.
    pub previous: Option<Regime>,
    /// True when the label differs from `previous`.
    pub changed: bool,
    /// True when the status was freshly computed rather than served from cache.
    pub refreshed: bool,
}

impl RegimeUpdate {
    pub fn snapshot(&self) -> RegimeSnapshot {
        RegimeSnapshot::new(self.status.clone(), self.previous)
    }
}

struct CacheEntry {
    status: RegimeStatus,
    computed_at: DateTime<Utc>,
}

/// Cached regime lookups per market.
pub struct RegimeService {
    scorer: RegimeScorer,
    config: RegimeServiceConfig,
    quotes: Arc<dyn QuoteProvider>,
    advisor: Arc<dyn QualitativeAdvisor>,
    governor: Arc<RequestGovernor>,
    cache: RwLock<HashMap<Market, CacheEntry>>,
    macro_scores: RwLock<HashMap<Market, f64>>,
}

impl RegimeService {
    pub fn new(
        scorer: RegimeScorer,
        config: RegimeServiceConfig,
        quotes: Arc<dyn QuoteProvider>,
        advisor: Arc<dyn QualitativeAdvisor>,
        governor: Arc<RequestGovernor>,
    ) -> Self {
        Self {
            scorer,
            config,
            quotes,
            advisor,
            governor,
            cache: RwLock::new(HashMap::new()),
            macro_scores: RwLock::new(HashMap::new()),
        }
    }

    pub fn scorer(&self) -> &RegimeScorer {
        &self.scorer
    }

    /// Set (or clear) the optional macro composite for a market.
    pub async fn set_macro_score(&self, market: Market, score: Option<f64>) {
        let mut scores = self.macro_scores.write().await;
        match score {
            Some(s) => {
                scores.insert(market, s);
            }
            None => {
                scores.remove(&market);
            }
        }
    }

    /// Last cached status, if any, without touching upstream.
    pub async fn cached(&self, market: Market) -> Option<RegimeStatus> {
        self.cache.read().await.get(&market).map(|e| e.status.clone())
    }

    /// Current regime for `market`, served from cache while fresh.
    ///
    /// Upstream failures yield a neutral SIDEWAYS status and leave the cache
    /// untouched, so a single bad call never overwrites a good read.
    pub async fn current(&self, market: Market, now: DateTime<Utc>) -> RegimeUpdate {
        let (cached_status, fresh) = {
            let cache = self.cache.read().await;
            match cache.get(&market) {
                Some(entry) => {
                    let age = now - entry.computed_at;
                    let fresh = age < Duration::minutes(self.config.cache_ttl_minutes);
                    (Some(entry.status.clone()), fresh)
                }
                None => (None, false),
            }
        };

        let force = self.config.refresh_at_close && calendar::in_closing_bell_window(market, now);
        let previous = cached_status.as_ref().map(|s| s.regime);

        if let Some(status) = cached_status.clone() {
            if fresh && !force {
                return RegimeUpdate {
                    status,
                    previous,
                    changed: false,
                    refreshed: false,
                };
            }
        }

        match self.compute(market, cached_status.as_ref(), now).await {
            Some(status) => {
                let changed = previous.map(|p| p != status.regime).unwrap_or(false);
                if changed {
                    tracing::info!(
                        market = %market,
                        from = ?previous,
                        to = %status.regime,
                        score = status.score,
                        "Market regime changed"
                    );
                } else {
                    tracing::debug!(market = %market, regime = %status.regime, score = status.score, "Regime refreshed");
                }
                self.cache.write().await.insert(
                    market,
                    CacheEntry {
                        status: status.clone(),
                        computed_at: now,
                    },
                );
                RegimeUpdate {
                    status,
                    previous,
                    changed,
                    refreshed: true,
                }
            }
            None => {
                let status = RegimeStatus::neutral(market, now, "Upstream unavailable, neutral fallback");
                RegimeUpdate {
                    changed: previous.map(|p| p != status.regime).unwrap_or(false),
                    status,
                    previous,
                    refreshed: true,
                }
            }
        }
    }

    async fn compute(
        &self,
        market: Market,
        previous: Option<&RegimeStatus>,
        now: DateTime<Utc>,
    ) -> Option<RegimeStatus> {
        let quote = self.quotes.latest_quote(market.benchmark(), market).await;
        if !quote.is_valid() {
            tracing::warn!(market = %market, benchmark = market.benchmark(), "Benchmark quote unavailable");
            return None;
        }

        let advisor = self.advisor.clone();
        let qualitative = match self
            .governor
            .run(Priority::High, || {
                let advisor = advisor.clone();
                async move { advisor.classify_qualitative(market).await }
            })
            .await
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(market = %market, "Qualitative classification failed: {}", e);
                return None;
            }
        };

        let macro_score = self.macro_scores.read().await.get(&market).copied();
        Some(self.scorer.classify(
            market,
            Some(quote.change_rate),
            Some(&qualitative),
            macro_score,
            previous,
            now,
        ))
    }
}
