//! Signal Watchlist
//!
//! Candidates move WATCHING -> ARMED -> EXECUTED across scan passes. Each
//! ticker can fire at most once for the lifetime of the watchlist.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use trading_core::{normalize_ticker, Market, QuoteProvider, RegimeSnapshot, Timeframe, TriggerType};

use crate::models::{CandidateStatus, FiredTrigger, ScanReport, SignalCandidate, TriggerFidelity};
use crate::promotion::{breakout_reading, fallback_fires, setup_ready, PromotionConfig};

/// Score attached to every watchlist fire.
const FIRE_SCORE: f64 = 100.0;

/// Receiver of fired triggers, bound once by the orchestrator.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn on_trigger(&self, trigger: &FiredTrigger, regime: &RegimeSnapshot);
}

#[derive(Debug, Clone)]
pub struct WatchlistConfig {
    /// How long a candidate is watched before it expires
    pub candidate_ttl: Duration,
    /// Fired triggers kept for inspection
    pub history_limit: usize,
    pub promotion: PromotionConfig,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            candidate_ttl: Duration::hours(24),
            history_limit: 50,
            promotion: PromotionConfig::default(),
        }
    }
}

pub struct SignalWatchlist {
    config: WatchlistConfig,
    quotes: Arc<dyn QuoteProvider>,
    candidates: DashMap<String, SignalCandidate>,
    fired: Mutex<HashSet<String>>,
    history: Mutex<VecDeque<FiredTrigger>>,
    sink: OnceLock<Arc<dyn TriggerSink>>,
}

impl SignalWatchlist {
    pub fn new(config: WatchlistConfig, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self {
            config,
            quotes,
            candidates: DashMap::new(),
            fired: Mutex::new(HashSet::new()),
            history: Mutex::new(VecDeque::new()),
            sink: OnceLock::new(),
        }
    }

    /// Register the trigger receiver. Only the first bind takes effect.
    pub fn bind_trigger_sink(&self, sink: Arc<dyn TriggerSink>) -> bool {
        let bound = self.sink.set(sink).is_ok();
        if !bound {
            tracing::warn!("Trigger sink already bound, ignoring second bind");
        }
        bound
    }

    /// Start watching `ticker`. Returns false when the ticker is blank, already
    /// has a live candidate, or has fired before.
    pub fn add_candidate(
        &self,
        ticker: &str,
        name: &str,
        strategy: &str,
        score: f64,
        initial_status: CandidateStatus,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(ticker) = normalize_ticker(ticker) else {
            tracing::warn!(ticker, "Rejected candidate with invalid ticker");
            return false;
        };
        if initial_status == CandidateStatus::Executed {
            return false;
        }
        if self.fired.lock().contains(&ticker) {
            tracing::debug!(ticker = %ticker, "Ticker already fired, not re-watching");
            return false;
        }

        match self.candidates.entry(ticker.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    ticker = %ticker,
                    name,
                    strategy,
                    score,
                    status = initial_status.as_str(),
                    "Candidate added to watchlist"
                );
                slot.insert(SignalCandidate {
                    ticker,
                    name: name.to_string(),
                    status: initial_status,
                    origin_strategy: strategy.to_string(),
                    score,
                    added_at: now,
                    expiry: now + self.config.candidate_ttl,
                });
                true
            }
        }
    }

    pub fn get_candidates(&self) -> Vec<SignalCandidate> {
        let mut list: Vec<SignalCandidate> = self.candidates.iter().map(|c| c.value().clone()).collect();
        list.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        list
    }

    pub fn remove_candidate(&self, ticker: &str) -> Option<SignalCandidate> {
        self.candidates.remove(ticker).map(|(_, c)| c)
    }

    /// Most recent fires, oldest first.
    pub fn recent_triggers(&self) -> Vec<FiredTrigger> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// One promotion pass over every live candidate.
    pub async fn scan(&self, market: Market, regime: &RegimeSnapshot, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();
        let tickers: Vec<String> = self.candidates.iter().map(|c| c.key().clone()).collect();

        for ticker in tickers {
            // Copy out so no map guard is held across an await
            let Some(candidate) = self.candidates.get(&ticker).map(|c| c.value().clone()) else {
                continue;
            };

            if candidate.is_expired(now) {
                if self.candidates.remove(&ticker).is_some() {
                    tracing::info!(ticker = %ticker, name = %candidate.name, "Candidate expired");
                    report.expired.push(ticker);
                }
                continue;
            }

            let mut status = candidate.status;
            if status == CandidateStatus::Watching && self.check_setup(&ticker, market).await {
                if let Some(mut live) = self.candidates.get_mut(&ticker) {
                    live.status = CandidateStatus::Armed;
                    status = CandidateStatus::Armed;
                    tracing::info!(ticker = %ticker, name = %candidate.name, "Candidate armed, hourly setup confirmed");
                    report.promoted.push(ticker.clone());
                }
            }

            if status != CandidateStatus::Armed {
                continue;
            }

            let Some(trigger) = self.check_breakout(&candidate, market, now).await else {
                continue;
            };
            // Removal is the claim: only the caller that takes the entry fires
            let Some((_, mut claimed)) = self.candidates.remove(&ticker) else {
                continue;
            };
            claimed.status = CandidateStatus::Executed;
            self.record_fire(&trigger);

            tracing::info!(
                ticker = %trigger.ticker,
                status = claimed.status.as_str(),
                name = %trigger.name,
                fidelity = ?trigger.fidelity,
                strategy = %trigger.origin_strategy,
                "Trigger fired"
            );

            if let Some(sink) = self.sink.get() {
                sink.on_trigger(&trigger, regime).await;
            } else {
                tracing::warn!(ticker = %trigger.ticker, "Trigger fired with no sink bound");
            }
            report.fired.push(trigger);
        }

        report
    }

    fn record_fire(&self, trigger: &FiredTrigger) {
        self.fired.lock().insert(trigger.ticker.clone());
        let mut history = self.history.lock();
        history.push_back(trigger.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    async fn check_setup(&self, ticker: &str, market: Market) -> bool {
        let bars = self
            .quotes
            .candles(ticker, market, Timeframe::Hour1, self.config.promotion.hourly_bars_requested)
            .await;
        setup_ready(&bars, &self.config.promotion)
    }

    async fn check_breakout(
        &self,
        candidate: &SignalCandidate,
        market: Market,
        now: DateTime<Utc>,
    ) -> Option<FiredTrigger> {
        let promotion = &self.config.promotion;
        let bars = self
            .quotes
            .candles(&candidate.ticker, market, Timeframe::Minute1, promotion.minute_bars_required)
            .await;

        let base = |price: Option<f64>,
                    change_rate: f64,
                    volume: f64,
                    relative_volume: Option<f64>,
                    details: String,
                    fidelity: TriggerFidelity| FiredTrigger {
            ticker: candidate.ticker.clone(),
            name: candidate.name.clone(),
            trigger_type: TriggerType::HunterBreakout,
            score: FIRE_SCORE,
            origin_strategy: candidate.origin_strategy.clone(),
            price,
            change_rate,
            volume,
            relative_volume,
            details,
            fidelity,
            fired_at: now,
        };

        if let Some(reading) = breakout_reading(&bars, promotion) {
            if !reading.passes(promotion) {
                return None;
            }
            let last = &bars[bars.len() - 1];
            return Some(base(
                Some(last.close),
                reading.momentum_pct,
                0.0,
                Some(reading.relative_volume),
                format!(
                    "Minute breakout: rvol {:.1}x, close location {:.2}, momentum {:+.2}%",
                    reading.relative_volume, reading.close_location, reading.momentum_pct
                ),
                TriggerFidelity::HighResolution,
            ));
        }

        let quote = self.quotes.latest_quote(&candidate.ticker, market).await;
        if !fallback_fires(&quote, promotion) {
            return None;
        }
        Some(base(
            Some(quote.price),
            quote.change_rate,
            quote.volume,
            None,
            format!("Quote breakout: volume {:.0}, change {:+.2}%", quote.volume, quote.change_rate),
            TriggerFidelity::Fallback,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trading_core::{Bar, QuoteSnapshot, RegimeStatus};

    #[derive(Default)]
    struct StubQuotes {
        hourly: HashMap<String, Vec<Bar>>,
        minute: HashMap<String, Vec<Bar>>,
        quotes: HashMap<String, QuoteSnapshot>,
    }

    #[async_trait]
    impl QuoteProvider for StubQuotes {
        async fn latest_quote(&self, ticker: &str, _market: Market) -> QuoteSnapshot {
            self.quotes.get(ticker).copied().unwrap_or_default()
        }

        async fn candles(&self, ticker: &str, _market: Market, timeframe: Timeframe, _count: usize) -> Vec<Bar> {
            let source = match timeframe {
                Timeframe::Hour1 => &self.hourly,
                Timeframe::Minute1 => &self.minute,
                _ => return Vec::new(),
            };
            source.get(ticker).cloned().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TriggerSink for CountingSink {
        async fn on_trigger(&self, _trigger: &FiredTrigger, _regime: &RegimeSnapshot) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn hourly_setup() -> Vec<Bar> {
        let mut close = 100.0;
        (0..44)
            .map(|i| {
                if i > 0 {
                    close += if i % 2 == 1 { 1.0 } else { -0.9 };
                }
                bar(close, close + 0.5, close - 0.5, close, 10_000.0)
            })
            .collect()
    }

    fn minute_breakout() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..20).map(|_| bar(10.0, 10.1, 9.9, 10.0, 1_000.0)).collect();
        bars.push(bar(10.0, 10.2, 10.0, 10.18, 4_000.0));
        bars
    }

    fn snapshot() -> RegimeSnapshot {
        RegimeSnapshot::new(RegimeStatus::neutral(Market::Us, Utc::now(), "test"), None)
    }

    fn watchlist(quotes: StubQuotes) -> SignalWatchlist {
        SignalWatchlist::new(WatchlistConfig::default(), Arc::new(quotes))
    }

    #[test]
    fn test_add_candidate_is_idempotent() {
        let list = watchlist(StubQuotes::default());
        let t0 = Utc::now();

        assert!(list.add_candidate("AAPL", "Apple", "EAGLE_EYE", 80.0, CandidateStatus::Watching, t0));
        assert!(!list.add_candidate("AAPL", "Apple", "EAGLE_EYE", 90.0, CandidateStatus::Watching, t0 + Duration::hours(5)));

        let candidates = list.get_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].expiry, t0 + Duration::hours(24));
        assert_eq!(candidates[0].score, 80.0);
    }

    #[test]
    fn test_add_candidate_rejects_blank_ticker() {
        let list = watchlist(StubQuotes::default());
        assert!(!list.add_candidate("  ", "Nothing", "MANUAL", 50.0, CandidateStatus::Watching, Utc::now()));
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_expired_candidate_is_removed_on_scan() {
        let list = watchlist(StubQuotes::default());
        let t0 = Utc::now();
        list.add_candidate("MSFT", "Microsoft", "VALUE_PIVOT", 70.0, CandidateStatus::Watching, t0);

        let report = list.scan(Market::Us, &snapshot(), t0 + Duration::hours(25)).await;
        assert_eq!(report.expired, vec!["MSFT".to_string()]);
        assert!(list.get_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_watching_to_armed_to_fired() {
        let mut quotes = StubQuotes::default();
        quotes.hourly.insert("NVDA".into(), hourly_setup());
        quotes.minute.insert("NVDA".into(), minute_breakout());
        let list = watchlist(quotes);
        let sink = Arc::new(CountingSink::default());
        assert!(list.bind_trigger_sink(sink.clone()));

        let t0 = Utc::now();
        list.add_candidate("NVDA", "Nvidia", "EAGLE_EYE", 85.0, CandidateStatus::Watching, t0);
        let report = list.scan(Market::Us, &snapshot(), t0).await;

        assert_eq!(report.promoted, vec!["NVDA".to_string()]);
        assert_eq!(report.fired.len(), 1);
        let trigger = &report.fired[0];
        assert_eq!(trigger.trigger_type, TriggerType::HunterBreakout);
        assert_eq!(trigger.fidelity, TriggerFidelity::HighResolution);
        assert_eq!(trigger.price, Some(10.18));
        // A single minute bar is not the session volume
        assert_eq!(trigger.volume, 0.0);
        assert!(trigger.relative_volume.is_some());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        // Fired candidate is gone and the ticker cannot come back
        assert!(list.get_candidates().is_empty());
        assert!(!list.add_candidate("NVDA", "Nvidia", "EAGLE_EYE", 85.0, CandidateStatus::Watching, t0));
        assert_eq!(list.recent_triggers().len(), 1);

        let again = list.scan(Market::Us, &snapshot(), t0).await;
        assert!(again.fired.is_empty());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watching_stays_without_setup() {
        let list = watchlist(StubQuotes::default());
        let t0 = Utc::now();
        list.add_candidate("AMD", "AMD", "CHART_PATTERN", 75.0, CandidateStatus::Watching, t0);

        let report = list.scan(Market::Us, &snapshot(), t0).await;
        assert!(report.is_empty());
        assert_eq!(list.get_candidates()[0].status, CandidateStatus::Watching);
    }

    #[tokio::test]
    async fn test_armed_candidate_uses_quote_fallback() {
        let mut quotes = StubQuotes::default();
        quotes.quotes.insert(
            "005930".into(),
            QuoteSnapshot {
                price: 72_500.0,
                change_rate: 2.4,
                volume: 1_200_000.0,
            },
        );
        let list = watchlist(quotes);
        let t0 = Utc::now();
        list.add_candidate("005930", "Samsung", "INTELLIGENCE", 90.0, CandidateStatus::Armed, t0);

        let report = list.scan(Market::Kr, &snapshot(), t0).await;
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired[0].fidelity, TriggerFidelity::Fallback);
        assert_eq!(report.fired[0].price, Some(72_500.0));
    }

    #[test]
    fn test_second_bind_is_ignored() {
        let list = watchlist(StubQuotes::default());
        assert!(list.bind_trigger_sink(Arc::new(CountingSink::default())));
        assert!(!list.bind_trigger_sink(Arc::new(CountingSink::default())));
    }

    #[test]
    fn test_history_is_bounded() {
        let list = SignalWatchlist::new(
            WatchlistConfig {
                history_limit: 3,
                ..WatchlistConfig::default()
            },
            Arc::new(StubQuotes::default()),
        );
        for i in 0..5 {
            list.record_fire(&FiredTrigger {
                ticker: format!("T{}", i),
                name: String::new(),
                trigger_type: TriggerType::HunterBreakout,
                score: FIRE_SCORE,
                origin_strategy: "TEST".into(),
                price: None,
                change_rate: 0.0,
                volume: 0.0,
                relative_volume: None,
                details: String::new(),
                fidelity: TriggerFidelity::Fallback,
                fired_at: Utc::now(),
            });
        }
        let history = list.recent_triggers();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].ticker, "T2");
    }
}
