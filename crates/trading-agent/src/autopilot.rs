use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use account_ledger::{AccountSnapshot, TradeSide};
use adaptive_params::evolver::BYPASS_STRATEGY;
use adaptive_params::{outcomes_from_log, EvolutionReport, StrategyEvolver};
use broker_trait::ExecutionGateway;
use chrono::{DateTime, NaiveDate, Utc};
use market_regime_detector::RegimeService;
use position_lifecycle::{PositionLifecycleManager, TransitionRecord};
use request_governor::{Priority, RequestGovernor};
use serde::{Deserialize, Serialize};
use smart_watchlist::{CandidateStatus, ScanReport, SignalWatchlist};
use tokio::sync::RwLock;
use trading_core::calendar;
use trading_core::{Market, QualitativeAdvisor, Regime, RegimeSnapshot, RegimeStatus, StrategyFocus, TriggerType};

use crate::context::{ExecutionMode, TradingContext};
use crate::metrics::AgentMetrics;
use crate::notifier::DiscordNotifier;
use crate::scheduler::{session_phase, SessionPhase};
use crate::signal_executor::{EntryOutcome, EntrySignal, SignalExecutor};
use crate::state_manager::{PersistedAccount, StateManager};

/// Strategy label for insights that go through the staged watchlist.
pub const INSIGHT_STRATEGY: &str = "INTELLIGENCE";

/// Everything the orchestrator drives, built once at startup.
pub struct AutopilotDeps {
    pub context: Arc<TradingContext>,
    pub regime: Arc<RegimeService>,
    pub watchlist: Arc<SignalWatchlist>,
    pub lifecycle: Arc<PositionLifecycleManager>,
    pub executor: Arc<SignalExecutor>,
    pub evolver: StrategyEvolver,
    pub advisor: Arc<dyn QualitativeAdvisor>,
    pub governor: Arc<RequestGovernor>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub notifier: Arc<DiscordNotifier>,
    pub store: Option<Arc<StateManager>>,
    pub heartbeat_interval_cycles: u64,
}

/// An opportunity pushed in by the AI reasoning service or another outside
/// source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalInsight {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsightOutcome {
    /// Score cleared the bypass gate and went straight to the entry gate
    Bypassed(EntryOutcome),
    /// Staged on the watchlist; false when the watchlist refused it
    Watching(bool),
}

#[derive(Debug, Clone, Serialize)]
pub struct AutopilotStatus {
    pub running: bool,
    pub market: Market,
    pub mode: ExecutionMode,
    pub regime: Option<Regime>,
    pub breaker_tripped: bool,
    pub candidates: usize,
    pub positions: usize,
    pub cycle_in_progress: bool,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub regime: Regime,
    pub regime_changed: bool,
    pub session: SessionPhase,
    /// None when the scan was skipped (session closed or breaker tripped)
    pub scan: Option<ScanReport>,
    pub transitions: Vec<TransitionRecord>,
}

/// Clears the in-progress flag however the cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The cycle orchestrator: regime refresh, signal scan, then position
/// monitoring, once per tick.
pub struct Autopilot {
    deps: AutopilotDeps,
    mode: ExecutionMode,
    running: AtomicBool,
    in_progress: AtomicBool,
    snapshot: RwLock<Option<RegimeSnapshot>>,
    /// Last label logged before a restart; seeds the first cycle's previous read.
    restored_regime: parking_lot::Mutex<Option<Regime>>,
    focus: RwLock<Option<(NaiveDate, StrategyFocus)>>,
    lessons: parking_lot::Mutex<Vec<String>>,
}

impl Autopilot {
    pub fn new(deps: AutopilotDeps) -> Self {
        deps.watchlist.bind_trigger_sink(deps.executor.clone());
        let mode = if deps.gateway.is_paper() {
            ExecutionMode::Paper
        } else {
            ExecutionMode::Live
        };
        tracing::info!(
            market = %deps.context.market,
            broker = deps.gateway.broker_name(),
            mode = mode.as_str(),
            "Autopilot wired"
        );
        Self {
            deps,
            mode,
            running: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            snapshot: RwLock::new(None),
            restored_regime: parking_lot::Mutex::new(None),
            focus: RwLock::new(None),
            lessons: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn market(&self) -> Market {
        self.deps.context.market
    }

    pub fn context(&self) -> &Arc<TradingContext> {
        &self.deps.context
    }

    /// Returns false when already running.
    pub async fn start(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(market = %self.market(), mode = self.mode.as_str(), "Autopilot started");
        self.deps
            .notifier
            .notify(&format!(
                "**Trading Agent Started** ({}, {})",
                self.market(),
                self.mode.as_str()
            ))
            .await;
        true
    }

    /// Returns false when already stopped.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(market = %self.market(), "Autopilot stopped");
        self.deps
            .notifier
            .notify(&format!("**Trading Agent Stopped** ({})", self.market()))
            .await;
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> AutopilotStatus {
        let breaker_tripped = self.deps.context.breaker.lock().await.is_tripped(Utc::now());
        let positions = self.deps.context.ledger.lock().await.positions().len();
        AutopilotStatus {
            running: self.is_running(),
            market: self.market(),
            mode: self.mode,
            regime: self.snapshot.read().await.as_ref().map(|s| s.regime()),
            breaker_tripped,
            candidates: self.deps.watchlist.len(),
            positions,
            cycle_in_progress: self.in_progress.load(Ordering::Acquire),
        }
    }

    pub async fn account(&self) -> AccountSnapshot {
        self.deps.context.ledger.lock().await.account()
    }

    pub async fn strategy_focus(&self) -> Option<StrategyFocus> {
        self.focus.read().await.as_ref().map(|(_, f)| f.clone())
    }

    /// Stage a ticker on the watchlist in WATCHING.
    pub async fn add_candidate(&self, ticker: &str, name: &str, strategy: &str, score: f64, now: DateTime<Utc>) -> bool {
        let added = self
            .deps
            .watchlist
            .add_candidate(ticker, name, strategy, score, CandidateStatus::Watching, now);
        if added {
            if let Some(store) = &self.deps.store {
                if let Err(e) = store
                    .log_candidate(self.market(), ticker, name, strategy, score, CandidateStatus::Watching.as_str())
                    .await
                {
                    tracing::debug!("Failed to log candidate: {}", e);
                }
            }
        }
        added
    }

    /// Entry point for scanners, insights and manual injections.
    ///
    /// Uses the last regime read without touching upstream; before the first
    /// cycle that is the neutral status.
    pub async fn execute_signal(&self, signal: EntrySignal, now: DateTime<Utc>) -> EntryOutcome {
        let snapshot = self.latest_snapshot(now).await;
        self.deps.executor.execute_signal(signal, &snapshot, now).await
    }

    pub async fn process_external_insight(&self, insight: ExternalInsight, now: DateTime<Utc>) -> InsightOutcome {
        let threshold = self.deps.context.bypass.read().await.threshold;
        if insight.score >= threshold {
            tracing::info!(
                ticker = %insight.ticker,
                score = insight.score,
                threshold,
                "Insight clears bypass gate, executing immediately"
            );
            let signal = EntrySignal {
                name: insight.name,
                strategy: BYPASS_STRATEGY.to_string(),
                price: insight.price,
                details: insight.details,
                ..EntrySignal::new(insight.ticker, TriggerType::IntelBypass, insight.score)
            };
            return InsightOutcome::Bypassed(self.execute_signal(signal, now).await);
        }

        InsightOutcome::Watching(
            self.add_candidate(&insight.ticker, &insight.name, INSIGHT_STRATEGY, insight.score, now)
                .await,
        )
    }

    async fn latest_snapshot(&self, now: DateTime<Utc>) -> RegimeSnapshot {
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return snapshot;
        }
        match self.deps.regime.cached(self.market()).await {
            Some(status) => RegimeSnapshot::new(status, None),
            None => RegimeSnapshot::new(RegimeStatus::neutral(self.market(), now, "No regime read yet"), None),
        }
    }

    /// One control cycle. Returns `None` when stopped or when the previous
    /// cycle is still running.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Option<CycleReport> {
        if !self.is_running() {
            return None;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(market = %self.market(), "Previous cycle still running, skipping");
            self.deps.context.metrics.lock().cycles_skipped += 1;
            return None;
        }
        let _guard = CycleGuard(&self.in_progress);

        let market = self.market();
        let cycle_start = AgentMetrics::start_timer();
        let session = session_phase(market, now);

        // 1. Regime
        let regime_start = AgentMetrics::start_timer();
        let update = self.deps.regime.current(market, now).await;
        let mut snapshot = update.snapshot();
        if snapshot.previous.is_none() {
            snapshot.previous = self.restored_regime.lock().take();
        }
        *self.snapshot.write().await = Some(snapshot.clone());
        {
            let mut metrics = self.deps.context.metrics.lock();
            if update.refreshed {
                metrics.regime_refreshes += 1;
            }
            if update.changed {
                metrics.regime_changes += 1;
            }
            metrics.record_regime_duration(regime_start);
        }
        if update.changed {
            self.deps
                .notifier
                .notify_regime_change(&update.status, update.previous.map(|p| p.name()))
                .await;
        }
        if update.refreshed {
            if let Some(store) = &self.deps.store {
                if let Err(e) = store.log_regime(&update.status).await {
                    tracing::debug!("Failed to log regime: {}", e);
                }
            }
        }

        if session != SessionPhase::Closed {
            self.refresh_focus(&snapshot, now).await;
        }

        // 2. Scan
        let scan_start = AgentMetrics::start_timer();
        let breaker_tripped = self.deps.context.breaker.lock().await.is_tripped(now);
        let scan = if breaker_tripped {
            tracing::info!(market = %market, "Circuit breaker active, skipping signal scan");
            None
        } else if !calendar::is_session_open(market, now) {
            tracing::debug!(market = %market, "Session closed, skipping signal scan");
            None
        } else {
            let report = self.deps.watchlist.scan(market, &snapshot, now).await;
            if !report.is_empty() {
                tracing::info!(
                    market = %market,
                    fired = report.fired.len(),
                    promoted = report.promoted.len(),
                    expired = report.expired.len(),
                    "Signal scan complete"
                );
            }
            self.log_scan(&report).await;
            Some(report)
        };
        self.deps.context.metrics.lock().record_scan_duration(scan_start);

        // 3. Monitor
        let monitor_start = AgentMetrics::start_timer();
        let transitions = self.monitor_positions(&snapshot, now).await;
        self.deps.context.metrics.lock().record_monitor_duration(monitor_start);

        let (cycles_run, metrics_json) = {
            let mut metrics = self.deps.context.metrics.lock();
            metrics.finish_cycle(cycle_start);
            (metrics.cycles_run, metrics.to_json())
        };
        if let Some(store) = &self.deps.store {
            if let Err(e) = store.save_metrics(&metrics_json).await {
                tracing::debug!("Failed to persist metrics: {}", e);
            }
        }

        let heartbeat = self.deps.heartbeat_interval_cycles;
        if heartbeat > 0 && cycles_run % heartbeat == 0 {
            self.send_heartbeat(&snapshot, cycles_run).await;
        }

        Some(CycleReport {
            regime: snapshot.regime(),
            regime_changed: update.changed,
            session,
            scan,
            transitions,
        })
    }

    async fn log_scan(&self, report: &ScanReport) {
        let Some(store) = &self.deps.store else {
            return;
        };
        for ticker in &report.promoted {
            if let Err(e) = store
                .log_candidate(self.market(), ticker, "", "", 0.0, CandidateStatus::Armed.as_str())
                .await
            {
                tracing::debug!("Failed to log candidate: {}", e);
            }
        }
        for ticker in &report.expired {
            if let Err(e) = store.log_candidate(self.market(), ticker, "", "", 0.0, "EXPIRED").await {
                tracing::debug!("Failed to log candidate: {}", e);
            }
        }
    }

    async fn monitor_positions(&self, snapshot: &RegimeSnapshot, now: DateTime<Utc>) -> Vec<TransitionRecord> {
        let market = self.market();
        let (records, new_trades, account, tripped_now, breaker_status) = {
            let mut breaker = self.deps.context.breaker.lock().await;
            let was_tripped = breaker.is_tripped(now);
            let mut ledger = self.deps.context.ledger.lock().await;
            let before = ledger.trade_log().len();

            let records = self
                .deps
                .lifecycle
                .monitor(&mut ledger, &mut breaker, snapshot, now)
                .await;

            let new_trades = ledger
                .trade_log()
                .get(before..)
                .map(|t| t.to_vec())
                .unwrap_or_default();
            let tripped_now = !was_tripped && breaker.status().triggered;
            (
                records,
                new_trades,
                PersistedAccount::from_ledger(&ledger),
                tripped_now,
                breaker.status().clone(),
            )
        };

        {
            let mut metrics = self.deps.context.metrics.lock();
            for record in &records {
                metrics.record_transition(record);
            }
            for trade in new_trades.iter().filter(|t| t.side == TradeSide::Sell) {
                if let Some(pnl) = trade.realized_pnl {
                    metrics.record_trade_result(pnl);
                }
            }
        }

        for record in &records {
            self.deps.notifier.notify_transition(record).await;
        }
        if tripped_now {
            let reason = breaker_status.reason.as_deref().unwrap_or("fail-safe");
            self.deps.notifier.notify_breaker(market, reason).await;
        }

        if let Some(store) = &self.deps.store {
            for trade in &new_trades {
                if let Err(e) = store.record_trade(market, trade).await {
                    tracing::warn!("Failed to persist trade: {}", e);
                }
            }
            if !records.is_empty() {
                if let Err(e) = store.save_account(market, &account).await {
                    tracing::warn!("Failed to persist account: {}", e);
                }
            }
            if tripped_now {
                if let Err(e) = store.save_breaker(market, &breaker_status).await {
                    tracing::warn!("Failed to persist breaker: {}", e);
                }
            }
        }

        records
    }

    /// Ask the reasoning service for the session focus, once per local day.
    async fn refresh_focus(&self, snapshot: &RegimeSnapshot, now: DateTime<Utc>) {
        let today = now.with_timezone(&self.market().timezone()).date_naive();
        if matches!(&*self.focus.read().await, Some((day, _)) if *day == today) {
            return;
        }

        let regime = snapshot.regime();
        let headlines = snapshot.current.reasons.clone();
        let lessons = self.lessons.lock().clone();
        let advisor = self.deps.advisor.clone();
        let result = self
            .deps
            .governor
            .run(Priority::Low, || {
                let advisor = advisor.clone();
                let headlines = headlines.clone();
                let lessons = lessons.clone();
                async move { advisor.decide_strategy_focus(regime, &headlines, &lessons).await }
            })
            .await;

        match result {
            Ok(focus) => {
                tracing::info!(
                    market = %self.market(),
                    sectors = ?focus.focus_sectors,
                    scanners = ?focus.scanners_to_activate,
                    "Strategy focus for the session: {}",
                    focus.rationale
                );
                *self.focus.write().await = Some((today, focus));
            }
            Err(e) => tracing::warn!(market = %self.market(), "Strategy focus unavailable: {}", e),
        }
    }

    async fn send_heartbeat(&self, snapshot: &RegimeSnapshot, cycles_run: u64) {
        let account = self.account().await;
        let (win_rate, total_pnl) = {
            let metrics = self.deps.context.metrics.lock();
            (metrics.recent_win_rate(), metrics.total_pnl)
        };
        let message = format!(
            "**Heartbeat ({})** cycle {} | {} | Equity {:.2} ({:+.2}%) | Positions {} | Watchlist {} | Win rate {:.1}% | P&L {:.2}",
            self.market(),
            cycles_run,
            snapshot.regime(),
            account.equity,
            account.return_percent,
            account.positions.len(),
            self.deps.watchlist.len(),
            win_rate,
            total_pnl
        );
        self.deps.notifier.notify(&message).await;
    }

    /// Feed the realized trade history back into the strategy book and the
    /// bypass gate.
    pub async fn run_evolution(&self, now: DateTime<Utc>) -> Option<EvolutionReport> {
        let outcomes = {
            let ledger = self.deps.context.ledger.lock().await;
            outcomes_from_log(ledger.trade_log())
        };

        let (report, configs, gate) = {
            let mut book = self.deps.context.book.write().await;
            let mut gate = self.deps.context.bypass.write().await;
            let report = self.deps.evolver.evolve(&mut book, &mut gate, &outcomes, now)?;
            (report, book.all(), gate.clone())
        };

        *self.lessons.lock() = report
            .changes
            .iter()
            .map(|c| {
                format!(
                    "{} {:?} after expectancy {:+.2}%: min score {:.0}, allocation {:.1}",
                    c.strategy, c.after.status, c.expectancy, c.after.min_score_to_trade, c.after.allocation_multiplier
                )
            })
            .collect();

        if let Some(store) = &self.deps.store {
            if let Err(e) = store.save_strategy_configs(&configs).await {
                tracing::warn!("Failed to persist strategy configs: {}", e);
            }
            if let Err(e) = store.save_bypass_gate(&gate).await {
                tracing::warn!("Failed to persist bypass gate: {}", e);
            }
        }

        if !report.changes.is_empty() || report.bypass.is_some() || !report.health.healthy {
            self.deps.notifier.notify_evolution(&report).await;
        }
        Some(report)
    }

    /// Reload persisted state. Missing rows keep the fresh defaults.
    pub async fn restore_from_store(&self) -> anyhow::Result<()> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        let market = self.market();

        if let Some(account) = store.load_account(market).await? {
            let trade_log = store.load_trade_log(market).await?;
            self.deps
                .context
                .ledger
                .lock()
                .await
                .restore(account.cash, account.initial_capital, account.positions, trade_log);
        }

        let configs = store.load_strategy_configs().await?;
        if !configs.is_empty() {
            tracing::info!(count = configs.len(), "Restored strategy configs");
            self.deps.context.book.write().await.restore(configs);
        }
        if let Some(gate) = store.load_bypass_gate().await? {
            tracing::info!(threshold = gate.threshold, "Restored bypass gate");
            *self.deps.context.bypass.write().await = gate;
        }
        if let Some(status) = store.load_breaker(market).await? {
            self.deps.context.breaker.lock().await.restore(status);
        }
        if let Some(json) = store.load_metrics().await? {
            self.deps.context.metrics.lock().restore_from_json(&json);
        }
        if let Some(label) = store.last_regime(market).await? {
            let regime = Regime::parse(&label);
            tracing::info!(market = %market, regime = ?regime, "Restored last regime");
            *self.restored_regime.lock() = regime;
        }
        Ok(())
    }
}
