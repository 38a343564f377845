use std::collections::VecDeque;
use std::time::Instant;

use position_lifecycle::TransitionRecord;

const RECENT_WINDOW: usize = 20;

/// Structured telemetry for the trading agent.
/// Tracks per-cycle timing, aggregate stats, and a rolling window of realized trades.
pub struct AgentMetrics {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub regime_refreshes: u64,
    pub regime_changes: u64,
    pub triggers_fired: u64,
    pub entries_executed: u64,
    pub entries_rejected: u64,
    pub exits: u64,
    pub partial_exits: u64,
    pub promotions: u64,
    pub pyramids: u64,
    pub breaker_trips: u64,
    pub total_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,

    // Per-cycle timing (last cycle)
    pub last_regime_duration_ms: u64,
    pub last_scan_duration_ms: u64,
    pub last_monitor_duration_ms: u64,
    pub last_total_duration_ms: u64,

    // Rolling 20-trade window
    recent_trades: VecDeque<TradeRecord>,
    log_interval_cycles: u64,
}

struct TradeRecord {
    pnl: f64,
    won: bool,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            cycles_skipped: 0,
            regime_refreshes: 0,
            regime_changes: 0,
            triggers_fired: 0,
            entries_executed: 0,
            entries_rejected: 0,
            exits: 0,
            partial_exits: 0,
            promotions: 0,
            pyramids: 0,
            breaker_trips: 0,
            total_pnl: 0.0,
            winning_trades: 0,
            losing_trades: 0,
            last_regime_duration_ms: 0,
            last_scan_duration_ms: 0,
            last_monitor_duration_ms: 0,
            last_total_duration_ms: 0,
            recent_trades: VecDeque::with_capacity(RECENT_WINDOW),
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_regime_duration(&mut self, start: Instant) {
        self.last_regime_duration_ms = start.elapsed().as_millis() as u64;
    }

    pub fn record_scan_duration(&mut self, start: Instant) {
        self.last_scan_duration_ms = start.elapsed().as_millis() as u64;
    }

    pub fn record_monitor_duration(&mut self, start: Instant) {
        self.last_monitor_duration_ms = start.elapsed().as_millis() as u64;
    }

    /// Count one lifecycle action by kind.
    pub fn record_transition(&mut self, record: &TransitionRecord) {
        use position_lifecycle::LifecycleRule::*;
        match record.rule {
            EntryPromotion | TrendPromotion => self.promotions += 1,
            EntryHarvest | ClimaxHarvest | BearReduction => self.partial_exits += 1,
            Pyramid => self.pyramids += 1,
            FailSafe => {
                self.exits += 1;
                self.breaker_trips += 1;
            }
            EntryStop | HoldStop | TrailingStop | StructuralExit => self.exits += 1,
        }
    }

    pub fn record_trade_result(&mut self, pnl: f64) {
        let won = pnl > 0.0;
        self.total_pnl += pnl;
        if won {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }

        self.recent_trades.push_back(TradeRecord { pnl, won });
        if self.recent_trades.len() > RECENT_WINDOW {
            self.recent_trades.pop_front();
        }
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        // Emit structured metrics periodically
        if self.log_interval_cycles > 0 && self.cycles_run.is_multiple_of(self.log_interval_cycles)
        {
            self.log_metrics();
        }
    }

    /// Rolling win rate from last 20 trades (0-100%)
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        let wins = self.recent_trades.iter().filter(|t| t.won).count() as f64;
        (wins / self.recent_trades.len() as f64) * 100.0
    }

    /// Rolling average P&L from last 20 trades
    pub fn recent_avg_pnl(&self) -> f64 {
        if self.recent_trades.is_empty() {
            return 0.0;
        }
        self.recent_trades.iter().map(|t| t.pnl).sum::<f64>() / self.recent_trades.len() as f64
    }

    /// Overall win rate (0-100%)
    pub fn overall_win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / total as f64) * 100.0
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            cycles_skipped = self.cycles_skipped,
            regime_changes = self.regime_changes,
            triggers_fired = self.triggers_fired,
            entries_executed = self.entries_executed,
            entries_rejected = self.entries_rejected,
            exits = self.exits,
            partial_exits = self.partial_exits,
            promotions = self.promotions,
            breaker_trips = self.breaker_trips,
            total_pnl = format!("{:.2}", self.total_pnl),
            overall_win_rate = format!("{:.1}%", self.overall_win_rate()),
            recent_win_rate = format!("{:.1}%", self.recent_win_rate()),
            recent_avg_pnl = format!("{:.2}", self.recent_avg_pnl()),
            last_cycle_ms = self.last_total_duration_ms,
            last_scan_ms = self.last_scan_duration_ms,
            last_monitor_ms = self.last_monitor_duration_ms,
            "Agent metrics summary"
        );
    }

    /// Serialize metrics to JSON for state persistence
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_run": self.cycles_run,
            "cycles_skipped": self.cycles_skipped,
            "regime_refreshes": self.regime_refreshes,
            "regime_changes": self.regime_changes,
            "triggers_fired": self.triggers_fired,
            "entries_executed": self.entries_executed,
            "entries_rejected": self.entries_rejected,
            "exits": self.exits,
            "partial_exits": self.partial_exits,
            "promotions": self.promotions,
            "pyramids": self.pyramids,
            "breaker_trips": self.breaker_trips,
            "total_pnl": self.total_pnl,
            "winning_trades": self.winning_trades,
            "losing_trades": self.losing_trades,
        })
    }

    /// Restore counters from persisted JSON
    pub fn restore_from_json(&mut self, json: &serde_json::Value) {
        let counters: [(&str, &mut u64); 14] = [
            ("cycles_run", &mut self.cycles_run),
            ("cycles_skipped", &mut self.cycles_skipped),
            ("regime_refreshes", &mut self.regime_refreshes),
            ("regime_changes", &mut self.regime_changes),
            ("triggers_fired", &mut self.triggers_fired),
            ("entries_executed", &mut self.entries_executed),
            ("entries_rejected", &mut self.entries_rejected),
            ("exits", &mut self.exits),
            ("partial_exits", &mut self.partial_exits),
            ("promotions", &mut self.promotions),
            ("pyramids", &mut self.pyramids),
            ("breaker_trips", &mut self.breaker_trips),
            ("winning_trades", &mut self.winning_trades),
            ("losing_trades", &mut self.losing_trades),
        ];
        for (key, slot) in counters {
            if let Some(v) = json.get(key).and_then(|v| v.as_u64()) {
                *slot = v;
            }
        }
        if let Some(v) = json.get("total_pnl").and_then(|v| v.as_f64()) {
            self.total_pnl = v;
        }
        tracing::info!(
            "Restored metrics from persisted state (cycles={})",
            self.cycles_run
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use position_lifecycle::LifecycleRule;
    use trading_core::StrategyPhase;

    fn record(rule: LifecycleRule) -> TransitionRecord {
        TransitionRecord {
            ticker: "AAPL".to_string(),
            from_phase: StrategyPhase::Entry,
            to_phase: None,
            rule,
            pnl_percent: 0.0,
            quantity: 1,
            rationale: String::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_rolling_window_keeps_last_twenty() {
        let mut metrics = AgentMetrics::new(0);
        for _ in 0..5 {
            metrics.record_trade_result(-10.0);
        }
        for _ in 0..20 {
            metrics.record_trade_result(5.0);
        }
        assert_eq!(metrics.recent_win_rate(), 100.0);
        assert_eq!(metrics.recent_avg_pnl(), 5.0);
        assert_eq!(metrics.overall_win_rate(), 80.0);
        assert_eq!(metrics.total_pnl, 50.0);
    }

    #[test]
    fn test_transition_counting() {
        let mut metrics = AgentMetrics::new(0);
        metrics.record_transition(&record(LifecycleRule::EntryHarvest));
        metrics.record_transition(&record(LifecycleRule::FailSafe));
        metrics.record_transition(&record(LifecycleRule::TrendPromotion));
        metrics.record_transition(&record(LifecycleRule::TrailingStop));

        assert_eq!(metrics.partial_exits, 1);
        assert_eq!(metrics.exits, 2);
        assert_eq!(metrics.breaker_trips, 1);
        assert_eq!(metrics.promotions, 1);
    }

    #[test]
    fn test_json_restore() {
        let mut metrics = AgentMetrics::new(0);
        metrics.cycles_run = 42;
        metrics.entries_executed = 3;
        metrics.record_trade_result(12.5);

        let mut restored = AgentMetrics::new(0);
        restored.restore_from_json(&metrics.to_json());
        assert_eq!(restored.cycles_run, 42);
        assert_eq!(restored.entries_executed, 3);
        assert_eq!(restored.winning_trades, 1);
        assert_eq!(restored.total_pnl, 12.5);
    }
}
