use std::collections::BTreeMap;

use account_ledger::{TradeLogEntry, TradeSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::stats::max_drawdown_pct;

use crate::book::{canonical_strategy, StrategyBook};
use crate::models::{
    BypassChange, BypassGate, ConfigChange, EvolutionReport, HealthReport, StrategyStats,
    StrategyStatus, TradeOutcome,
};

/// Strategy label carried by trades that skipped the watchlist.
pub const BYPASS_STRATEGY: &str = "INTEL_BYPASS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolverConfig {
    /// Trailing closed trades considered per pass
    pub window: usize,
    pub min_trades: usize,

    pub penalty_score_step: f64,
    pub max_min_score: f64,
    pub penalty_allocation_step: f64,
    pub min_allocation: f64,

    /// Expectancy (percent per trade) above which a strategy is rewarded
    pub reward_expectancy: f64,
    pub reward_score_step: f64,
    pub min_min_score: f64,
    pub reward_allocation_step: f64,
    pub max_allocation: f64,

    pub bypass_reward_return: f64,
    pub bypass_min_threshold: f64,
    pub bypass_max_threshold: f64,

    pub healthy_win_rate: f64,
    /// Negative percent
    pub healthy_max_drawdown: f64,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            window: 50,
            min_trades: 5,
            penalty_score_step: 5.0,
            max_min_score: 95.0,
            penalty_allocation_step: 0.2,
            min_allocation: 0.5,
            reward_expectancy: 1.5,
            reward_score_step: 2.0,
            min_min_score: 70.0,
            reward_allocation_step: 0.2,
            max_allocation: 2.0,
            bypass_reward_return: 5.0,
            bypass_min_threshold: 90.0,
            bypass_max_threshold: 99.0,
            healthy_win_rate: 0.55,
            healthy_max_drawdown: -15.0,
        }
    }
}

/// Closed trades from a ledger trade log, oldest first.
pub fn outcomes_from_log(log: &[TradeLogEntry]) -> Vec<TradeOutcome> {
    log.iter()
        .filter(|e| e.side == TradeSide::Sell)
        .filter_map(|e| {
            e.realized_pnl_percent.map(|pnl_percent| TradeOutcome {
                strategy: e.strategy.clone(),
                pnl_percent,
                closed_at: e.timestamp,
            })
        })
        .collect()
}

/// Win rate, average win/loss and expectancy per canonical strategy name.
pub fn strategy_stats(outcomes: &[TradeOutcome]) -> Vec<StrategyStats> {
    #[derive(Default)]
    struct Tally {
        wins: usize,
        losses: usize,
        win_sum: f64,
        loss_sum: f64,
    }

    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for outcome in outcomes {
        let tally = tallies.entry(canonical_strategy(&outcome.strategy)).or_default();
        if outcome.pnl_percent > 0.0 {
            tally.wins += 1;
            tally.win_sum += outcome.pnl_percent;
        } else {
            tally.losses += 1;
            tally.loss_sum += outcome.pnl_percent.abs();
        }
    }

    tallies
        .into_iter()
        .map(|(strategy, t)| {
            let trades = t.wins + t.losses;
            let win_rate = t.wins as f64 / trades as f64;
            let avg_win = if t.wins > 0 { t.win_sum / t.wins as f64 } else { 0.0 };
            let avg_loss = if t.losses > 0 { t.loss_sum / t.losses as f64 } else { 0.0 };
            StrategyStats {
                strategy,
                trades,
                wins: t.wins,
                losses: t.losses,
                win_rate,
                avg_win,
                avg_loss,
                expectancy: win_rate * avg_win - (1.0 - win_rate) * avg_loss,
            }
        })
        .collect()
}

/// Win rate and drawdown of the compounded trade curve.
pub fn health_check(outcomes: &[TradeOutcome], config: &EvolverConfig) -> HealthReport {
    if outcomes.is_empty() {
        return HealthReport {
            sample_size: 0,
            win_rate: 0.0,
            max_drawdown_pct: 0.0,
            healthy: false,
        };
    }

    let wins = outcomes.iter().filter(|o| o.pnl_percent > 0.0).count();
    let win_rate = wins as f64 / outcomes.len() as f64;

    let mut curve = Vec::with_capacity(outcomes.len() + 1);
    let mut value = 100.0;
    curve.push(value);
    for outcome in outcomes {
        value *= 1.0 + outcome.pnl_percent / 100.0;
        curve.push(value);
    }
    let max_drawdown = -max_drawdown_pct(&curve);

    HealthReport {
        sample_size: outcomes.len(),
        win_rate,
        max_drawdown_pct: max_drawdown,
        healthy: win_rate >= config.healthy_win_rate && max_drawdown >= config.healthy_max_drawdown,
    }
}

/// Adjusts the strategy book and the bypass gate from trailing expectancy.
#[derive(Debug, Clone, Default)]
pub struct StrategyEvolver {
    config: EvolverConfig,
}

impl StrategyEvolver {
    pub fn new(config: EvolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvolverConfig {
        &self.config
    }

    /// Run one pass over `outcomes` (oldest first). Returns `None` when there
    /// are too few trades to judge; the book and gate are left untouched.
    pub fn evolve(
        &self,
        book: &mut StrategyBook,
        gate: &mut BypassGate,
        outcomes: &[TradeOutcome],
        now: DateTime<Utc>,
    ) -> Option<EvolutionReport> {
        let start = outcomes.len().saturating_sub(self.config.window);
        let recent = &outcomes[start..];
        if recent.len() < self.config.min_trades {
            tracing::info!(trades = recent.len(), "Not enough closed trades to evolve");
            return None;
        }

        let stats = strategy_stats(recent);
        let mut changes = Vec::new();
        for stat in &stats {
            if let Some(change) = self.adjust(book, stat) {
                changes.push(change);
            }
        }

        let bypass = self.adjust_bypass(gate, recent);

        let health = health_check(recent, &self.config);
        if health.healthy {
            tracing::info!(
                win_rate = health.win_rate,
                max_drawdown_pct = health.max_drawdown_pct,
                "Strategy health check passed"
            );
        } else {
            tracing::warn!(
                win_rate = health.win_rate,
                max_drawdown_pct = health.max_drawdown_pct,
                "Strategy health degraded"
            );
        }

        Some(EvolutionReport {
            evaluated_trades: recent.len(),
            stats,
            changes,
            bypass,
            health,
            at: now,
        })
    }

    fn adjust(&self, book: &mut StrategyBook, stat: &StrategyStats) -> Option<ConfigChange> {
        let cfg = &self.config;
        // Untracked strategies run on the defaults and are not tuned.
        let config = book.lookup_mut(&stat.strategy)?;
        let before = config.clone();

        tracing::info!(
            strategy = %stat.strategy,
            expectancy = stat.expectancy,
            win_rate = stat.win_rate,
            avg_win = stat.avg_win,
            avg_loss = stat.avg_loss,
            "Strategy expectancy"
        );

        if stat.expectancy < 0.0 {
            config.min_score_to_trade = (config.min_score_to_trade + cfg.penalty_score_step).min(cfg.max_min_score);
            config.allocation_multiplier =
                (config.allocation_multiplier - cfg.penalty_allocation_step).max(cfg.min_allocation);
            config.status = StrategyStatus::Probation;
        } else if stat.expectancy > cfg.reward_expectancy {
            config.min_score_to_trade = (config.min_score_to_trade - cfg.reward_score_step).max(cfg.min_min_score);
            config.allocation_multiplier =
                (config.allocation_multiplier + cfg.reward_allocation_step).min(cfg.max_allocation);
            config.status = StrategyStatus::Active;
        } else {
            return None;
        }

        if *config == before {
            return None;
        }
        tracing::info!(
            strategy = %stat.strategy,
            min_score = config.min_score_to_trade,
            allocation = config.allocation_multiplier,
            status = ?config.status,
            "Strategy config evolved"
        );
        Some(ConfigChange {
            strategy: stat.strategy.clone(),
            expectancy: stat.expectancy,
            before,
            after: config.clone(),
        })
    }

    fn adjust_bypass(&self, gate: &mut BypassGate, outcomes: &[TradeOutcome]) -> Option<BypassChange> {
        let returns: Vec<f64> = outcomes
            .iter()
            .filter(|o| canonical_strategy(&o.strategy) == BYPASS_STRATEGY)
            .map(|o| o.pnl_percent)
            .collect();
        if returns.is_empty() {
            return None;
        }

        let wins = returns.iter().filter(|r| **r > 0.0).count();
        let avg_return = returns.iter().sum::<f64>() / returns.len() as f64;
        gate.success_rate = wins as f64 / returns.len() as f64 * 100.0;
        gate.total_trades = returns.len();

        let old_threshold = gate.threshold;
        if avg_return < 0.0 {
            gate.threshold = (gate.threshold + 1.0).min(self.config.bypass_max_threshold);
        } else if avg_return > self.config.bypass_reward_return {
            gate.threshold = (gate.threshold - 1.0).max(self.config.bypass_min_threshold);
        }

        if gate.threshold != old_threshold {
            tracing::info!(old_threshold, new_threshold = gate.threshold, avg_return, "Bypass threshold moved");
        }
        Some(BypassChange {
            trades: returns.len(),
            avg_return,
            old_threshold,
            new_threshold: gate.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyConfig;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
    }

    fn outcome(strategy: &str, pnl_percent: f64) -> TradeOutcome {
        TradeOutcome {
            strategy: strategy.to_string(),
            pnl_percent,
            closed_at: ts(),
        }
    }

    fn repeat(strategy: &str, pnls: &[f64]) -> Vec<TradeOutcome> {
        pnls.iter().map(|p| outcome(strategy, *p)).collect()
    }

    #[test]
    fn test_stats_expectancy() {
        // 3 wins of +4, 2 losses of -3: 0.6*4 - 0.4*3 = 1.2
        let stats = strategy_stats(&repeat("EAGLE_EYE", &[4.0, -3.0, 4.0, -3.0, 4.0]));
        assert_eq!(stats.len(), 1);
        assert!((stats[0].win_rate - 0.6).abs() < 1e-9);
        assert!((stats[0].expectancy - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_trades_is_noop() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();
        let before = book.clone();

        let report = evolver.evolve(&mut book, &mut gate, &repeat("EAGLE_EYE", &[-5.0; 4]), ts());
        assert!(report.is_none());
        assert_eq!(book, before);
    }

    #[test]
    fn test_negative_expectancy_penalizes_despite_high_win_rate() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();

        // 80% win rate, but the one loss wipes out the wins.
        let trades = repeat("Eagle Eye", &[1.0, 1.0, 1.0, 1.0, -10.0]);
        let report = evolver.evolve(&mut book, &mut gate, &trades, ts()).unwrap();

        let eagle = book.get("EAGLE_EYE");
        assert_eq!(eagle.min_score_to_trade, 85.0);
        assert_eq!(eagle.allocation_multiplier, 0.5);
        assert_eq!(eagle.status, StrategyStatus::Probation);
        assert_eq!(report.changes.len(), 1);

        // Capped at 95.
        for _ in 0..5 {
            evolver.evolve(&mut book, &mut gate, &trades, ts());
        }
        assert_eq!(book.get("EAGLE_EYE").min_score_to_trade, 95.0);
    }

    #[test]
    fn test_high_expectancy_rewards_despite_low_win_rate() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();

        // 40% win rate, expectancy 0.4*10 - 0.6*2 = 2.8
        let trades = repeat("VOLUME_SPIKE", &[10.0, -2.0, 10.0, -2.0, -2.0]);
        evolver.evolve(&mut book, &mut gate, &trades, ts()).unwrap();

        let spike = book.get("VOLUME_SPIKE");
        assert_eq!(spike.min_score_to_trade, 83.0);
        assert!((spike.allocation_multiplier - 0.7).abs() < 1e-9);
        assert_eq!(spike.status, StrategyStatus::Active);

        for _ in 0..20 {
            evolver.evolve(&mut book, &mut gate, &trades, ts());
        }
        let spike = book.get("VOLUME_SPIKE");
        assert_eq!(spike.min_score_to_trade, 70.0);
        assert!((spike.allocation_multiplier - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_middling_expectancy_and_unknown_strategies_untouched() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();

        let mut trades = repeat("VALUE_PIVOT", &[2.0, -1.0, 2.0, -1.0, 1.0]);
        trades.extend(repeat("HUNTER_BREAKOUT", &[-4.0; 5]));
        let report = evolver.evolve(&mut book, &mut gate, &trades, ts()).unwrap();

        assert!(report.changes.is_empty());
        assert_eq!(book.get("VALUE_PIVOT"), StrategyConfig::new("VALUE_PIVOT", 80.0, 0.5));
        assert!(book.lookup("HUNTER_BREAKOUT").is_none());
    }

    #[test]
    fn test_only_trailing_window_counts() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();

        // 50 old losers followed by 50 strong winners.
        let mut trades = repeat("CHART_PATTERN", &[-5.0; 50]);
        trades.extend(repeat("CHART_PATTERN", &[3.0; 50]));
        let report = evolver.evolve(&mut book, &mut gate, &trades, ts()).unwrap();

        assert_eq!(report.evaluated_trades, 50);
        assert_eq!(book.get("CHART_PATTERN").min_score_to_trade, 83.0);
    }

    #[test]
    fn test_bypass_gate_moves_within_bounds() {
        let evolver = StrategyEvolver::default();
        let mut book = StrategyBook::default();
        let mut gate = BypassGate::default();

        let losers = repeat(BYPASS_STRATEGY, &[-2.0, -1.0, 1.0, -3.0, -1.0]);
        let report = evolver.evolve(&mut book, &mut gate, &losers, ts()).unwrap();
        assert_eq!(gate.threshold, 96.0);
        assert_eq!(gate.total_trades, 5);
        assert!((gate.success_rate - 20.0).abs() < 1e-9);
        assert_eq!(report.bypass.unwrap().new_threshold, 96.0);

        for _ in 0..10 {
            evolver.evolve(&mut book, &mut gate, &losers, ts());
        }
        assert_eq!(gate.threshold, 99.0);

        let winners = repeat(BYPASS_STRATEGY, &[8.0; 5]);
        for _ in 0..20 {
            evolver.evolve(&mut book, &mut gate, &winners, ts());
        }
        assert_eq!(gate.threshold, 90.0);

        // Between 0 and +5%: hold.
        let flat = repeat(BYPASS_STRATEGY, &[2.0; 5]);
        evolver.evolve(&mut book, &mut gate, &flat, ts());
        assert_eq!(gate.threshold, 90.0);
    }

    #[test]
    fn test_health_check() {
        let cfg = EvolverConfig::default();

        let good = repeat("EAGLE_EYE", &[3.0, 2.0, -1.0, 4.0, 1.0]);
        let report = health_check(&good, &cfg);
        assert!(report.healthy);
        assert!((report.win_rate - 0.8).abs() < 1e-9);
        assert!((report.max_drawdown_pct + 1.0).abs() < 1e-9);

        // Wins often, but one -20% trade breaches the drawdown floor.
        let crash = repeat("EAGLE_EYE", &[2.0, 2.0, 2.0, -20.0, 2.0]);
        let report = health_check(&crash, &cfg);
        assert!(!report.healthy);
        assert!(report.max_drawdown_pct < -15.0);

        let cold = repeat("EAGLE_EYE", &[1.0, -1.0, -1.0, 1.0, -1.0]);
        assert!(!health_check(&cold, &cfg).healthy);
        assert!(!health_check(&[], &cfg).healthy);
    }
}
