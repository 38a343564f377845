use account_ledger::Position;
use serde::{Deserialize, Serialize};
use trading_core::{pct_change, Regime, RegimeSnapshot, StrategyPhase};

/// Thresholds for every phase rule. Percentages are P&L percent of average
/// cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Bullish-regime loss that counts as a logic inconsistency
    pub fail_safe_loss_pct: f64,

    pub entry_promote_pct: f64,
    pub entry_harvest_pct: f64,
    pub entry_harvest_ratio: f64,
    pub entry_stop_pct: f64,

    pub hold_promote_pct: f64,
    pub climax_relative_volume: f64,
    pub climax_change_pct: f64,
    pub climax_harvest_ratio: f64,
    pub hold_stop_pct: f64,
    /// Trailing stop distance in ATR multiples
    pub atr_multiple: f64,
    pub pyramid_profit_pct: f64,
    pub pyramid_equity_fraction: f64,
    pub max_pyramids: u32,

    pub trend_bear_reduce_ratio: f64,
    pub trend_stop_pct: f64,

    /// Daily bars requested for ATR and relative volume
    pub daily_bars: usize,
    pub atr_period: usize,
    pub volume_lookback: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            fail_safe_loss_pct: -5.0,
            entry_promote_pct: 5.0,
            entry_harvest_pct: 3.0,
            entry_harvest_ratio: 0.3,
            entry_stop_pct: -3.0,
            hold_promote_pct: 20.0,
            climax_relative_volume: 3.0,
            climax_change_pct: 15.0,
            climax_harvest_ratio: 0.5,
            hold_stop_pct: -5.0,
            atr_multiple: 2.0,
            pyramid_profit_pct: 10.0,
            pyramid_equity_fraction: 0.1,
            max_pyramids: 2,
            trend_bear_reduce_ratio: 0.5,
            trend_stop_pct: -20.0,
            daily_bars: 30,
            atr_period: 14,
            volume_lookback: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleRule {
    FailSafe,
    EntryPromotion,
    EntryHarvest,
    EntryStop,
    TrendPromotion,
    ClimaxHarvest,
    HoldStop,
    TrailingStop,
    Pyramid,
    BearReduction,
    StructuralExit,
}

impl LifecycleRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleRule::FailSafe => "FAIL_SAFE",
            LifecycleRule::EntryPromotion => "ENTRY_PROMOTION",
            LifecycleRule::EntryHarvest => "ENTRY_HARVEST",
            LifecycleRule::EntryStop => "ENTRY_STOP",
            LifecycleRule::TrendPromotion => "TREND_PROMOTION",
            LifecycleRule::ClimaxHarvest => "CLIMAX_HARVEST",
            LifecycleRule::HoldStop => "HOLD_STOP",
            LifecycleRule::TrailingStop => "TRAILING_STOP",
            LifecycleRule::Pyramid => "PYRAMID",
            LifecycleRule::BearReduction => "BEAR_REDUCTION",
            LifecycleRule::StructuralExit => "STRUCTURAL_EXIT",
        }
    }
}

impl std::fmt::Display for LifecycleRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LifecycleAction {
    Promote { to: StrategyPhase },
    /// Sell part of the position; `harvest_level` is recorded afterwards when set.
    PartialExit { quantity: u64, harvest_level: Option<u8> },
    FullExit { quantity: u64 },
    Pyramid { quantity: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleDecision {
    pub rule: LifecycleRule,
    pub action: LifecycleAction,
    pub pnl_percent: f64,
    pub rationale: String,
}

/// Market inputs for one position on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarketView {
    pub price: f64,
    /// Percent change versus the previous close
    pub change_rate: f64,
    pub relative_volume: Option<f64>,
    pub atr: Option<f64>,
}

/// Account figures the pyramiding rule sizes against.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SizingContext {
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleOutcome {
    pub decision: Option<RuleDecision>,
    /// New trailing stop when it moved up this tick
    pub ratcheted_stop: Option<f64>,
}

/// Evaluate the phase rules for one position. First matching rule wins; the
/// fail-safe is checked before any phase rule.
pub fn evaluate(
    position: &Position,
    view: &MarketView,
    regime: &RegimeSnapshot,
    sizing: &SizingContext,
    config: &LifecycleConfig,
) -> RuleOutcome {
    let pnl = pct_change(view.price, position.avg_price);
    let label = regime.regime();

    if label.is_bullish() && pnl < config.fail_safe_loss_pct {
        return decided(
            LifecycleRule::FailSafe,
            LifecycleAction::FullExit { quantity: position.quantity },
            pnl,
            format!("{:.2}% loss while regime reads {}: logic inconsistency", pnl, label),
        );
    }

    match position.phase {
        StrategyPhase::Entry => evaluate_entry(position, pnl, label, config),
        StrategyPhase::Hold => evaluate_hold(position, view, pnl, label, sizing, config),
        StrategyPhase::Trend => evaluate_trend(position, pnl, regime, config),
    }
}

fn evaluate_entry(position: &Position, pnl: f64, label: Regime, config: &LifecycleConfig) -> RuleOutcome {
    if pnl > config.entry_promote_pct && label.is_bullish() {
        return decided(
            LifecycleRule::EntryPromotion,
            LifecycleAction::Promote { to: StrategyPhase::Hold },
            pnl,
            format!("+{:.2}% under {}, promoting scout to swing hold", pnl, label),
        );
    }

    if pnl > config.entry_harvest_pct && position.harvest_level < 1 {
        if let Some(quantity) = partial_quantity(position.quantity, config.entry_harvest_ratio) {
            return decided(
                LifecycleRule::EntryHarvest,
                LifecycleAction::PartialExit { quantity, harvest_level: Some(1) },
                pnl,
                format!("+{:.2}%, harvesting {} shares", pnl, quantity),
            );
        }
    }

    if pnl <= config.entry_stop_pct {
        return decided(
            LifecycleRule::EntryStop,
            LifecycleAction::FullExit { quantity: position.quantity },
            pnl,
            format!("{:.2}% hit entry stop", pnl),
        );
    }

    RuleOutcome::default()
}

fn evaluate_hold(
    position: &Position,
    view: &MarketView,
    pnl: f64,
    label: Regime,
    sizing: &SizingContext,
    config: &LifecycleConfig,
) -> RuleOutcome {
    let ratcheted_stop = view
        .atr
        .filter(|atr| atr.is_finite() && *atr > 0.0)
        .map(|atr| view.price - config.atr_multiple * atr)
        .filter(|candidate| *candidate > 0.0 && position.stop_loss_price.map_or(true, |s| *candidate > s));

    let decision = if pnl > config.hold_promote_pct && label == Regime::SuperBull {
        rule_decision(
            LifecycleRule::TrendPromotion,
            LifecycleAction::Promote { to: StrategyPhase::Trend },
            pnl,
            format!("+{:.2}% under {}, riding the trend", pnl, label),
        )
    } else if let Some(quantity) = climax_quantity(position, view, config) {
        rule_decision(
            LifecycleRule::ClimaxHarvest,
            LifecycleAction::PartialExit { quantity, harvest_level: Some(2) },
            pnl,
            format!(
                "climax: rvol {:.1}x, change {:.1}%, selling {} shares",
                view.relative_volume.unwrap_or_default(),
                view.change_rate,
                quantity
            ),
        )
    } else if pnl <= config.hold_stop_pct {
        rule_decision(
            LifecycleRule::HoldStop,
            LifecycleAction::FullExit { quantity: position.quantity },
            pnl,
            format!("{:.2}% hit hold stop", pnl),
        )
    } else if let Some(stop) = position.stop_loss_price.filter(|stop| view.price <= *stop) {
        rule_decision(
            LifecycleRule::TrailingStop,
            LifecycleAction::FullExit { quantity: position.quantity },
            pnl,
            format!("price {:.2} at or below trailing stop {:.2}", view.price, stop),
        )
    } else if let Some(quantity) = pyramid_quantity(position, view.price, pnl, label, sizing, config) {
        rule_decision(
            LifecycleRule::Pyramid,
            LifecycleAction::Pyramid { quantity },
            pnl,
            format!(
                "+{:.2}% under {}, adding {} shares (add {} of {})",
                pnl,
                label,
                quantity,
                position.pyramid_count + 1,
                config.max_pyramids
            ),
        )
    } else {
        None
    };

    // A stop only ratchets on a position that stays open.
    let exiting = matches!(
        decision.as_ref().map(|d| d.action),
        Some(LifecycleAction::FullExit { .. })
    );
    RuleOutcome {
        decision,
        ratcheted_stop: if exiting { None } else { ratcheted_stop },
    }
}

fn evaluate_trend(position: &Position, pnl: f64, regime: &RegimeSnapshot, config: &LifecycleConfig) -> RuleOutcome {
    if regime.downgraded_into_bear() {
        if let Some(quantity) = partial_quantity(position.quantity, config.trend_bear_reduce_ratio) {
            return decided(
                LifecycleRule::BearReduction,
                LifecycleAction::PartialExit { quantity, harvest_level: None },
                pnl,
                format!(
                    "regime downgraded {} -> {}, reducing {} shares",
                    regime.previous.map(|r| r.name()).unwrap_or("UNKNOWN"),
                    regime.regime(),
                    quantity
                ),
            );
        }
    }

    if pnl <= config.trend_stop_pct {
        return decided(
            LifecycleRule::StructuralExit,
            LifecycleAction::FullExit { quantity: position.quantity },
            pnl,
            format!("{:.2}% broke trend structure", pnl),
        );
    }

    RuleOutcome::default()
}

fn climax_quantity(position: &Position, view: &MarketView, config: &LifecycleConfig) -> Option<u64> {
    let rvol = view.relative_volume?;
    if rvol > config.climax_relative_volume
        && view.change_rate > config.climax_change_pct
        && position.harvest_level < 2
    {
        partial_quantity(position.quantity, config.climax_harvest_ratio)
    } else {
        None
    }
}

fn pyramid_quantity(
    position: &Position,
    price: f64,
    pnl: f64,
    label: Regime,
    sizing: &SizingContext,
    config: &LifecycleConfig,
) -> Option<u64> {
    if pnl <= config.pyramid_profit_pct
        || !label.is_bullish()
        || position.pyramid_count >= config.max_pyramids
    {
        return None;
    }
    let budget = (sizing.equity * config.pyramid_equity_fraction).min(sizing.cash);
    let quantity = (budget / price).floor();
    (quantity.is_finite() && quantity >= 1.0).then_some(quantity as u64)
}

/// floor(quantity * ratio), or None when that is less than one share.
fn partial_quantity(quantity: u64, ratio: f64) -> Option<u64> {
    let part = (quantity as f64 * ratio).floor() as u64;
    (part >= 1).then_some(part)
}

fn rule_decision(rule: LifecycleRule, action: LifecycleAction, pnl_percent: f64, rationale: String) -> Option<RuleDecision> {
    Some(RuleDecision { rule, action, pnl_percent, rationale })
}

fn decided(rule: LifecycleRule, action: LifecycleAction, pnl_percent: f64, rationale: String) -> RuleOutcome {
    RuleOutcome {
        decision: rule_decision(rule, action, pnl_percent, rationale),
        ratcheted_stop: None,
    }
}
