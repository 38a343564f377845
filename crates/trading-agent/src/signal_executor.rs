use std::sync::Arc;

use account_ledger::{BuyOrder, Fill};
use async_trait::async_trait;
use broker_trait::{ExecutionGateway, OrderRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smart_watchlist::{FiredTrigger, TriggerSink};
use trading_core::{normalize_ticker, QuoteProvider, Regime, RegimeSnapshot, StrategyPhase, TriggerType};

use crate::context::TradingContext;
use crate::notifier::DiscordNotifier;
use crate::state_manager::{PersistedAccount, StateManager};

/// Entry gate thresholds and scout sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Required score when the strategy has no tracked config
    pub default_required_score: f64,
    /// Required score while hunger mode is on
    pub hunger_required_score: f64,
    pub hunger_max_exposure: f64,
    /// Percent move (absolute) above which the tape counts as volatile
    pub hunger_min_volatility: f64,
    pub hunger_min_relative_volume: f64,
    /// Fraction of equity committed by one scout entry
    pub scout_fraction: f64,
    /// Largest notional for a single entry
    pub hard_cap: f64,
    /// Largest quantity as a fraction of the session volume
    pub liquidity_cap_ratio: f64,
    pub bearish_penalty: f64,
    pub rebound_bonus: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_required_score: 60.0,
            hunger_required_score: 50.0,
            hunger_max_exposure: 0.1,
            hunger_min_volatility: 3.0,
            hunger_min_relative_volume: 2.0,
            scout_fraction: 0.05,
            hard_cap: 10_000.0,
            liquidity_cap_ratio: 0.01,
            bearish_penalty: 20.0,
            rebound_bonus: 15.0,
        }
    }
}

/// An entry opportunity from any source: watchlist fire, AI insight or a
/// manual injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySignal {
    pub ticker: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub strategy: String,
    pub score: f64,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    /// Absolute percent move backing the signal, if the source measured one
    pub volatility: Option<f64>,
    pub relative_volume: Option<f64>,
    pub details: String,
}

impl EntrySignal {
    pub fn new(ticker: impl Into<String>, trigger_type: TriggerType, score: f64) -> Self {
        Self {
            ticker: ticker.into(),
            name: String::new(),
            trigger_type,
            strategy: trigger_type.as_str().to_string(),
            score,
            price: None,
            volume: None,
            volatility: None,
            relative_volume: None,
            details: String::new(),
        }
    }
}

impl From<&FiredTrigger> for EntrySignal {
    fn from(trigger: &FiredTrigger) -> Self {
        Self {
            ticker: trigger.ticker.clone(),
            name: trigger.name.clone(),
            trigger_type: trigger.trigger_type,
            strategy: trigger.origin_strategy.clone(),
            score: trigger.score,
            price: trigger.price,
            volume: Some(trigger.volume).filter(|v| *v > 0.0),
            volatility: None,
            relative_volume: trigger.relative_volume,
            details: trigger.details.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Executed(Fill),
    /// Nothing wrong with the signal, it just does not apply (already held)
    Skipped(String),
    Rejected(String),
}

impl EntryOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, EntryOutcome::Executed(_))
    }
}

/// Initial phase for an entry, from the trigger that produced it.
pub fn planned_phase(trigger: TriggerType, regime: Regime) -> StrategyPhase {
    match trigger {
        TriggerType::HunterBreakout | TriggerType::VolatilityBreakout | TriggerType::ClosingBell => {
            StrategyPhase::Entry
        }
        TriggerType::VolumeSpike if regime.is_strongly_bullish() => StrategyPhase::Hold,
        TriggerType::VolumeSpike => StrategyPhase::Entry,
        TriggerType::ValuePivot if regime.is_crash_or_bear() => StrategyPhase::Trend,
        TriggerType::ValuePivot
        | TriggerType::EagleEye
        | TriggerType::SupportRebound
        | TriggerType::IntelBypass
        | TriggerType::Manual => StrategyPhase::Hold,
    }
}

/// Score after the regime adjustments.
pub fn adjusted_score(score: f64, trigger: TriggerType, regime: Regime, config: &ExecutionConfig) -> f64 {
    if regime.is_bearish() {
        score - config.bearish_penalty
    } else if regime == Regime::Sideways && trigger == TriggerType::SupportRebound {
        score + config.rebound_bonus
    } else {
        score
    }
}

/// Scout quantity: equity slice scaled by allocation and regime exposure,
/// capped by notional and liquidity, at least one share. `None` when the
/// regime allows no exposure.
pub fn scout_quantity(
    equity: f64,
    allocation_multiplier: f64,
    recommended_exposure: f64,
    price: f64,
    volume: Option<f64>,
    config: &ExecutionConfig,
) -> Option<u64> {
    let amount = equity * config.scout_fraction * allocation_multiplier * recommended_exposure;
    if !amount.is_finite() || amount <= 0.0 || price <= 0.0 {
        return None;
    }
    let amount = amount.min(config.hard_cap);
    let mut quantity = (amount / price).floor();
    if let Some(volume) = volume.filter(|v| *v > 0.0) {
        quantity = quantity.min((volume * config.liquidity_cap_ratio).floor());
    }
    Some(quantity.max(1.0) as u64)
}

/// The single entry point that turns an opportunity into a position.
pub struct SignalExecutor {
    context: Arc<TradingContext>,
    quotes: Arc<dyn QuoteProvider>,
    gateway: Arc<dyn ExecutionGateway>,
    notifier: Arc<DiscordNotifier>,
    store: Option<Arc<StateManager>>,
    config: ExecutionConfig,
}

impl SignalExecutor {
    pub fn new(
        context: Arc<TradingContext>,
        quotes: Arc<dyn QuoteProvider>,
        gateway: Arc<dyn ExecutionGateway>,
        notifier: Arc<DiscordNotifier>,
        store: Option<Arc<StateManager>>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            context,
            quotes,
            gateway,
            notifier,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub async fn execute_signal(
        &self,
        signal: EntrySignal,
        regime: &RegimeSnapshot,
        now: DateTime<Utc>,
    ) -> EntryOutcome {
        let outcome = self.try_execute(signal, regime, now).await;
        match &outcome {
            EntryOutcome::Executed(_) => self.context.metrics.lock().entries_executed += 1,
            EntryOutcome::Rejected(reason) => {
                tracing::info!(market = %self.context.market, "Entry rejected: {}", reason);
                self.context.metrics.lock().entries_rejected += 1;
            }
            EntryOutcome::Skipped(reason) => {
                tracing::debug!(market = %self.context.market, "Entry skipped: {}", reason);
            }
        }
        outcome
    }

    async fn try_execute(&self, signal: EntrySignal, regime: &RegimeSnapshot, now: DateTime<Utc>) -> EntryOutcome {
        let market = self.context.market;
        let Some(ticker) = normalize_ticker(&signal.ticker) else {
            return EntryOutcome::Rejected("blank ticker".to_string());
        };

        {
            let mut breaker = self.context.breaker.lock().await;
            if breaker.is_tripped(now) {
                return EntryOutcome::Rejected(format!(
                    "{}: circuit breaker active ({})",
                    ticker,
                    breaker.status().reason.as_deref().unwrap_or("no reason")
                ));
            }
        }

        let exposure = {
            let ledger = self.context.ledger.lock().await;
            if ledger.holds(&ticker) {
                return EntryOutcome::Skipped(format!("{} already held", ticker));
            }
            ledger.exposure()
        };

        let current = regime.regime();
        let score = adjusted_score(signal.score, signal.trigger_type, current, &self.config);
        let tracked = self.context.book.read().await.lookup(&signal.strategy).cloned();
        let allocation = tracked.as_ref().map(|c| c.allocation_multiplier).unwrap_or(1.0);
        let mut required = tracked
            .as_ref()
            .map(|c| c.min_score_to_trade)
            .unwrap_or(self.config.default_required_score);

        let volatility = signal
            .volatility
            .unwrap_or_else(|| regime.current.technical_change.abs());
        let hungry = exposure < self.config.hunger_max_exposure
            && volatility > self.config.hunger_min_volatility
            && signal.relative_volume.unwrap_or(0.0) > self.config.hunger_min_relative_volume;
        if hungry {
            required = required.min(self.config.hunger_required_score);
            tracing::info!(ticker = %ticker, required, volatility, "Hunger mode lowers the entry bar");
        }

        if score < required {
            return EntryOutcome::Rejected(format!(
                "{}: score {:.0} below required {:.0} ({})",
                ticker, score, required, current
            ));
        }

        let mut volume = signal.volume;
        let price = match signal.price.filter(|p| p.is_finite() && *p > 0.0) {
            Some(price) => price,
            None => {
                let quote = self.quotes.latest_quote(&ticker, market).await;
                if !quote.is_valid() {
                    return EntryOutcome::Rejected(format!("{}: no valid price", ticker));
                }
                volume = volume.or(Some(quote.volume));
                quote.price
            }
        };
        if volume.is_none() {
            // Session volume for the liquidity cap
            volume = Some(self.quotes.latest_quote(&ticker, market).await.volume);
        }

        let phase = planned_phase(signal.trigger_type, current);
        let rationale = format!("[{}] {}", signal.trigger_type, signal.details);

        let (fill, trade, account) = {
            let mut ledger = self.context.ledger.lock().await;
            if ledger.holds(&ticker) {
                return EntryOutcome::Skipped(format!("{} already held", ticker));
            }

            let Some(quantity) = scout_quantity(
                ledger.equity(),
                allocation,
                regime.current.recommended_exposure,
                price,
                volume,
                &self.config,
            ) else {
                return EntryOutcome::Rejected(format!("{}: {} allows no exposure", ticker, current));
            };

            let fees = *ledger.fees();
            let notional = fees.buy_price(price) * quantity as f64;
            let cost = notional + fees.fee(notional);
            if cost > ledger.cash() {
                return EntryOutcome::Rejected(format!(
                    "{}: cost {:.2} exceeds cash {:.2}",
                    ticker,
                    cost,
                    ledger.cash()
                ));
            }

            if let Err(e) = self
                .gateway
                .place_order(OrderRequest::buy(market, ticker.clone(), quantity, price))
                .await
            {
                return EntryOutcome::Rejected(format!("{}: order failed: {}", ticker, e));
            }

            let order = BuyOrder::new(ticker.clone(), signal.name.clone(), price, quantity)
                .reason(rationale.clone())
                .phase(phase)
                .strategy(signal.strategy.clone());
            let fill = match ledger.buy(order) {
                Ok(fill) => fill,
                Err(e) => {
                    tracing::error!(ticker = %ticker, "Gateway accepted but ledger refused: {}", e);
                    return EntryOutcome::Rejected(format!("{}: {}", ticker, e));
                }
            };
            (
                fill,
                ledger.trade_log().last().cloned(),
                PersistedAccount::from_ledger(&ledger),
            )
        };

        tracing::info!(
            market = %market,
            ticker = %ticker,
            phase = %phase,
            strategy = %signal.strategy,
            score,
            required,
            quantity = fill.quantity,
            price = fill.execution_price,
            "Entry executed: {}",
            rationale
        );

        self.notifier
            .notify_entry(&signal.name, &fill, score, &rationale)
            .await;

        if let Some(store) = &self.store {
            if let Some(trade) = &trade {
                if let Err(e) = store.record_trade(market, trade).await {
                    tracing::warn!("Failed to persist trade: {}", e);
                }
            }
            if let Err(e) = store.save_account(market, &account).await {
                tracing::warn!("Failed to persist account: {}", e);
            }
        }

        EntryOutcome::Executed(fill)
    }
}

#[async_trait]
impl TriggerSink for SignalExecutor {
    async fn on_trigger(&self, trigger: &FiredTrigger, regime: &RegimeSnapshot) {
        self.context.metrics.lock().triggers_fired += 1;
        let outcome = self
            .execute_signal(EntrySignal::from(trigger), regime, trigger.fired_at)
            .await;
        if let Some(store) = &self.store {
            let status = if outcome.is_executed() { "EXECUTED" } else { "DROPPED" };
            if let Err(e) = store
                .log_candidate(
                    self.context.market,
                    &trigger.ticker,
                    &trigger.name,
                    &trigger.origin_strategy,
                    trigger.score,
                    status,
                )
                .await
            {
                tracing::debug!("Failed to log fired candidate: {}", e);
            }
        }
    }
}
