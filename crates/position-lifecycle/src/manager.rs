use std::sync::Arc;

use account_ledger::{AccountLedger, BuyOrder, Position};
use anyhow::{bail, Result};
use broker_trait::{ExecutionGateway, OrderRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::{latest_atr, relative_volume};
use trading_core::{Market, QuoteProvider, QuoteSnapshot, RegimeSnapshot, StrategyPhase, Timeframe};

use crate::circuit_breaker::CircuitBreaker;
use crate::rules::{
    evaluate, LifecycleAction, LifecycleConfig, LifecycleRule, MarketView, RuleDecision,
    SizingContext,
};

/// Structured rationale for one applied lifecycle action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub ticker: String,
    pub from_phase: StrategyPhase,
    /// Set for promotions only
    pub to_phase: Option<StrategyPhase>,
    pub rule: LifecycleRule,
    pub pnl_percent: f64,
    pub quantity: u64,
    pub rationale: String,
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn is_exit(&self) -> bool {
        matches!(
            self.rule,
            LifecycleRule::FailSafe
                | LifecycleRule::EntryStop
                | LifecycleRule::HoldStop
                | LifecycleRule::TrailingStop
                | LifecycleRule::StructuralExit
        )
    }
}

/// Runs the phase rules over every open position once per monitoring tick.
pub struct PositionLifecycleManager {
    config: LifecycleConfig,
    quotes: Arc<dyn QuoteProvider>,
    gateway: Arc<dyn ExecutionGateway>,
}

impl PositionLifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        quotes: Arc<dyn QuoteProvider>,
        gateway: Arc<dyn ExecutionGateway>,
    ) -> Self {
        Self {
            config,
            quotes,
            gateway,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Evaluate and apply the phase rules for every position in `ledger`.
    ///
    /// Positions with no valid quote are skipped for this tick. A fail-safe
    /// hit trips `breaker` even if the exit order itself fails.
    pub async fn monitor(
        &self,
        ledger: &mut AccountLedger,
        breaker: &mut CircuitBreaker,
        regime: &RegimeSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<TransitionRecord> {
        let market = ledger.market();
        let targets: Vec<(String, StrategyPhase)> = ledger
            .positions()
            .iter()
            .map(|p| (p.ticker.clone(), p.phase))
            .collect();

        let mut records = Vec::new();
        for (ticker, phase) in targets {
            // Earlier actions this tick may have merged or closed it.
            if ledger.position(&ticker, phase).is_none() {
                continue;
            }

            let quote = self.quotes.latest_quote(&ticker, market).await;
            if !quote.is_valid() {
                tracing::debug!(ticker = %ticker, "No valid quote, skipping lifecycle check");
                continue;
            }
            ledger.mark_price(&ticker, quote.price);

            let Some(position) = ledger.position(&ticker, phase).cloned() else {
                continue;
            };
            let view = self.market_view(market, &position, quote).await;
            let sizing = SizingContext {
                equity: ledger.equity(),
                cash: ledger.cash(),
            };

            let outcome = evaluate(&position, &view, regime, &sizing, &self.config);

            if let Some(stop) = outcome.ratcheted_stop {
                ledger.set_stop_loss(&ticker, phase, stop);
                tracing::debug!(ticker = %ticker, stop, "Trailing stop raised");
            }

            let Some(decision) = outcome.decision else {
                continue;
            };

            if decision.rule == LifecycleRule::FailSafe {
                breaker.trip(
                    format!("logic inconsistency: {} {}", ticker, decision.rationale),
                    now,
                );
            }

            match self.apply(ledger, &position, view.price, &decision).await {
                Ok((to_phase, quantity)) => {
                    let record = TransitionRecord {
                        ticker: ticker.clone(),
                        from_phase: phase,
                        to_phase,
                        rule: decision.rule,
                        pnl_percent: decision.pnl_percent,
                        quantity,
                        rationale: decision.rationale,
                        at: now,
                    };
                    tracing::info!(
                        ticker = %record.ticker,
                        phase = %record.from_phase,
                        to_phase = ?record.to_phase,
                        rule = %record.rule,
                        pnl_percent = record.pnl_percent,
                        quantity = record.quantity,
                        rationale = %record.rationale,
                        "Lifecycle transition"
                    );
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!(
                        ticker = %ticker,
                        phase = %phase,
                        rule = %decision.rule,
                        error = %e,
                        "Lifecycle action failed"
                    );
                }
            }
        }

        records
    }

    /// Daily candles are only needed by the HOLD rules.
    async fn market_view(&self, market: Market, position: &Position, quote: QuoteSnapshot) -> MarketView {
        let mut view = MarketView {
            price: quote.price,
            change_rate: quote.change_rate,
            relative_volume: None,
            atr: None,
        };
        if position.phase == StrategyPhase::Hold {
            let bars = self
                .quotes
                .candles(&position.ticker, market, Timeframe::Day1, self.config.daily_bars)
                .await;
            view.atr = latest_atr(&bars, self.config.atr_period);
            view.relative_volume = relative_volume(&bars, self.config.volume_lookback);
        }
        view
    }

    /// Route the order, then book it. Returns the new phase for promotions and
    /// the share count acted on.
    async fn apply(
        &self,
        ledger: &mut AccountLedger,
        position: &Position,
        price: f64,
        decision: &RuleDecision,
    ) -> Result<(Option<StrategyPhase>, u64)> {
        let market = ledger.market();
        let ticker = position.ticker.as_str();
        let reason = format!("{}: {}", decision.rule, decision.rationale);

        match decision.action {
            LifecycleAction::Promote { to } => {
                ledger.promote(ticker, position.phase, to)?;
                Ok((Some(to), position.quantity))
            }
            LifecycleAction::PartialExit { quantity, harvest_level } => {
                self.gateway
                    .place_order(OrderRequest::sell(market, ticker, quantity, price))
                    .await?;
                ledger.sell_phase(ticker, position.phase, price, quantity, &reason)?;
                if let Some(level) = harvest_level {
                    ledger.set_harvest_level(ticker, position.phase, level);
                }
                Ok((None, quantity))
            }
            LifecycleAction::FullExit { quantity } => {
                self.gateway
                    .place_order(OrderRequest::sell(market, ticker, quantity, price))
                    .await?;
                ledger.sell_phase(ticker, position.phase, price, quantity, &reason)?;
                Ok((None, quantity))
            }
            LifecycleAction::Pyramid { quantity } => {
                let quantity = quantity.min(affordable_quantity(ledger, price));
                if quantity == 0 {
                    bail!("{}: not enough cash to pyramid at {:.2}", ticker, price);
                }
                self.gateway
                    .place_order(OrderRequest::buy(market, ticker, quantity, price))
                    .await?;
                ledger.buy(
                    BuyOrder::new(ticker, position.name.clone(), price, quantity)
                        .phase(position.phase)
                        .strategy(position.origin_strategy.clone())
                        .reason(reason),
                )?;
                Ok((None, quantity))
            }
        }
    }
}

/// Largest share count the ledger can pay for at `price`, fees and
/// slippage included.
fn affordable_quantity(ledger: &AccountLedger, price: f64) -> u64 {
    let fees = ledger.fees();
    let per_share = fees.buy_price(price) * (1.0 + fees.fee_rate);
    if per_share <= 0.0 || !per_share.is_finite() {
        return 0;
    }
    (ledger.cash() / per_share).floor().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_ledger::FeeModel;
    use async_trait::async_trait;
    use broker_trait::DryRunGateway;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use trading_core::{Bar, Regime, RegimeStatus};

    #[derive(Default)]
    struct StubQuotes {
        quotes: Mutex<HashMap<String, QuoteSnapshot>>,
    }

    impl StubQuotes {
        fn set(&self, ticker: &str, price: f64) {
            self.quotes.lock().unwrap().insert(
                ticker.to_string(),
                QuoteSnapshot {
                    price,
                    change_rate: 0.0,
                    volume: 1_000.0,
                },
            );
        }
    }

    #[async_trait]
    impl QuoteProvider for StubQuotes {
        async fn latest_quote(&self, ticker: &str, _market: Market) -> QuoteSnapshot {
            self.quotes
                .lock()
                .unwrap()
                .get(ticker)
                .copied()
                .unwrap_or_default()
        }

        async fn candles(&self, _: &str, _: Market, _: Timeframe, _: usize) -> Vec<Bar> {
            Vec::new()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()
    }

    fn snapshot(regime: Regime) -> RegimeSnapshot {
        let mut status = RegimeStatus::neutral(Market::Kr, now(), "test");
        status.regime = regime;
        RegimeSnapshot::new(status, Some(regime))
    }

    struct Harness {
        quotes: Arc<StubQuotes>,
        gateway: Arc<DryRunGateway>,
        manager: PositionLifecycleManager,
        ledger: AccountLedger,
        breaker: CircuitBreaker,
    }

    fn harness(capital: f64, fees: FeeModel) -> Harness {
        let quotes = Arc::new(StubQuotes::default());
        let gateway = Arc::new(DryRunGateway::new());
        let manager = PositionLifecycleManager::new(
            LifecycleConfig::default(),
            quotes.clone(),
            gateway.clone(),
        );
        Harness {
            quotes,
            gateway,
            manager,
            ledger: AccountLedger::with_capital(Market::Kr, capital, fees),
            breaker: CircuitBreaker::default(),
        }
    }

    impl Harness {
        async fn tick(&mut self, regime: Regime) -> Vec<TransitionRecord> {
            self.manager
                .monitor(&mut self.ledger, &mut self.breaker, &snapshot(regime), now())
                .await
        }
    }

    #[tokio::test]
    async fn test_entry_harvest_happens_once() {
        let mut h = harness(1_000_000.0, FeeModel::default());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 10_000.0, 10).phase(StrategyPhase::Entry))
            .unwrap();

        h.quotes.set("TEST", 10_400.0);
        let records = h.tick(Regime::Sideways).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule, LifecycleRule::EntryHarvest);
        assert_eq!(records[0].quantity, 3);

        let position = h.ledger.position("TEST", StrategyPhase::Entry).unwrap();
        assert_eq!(position.quantity, 7);
        assert_eq!(position.harvest_level, 1);

        // Still above +3% on the next tick: nothing more to do.
        assert!(h.tick(Regime::Sideways).await.is_empty());
        assert_eq!(h.ledger.position("TEST", StrategyPhase::Entry).unwrap().quantity, 7);
        assert_eq!(h.gateway.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_safe_exits_and_trips_breaker() {
        let mut h = harness(1_000_000.0, FeeModel::default());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 100.0, 10).phase(StrategyPhase::Hold))
            .unwrap();

        h.quotes.set("TEST", 94.0);
        let records = h.tick(Regime::Bull).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule, LifecycleRule::FailSafe);
        assert!(records[0].is_exit());
        assert!(!h.ledger.holds("TEST"));
        assert!(h.breaker.is_tripped(now()));
        assert!(h
            .breaker
            .status()
            .reason
            .as_deref()
            .unwrap()
            .starts_with("logic inconsistency"));
    }

    #[tokio::test]
    async fn test_rejected_exit_keeps_position_but_still_trips() {
        let mut h = harness(1_000_000.0, FeeModel::default());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 100.0, 10).phase(StrategyPhase::Entry))
            .unwrap();
        h.gateway.set_reject_all(true);

        h.quotes.set("TEST", 94.0);
        assert!(h.tick(Regime::WeakBull).await.is_empty());
        assert!(h.ledger.holds("TEST"));
        assert!(h.breaker.is_tripped(now()));
    }

    #[tokio::test]
    async fn test_promotion_moves_phase() {
        let mut h = harness(1_000_000.0, FeeModel::frictionless());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 100.0, 10).phase(StrategyPhase::Entry))
            .unwrap();

        h.quotes.set("TEST", 106.0);
        let records = h.tick(Regime::Bull).await;
        assert_eq!(records[0].to_phase, Some(StrategyPhase::Hold));
        assert!(h.ledger.position("TEST", StrategyPhase::Entry).is_none());
        assert_eq!(h.ledger.position("TEST", StrategyPhase::Hold).unwrap().quantity, 10);
        // Promotion is not an order.
        assert!(h.gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_pyramid_adds_and_counts() {
        let mut h = harness(10_000.0, FeeModel::frictionless());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 100.0, 10).phase(StrategyPhase::Hold))
            .unwrap();

        h.quotes.set("TEST", 112.0);
        let records = h.tick(Regime::Bull).await;
        assert_eq!(records[0].rule, LifecycleRule::Pyramid);
        // equity 9,000 + 1,120; 10% of that is 1,012 -> 9 shares
        assert_eq!(records[0].quantity, 9);

        let position = h.ledger.position("TEST", StrategyPhase::Hold).unwrap();
        assert_eq!(position.quantity, 19);
        assert_eq!(position.pyramid_count, 1);
        assert!(h.ledger.cash() >= 0.0);
    }

    #[tokio::test]
    async fn test_missing_quote_skips_position() {
        let mut h = harness(1_000_000.0, FeeModel::default());
        h.ledger
            .buy(BuyOrder::new("TEST", "Test Corp", 100.0, 10).phase(StrategyPhase::Entry))
            .unwrap();

        assert!(h.tick(Regime::Bull).await.is_empty());
        assert!(h.ledger.holds("TEST"));
        assert!(!h.breaker.is_tripped(now()));
    }
}
