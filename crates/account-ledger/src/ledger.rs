use chrono::{DateTime, Utc};
use trading_core::{normalize_ticker, Market, StrategyPhase};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::fees::FeeModel;
use crate::models::{
    AccountSnapshot, BuyOrder, Fill, Position, RecentPerformance, TradeLogEntry, TradeSide,
};

/// Sells considered by [`AccountLedger::recent_performance`].
const PERFORMANCE_WINDOW: usize = 20;
/// Below this many sells the conservative defaults are returned.
const PERFORMANCE_MIN_SAMPLE: usize = 5;
const DEFAULT_WIN_RATE: f64 = 0.4;
const DEFAULT_PAYOFF_RATIO: f64 = 1.5;

/// Simulated brokerage account for one market.
///
/// Not internally synchronized: the owner wraps it in a lock. Every rejected
/// order leaves the account untouched.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    market: Market,
    fees: FeeModel,
    cash: f64,
    initial_capital: f64,
    positions: Vec<Position>,
    trade_log: Vec<TradeLogEntry>,
}

fn invalid_price(price: f64) -> bool {
    !price.is_finite() || price <= 0.0
}

impl AccountLedger {
    /// Ledger seeded with the market's default capital.
    pub fn new(market: Market) -> Self {
        Self::with_capital(market, market.default_capital(), FeeModel::default())
    }

    pub fn with_capital(market: Market, capital: f64, fees: FeeModel) -> Self {
        Self {
            market,
            fees,
            cash: capital,
            initial_capital: capital,
            positions: Vec::new(),
            trade_log: Vec::new(),
        }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn fees(&self) -> &FeeModel {
        &self.fees
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn trade_log(&self) -> &[TradeLogEntry] {
        &self.trade_log
    }

    pub fn position(&self, ticker: &str, phase: StrategyPhase) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.ticker == ticker && p.phase == phase)
    }

    /// First position held for `ticker`, in entry order.
    pub fn first_position(&self, ticker: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.ticker == ticker)
    }

    pub fn holds(&self, ticker: &str) -> bool {
        self.first_position(ticker).is_some()
    }

    /// Cash plus marked value of every position.
    pub fn equity(&self) -> f64 {
        self.cash + self.positions.iter().map(|p| p.market_value()).sum::<f64>()
    }

    /// Deployed fraction of equity (0.0 - 1.0).
    pub fn exposure(&self) -> f64 {
        let equity = self.equity();
        if equity <= 0.0 {
            return 0.0;
        }
        (equity - self.cash) / equity
    }

    pub fn account(&self) -> AccountSnapshot {
        let equity = self.equity();
        AccountSnapshot {
            market: self.market,
            cash: self.cash,
            initial_capital: self.initial_capital,
            equity,
            return_percent: trading_core::pct_change(equity, self.initial_capital),
            positions: self.positions.clone(),
            trade_count: self.trade_log.len(),
        }
    }

    /// Open or add to the (ticker, phase) position.
    pub fn buy(&mut self, order: BuyOrder) -> LedgerResult<Fill> {
        let Some(ticker) = normalize_ticker(&order.ticker) else {
            return Err(self.reject(LedgerError::InvalidOrder("blank ticker".into())));
        };
        if invalid_price(order.price) {
            return Err(self.reject(LedgerError::InvalidOrder(format!(
                "{}: invalid price {}",
                ticker, order.price
            ))));
        }
        if order.quantity == 0 {
            return Err(self.reject(LedgerError::InvalidOrder(format!("{}: zero quantity", ticker))));
        }

        let execution_price = self.fees.buy_price(order.price);
        let amount = execution_price * order.quantity as f64;
        let fee = self.fees.fee(amount);
        let total_cost = amount + fee;
        if self.cash < total_cost {
            return Err(self.reject(LedgerError::InsufficientCash {
                needed: total_cost,
                available: self.cash,
            }));
        }

        self.cash -= total_cost;
        let now = Utc::now();

        match self
            .positions
            .iter_mut()
            .find(|p| p.ticker == ticker && p.phase == order.phase)
        {
            Some(existing) => {
                let total_qty = existing.quantity + order.quantity;
                existing.avg_price = (existing.cost_basis() + amount) / total_qty as f64;
                existing.quantity = total_qty;
                existing.current_price = order.price;
                existing.max_price_since_entry = existing.max_price_since_entry.max(order.price);
                existing.pyramid_count += 1;
                if order.stop_loss.is_some() {
                    existing.stop_loss_price = order.stop_loss;
                }
            }
            None => self.positions.push(Position {
                ticker: ticker.clone(),
                name: order.name.clone(),
                quantity: order.quantity,
                avg_price: execution_price,
                current_price: order.price,
                phase: order.phase,
                origin_strategy: order.strategy.clone(),
                harvest_level: 0,
                pyramid_count: 0,
                stop_loss_price: order.stop_loss,
                max_price_since_entry: order.price,
                entry_date: now,
            }),
        }

        self.trade_log.push(TradeLogEntry {
            id: Uuid::new_v4().to_string(),
            side: TradeSide::Buy,
            ticker: ticker.clone(),
            name: order.name.clone(),
            phase: order.phase,
            strategy: order.strategy.clone(),
            price: execution_price,
            quantity: order.quantity,
            fee,
            realized_pnl: None,
            realized_pnl_percent: None,
            reason: order.reason.clone(),
            balance_after: self.cash,
            timestamp: now,
        });

        tracing::info!(
            market = %self.market,
            ticker = %ticker,
            phase = %order.phase,
            strategy = %order.strategy,
            quantity = order.quantity,
            price = execution_price,
            fee,
            cash = self.cash,
            "BUY filled: {}",
            order.reason
        );

        Ok(Fill {
            side: TradeSide::Buy,
            ticker,
            phase: order.phase,
            execution_price,
            quantity: order.quantity,
            fee,
            realized_pnl: None,
            realized_pnl_percent: None,
            balance_after: self.cash,
            position_closed: false,
        })
    }

    /// Sell from the first position held for `ticker`.
    pub fn sell(&mut self, ticker: &str, price: f64, quantity: u64, reason: &str) -> LedgerResult<Fill> {
        let ticker = normalize_ticker(ticker).unwrap_or_default();
        let index = self
            .positions
            .iter()
            .position(|p| p.ticker == ticker)
            .ok_or_else(|| LedgerError::PositionNotFound(ticker.clone()));
        match index {
            Ok(index) => self.sell_at(index, price, quantity, reason),
            Err(e) => Err(self.reject(e)),
        }
    }

    /// Sell from the (ticker, phase) position.
    pub fn sell_phase(
        &mut self,
        ticker: &str,
        phase: StrategyPhase,
        price: f64,
        quantity: u64,
        reason: &str,
    ) -> LedgerResult<Fill> {
        let ticker = normalize_ticker(ticker).unwrap_or_default();
        let index = self
            .positions
            .iter()
            .position(|p| p.ticker == ticker && p.phase == phase);
        match index {
            Some(index) => self.sell_at(index, price, quantity, reason),
            None => Err(self.reject(LedgerError::PhaseNotFound {
                ticker,
                phase,
            })),
        }
    }

    fn sell_at(&mut self, index: usize, price: f64, quantity: u64, reason: &str) -> LedgerResult<Fill> {
        let held = self.positions[index].quantity;
        let ticker = self.positions[index].ticker.clone();
        if invalid_price(price) {
            return Err(self.reject(LedgerError::InvalidOrder(format!("{}: invalid price {}", ticker, price))));
        }
        if quantity == 0 {
            return Err(self.reject(LedgerError::InvalidOrder(format!("{}: zero quantity", ticker))));
        }
        if quantity > held {
            return Err(self.reject(LedgerError::InsufficientQuantity {
                ticker,
                requested: quantity,
                held,
            }));
        }

        let execution_price = self.fees.sell_price(price);
        let amount = execution_price * quantity as f64;
        let fee = self.fees.fee(amount);
        let net_proceeds = amount - fee;

        let position = &mut self.positions[index];
        let cost_basis = position.avg_price * quantity as f64;
        let pnl = net_proceeds - cost_basis;
        let pnl_percent = if cost_basis > 0.0 { pnl / cost_basis * 100.0 } else { 0.0 };

        position.quantity -= quantity;
        position.current_price = price;
        let closed = position.quantity == 0;
        let name = position.name.clone();
        let phase = position.phase;
        let strategy = position.origin_strategy.clone();

        self.cash += net_proceeds;
        if closed {
            self.positions.remove(index);
        }

        self.trade_log.push(TradeLogEntry {
            id: Uuid::new_v4().to_string(),
            side: TradeSide::Sell,
            ticker: ticker.clone(),
            name,
            phase,
            strategy,
            price: execution_price,
            quantity,
            fee,
            realized_pnl: Some(pnl),
            realized_pnl_percent: Some(pnl_percent),
            reason: reason.to_string(),
            balance_after: self.cash,
            timestamp: Utc::now(),
        });

        tracing::info!(
            market = %self.market,
            ticker = %ticker,
            phase = %phase,
            quantity,
            price = execution_price,
            pnl,
            pnl_percent,
            closed,
            "SELL filled: {}",
            reason
        );

        Ok(Fill {
            side: TradeSide::Sell,
            ticker,
            phase,
            execution_price,
            quantity,
            fee,
            realized_pnl: Some(pnl),
            realized_pnl_percent: Some(pnl_percent),
            balance_after: self.cash,
            position_closed: closed,
        })
    }

    fn reject(&self, error: LedgerError) -> LedgerError {
        tracing::warn!(market = %self.market, "Order rejected: {}", error);
        error
    }

    /// Update the mark for every position in `ticker`. Returns how many were
    /// touched.
    pub fn mark_price(&mut self, ticker: &str, price: f64) -> usize {
        if invalid_price(price) {
            return 0;
        }
        let mut touched = 0;
        for position in self.positions.iter_mut().filter(|p| p.ticker == ticker) {
            position.current_price = price;
            position.max_price_since_entry = position.max_price_since_entry.max(price);
            touched += 1;
        }
        touched
    }

    /// Move a position to a later phase. Merges into an existing position of
    /// the target phase when one is already held.
    pub fn promote(&mut self, ticker: &str, from: StrategyPhase, to: StrategyPhase) -> LedgerResult<()> {
        if to <= from {
            return Err(LedgerError::InvalidOrder(format!(
                "{}: phases only move forward ({} -> {})",
                ticker, from, to
            )));
        }
        self.set_phase(ticker, from, to)
    }

    /// Re-tag a position's phase, merging on collision.
    pub fn set_phase(&mut self, ticker: &str, from: StrategyPhase, to: StrategyPhase) -> LedgerResult<()> {
        let Some(index) = self
            .positions
            .iter()
            .position(|p| p.ticker == ticker && p.phase == from)
        else {
            return Err(LedgerError::PhaseNotFound {
                ticker: ticker.to_string(),
                phase: from,
            });
        };
        if from == to {
            return Ok(());
        }

        match self
            .positions
            .iter()
            .position(|p| p.ticker == ticker && p.phase == to)
        {
            Some(target_index) => {
                let moving = self.positions.remove(index);
                let target_index = if target_index > index { target_index - 1 } else { target_index };
                let target = &mut self.positions[target_index];
                let total_qty = target.quantity + moving.quantity;
                target.avg_price = (target.cost_basis() + moving.cost_basis()) / total_qty as f64;
                target.quantity = total_qty;
                target.harvest_level = target.harvest_level.max(moving.harvest_level);
                target.pyramid_count = target.pyramid_count.max(moving.pyramid_count);
                target.max_price_since_entry = target.max_price_since_entry.max(moving.max_price_since_entry);
                target.stop_loss_price = match (target.stop_loss_price, moving.stop_loss_price) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                target.entry_date = target.entry_date.min(moving.entry_date);
                tracing::info!(ticker, from = %from, to = %to, quantity = total_qty, "Position merged into later phase");
            }
            None => {
                self.positions[index].phase = to;
                tracing::info!(ticker, from = %from, to = %to, "Position phase changed");
            }
        }
        Ok(())
    }

    pub fn set_harvest_level(&mut self, ticker: &str, phase: StrategyPhase, level: u8) -> bool {
        match self.position_mut(ticker, phase) {
            Some(p) => {
                p.harvest_level = p.harvest_level.max(level);
                true
            }
            None => false,
        }
    }

    pub fn set_stop_loss(&mut self, ticker: &str, phase: StrategyPhase, stop: f64) -> bool {
        if invalid_price(stop) {
            return false;
        }
        match self.position_mut(ticker, phase) {
            Some(p) => {
                p.stop_loss_price = Some(stop);
                true
            }
            None => false,
        }
    }

    fn position_mut(&mut self, ticker: &str, phase: StrategyPhase) -> Option<&mut Position> {
        self.positions
            .iter_mut()
            .find(|p| p.ticker == ticker && p.phase == phase)
    }

    /// Closed trades (sells), newest first, up to `limit`.
    pub fn closed_trades(&self, limit: usize) -> Vec<&TradeLogEntry> {
        self.trade_log
            .iter()
            .rev()
            .filter(|e| e.side == TradeSide::Sell && e.realized_pnl.is_some())
            .take(limit)
            .collect()
    }

    /// Win rate and payoff ratio over the trailing sells.
    pub fn recent_performance(&self) -> RecentPerformance {
        let sells = self.closed_trades(PERFORMANCE_WINDOW);
        if sells.len() < PERFORMANCE_MIN_SAMPLE {
            return RecentPerformance {
                win_rate: DEFAULT_WIN_RATE,
                payoff_ratio: DEFAULT_PAYOFF_RATIO,
                sample_size: sells.len(),
            };
        }

        let pnls: Vec<f64> = sells.iter().filter_map(|e| e.realized_pnl).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let win_rate = wins.len() as f64 / pnls.len() as f64;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            1.0
        } else {
            (losses.iter().sum::<f64>() / losses.len() as f64).abs()
        };
        let payoff = avg_win / avg_loss;

        RecentPerformance {
            win_rate,
            payoff_ratio: if payoff.is_finite() { payoff } else { DEFAULT_PAYOFF_RATIO },
            sample_size: pnls.len(),
        }
    }

    /// Replace state with persisted values.
    pub fn restore(
        &mut self,
        cash: f64,
        initial_capital: f64,
        positions: Vec<Position>,
        trade_log: Vec<TradeLogEntry>,
    ) {
        if cash.is_finite() && cash >= 0.0 {
            self.cash = cash;
        }
        if initial_capital.is_finite() && initial_capital > 0.0 {
            self.initial_capital = initial_capital;
        }
        self.positions = positions.into_iter().filter(|p| p.quantity > 0).collect();
        self.trade_log = trade_log;
        tracing::info!(
            market = %self.market,
            cash = self.cash,
            positions = self.positions.len(),
            trades = self.trade_log.len(),
            "Ledger restored"
        );
    }

    /// Oldest entry date among open positions, for reporting.
    pub fn oldest_entry(&self) -> Option<DateTime<Utc>> {
        self.positions.iter().map(|p| p.entry_date).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(cash: f64) -> AccountLedger {
        AccountLedger::with_capital(Market::Kr, cash, FeeModel::default())
    }

    #[test]
    fn test_round_trip_profit_scenario() {
        let mut ledger = ledger(1_000_000.0);
        ledger
            .buy(BuyOrder::new("TEST", "Test Co", 10_000.0, 10))
            .unwrap();
        let fill = ledger.sell("TEST", 11_000.0, 10, "take profit").unwrap();

        let pnl = fill.realized_pnl.unwrap();
        // 10_000 gross, minus slippage on both legs and the sell fee
        assert!((pnl - 9_773.5165).abs() < 1e-6, "pnl = {}", pnl);
        assert!(pnl < 10_000.0 && pnl > 9_700.0);
        assert!(fill.position_closed);
        assert!(ledger.positions().is_empty());

        // Cash moves by P&L minus the buy fee, which is not in cost basis
        let buy_fee = 10_010.0 * 10.0 * 0.00015;
        assert!((ledger.cash() - (1_000_000.0 + pnl - buy_fee)).abs() < 1e-6);
        assert_eq!(ledger.trade_log().len(), 2);
    }

    #[test]
    fn test_frictionless_round_trip_is_flat() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 10_000.0, FeeModel::frictionless());
        ledger.buy(BuyOrder::new("AAPL", "Apple", 100.0, 10)).unwrap();
        let fill = ledger.sell("AAPL", 100.0, 10, "flat").unwrap();
        assert!(fill.realized_pnl.unwrap().abs() < 1e-9);
        assert!((ledger.cash() - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_buy_rejections_leave_account_untouched() {
        let mut ledger = ledger(100_000.0);

        assert!(matches!(
            ledger.buy(BuyOrder::new("X", "X", f64::NAN, 1)),
            Err(LedgerError::InvalidOrder(_))
        ));
        assert!(matches!(
            ledger.buy(BuyOrder::new("X", "X", -5.0, 1)),
            Err(LedgerError::InvalidOrder(_))
        ));
        assert!(matches!(
            ledger.buy(BuyOrder::new("X", "X", 10.0, 0)),
            Err(LedgerError::InvalidOrder(_))
        ));
        assert!(matches!(
            ledger.buy(BuyOrder::new(" ", "X", 10.0, 1)),
            Err(LedgerError::InvalidOrder(_))
        ));
        assert!(matches!(
            ledger.buy(BuyOrder::new("X", "X", 50_000.0, 2)),
            Err(LedgerError::InsufficientCash { .. })
        ));

        assert_eq!(ledger.cash(), 100_000.0);
        assert!(ledger.positions().is_empty());
        assert!(ledger.trade_log().is_empty());
    }

    #[test]
    fn test_sell_rejections() {
        let mut ledger = ledger(1_000_000.0);
        assert!(matches!(
            ledger.sell("NONE", 10.0, 1, "x"),
            Err(LedgerError::PositionNotFound(_))
        ));

        ledger.buy(BuyOrder::new("ABC", "Abc", 1_000.0, 5)).unwrap();
        assert!(matches!(
            ledger.sell("ABC", 1_000.0, 6, "x"),
            Err(LedgerError::InsufficientQuantity { held: 5, .. })
        ));
        assert!(matches!(
            ledger.sell("ABC", 0.0, 1, "x"),
            Err(LedgerError::InvalidOrder(_))
        ));
        assert!(matches!(
            ledger.sell_phase("ABC", StrategyPhase::Trend, 1_000.0, 1, "x"),
            Err(LedgerError::PhaseNotFound { .. })
        ));
        assert_eq!(ledger.position("ABC", StrategyPhase::Hold).unwrap().quantity, 5);
    }

    #[test]
    fn test_sell_matches_ticker_like_buy() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 10_000.0, FeeModel::frictionless());
        ledger.buy(BuyOrder::new(" aapl ", "Apple", 100.0, 10)).unwrap();
        assert!(ledger.holds("AAPL"));

        let fill = ledger.sell("aapl", 110.0, 4, "harvest").unwrap();
        assert!(!fill.position_closed);
        let fill = ledger.sell_phase(" Aapl", StrategyPhase::Hold, 110.0, 6, "exit").unwrap();
        assert!(fill.position_closed);
        assert!(ledger.positions().is_empty());
        assert!(matches!(
            ledger.sell("  ", 110.0, 1, "x"),
            Err(LedgerError::PositionNotFound(_))
        ));
    }

    #[test]
    fn test_repeat_buy_averages_and_counts_pyramid() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 100_000.0, FeeModel::frictionless());
        ledger
            .buy(BuyOrder::new("NVDA", "Nvidia", 100.0, 10).phase(StrategyPhase::Hold))
            .unwrap();
        ledger
            .buy(BuyOrder::new("NVDA", "Nvidia", 130.0, 10).phase(StrategyPhase::Hold))
            .unwrap();

        let position = ledger.position("NVDA", StrategyPhase::Hold).unwrap();
        assert_eq!(position.quantity, 20);
        assert!((position.avg_price - 115.0).abs() < 1e-9);
        assert_eq!(position.pyramid_count, 1);
        assert_eq!(position.max_price_since_entry, 130.0);

        // A different phase opens a separate position
        ledger
            .buy(BuyOrder::new("NVDA", "Nvidia", 130.0, 1).phase(StrategyPhase::Entry))
            .unwrap();
        assert_eq!(ledger.positions().len(), 2);
    }

    #[test]
    fn test_partial_sell_keeps_position() {
        let mut ledger = ledger(1_000_000.0);
        ledger.buy(BuyOrder::new("ABC", "Abc", 1_000.0, 10)).unwrap();
        let fill = ledger.sell("ABC", 1_100.0, 3, "harvest").unwrap();

        assert!(!fill.position_closed);
        assert_eq!(ledger.first_position("ABC").unwrap().quantity, 7);
        assert!(ledger.cash() >= 0.0);
    }

    #[test]
    fn test_promote_merges_on_collision() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 100_000.0, FeeModel::frictionless());
        ledger
            .buy(BuyOrder::new("AMD", "AMD", 100.0, 10).phase(StrategyPhase::Entry))
            .unwrap();
        ledger
            .buy(BuyOrder::new("AMD", "AMD", 200.0, 10).phase(StrategyPhase::Hold))
            .unwrap();
        ledger.set_harvest_level("AMD", StrategyPhase::Entry, 1);

        ledger
            .promote("AMD", StrategyPhase::Entry, StrategyPhase::Hold)
            .unwrap();

        assert_eq!(ledger.positions().len(), 1);
        let merged = ledger.position("AMD", StrategyPhase::Hold).unwrap();
        assert_eq!(merged.quantity, 20);
        assert!((merged.avg_price - 150.0).abs() < 1e-9);
        assert_eq!(merged.harvest_level, 1);

        assert!(ledger
            .promote("AMD", StrategyPhase::Hold, StrategyPhase::Entry)
            .is_err());
    }

    #[test]
    fn test_mark_price_tracks_high_water() {
        let mut ledger = ledger(1_000_000.0);
        ledger.buy(BuyOrder::new("ABC", "Abc", 1_000.0, 1)).unwrap();
        ledger.mark_price("ABC", 1_200.0);
        ledger.mark_price("ABC", 1_100.0);

        let position = ledger.first_position("ABC").unwrap();
        assert_eq!(position.current_price, 1_100.0);
        assert_eq!(position.max_price_since_entry, 1_200.0);
        assert_eq!(ledger.mark_price("ABC", f64::NAN), 0);
    }

    #[test]
    fn test_recent_performance_defaults_and_stats() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 1_000_000.0, FeeModel::frictionless());
        let perf = ledger.recent_performance();
        assert_eq!(perf.win_rate, 0.4);
        assert_eq!(perf.payoff_ratio, 1.5);
        assert_eq!(perf.sample_size, 0);

        // Three wins of +200 and two losses of -100
        for (i, exit) in [120.0, 120.0, 120.0, 90.0, 90.0].iter().enumerate() {
            let ticker = format!("T{}", i);
            ledger.buy(BuyOrder::new(&ticker, "t", 100.0, 10)).unwrap();
            ledger.sell(&ticker, *exit, 10, "exit").unwrap();
        }
        let perf = ledger.recent_performance();
        assert_eq!(perf.sample_size, 5);
        assert!((perf.win_rate - 0.6).abs() < 1e-9);
        assert!((perf.payoff_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_and_snapshot() {
        let mut ledger = AccountLedger::with_capital(Market::Us, 10_000.0, FeeModel::frictionless());
        ledger.buy(BuyOrder::new("SPY", "SPY", 100.0, 50)).unwrap();
        ledger.mark_price("SPY", 110.0);

        assert!((ledger.equity() - 10_500.0).abs() < 1e-9);
        let snapshot = ledger.account();
        assert!((snapshot.return_percent - 5.0).abs() < 1e-9);
        assert_eq!(snapshot.positions.len(), 1);
        assert!((ledger.exposure() - 5_500.0 / 10_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_restore_round_trips_through_json() {
        let mut ledger = ledger(1_000_000.0);
        ledger.buy(BuyOrder::new("ABC", "Abc", 1_000.0, 10)).unwrap();
        let positions = serde_json::to_string(ledger.positions()).unwrap();
        let log = serde_json::to_string(ledger.trade_log()).unwrap();

        let mut restored = AccountLedger::new(Market::Kr);
        restored.restore(
            ledger.cash(),
            ledger.initial_capital(),
            serde_json::from_str(&positions).unwrap(),
            serde_json::from_str(&log).unwrap(),
        );
        assert_eq!(restored.cash(), ledger.cash());
        assert_eq!(restored.positions().len(), 1);
        assert_eq!(restored.trade_log().len(), 1);
    }
}
