use technical_analysis::atr;
use trading_core::Bar;

use crate::circuit_breaker::CircuitBreaker;
use crate::models::*;
use crate::trailing_stop::AtrTrailingStop;

/// Single-instrument replay of the live trend entry and ATR trailing exit.
///
/// Decisions are made on each bar's close using only bars up to and
/// including it. Stops are checked against the next bars' lows and fill at
/// `min(open, stop)`.
pub struct BacktestEngine {
    config: BacktestConfig,
}

/// The single open position being tracked during the backtest.
struct OpenPosition {
    quantity: u64,
    entry_price: f64,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the replay over `bars` (oldest first). Series shorter than the
    /// warm-up window produce an empty result.
    pub fn run(&self, bars: &[Bar]) -> BacktestResult {
        let cfg = &self.config;
        if bars.len() < cfg.warmup_bars || bars.is_empty() {
            tracing::warn!(
                ticker = %cfg.ticker,
                bars = bars.len(),
                required = cfg.warmup_bars,
                "Insufficient history for backtest"
            );
            return BacktestResult::empty(&cfg.ticker, cfg.initial_capital);
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        // atr_values[k] belongs to bar k + period - 1
        let atr_values = atr(bars, cfg.atr_period);
        let atr_at = |i: usize| -> Option<f64> {
            let offset = cfg.atr_period.checked_sub(1)?;
            i.checked_sub(offset).and_then(|k| atr_values.get(k).copied())
        };

        let mut cash = cfg.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut stop = AtrTrailingStop::new(cfg.atr_multiple);
        let mut breaker = cfg.max_drawdown_halt_percent.map(CircuitBreaker::new);

        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len() - cfg.warmup_bars);
        let mut peak_equity = cfg.initial_capital;
        let mut max_drawdown = 0.0_f64;
        let (mut wins, mut losses) = (0usize, 0usize);
        let (mut gross_profit, mut gross_loss) = (0.0_f64, 0.0_f64);

        for i in cfg.warmup_bars.max(1)..bars.len() {
            let bar = &bars[i];
            let price = bar.close;

            if let Some(open) = &position {
                if let Some(exit_price) = stop.exit_price(bar.open, bar.low) {
                    let cost = open.entry_price * open.quantity as f64;
                    let proceeds = exit_price * open.quantity as f64;
                    let pnl = proceeds - cost;
                    cash += proceeds;
                    if pnl > 0.0 {
                        wins += 1;
                        gross_profit += pnl;
                    } else {
                        losses += 1;
                        gross_loss += pnl.abs();
                    }
                    trades.push(BacktestTrade {
                        action: TradeAction::Sell,
                        date: bar.timestamp,
                        price: exit_price,
                        quantity: open.quantity,
                        pnl: Some(pnl),
                        pnl_percent: Some(pnl / cost * 100.0),
                        reason: "Trailing stop".to_string(),
                    });
                    position = None;
                    stop.clear();
                } else if let Some(atr) = atr_at(i) {
                    stop.update(price, atr);
                }
            }

            let equity = cash + position.as_ref().map_or(0.0, |p| p.quantity as f64 * price);
            peak_equity = peak_equity.max(equity);
            if peak_equity > 0.0 {
                max_drawdown = max_drawdown.max((peak_equity - equity) / peak_equity * 100.0);
            }
            equity_curve.push(EquityPoint {
                date: bar.timestamp,
                equity,
            });

            let halted = breaker
                .as_mut()
                .map(|b| b.check(equity, peak_equity))
                .unwrap_or(false);

            // A bar that closed a trade does not reopen one.
            let just_exited = trades
                .last()
                .map(|t| t.action == TradeAction::Sell && t.date == bar.timestamp)
                .unwrap_or(false);
            if position.is_some() || halted || just_exited {
                continue;
            }

            if !cfg.template.check(price, &closes[..=i]).pass {
                continue;
            }
            let Some(atr) = atr_at(i).filter(|a| *a > 0.0) else {
                continue;
            };

            let risk = equity * cfg.risk_per_trade;
            let quantity = (risk / stop.distance(atr)).floor();
            if !quantity.is_finite() || quantity < 1.0 {
                continue;
            }
            let quantity = quantity as u64;
            let cost = quantity as f64 * price;
            if cash < cost {
                continue;
            }

            cash -= cost;
            let initial_stop = stop.init(price, atr);
            position = Some(OpenPosition {
                quantity,
                entry_price: price,
            });
            tracing::debug!(ticker = %cfg.ticker, price, quantity, stop = initial_stop, "Backtest entry");
            trades.push(BacktestTrade {
                action: TradeAction::Buy,
                date: bar.timestamp,
                price,
                quantity,
                pnl: None,
                pnl_percent: None,
                reason: "Trend template entry".to_string(),
            });
        }

        let last_close = closes.last().copied().unwrap_or(0.0);
        let final_equity = cash + position.as_ref().map_or(0.0, |p| p.quantity as f64 * last_close);
        let total_trades = wins + losses;
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            999.0
        } else {
            0.0
        };

        let result = BacktestResult {
            ticker: cfg.ticker.clone(),
            total_trades,
            wins,
            losses,
            win_rate: if total_trades > 0 { wins as f64 / total_trades as f64 } else { 0.0 },
            total_return: (final_equity - cfg.initial_capital) / cfg.initial_capital * 100.0,
            max_drawdown,
            profit_factor,
            final_equity,
            halted: breaker.map(|b| b.is_halted()).unwrap_or(false),
            trades,
            equity_curve,
        };

        tracing::info!(
            ticker = %result.ticker,
            trades = result.total_trades,
            win_rate = result.win_rate,
            total_return = result.total_return,
            max_drawdown = result.max_drawdown,
            profit_factor = result.profit_factor,
            "Backtest complete"
        );
        result
    }
}
