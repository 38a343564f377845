/// Backtest circuit breaker: halts new entries once drawdown from the equity
/// peak reaches a threshold. Open positions keep their stops.
pub struct CircuitBreaker {
    max_drawdown_halt_pct: f64,
    halted: bool,
}

impl CircuitBreaker {
    pub fn new(max_drawdown_halt_percent: f64) -> Self {
        Self {
            max_drawdown_halt_pct: max_drawdown_halt_percent,
            halted: false,
        }
    }

    /// Check if trading should be halted based on current equity vs peak.
    /// Latches once tripped.
    pub fn check(&mut self, equity: f64, peak_equity: f64) -> bool {
        if self.halted {
            return true;
        }

        if peak_equity > 0.0 {
            let drawdown_pct = (peak_equity - equity) / peak_equity * 100.0;
            if drawdown_pct >= self.max_drawdown_halt_pct {
                tracing::debug!(drawdown_pct, "Backtest drawdown halt");
                self.halted = true;
                return true;
            }
        }

        false
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}
