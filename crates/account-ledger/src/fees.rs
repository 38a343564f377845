use serde::{Deserialize, Serialize};

/// Flat-rate fee and symmetric slippage applied to every simulated fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeModel {
    /// Fraction of notional charged per fill (0.00015 = 0.015%)
    pub fee_rate: f64,
    /// Adverse price deviation per fill (0.001 = 0.1%)
    pub slippage_rate: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            fee_rate: 0.00015,
            slippage_rate: 0.001,
        }
    }
}

impl FeeModel {
    /// No costs at all. Useful to check accounting identities.
    pub fn frictionless() -> Self {
        Self {
            fee_rate: 0.0,
            slippage_rate: 0.0,
        }
    }

    /// Buys fill above the quote.
    pub fn buy_price(&self, price: f64) -> f64 {
        price * (1.0 + self.slippage_rate)
    }

    /// Sells fill below the quote.
    pub fn sell_price(&self, price: f64) -> f64 {
        price * (1.0 - self.slippage_rate)
    }

    pub fn fee(&self, notional: f64) -> f64 {
        notional * self.fee_rate
    }
}
