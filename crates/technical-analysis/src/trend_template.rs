use serde::{Deserialize, Serialize};

use crate::indicators::{close_range, sma};

/// Long-side trend template: price above rising, stacked moving averages,
/// well off its trailing low and near its trailing high.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendTemplate {
    pub short_period: usize,
    pub medium_period: usize,
    pub long_period: usize,
    /// Bars back used to decide whether the long average is rising.
    pub slope_lookback: usize,
    /// Trailing window for the high/low tests.
    pub range_window: usize,
    /// Price must be at least this multiple of the trailing low.
    pub min_above_low: f64,
    /// Price must be at least this multiple of the trailing high.
    pub min_of_high: f64,
}

impl Default for TrendTemplate {
    fn default() -> Self {
        Self {
            short_period: 50,
            medium_period: 150,
            long_period: 200,
            slope_lookback: 20,
            range_window: 250,
            min_above_low: 1.25,
            min_of_high: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCheck {
    pub pass: bool,
    pub reason: String,
}

impl TemplateCheck {
    fn fail(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.into(),
        }
    }
}

impl TrendTemplate {
    /// Minimum number of closes needed for a meaningful check.
    pub fn required_bars(&self) -> usize {
        self.long_period + self.slope_lookback
    }

    /// Evaluate the template for `price` against the close history (oldest
    /// first, including the current bar).
    pub fn check(&self, price: f64, closes: &[f64]) -> TemplateCheck {
        if closes.len() < self.long_period {
            return TemplateCheck::fail(format!(
                "Insufficient history: need {} bars, got {}",
                self.long_period,
                closes.len()
            ));
        }

        let short = sma(closes, self.short_period);
        let medium = sma(closes, self.medium_period);
        let long = sma(closes, self.long_period);
        let (Some(&sma_short), Some(&sma_medium), Some(&sma_long)) =
            (short.last(), medium.last(), long.last())
        else {
            return TemplateCheck::fail("Moving averages unavailable");
        };
        let prev_long = long
            .len()
            .checked_sub(self.slope_lookback + 1)
            .map(|i| long[i])
            .unwrap_or(long[0]);

        if price < sma_medium || price < sma_long {
            return TemplateCheck::fail("Price below long-term averages");
        }
        if sma_medium < sma_long {
            return TemplateCheck::fail("Long-term averages not stacked");
        }
        if sma_long <= prev_long {
            return TemplateCheck::fail("Long-term average flat or falling");
        }
        if sma_short < sma_medium || sma_short < sma_long {
            return TemplateCheck::fail("Short average below long-term averages");
        }
        if price < sma_short {
            return TemplateCheck::fail("Price below short average");
        }

        let Some((high, low)) = close_range(closes, self.range_window) else {
            return TemplateCheck::fail("Range unavailable");
        };
        if price < low * self.min_above_low {
            return TemplateCheck::fail("Price too close to trailing low");
        }
        if price < high * self.min_of_high {
            return TemplateCheck::fail("Price too far below trailing high");
        }

        TemplateCheck {
            pass: true,
            reason: "Trend template satisfied".to_string(),
        }
    }
}
