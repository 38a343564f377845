//! Promotion checks
//!
//! Pure functions over candle series and quotes. The watchlist fetches the
//! data and applies these to decide promotions and fires.

use serde::{Deserialize, Serialize};
use technical_analysis::{close_location, relative_volume, rsi, sma};
use trading_core::{Bar, QuoteSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Hourly candles requested for the setup check
    pub hourly_bars_requested: usize,
    /// Minimum hourly candles required
    pub hourly_bars_required: usize,
    pub trend_sma_period: usize,
    pub rsi_period: usize,
    /// RSI must stay below this to count as a rested setup
    pub rsi_ceiling: f64,
    /// Minute candles requested (and required) for the breakout check
    pub minute_bars_required: usize,
    pub volume_lookback: usize,
    /// Last-minute volume must exceed this multiple of the trailing average
    pub rvol_multiple: f64,
    /// Minimum close location in the bar range
    pub min_close_location: f64,
    /// Minimum minute-over-minute momentum, in percent
    pub min_momentum_pct: f64,
    pub fallback_min_volume: f64,
    pub fallback_min_change_pct: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            hourly_bars_requested: 50,
            hourly_bars_required: 20,
            trend_sma_period: 20,
            rsi_period: 14,
            rsi_ceiling: 60.0,
            minute_bars_required: 21,
            volume_lookback: 20,
            rvol_multiple: 3.0,
            min_close_location: 0.6,
            min_momentum_pct: 0.2,
            fallback_min_volume: 500_000.0,
            fallback_min_change_pct: 1.0,
        }
    }
}

/// Hourly setup: close above a rising SMA with RSI not overheated.
pub fn setup_ready(bars: &[Bar], config: &PromotionConfig) -> bool {
    if bars.len() < config.hourly_bars_required {
        return false;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let averages = sma(&closes, config.trend_sma_period);
    let oscillator = rsi(&closes, config.rsi_period);

    let (Some(&last_avg), Some(&last_rsi), Some(&last_close)) =
        (averages.last(), oscillator.last(), closes.last())
    else {
        return false;
    };
    let rising = averages.len() >= 2 && last_avg > averages[averages.len() - 2];

    last_close > last_avg && rising && last_rsi < config.rsi_ceiling
}

/// Minute breakout readings, kept for the trigger details.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutReading {
    pub relative_volume: f64,
    pub close_location: f64,
    pub momentum_pct: f64,
}

impl BreakoutReading {
    pub fn passes(&self, config: &PromotionConfig) -> bool {
        self.relative_volume > config.rvol_multiple
            && self.close_location >= config.min_close_location
            && self.momentum_pct > config.min_momentum_pct
    }
}

/// Read the last minute bar against its trailing window. `None` when the
/// series is too short to judge, which sends the caller to the fallback.
pub fn breakout_reading(bars: &[Bar], config: &PromotionConfig) -> Option<BreakoutReading> {
    if bars.len() < config.minute_bars_required {
        return None;
    }
    let last = &bars[bars.len() - 1];
    let prev = &bars[bars.len() - 2];
    // A flat volume history reads as no spike rather than as missing data
    let rvol = relative_volume(bars, config.volume_lookback).unwrap_or(0.0);
    let momentum = if prev.close > 0.0 {
        (last.close / prev.close - 1.0) * 100.0
    } else {
        0.0
    };
    Some(BreakoutReading {
        relative_volume: rvol,
        close_location: close_location(last),
        momentum_pct: momentum,
    })
}

/// Lower-fidelity check on a quote snapshot.
pub fn fallback_fires(quote: &QuoteSnapshot, config: &PromotionConfig) -> bool {
    quote.is_valid()
        && quote.volume > config.fallback_min_volume
        && quote.change_rate > config.fallback_min_change_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Zigzag drifting up: +1.0 then -0.9. The SMA rises, the last close is
    /// an up bar above it and RSI settles in the mid 50s.
    fn hourly_zigzag() -> Vec<Bar> {
        let mut close = 100.0;
        (0..44)
            .map(|i| {
                if i > 0 {
                    close += if i % 2 == 1 { 1.0 } else { -0.9 };
                }
                let mut b = bar(close, close + 0.5, close - 0.5, close, 10_000.0);
                b.timestamp = Utc::now() - Duration::hours(44 - i as i64);
                b
            })
            .collect()
    }

    fn minute_series(last: Bar) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..20).map(|_| bar(10.0, 10.1, 9.9, 10.0, 1_000.0)).collect();
        bars.push(last);
        bars
    }

    #[test]
    fn test_setup_ready_on_rising_trend() {
        let config = PromotionConfig::default();
        assert!(setup_ready(&hourly_zigzag(), &config));
    }

    #[test]
    fn test_setup_rejects_short_and_overheated_series() {
        let config = PromotionConfig::default();
        assert!(!setup_ready(&hourly_zigzag()[..10], &config));

        // Straight-line rally: RSI pinned at 100
        let hot: Vec<Bar> = (0..50)
            .map(|i| {
                let c = 100.0 + i as f64;
                bar(c, c, c, c, 1.0)
            })
            .collect();
        assert!(!setup_ready(&hot, &config));

        // Falling: close below the average
        let falling: Vec<Bar> = (0..50)
            .map(|i| {
                let c = 200.0 - i as f64 + if i % 2 == 0 { 0.0 } else { 1.5 };
                bar(c, c, c, c, 1.0)
            })
            .collect();
        assert!(!setup_ready(&falling, &config));
    }

    #[test]
    fn test_breakout_requires_all_three_conditions() {
        let config = PromotionConfig::default();

        let clean = minute_series(bar(10.0, 10.2, 10.0, 10.18, 4_000.0));
        let reading = breakout_reading(&clean, &config).unwrap();
        assert!(reading.relative_volume > 3.0);
        assert!(reading.passes(&config));

        // Long upper wick: close in the lower half of the range
        let wick = minute_series(bar(10.0, 10.5, 10.0, 10.1, 4_000.0));
        assert!(!breakout_reading(&wick, &config).unwrap().passes(&config));

        // No volume spike
        let quiet = minute_series(bar(10.0, 10.2, 10.0, 10.18, 2_000.0));
        assert!(!breakout_reading(&quiet, &config).unwrap().passes(&config));

        // Momentum below 0.2%
        let flat = minute_series(bar(10.0, 10.02, 9.99, 10.01, 4_000.0));
        assert!(!breakout_reading(&flat, &config).unwrap().passes(&config));
    }

    #[test]
    fn test_short_minute_series_has_no_reading() {
        let config = PromotionConfig::default();
        let bars: Vec<Bar> = (0..10).map(|_| bar(10.0, 10.1, 9.9, 10.0, 1_000.0)).collect();
        assert!(breakout_reading(&bars, &config).is_none());
    }

    #[test]
    fn test_fallback_thresholds() {
        let config = PromotionConfig::default();
        let hot = QuoteSnapshot {
            price: 50.0,
            change_rate: 1.5,
            volume: 600_000.0,
        };
        assert!(fallback_fires(&hot, &config));
        assert!(!fallback_fires(&QuoteSnapshot { change_rate: 0.9, ..hot }, &config));
        assert!(!fallback_fires(&QuoteSnapshot { volume: 400_000.0, ..hot }, &config));
        assert!(!fallback_fires(&QuoteSnapshot::default(), &config));
    }
}
