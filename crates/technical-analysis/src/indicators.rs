use trading_core::Bar;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut sum: f64 = data[..period].iter().sum();
    result.push(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Relative Strength Index (Wilder smoothing). The first value covers the
/// first `period` changes.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for w in data.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(gains.len() - period + 1);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// True range series. The first bar has no previous close, so its range is
/// high - low.
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let high_low = bar.high - bar.low;
            if i == 0 {
                return high_low;
            }
            let prev_close = bars[i - 1].close;
            high_low
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Average True Range, seeded with the simple mean of the first `period`
/// ranges and Wilder-smoothed afterwards. Output index `k` corresponds to bar
/// `k + period - 1`.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period {
        return vec![];
    }

    let trs = true_ranges(bars);
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    let mut atr_values = Vec::with_capacity(trs.len() - period + 1);
    atr_values.push(atr);

    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(atr);
    }

    atr_values
}

/// Most recent ATR value, if the series is long enough.
pub fn latest_atr(bars: &[Bar], period: usize) -> Option<f64> {
    atr(bars, period).last().copied()
}

/// Last volume divided by the mean of the `lookback` volumes before it.
pub fn relative_volume(bars: &[Bar], lookback: usize) -> Option<f64> {
    if lookback == 0 || bars.len() < lookback + 1 {
        return None;
    }
    let last = bars.len() - 1;
    let avg = bars[last - lookback..last].iter().map(|b| b.volume).sum::<f64>() / lookback as f64;
    if avg <= 0.0 {
        return None;
    }
    Some(bars[last].volume / avg)
}

/// Where the close sits inside the bar's range (0 = low, 1 = high). Doji bars
/// with no range count as mid-range.
pub fn close_location(bar: &Bar) -> f64 {
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return 0.5;
    }
    ((bar.close - bar.low) / range).clamp(0.0, 1.0)
}

/// Highest and lowest close over the trailing `lookback` values.
pub fn close_range(closes: &[f64], lookback: usize) -> Option<(f64, f64)> {
    if closes.is_empty() || lookback == 0 {
        return None;
    }
    let start = closes.len().saturating_sub(lookback);
    let window = &closes[start..];
    let high = window.iter().copied().fold(f64::MIN, f64::max);
    let low = window.iter().copied().fold(f64::MAX, f64::min);
    Some((high, low))
}
