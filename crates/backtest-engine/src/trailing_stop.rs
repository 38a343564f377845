/// Volatility trailing stop: `price - multiple * ATR`, raised but never lowered.
#[derive(Debug, Clone)]
pub struct AtrTrailingStop {
    multiple: f64,
    stop: Option<f64>,
}

impl AtrTrailingStop {
    pub fn new(atr_multiple: f64) -> Self {
        Self {
            multiple: atr_multiple,
            stop: None,
        }
    }

    /// Distance between price and stop for the given ATR.
    pub fn distance(&self, atr: f64) -> f64 {
        self.multiple * atr
    }

    /// Arm the stop for a new position.
    pub fn init(&mut self, entry_price: f64, atr: f64) -> f64 {
        let stop = entry_price - self.distance(atr);
        self.stop = Some(stop);
        stop
    }

    /// Ratchet the stop toward `price`. Returns the current stop.
    pub fn update(&mut self, price: f64, atr: f64) -> Option<f64> {
        let stop = self.stop.as_mut()?;
        let candidate = price - self.multiple * atr;
        if candidate.is_finite() && candidate > *stop {
            *stop = candidate;
        }
        Some(*stop)
    }

    /// Fill price when the bar traded through the stop. Gaps fill at the open.
    pub fn exit_price(&self, open: f64, low: f64) -> Option<f64> {
        let stop = self.stop?;
        (low <= stop).then(|| open.min(stop))
    }

    pub fn get(&self) -> Option<f64> {
        self.stop
    }

    pub fn clear(&mut self) {
        self.stop = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratchets_up_only() {
        let mut stop = AtrTrailingStop::new(2.0);
        assert!(stop.update(100.0, 1.0).is_none());

        assert_eq!(stop.init(100.0, 2.0), 96.0);
        assert_eq!(stop.update(110.0, 2.0), Some(106.0));
        assert_eq!(stop.update(104.0, 2.0), Some(106.0));
        // Wider ATR would lower it; ignored.
        assert_eq!(stop.update(110.0, 5.0), Some(106.0));
    }

    #[test]
    fn test_exit_price_on_gap() {
        let mut stop = AtrTrailingStop::new(2.0);
        stop.init(100.0, 2.0);
        assert_eq!(stop.exit_price(99.0, 97.0), None);
        assert_eq!(stop.exit_price(97.0, 95.0), Some(96.0));
        assert_eq!(stop.exit_price(90.0, 88.0), Some(90.0));

        stop.clear();
        assert_eq!(stop.exit_price(90.0, 88.0), None);
    }
}
