use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Exchange group the agent trades in. Each market carries its own calendar,
/// currency scale and sizing caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Kr,
    Us,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kr => "KR",
            Market::Us => "US",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "KR" | "KRX" | "KOSPI" => Some(Market::Kr),
            "US" | "NYSE" | "NASDAQ" => Some(Market::Us),
            _ => None,
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            Market::Kr => chrono_tz::Asia::Seoul,
            Market::Us => chrono_tz::America::New_York,
        }
    }

    /// Benchmark index used for the technical leg of the regime score.
    pub fn benchmark(&self) -> &'static str {
        match self {
            Market::Kr => "KOSPI",
            Market::Us => "SPY",
        }
    }

    /// Starting cash for a fresh simulated account (KRW / USD).
    pub fn default_capital(&self) -> f64 {
        match self {
            Market::Kr => 50_000_000.0,
            Market::Us => 30_000.0,
        }
    }

    /// Upper bound for a single new entry regardless of account size.
    pub fn entry_hard_cap(&self) -> f64 {
        match self {
            Market::Kr => 10_000_000.0,
            Market::Us => 10_000.0,
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest traded price for an instrument. Providers return the zero value on
/// failure instead of an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub price: f64,
    /// Percent change versus the previous session close.
    pub change_rate: f64,
    pub volume: f64,
}

impl QuoteSnapshot {
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Candle resolution requested from the quote provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute5,
    Hour1,
    Day1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Hour1 => 60,
            Timeframe::Day1 => 1440,
        }
    }
}

/// Strategy stance of an open position. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyPhase {
    /// Short-horizon scout entry.
    Entry,
    /// Swing hold after the entry proved itself.
    Hold,
    /// Long trend ride, exits only on structure.
    Trend,
}

impl StrategyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyPhase::Entry => "ENTRY",
            StrategyPhase::Hold => "HOLD",
            StrategyPhase::Trend => "TREND",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ENTRY" | "DAY" => Some(StrategyPhase::Entry),
            "HOLD" | "SWING" => Some(StrategyPhase::Hold),
            "TREND" | "LONG" => Some(StrategyPhase::Trend),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry opportunity came from. Drives the initial phase and the
/// regime score adjustments at the entry gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    HunterBreakout,
    VolatilityBreakout,
    VolumeSpike,
    EagleEye,
    ValuePivot,
    SupportRebound,
    ClosingBell,
    IntelBypass,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::HunterBreakout => "HUNTER_BREAKOUT",
            TriggerType::VolatilityBreakout => "VOLATILITY_BREAKOUT",
            TriggerType::VolumeSpike => "VOLUME_SPIKE",
            TriggerType::EagleEye => "EAGLE_EYE",
            TriggerType::ValuePivot => "VALUE_PIVOT",
            TriggerType::SupportRebound => "SUPPORT_REBOUND",
            TriggerType::ClosingBell => "CLOSING_BELL",
            TriggerType::IntelBypass => "INTEL_BYPASS",
            TriggerType::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque output of the AI reasoning service for one market.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitativeSignal {
    pub status: String,
    pub summary: String,
    #[serde(default)]
    pub positive_factors: Vec<String>,
    #[serde(default)]
    pub negative_factors: Vec<String>,
}

impl QualitativeSignal {
    pub fn has_factors(&self) -> bool {
        !self.positive_factors.is_empty() || !self.negative_factors.is_empty()
    }
}

/// Focus hint returned by the AI reasoning service for the coming session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyFocus {
    #[serde(default)]
    pub focus_sectors: Vec<String>,
    #[serde(default)]
    pub scanners_to_activate: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Normalize a raw ticker string. Returns `None` for blank input.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        None
    } else {
        Some(ticker)
    }
}

/// Percent gain of `price` over `basis`; 0 when the basis is unusable.
pub fn pct_change(price: f64, basis: f64) -> f64 {
    if basis > 0.0 && basis.is_finite() && price.is_finite() {
        (price - basis) / basis * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_parse_and_caps() {
        assert_eq!(Market::parse("kr"), Some(Market::Kr));
        assert_eq!(Market::parse(" US "), Some(Market::Us));
        assert_eq!(Market::parse("JP"), None);
        assert_eq!(Market::Kr.entry_hard_cap(), 10_000_000.0);
        assert_eq!(Market::Us.default_capital(), 30_000.0);
    }

    #[test]
    fn test_phase_ordering_is_forward_only() {
        assert!(StrategyPhase::Entry < StrategyPhase::Hold);
        assert!(StrategyPhase::Hold < StrategyPhase::Trend);
        assert_eq!(StrategyPhase::parse("swing"), Some(StrategyPhase::Hold));
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker("  aapl "), Some("AAPL".to_string()));
        assert_eq!(normalize_ticker("   "), None);
    }

    #[test]
    fn test_pct_change_guards_basis() {
        assert!((pct_change(110.0, 100.0) - 10.0).abs() < 1e-9);
        assert_eq!(pct_change(110.0, 0.0), 0.0);
        assert_eq!(pct_change(f64::NAN, 100.0), 0.0);
    }
}
