use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Market;

/// Seven-state market regime, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Panic,
    Bear,
    WeakBear,
    Sideways,
    WeakBull,
    Bull,
    SuperBull,
}

impl Regime {
    pub const ALL: [Regime; 7] = [
        Regime::Panic,
        Regime::Bear,
        Regime::WeakBear,
        Regime::Sideways,
        Regime::WeakBull,
        Regime::Bull,
        Regime::SuperBull,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Regime::Panic => "PANIC",
            Regime::Bear => "BEAR",
            Regime::WeakBear => "WEAK_BEAR",
            Regime::Sideways => "SIDEWAYS",
            Regime::WeakBull => "WEAK_BULL",
            Regime::Bull => "BULL",
            Regime::SuperBull => "SUPER_BULL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Regime::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(value.trim()))
    }

    /// Map a 0-100 score onto its band.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 15.0 => Regime::Panic,
            s if s < 30.0 => Regime::Bear,
            s if s < 45.0 => Regime::WeakBear,
            s if s < 55.0 => Regime::Sideways,
            s if s < 70.0 => Regime::WeakBull,
            s if s < 85.0 => Regime::Bull,
            _ => Regime::SuperBull,
        }
    }

    /// Fraction of equity the regime allows to be deployed (0.0 - 1.0)
    pub fn recommended_exposure(&self) -> f64 {
        match self {
            Regime::Panic => 0.0,
            Regime::Bear => 0.1,
            Regime::WeakBear => 0.3,
            Regime::Sideways => 0.5,
            Regime::WeakBull => 0.7,
            Regime::Bull => 0.9,
            Regime::SuperBull => 1.0,
        }
    }

    /// WEAK_BULL and above.
    pub fn is_bullish(&self) -> bool {
        matches!(self, Regime::WeakBull | Regime::Bull | Regime::SuperBull)
    }

    /// BULL and SUPER_BULL only.
    pub fn is_strongly_bullish(&self) -> bool {
        matches!(self, Regime::Bull | Regime::SuperBull)
    }

    /// WEAK_BEAR and below.
    pub fn is_bearish(&self) -> bool {
        matches!(self, Regime::Panic | Regime::Bear | Regime::WeakBear)
    }

    /// BEAR and PANIC, the regimes that force trend positions to de-risk.
    pub fn is_crash_or_bear(&self) -> bool {
        matches!(self, Regime::Panic | Regime::Bear)
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    Excellent,
    Normal,
    Low,
}

/// Component scores behind a regime classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSubScores {
    pub technical: f64,
    pub qualitative: f64,
    pub macro_composite: Option<f64>,
}

/// Regime classification for one market at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeStatus {
    pub market: Market,
    pub regime: Regime,
    /// 0-100
    pub score: f64,
    /// 0-100
    pub confidence: f64,
    pub recommended_exposure: f64,
    /// Benchmark percent change the technical score was derived from.
    pub technical_change: f64,
    pub sub_scores: RegimeSubScores,
    pub data_quality: DataQuality,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RegimeStatus {
    /// Neutral status used whenever inputs are missing or upstream calls fail.
    pub fn neutral(market: Market, timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            market,
            regime: Regime::Sideways,
            score: 50.0,
            confidence: 0.0,
            recommended_exposure: Regime::Sideways.recommended_exposure(),
            technical_change: 0.0,
            sub_scores: RegimeSubScores {
                technical: 50.0,
                qualitative: 50.0,
                macro_composite: None,
            },
            data_quality: DataQuality::Low,
            reasons: vec![reason.into()],
            timestamp,
        }
    }
}

/// Immutable view of the regime handed to every stage of one cycle.
#[derive(Debug, Clone)]
pub struct RegimeSnapshot {
    pub current: RegimeStatus,
    /// Label seen by the previous cycle, if any.
    pub previous: Option<Regime>,
}

impl RegimeSnapshot {
    pub fn new(current: RegimeStatus, previous: Option<Regime>) -> Self {
        Self { current, previous }
    }

    pub fn regime(&self) -> Regime {
        self.current.regime
    }

    /// True when this cycle reads BEAR/PANIC and ranks below the previous
    /// read (BULL -> BEAR, BEAR -> PANIC). No previous read is no downgrade.
    pub fn downgraded_into_bear(&self) -> bool {
        let current = self.current.regime;
        current.is_crash_or_bear() && self.previous.is_some_and(|previous| current < previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_is_bounded_for_every_regime() {
        for regime in Regime::ALL {
            let exposure = regime.recommended_exposure();
            assert!((0.0..=1.0).contains(&exposure), "{} out of range", regime);
        }
    }

    #[test]
    fn test_bands_are_contiguous() {
        assert_eq!(Regime::from_score(0.0), Regime::Panic);
        assert_eq!(Regime::from_score(14.9), Regime::Panic);
        assert_eq!(Regime::from_score(15.0), Regime::Bear);
        assert_eq!(Regime::from_score(44.0), Regime::WeakBear);
        assert_eq!(Regime::from_score(54.0), Regime::Sideways);
        assert_eq!(Regime::from_score(69.0), Regime::WeakBull);
        assert_eq!(Regime::from_score(84.0), Regime::Bull);
        assert_eq!(Regime::from_score(100.0), Regime::SuperBull);
    }

    #[test]
    fn test_parse_round_trips_names() {
        for regime in Regime::ALL {
            assert_eq!(Regime::parse(regime.name()), Some(regime));
        }
        assert_eq!(Regime::parse("weak_bull"), Some(Regime::WeakBull));
    }

    #[test]
    fn test_downgrade_detection() {
        let mut status = RegimeStatus::neutral(Market::Us, Utc::now(), "test");
        status.regime = Regime::Bear;

        let fresh = RegimeSnapshot::new(status.clone(), Some(Regime::Bull));
        assert!(fresh.downgraded_into_bear());

        let recovering = RegimeSnapshot::new(status.clone(), Some(Regime::Panic));
        assert!(!recovering.downgraded_into_bear());

        let continuing = RegimeSnapshot::new(status.clone(), Some(Regime::Bear));
        assert!(!continuing.downgraded_into_bear());

        let unknown = RegimeSnapshot::new(status.clone(), None);
        assert!(!unknown.downgraded_into_bear());

        status.regime = Regime::Panic;
        let deeper = RegimeSnapshot::new(status, Some(Regime::Bear));
        assert!(deeper.downgraded_into_bear());
    }
}
