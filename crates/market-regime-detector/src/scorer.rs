use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::{DataQuality, Market, QualitativeSignal, Regime, RegimeStatus, RegimeSubScores};

use crate::keywords::KeywordTable;

/// Score a benchmark percent change on fixed bands.
pub fn technical_score(change_pct: f64) -> f64 {
    match change_pct {
        c if c < -3.0 => 0.0,
        c if c < -1.5 => 20.0,
        c if c < -0.5 => 35.0,
        c if c <= 0.5 => 50.0,
        c if c <= 1.2 => 65.0,
        c if c <= 2.5 => 80.0,
        _ => 100.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeScorerConfig {
    /// (technical, qualitative) weights when no macro composite is supplied.
    pub weights: (f64, f64),
    /// (technical, qualitative, macro) weights when it is.
    pub macro_weights: (f64, f64, f64),
    /// Penalty applied when the narrative is euphoric but the tape is weak.
    pub divergence_penalty: f64,
    pub divergence_qualitative_above: f64,
    pub divergence_technical_below: f64,
    /// Technical score the tape must exceed before SUPER_BULL is reachable.
    pub super_bull_min_technical: f64,
    pub super_bull_cap: f64,
    /// Hysteresis bounds: flips are suppressed below both deltas.
    pub hysteresis_score: f64,
    pub hysteresis_technical: f64,
    /// Report full exposure for every non-bearish regime.
    pub force_full_exposure: bool,
}

impl Default for RegimeScorerConfig {
    fn default() -> Self {
        Self {
            weights: (0.6, 0.4),
            macro_weights: (0.4, 0.3, 0.3),
            divergence_penalty: 20.0,
            divergence_qualitative_above: 70.0,
            divergence_technical_below: 40.0,
            super_bull_min_technical: 50.0,
            super_bull_cap: 75.0,
            hysteresis_score: 3.0,
            hysteresis_technical: 1.0,
            force_full_exposure: false,
        }
    }
}

/// Pure regime classifier.
#[derive(Debug, Clone, Default)]
pub struct RegimeScorer {
    config: RegimeScorerConfig,
    keywords: KeywordTable,
}

impl RegimeScorer {
    pub fn new(config: RegimeScorerConfig, keywords: KeywordTable) -> Self {
        Self { config, keywords }
    }

    pub fn config(&self) -> &RegimeScorerConfig {
        &self.config
    }

    /// Classify one market. Missing or non-finite inputs produce the neutral
    /// SIDEWAYS status with zero confidence; this never fails.
    pub fn classify(
        &self,
        market: Market,
        technical_change: Option<f64>,
        qualitative: Option<&QualitativeSignal>,
        macro_score: Option<f64>,
        previous: Option<&RegimeStatus>,
        now: DateTime<Utc>,
    ) -> RegimeStatus {
        let Some(change) = technical_change.filter(|c| c.is_finite()) else {
            return RegimeStatus::neutral(market, now, "Benchmark change unavailable");
        };
        let Some(qualitative) = qualitative else {
            return RegimeStatus::neutral(market, now, "Qualitative signal unavailable");
        };
        let macro_score = macro_score.filter(|m| m.is_finite()).map(|m| m.clamp(0.0, 100.0));

        let mut reasons = Vec::new();
        let technical = technical_score(change);
        let text = format!("{} {}", qualitative.status, qualitative.summary);
        let (qual_score, matched) = self.keywords.score(&text);
        match matched {
            Some(keyword) => reasons.push(format!("Qualitative '{}' -> {:.0}", keyword, qual_score)),
            None => reasons.push(format!("Qualitative unmatched -> {:.0}", qual_score)),
        }
        reasons.push(format!("Benchmark {:+.2}% -> {:.0}", change, technical));

        let mut score = match macro_score {
            Some(m) => {
                let (wt, wq, wm) = self.config.macro_weights;
                reasons.push(format!("Macro composite {:.0}", m));
                technical * wt + qual_score * wq + m * wm
            }
            None => {
                let (wt, wq) = self.config.weights;
                technical * wt + qual_score * wq
            }
        };

        if qual_score > self.config.divergence_qualitative_above
            && technical < self.config.divergence_technical_below
        {
            score -= self.config.divergence_penalty;
            reasons.push(format!(
                "Divergence: narrative {:.0} vs tape {:.0} (-{:.0})",
                qual_score, technical, self.config.divergence_penalty
            ));
        }

        if technical <= self.config.super_bull_min_technical && score > self.config.super_bull_cap {
            score = self.config.super_bull_cap;
            reasons.push("Tape too weak for SUPER_BULL, capped".to_string());
        }

        let score = score.clamp(0.0, 100.0).round();
        let mut regime = Regime::from_score(score);

        if let Some(prev) = previous {
            let small_score_move = (score - prev.score).abs() < self.config.hysteresis_score;
            let small_tape_move =
                (change - prev.technical_change).abs() < self.config.hysteresis_technical;
            if regime != prev.regime && small_score_move && small_tape_move {
                reasons.push(format!("Hysteresis: holding {} (raw {})", prev.regime, regime));
                regime = prev.regime;
            }
        }

        let confidence = self.confidence(technical, qual_score, qualitative);
        let data_quality = if !qualitative.has_factors() {
            DataQuality::Low
        } else if qualitative.positive_factors.len() >= 3 {
            DataQuality::Excellent
        } else {
            DataQuality::Normal
        };

        RegimeStatus {
            market,
            regime,
            score,
            confidence,
            recommended_exposure: self.exposure_for(regime),
            technical_change: change,
            sub_scores: RegimeSubScores {
                technical,
                qualitative: qual_score,
                macro_composite: macro_score,
            },
            data_quality,
            reasons,
            timestamp: now,
        }
    }

    /// Exposure for a regime label under the configured policy.
    pub fn exposure_for(&self, regime: Regime) -> f64 {
        if self.config.force_full_exposure && !regime.is_bearish() {
            1.0
        } else {
            regime.recommended_exposure()
        }
    }

    fn confidence(&self, technical: f64, qualitative: f64, signal: &QualitativeSignal) -> f64 {
        let mut confidence: f64 = 100.0;
        if (qualitative - technical).abs() > 40.0 {
            confidence -= 40.0;
        }
        if (qualitative - 50.0).abs() < 10.0 {
            confidence -= 20.0;
        }
        if !signal.has_factors() {
            confidence -= 30.0;
        }
        confidence.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(status: &str) -> QualitativeSignal {
        QualitativeSignal {
            status: status.to_string(),
            summary: String::new(),
            positive_factors: vec!["breadth".into()],
            negative_factors: vec![],
        }
    }

    fn classify(change: f64, status: &str) -> RegimeStatus {
        RegimeScorer::default().classify(
            Market::Kr,
            Some(change),
            Some(&signal(status)),
            None,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_technical_bands() {
        assert_eq!(technical_score(-4.5), 0.0);
        assert_eq!(technical_score(-2.0), 20.0);
        assert_eq!(technical_score(-1.0), 35.0);
        assert_eq!(technical_score(0.5), 50.0);
        assert_eq!(technical_score(1.2), 65.0);
        assert_eq!(technical_score(2.5), 80.0);
        assert_eq!(technical_score(3.5), 100.0);
    }

    #[test]
    fn test_panic_scenario() {
        let status = classify(-4.5, "panic");
        assert_eq!(status.regime, Regime::Panic);
        assert!((0.0..=14.0).contains(&status.score));
        assert_eq!(status.recommended_exposure, 0.0);
    }

    #[test]
    fn test_super_bull_scenario() {
        let status = RegimeScorer::default().classify(
            Market::Us,
            Some(3.5),
            Some(&signal("strong mark up")),
            None,
            None,
            Utc::now(),
        );
        assert_eq!(status.regime, Regime::SuperBull);
        assert!((85.0..=100.0).contains(&status.score));
    }

    #[test]
    fn test_divergence_drops_at_least_one_band() {
        let narrative_only = Regime::from_score(90.0);
        let status = classify(-1.0, "strong mark up");

        assert!(status.regime < narrative_only);
        // 0.6*35 + 0.4*90 = 57, minus 20
        assert_eq!(status.score, 37.0);
        assert_eq!(status.regime, Regime::WeakBear);
        assert!(status.reasons.iter().any(|r| r.starts_with("Divergence")));
    }

    #[test]
    fn test_super_bull_cap_requires_tape() {
        let scorer = RegimeScorer::default();
        // Flat tape, euphoric narrative and a hot macro composite
        let status = scorer.classify(
            Market::Us,
            Some(0.2),
            Some(&signal("rally")),
            Some(100.0),
            None,
            Utc::now(),
        );
        // 0.4*50 + 0.3*90 + 0.3*100 = 77 -> capped to 75
        assert_eq!(status.score, 75.0);
        assert_eq!(status.regime, Regime::Bull);
    }

    #[test]
    fn test_missing_inputs_fall_back_to_neutral() {
        let scorer = RegimeScorer::default();
        let now = Utc::now();

        let no_tape = scorer.classify(Market::Kr, None, Some(&signal("rally")), None, None, now);
        assert_eq!(no_tape.regime, Regime::Sideways);
        assert_eq!(no_tape.confidence, 0.0);
        assert_eq!(no_tape.data_quality, DataQuality::Low);

        let nan_tape = scorer.classify(Market::Kr, Some(f64::NAN), Some(&signal("x")), None, None, now);
        assert_eq!(nan_tape.regime, Regime::Sideways);

        let no_narrative = scorer.classify(Market::Kr, Some(1.0), None, None, None, now);
        assert_eq!(no_narrative.confidence, 0.0);
    }

    #[test]
    fn test_hysteresis_holds_previous_regime() {
        let scorer = RegimeScorer::default();
        let now = Utc::now();

        // 0.6*50 + 0.4*70 = 58 -> WEAK_BULL
        let first = scorer.classify(Market::Kr, Some(0.4), Some(&signal("uptrend")), None, None, now);
        assert_eq!(first.regime, Regime::WeakBull);

        // Forge a previous status that sat just inside SIDEWAYS
        let mut previous = first.clone();
        previous.regime = Regime::Sideways;
        previous.score = 56.0;
        previous.technical_change = 0.1;

        let second = scorer.classify(
            Market::Kr,
            Some(0.4),
            Some(&signal("uptrend")),
            None,
            Some(&previous),
            now,
        );
        assert_eq!(second.score, 58.0);
        assert_eq!(second.regime, Regime::Sideways);
        assert_eq!(second.recommended_exposure, Regime::Sideways.recommended_exposure());
    }

    #[test]
    fn test_hysteresis_releases_on_large_tape_move() {
        let scorer = RegimeScorer::default();
        let now = Utc::now();
        let mut previous = scorer.classify(Market::Kr, Some(0.4), Some(&signal("uptrend")), None, None, now);
        previous.regime = Regime::Sideways;
        previous.score = 57.0;
        previous.technical_change = -0.8;

        let next = scorer.classify(
            Market::Kr,
            Some(0.4),
            Some(&signal("uptrend")),
            None,
            Some(&previous),
            now,
        );
        assert_eq!(next.regime, Regime::WeakBull);
    }

    #[test]
    fn test_confidence_and_data_quality() {
        let scorer = RegimeScorer::default();
        let rich = QualitativeSignal {
            status: "rally".into(),
            summary: String::new(),
            positive_factors: vec!["a".into(), "b".into(), "c".into()],
            negative_factors: vec![],
        };
        let status = scorer.classify(Market::Us, Some(3.0), Some(&rich), None, None, Utc::now());
        assert_eq!(status.confidence, 100.0);
        assert_eq!(status.data_quality, DataQuality::Excellent);

        let bare = QualitativeSignal {
            status: "neutral".into(),
            ..QualitativeSignal::default()
        };
        // |50-100| > 40 (-40), neutral narrative (-20), no factors (-30)
        let status = scorer.classify(Market::Us, Some(3.0), Some(&bare), None, None, Utc::now());
        assert_eq!(status.confidence, 10.0);
        assert_eq!(status.data_quality, DataQuality::Low);
    }

    #[test]
    fn test_force_full_exposure_policy() {
        let scorer = RegimeScorer::new(
            RegimeScorerConfig {
                force_full_exposure: true,
                ..RegimeScorerConfig::default()
            },
            KeywordTable::default(),
        );
        assert_eq!(scorer.exposure_for(Regime::Sideways), 1.0);
        assert_eq!(scorer.exposure_for(Regime::WeakBear), 0.3);
        assert_eq!(scorer.exposure_for(Regime::Panic), 0.0);
    }
}
