use std::collections::BTreeMap;

use crate::models::StrategyConfig;

const DEFAULT_MIN_SCORE: f64 = 80.0;
const DEFAULT_ALLOCATION: f64 = 1.0;

/// Map free-form strategy labels onto the configured strategy names.
pub fn canonical_strategy(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("eagle") {
        "EAGLE_EYE".to_string()
    } else if lower.contains("volume") {
        "VOLUME_SPIKE".to_string()
    } else if lower.contains("value") {
        "VALUE_PIVOT".to_string()
    } else if lower.contains("pattern") {
        "CHART_PATTERN".to_string()
    } else {
        raw.trim().to_ascii_uppercase()
    }
}

/// Per-strategy configs. Only the adaptive loop mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyBook {
    configs: BTreeMap<String, StrategyConfig>,
}

impl Default for StrategyBook {
    fn default() -> Self {
        let configs = [
            StrategyConfig::new("EAGLE_EYE", 80.0, 0.5),
            StrategyConfig::new("VOLUME_SPIKE", 85.0, 0.5),
            StrategyConfig::new("VALUE_PIVOT", 80.0, 0.5),
            StrategyConfig::new("CHART_PATTERN", 85.0, 0.5),
        ]
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect();
        Self { configs }
    }
}

impl StrategyBook {
    /// Config for `strategy`, or the permissive default when it is not tracked.
    pub fn get(&self, strategy: &str) -> StrategyConfig {
        self.lookup(strategy)
            .cloned()
            .unwrap_or_else(|| StrategyConfig::new(strategy, DEFAULT_MIN_SCORE, DEFAULT_ALLOCATION))
    }

    /// Tracked config only.
    pub fn lookup(&self, strategy: &str) -> Option<&StrategyConfig> {
        self.configs.get(&canonical_strategy(strategy))
    }

    pub(crate) fn lookup_mut(&mut self, strategy: &str) -> Option<&mut StrategyConfig> {
        self.configs.get_mut(strategy)
    }

    pub fn all(&self) -> Vec<StrategyConfig> {
        self.configs.values().cloned().collect()
    }

    /// Overlay persisted configs. Unknown names are tracked from now on.
    pub fn restore(&mut self, configs: impl IntoIterator<Item = StrategyConfig>) {
        for config in configs {
            self.configs.insert(config.name.clone(), config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyStatus;

    #[test]
    fn test_defaults() {
        let book = StrategyBook::default();
        assert_eq!(book.get("VOLUME_SPIKE").min_score_to_trade, 85.0);
        assert_eq!(book.get("EAGLE_EYE").allocation_multiplier, 0.5);
        assert_eq!(book.all().len(), 4);

        let unknown = book.get("HUNTER_BREAKOUT");
        assert_eq!(unknown.min_score_to_trade, 80.0);
        assert_eq!(unknown.allocation_multiplier, 1.0);
        assert_eq!(unknown.status, StrategyStatus::Active);
        assert!(book.lookup("HUNTER_BREAKOUT").is_none());
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(canonical_strategy("Eagle Eye Scanner"), "EAGLE_EYE");
        assert_eq!(canonical_strategy("volume spike"), "VOLUME_SPIKE");
        assert_eq!(canonical_strategy("Cup Pattern"), "CHART_PATTERN");
        assert_eq!(canonical_strategy(" intel_bypass "), "INTEL_BYPASS");
        assert_eq!(StrategyBook::default().get("Value hunt").min_score_to_trade, 80.0);
    }

    #[test]
    fn test_restore_overlays() {
        let mut book = StrategyBook::default();
        let mut tuned = StrategyConfig::new("EAGLE_EYE", 92.0, 0.5);
        tuned.status = StrategyStatus::Probation;
        book.restore(vec![tuned.clone()]);
        assert_eq!(book.get("EAGLE_EYE"), tuned);

        let json = serde_json::to_string(&book.all()).unwrap();
        let restored: Vec<StrategyConfig> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 4);
    }
}
