use serde::{Deserialize, Serialize};

/// One row of the qualitative mapping: any keyword match yields `score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub score: f64,
}

impl KeywordRule {
    pub fn new(keywords: &[&str], score: f64) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            score,
        }
    }
}

/// Approximate adapter from free-text AI status to a 0-100 score.
///
/// Rules are checked in order and the first match wins. This is a heuristic
/// translation layer, kept separate so it can be swapped without touching the
/// scoring math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTable {
    rules: Vec<KeywordRule>,
    default_score: f64,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new(
            vec![
                KeywordRule::new(&["crash", "panic", "collapse"], 5.0),
                KeywordRule::new(&["strong bull", "mark up", "markup", "rally"], 90.0),
                KeywordRule::new(&["bear", "downtrend", "distribution"], 20.0),
                KeywordRule::new(&["accumulation", "uptrend"], 70.0),
                KeywordRule::new(&["correction", "neutral", "sideways"], 50.0),
            ],
            50.0,
        )
    }
}

impl KeywordTable {
    pub fn new(rules: Vec<KeywordRule>, default_score: f64) -> Self {
        Self {
            rules,
            default_score,
        }
    }

    pub fn default_score(&self) -> f64 {
        self.default_score
    }

    /// Score `text`, returning the matched keyword when a rule fired.
    pub fn score(&self, text: &str) -> (f64, Option<&str>) {
        let haystack = text.to_lowercase();
        for rule in &self.rules {
            if let Some(hit) = rule.keywords.iter().find(|k| haystack.contains(k.as_str())) {
                return (rule.score, Some(hit.as_str()));
            }
        }
        (self.default_score, None)
    }
}
