//! Market regime classification.
//!
//! [`RegimeScorer`] is a pure function from a benchmark move plus an opaque
//! qualitative read to one of seven regimes. [`RegimeService`] wraps it with
//! the upstream calls and a per-market cache.

pub mod keywords;
pub mod scorer;
pub mod service;

pub use keywords::{KeywordRule, KeywordTable};
pub use scorer::{technical_score, RegimeScorer, RegimeScorerConfig};
pub use service::{RegimeService, RegimeServiceConfig, RegimeUpdate};
