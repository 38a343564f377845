use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use trading_core::{Market, QualitativeAdvisor, QualitativeSignal, Regime, StrategyFocus};

use crate::market_data::check_status;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    market: &'a str,
}

#[derive(Debug, Serialize)]
struct FocusRequest<'a> {
    regime: &'a str,
    headlines: &'a [String],
    lessons: &'a [String],
}

/// HTTP client for the AI reasoning sidecar.
#[derive(Clone)]
pub struct HttpAdvisor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdvisor {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        check_status(response.status())?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl QualitativeAdvisor for HttpAdvisor {
    async fn classify_qualitative(&self, market: Market) -> Result<QualitativeSignal> {
        self.post("/regime/qualitative", &ClassifyRequest { market: market.as_str() })
            .await
    }

    async fn decide_strategy_focus(
        &self,
        regime: Regime,
        headlines: &[String],
        lessons: &[String],
    ) -> Result<StrategyFocus> {
        let request = FocusRequest {
            regime: regime.name(),
            headlines,
            lessons,
        };
        self.post("/strategy/focus", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_payloads() {
        let body = serde_json::to_value(ClassifyRequest { market: Market::Kr.as_str() }).unwrap();
        assert_eq!(body["market"], "KR");

        let lessons = vec!["cut losers faster".to_string()];
        let body = serde_json::to_value(FocusRequest {
            regime: Regime::WeakBull.name(),
            headlines: &[],
            lessons: &lessons,
        })
        .unwrap();
        assert_eq!(body["lessons"][0], "cut losers faster");
        assert!(body["headlines"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let advisor = HttpAdvisor::new("http://localhost:8010/".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(advisor.base_url, "http://localhost:8010");
    }
}
