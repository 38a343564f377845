use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use request_governor::{Priority, RequestGovernor};
use trading_core::{Bar, CoreError, Market, QuoteProvider, QuoteSnapshot, Timeframe};

/// Polygon REST quotes and aggregates, dispatched through the request governor.
///
/// Never fails outward: errors degrade to an empty quote or series.
pub struct PolygonQuotes {
    api_key: String,
    base_url: String,
    client: Client,
    governor: Arc<RequestGovernor>,
}

impl PolygonQuotes {
    pub fn new(api_key: String, base_url: String, timeout: Duration, governor: Arc<RequestGovernor>) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            governor,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(&[("apiKey", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;

        check_status(response.status())?;
        Ok(response.json().await?)
    }

    async fn fetch_snapshot(&self, ticker: &str) -> Result<QuoteSnapshot> {
        let url = format!("{}/v2/snapshot/locale/us/markets/stocks/tickers/{}", self.base_url, ticker);
        let snapshot: SnapshotResponse = self.get_json(&url, &[]).await?;
        Ok(snapshot_to_quote(&snapshot.ticker))
    }

    async fn fetch_aggregates(&self, ticker: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>> {
        let (multiplier, timespan) = polygon_span(timeframe);
        let to = Utc::now();
        let from = to - lookback(timeframe, count);
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            ticker,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let response: AggregateResponse = self
            .get_json(
                &url,
                &[
                    ("adjusted", "true".to_string()),
                    ("sort", "asc".to_string()),
                    ("limit", "50000".to_string()),
                ],
            )
            .await?;
        Ok(aggregates_to_bars(response, count))
    }
}

#[async_trait]
impl QuoteProvider for PolygonQuotes {
    async fn latest_quote(&self, ticker: &str, market: Market) -> QuoteSnapshot {
        match self
            .governor
            .run(Priority::Normal, || self.fetch_snapshot(ticker))
            .await
        {
            Ok(quote) => quote,
            Err(e) => {
                tracing::debug!(ticker, market = %market, "Quote unavailable: {}", e);
                QuoteSnapshot::default()
            }
        }
    }

    async fn candles(&self, ticker: &str, market: Market, timeframe: Timeframe, count: usize) -> Vec<Bar> {
        match self
            .governor
            .run(Priority::Low, || self.fetch_aggregates(ticker, timeframe, count))
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                tracing::debug!(ticker, market = %market, ?timeframe, "Candles unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

/// Map an HTTP status onto the error classes the governor understands.
pub(crate) fn check_status(status: StatusCode) -> Result<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(CoreError::RateLimited(format!("HTTP {status}")).into());
    }
    if !status.is_success() {
        return Err(CoreError::Upstream(format!("HTTP {status}")).into());
    }
    Ok(())
}

fn polygon_span(timeframe: Timeframe) -> (u32, &'static str) {
    match timeframe {
        Timeframe::Minute1 => (1, "minute"),
        Timeframe::Minute5 => (5, "minute"),
        Timeframe::Hour1 => (1, "hour"),
        Timeframe::Day1 => (1, "day"),
    }
}

/// Calendar window wide enough to hold `count` bars of `timeframe` across
/// nights and weekends.
fn lookback(timeframe: Timeframe, count: usize) -> chrono::Duration {
    let session_minutes = 390.0;
    let bars_per_day = (session_minutes / timeframe.to_minutes() as f64).max(1.0);
    let trading_days = (count as f64 / bars_per_day).ceil();
    // 7 calendar days per 5 trading days, plus slack for holidays
    let calendar_days = (trading_days * 7.0 / 5.0).ceil() as i64 + 4;
    chrono::Duration::days(calendar_days)
}

fn snapshot_to_quote(ticker: &SnapshotTicker) -> QuoteSnapshot {
    let day = ticker.day.as_ref();
    let price = ticker
        .last_trade
        .as_ref()
        .and_then(|t| t.p)
        .or_else(|| day.and_then(|d| d.c))
        .filter(|p| *p > 0.0)
        .or_else(|| ticker.prev_day.as_ref().and_then(|d| d.c))
        .unwrap_or(0.0);

    QuoteSnapshot {
        price,
        change_rate: ticker.todays_change_perc.unwrap_or(0.0),
        volume: day.and_then(|d| d.v).unwrap_or(0.0),
    }
}

fn aggregates_to_bars(response: AggregateResponse, count: usize) -> Vec<Bar> {
    let mut bars: Vec<Bar> = response
        .results
        .into_iter()
        .filter_map(|r| {
            Some(Bar {
                timestamp: DateTime::from_timestamp_millis(r.t)?,
                open: r.o,
                high: r.h,
                low: r.l,
                close: r.c,
                volume: r.v,
            })
        })
        .collect();
    if bars.len() > count {
        bars.drain(..bars.len() - count);
    }
    bars
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    prev_day: Option<SnapshotDay>,
    #[serde(rename = "todaysChangePerc")]
    todays_change_perc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDay {
    c: Option<f64>,
    v: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotLastTrade {
    p: Option<f64>,
}
