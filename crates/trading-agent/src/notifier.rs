use anyhow::Result;
use reqwest::Client;
use serde_json::json;

use account_ledger::Fill;
use adaptive_params::EvolutionReport;
use position_lifecycle::TransitionRecord;
use trading_core::{Market, RegimeStatus};

/// Discord-compatible webhook sender. An empty URL disables delivery.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
            webhook_url,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    pub async fn send_message(&self, content: &str) -> Result<()> {
        if self.webhook_url.is_empty() {
            tracing::debug!("Discord webhook not configured, skipping notification");
            return Ok(());
        }

        let payload = json!({
            "content": content,
            "username": "InvestIQ Trading Agent",
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!("Discord notification sent");
        Ok(())
    }

    /// Send and swallow failures. Notifications never interrupt trading.
    pub async fn notify(&self, content: &str) {
        if let Err(e) = self.send_message(content).await {
            tracing::warn!("Discord notification failed: {}", e);
        }
    }

    pub async fn notify_entry(&self, name: &str, fill: &Fill, score: f64, rationale: &str) {
        self.notify(&format_entry(name, fill, score, rationale)).await;
    }

    pub async fn notify_transition(&self, record: &TransitionRecord) {
        self.notify(&format_transition(record)).await;
    }

    pub async fn notify_regime_change(&self, status: &RegimeStatus, previous: Option<&str>) {
        let message = format!(
            "**Regime Change ({})**: {} -> **{}**\nScore: {:.1} | Confidence: {:.0}% | Exposure: {:.0}%\n{}",
            status.market,
            previous.unwrap_or("N/A"),
            status.regime,
            status.score,
            status.confidence,
            status.recommended_exposure * 100.0,
            status.reasons.join("; ")
        );
        self.notify(&message).await;
    }

    pub async fn notify_breaker(&self, market: Market, reason: &str) {
        let message = format!(
            "**CIRCUIT BREAKER TRIPPED ({market})**\nReason: {reason}\nNew entries halted, exits continue."
        );
        self.notify(&message).await;
    }

    pub async fn notify_evolution(&self, report: &EvolutionReport) {
        self.notify(&format_evolution(report)).await;
    }
}

fn format_entry(name: &str, fill: &Fill, score: f64, rationale: &str) -> String {
    format!(
        "**BUY {}** ({}) x{} @ {:.2} [{}]\nScore: {:.0} | Balance: {:.2}\n{}",
        fill.ticker,
        name,
        fill.quantity,
        fill.execution_price,
        fill.phase,
        score,
        fill.balance_after,
        rationale
    )
}

fn format_transition(record: &TransitionRecord) -> String {
    let target = record
        .to_phase
        .map(|p| format!(" -> {p}"))
        .unwrap_or_default();
    format!(
        "**{}** {} [{}{}] qty {} | P&L {:+.2}%\n{}",
        record.rule, record.ticker, record.from_phase, target, record.quantity, record.pnl_percent, record.rationale
    )
}

fn format_evolution(report: &EvolutionReport) -> String {
    let mut lines = vec![format!(
        "**Strategy Evolution** ({} trades, win rate {:.1}%, MDD {:.1}%)",
        report.evaluated_trades,
        report.health.win_rate * 100.0,
        report.health.max_drawdown_pct
    )];
    for change in &report.changes {
        lines.push(format!(
            "{}: min score {:.0} -> {:.0}, allocation {:.1} -> {:.1} ({:?}, expectancy {:+.2})",
            change.strategy,
            change.before.min_score_to_trade,
            change.after.min_score_to_trade,
            change.before.allocation_multiplier,
            change.after.allocation_multiplier,
            change.after.status,
            change.expectancy
        ));
    }
    if let Some(bypass) = &report.bypass {
        lines.push(format!(
            "Bypass threshold {:.0} -> {:.0} (avg return {:+.2}% over {} trades)",
            bypass.old_threshold, bypass.new_threshold, bypass.avg_return, bypass.trades
        ));
    }
    if !report.health.healthy {
        lines.push("WARNING: strategy health check failed".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_ledger::TradeSide;
    use chrono::Utc;
    use position_lifecycle::LifecycleRule;
    use trading_core::StrategyPhase;

    #[tokio::test]
    async fn test_disabled_notifier_is_a_noop() {
        let notifier = DiscordNotifier::new(String::new()).unwrap();
        assert!(!notifier.is_enabled());
        assert!(notifier.send_message("hello").await.is_ok());
    }

    #[test]
    fn test_format_entry_and_transition() {
        let fill = Fill {
            side: TradeSide::Buy,
            ticker: "NVDA".to_string(),
            phase: StrategyPhase::Entry,
            execution_price: 100.1,
            quantity: 5,
            fee: 0.07,
            realized_pnl: None,
            realized_pnl_percent: None,
            balance_after: 29_499.0,
            position_closed: false,
        };
        let text = format_entry("Nvidia", &fill, 100.0, "[HUNTER_BREAKOUT] breakout");
        assert!(text.contains("BUY NVDA"));
        assert!(text.contains("x5"));

        let record = TransitionRecord {
            ticker: "NVDA".to_string(),
            from_phase: StrategyPhase::Entry,
            to_phase: Some(StrategyPhase::Hold),
            rule: LifecycleRule::EntryPromotion,
            pnl_percent: 6.0,
            quantity: 0,
            rationale: "profit in bullish regime".to_string(),
            at: Utc::now(),
        };
        let text = format_transition(&record);
        assert!(text.contains("-> HOLD"));
        assert!(text.contains("+6.00%"));
    }
}
