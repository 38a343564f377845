use anyhow::Result;
use serde::{Deserialize, Serialize};

use account_ledger::{AccountLedger, Position, TradeLogEntry};
use adaptive_params::{BypassGate, StrategyConfig};
use position_lifecycle::BreakerStatus;
use trading_core::{Market, RegimeStatus};

/// Cash and open positions as persisted between restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAccount {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: Vec<Position>,
}

impl PersistedAccount {
    pub fn from_ledger(ledger: &AccountLedger) -> Self {
        Self {
            cash: ledger.cash(),
            initial_capital: ledger.initial_capital(),
            positions: ledger.positions().to_vec(),
        }
    }
}

/// Durable store for the trading agent.
///
/// Writes are best-effort from the caller's point of view: the in-memory
/// state stays authoritative and a failed write is only logged.
pub struct StateManager {
    pub(crate) db_pool: sqlx::AnyPool,
}

impl StateManager {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    /// Initialize agent state tables.
    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_log (
                id TEXT PRIMARY KEY,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                ticker TEXT NOT NULL,
                phase TEXT NOT NULL,
                strategy TEXT NOT NULL,
                price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                realized_pnl REAL,
                realized_pnl_percent REAL,
                reason TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS candidate_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                ticker TEXT NOT NULL,
                name TEXT NOT NULL,
                strategy TEXT NOT NULL,
                score REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS regime_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                regime TEXT NOT NULL,
                score REAL NOT NULL,
                confidence REAL NOT NULL,
                recommended_exposure REAL NOT NULL,
                reasons TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS strategy_configs (
                name TEXT PRIMARY KEY,
                min_score_to_trade REAL NOT NULL,
                allocation_multiplier REAL NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        // Create indexes if missing
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_log_market ON trade_log(market, created_at)")
            .execute(&self.db_pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_regime_log_market ON regime_log(market, created_at)")
            .execute(&self.db_pool)
            .await
            .ok();

        Ok(())
    }

    /// Save a state key-value pair.
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Load a state value by key.
    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.save_state(key, &json).await
    }

    async fn load_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        match self.load_state(key).await? {
            Some(s) => match serde_json::from_str(&s) {
                Ok(v) => Ok(Some(v)),
                Err(e) => {
                    tracing::warn!(key, "Ignoring unreadable persisted state: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Current account row for `market`.
    pub async fn save_account(&self, market: Market, account: &PersistedAccount) -> Result<()> {
        self.save_json(&format!("account:{market}"), account).await
    }

    pub async fn load_account(&self, market: Market) -> Result<Option<PersistedAccount>> {
        self.load_json(&format!("account:{market}")).await
    }

    /// Append one fill. Re-recording the same fill is a no-op.
    pub async fn record_trade(&self, market: Market, entry: &TradeLogEntry) -> Result<()> {
        let payload = serde_json::to_string(entry)?;
        sqlx::query(
            "INSERT INTO trade_log
             (id, market, side, ticker, phase, strategy, price, quantity,
              realized_pnl, realized_pnl_percent, reason, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&entry.id)
        .bind(market.as_str())
        .bind(entry.side.as_str())
        .bind(&entry.ticker)
        .bind(entry.phase.as_str())
        .bind(&entry.strategy)
        .bind(entry.price)
        .bind(entry.quantity as i64)
        .bind(entry.realized_pnl)
        .bind(entry.realized_pnl_percent)
        .bind(&entry.reason)
        .bind(&payload)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Full trade log for `market`, oldest first.
    pub async fn load_trade_log(&self, market: Market) -> Result<Vec<TradeLogEntry>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM trade_log WHERE market = ? ORDER BY created_at ASC",
        )
        .bind(market.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(payload,)| match serde_json::from_str(&payload) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable trade log row: {}", e);
                    None
                }
            })
            .collect())
    }

    pub async fn log_candidate(
        &self,
        market: Market,
        ticker: &str,
        name: &str,
        strategy: &str,
        score: f64,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO candidate_log (market, ticker, name, strategy, score, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(market.as_str())
        .bind(ticker)
        .bind(name)
        .bind(strategy)
        .bind(score)
        .bind(status)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    pub async fn log_regime(&self, status: &RegimeStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO regime_log
             (market, regime, score, confidence, recommended_exposure, reasons, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(status.market.as_str())
        .bind(status.regime.name())
        .bind(status.score)
        .bind(status.confidence)
        .bind(status.recommended_exposure)
        .bind(serde_json::to_string(&status.reasons)?)
        .bind(status.timestamp.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Last logged regime label for `market`.
    pub async fn last_regime(&self, market: Market) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT regime FROM regime_log WHERE market = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(market.as_str())
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row.map(|(r,)| r))
    }

    pub async fn save_strategy_configs(&self, configs: &[StrategyConfig]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        for config in configs {
            let status = serde_json::to_value(config.status)?
                .as_str()
                .unwrap_or("ACTIVE")
                .to_string();
            sqlx::query(
                "INSERT INTO strategy_configs (name, min_score_to_trade, allocation_multiplier, status, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(name) DO UPDATE SET
                  min_score_to_trade = excluded.min_score_to_trade,
                  allocation_multiplier = excluded.allocation_multiplier,
                  status = excluded.status,
                  updated_at = excluded.updated_at",
            )
            .bind(&config.name)
            .bind(config.min_score_to_trade)
            .bind(config.allocation_multiplier)
            .bind(status)
            .bind(&now)
            .execute(&self.db_pool)
            .await?;
        }
        Ok(())
    }

    pub async fn load_strategy_configs(&self) -> Result<Vec<StrategyConfig>> {
        let rows: Vec<(String, f64, f64, String)> = sqlx::query_as(
            "SELECT name, min_score_to_trade, allocation_multiplier, status FROM strategy_configs ORDER BY name",
        )
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, min_score, allocation, status)| {
                let mut config = StrategyConfig::new(name, min_score, allocation);
                if let Ok(parsed) = serde_json::from_value(serde_json::Value::String(status)) {
                    config.status = parsed;
                }
                config
            })
            .collect())
    }

    pub async fn save_bypass_gate(&self, gate: &BypassGate) -> Result<()> {
        self.save_json("bypass_gate", gate).await
    }

    pub async fn load_bypass_gate(&self) -> Result<Option<BypassGate>> {
        self.load_json("bypass_gate").await
    }

    pub async fn save_breaker(&self, market: Market, status: &BreakerStatus) -> Result<()> {
        self.save_json(&format!("breaker:{market}"), status).await
    }

    pub async fn load_breaker(&self, market: Market) -> Result<Option<BreakerStatus>> {
        self.load_json(&format!("breaker:{market}")).await
    }

    /// Persist metrics to DB for recovery after restart.
    pub async fn save_metrics(&self, metrics_json: &serde_json::Value) -> Result<()> {
        let json_str = serde_json::to_string(metrics_json)?;
        self.save_state("agent_metrics", &json_str).await
    }

    /// Load persisted metrics.
    pub async fn load_metrics(&self) -> Result<Option<serde_json::Value>> {
        match self.load_state("agent_metrics").await? {
            Some(s) => Ok(serde_json::from_str(&s).ok()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_ledger::{BuyOrder, FeeModel};
    use adaptive_params::StrategyStatus;
    use sqlx::any::AnyPoolOptions;

    async fn test_store() -> StateManager {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = StateManager::new(pool);
        store.init_tables().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_init_is_idempotent_and_state_round_trips() {
        let store = test_store().await;
        store.init_tables().await.unwrap();

        assert_eq!(store.load_state("missing").await.unwrap(), None);
        store.save_state("k", "v1").await.unwrap();
        store.save_state("k", "v2").await.unwrap();
        assert_eq!(store.load_state("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_account_and_trade_log_restore() {
        let store = test_store().await;
        let mut ledger = AccountLedger::with_capital(Market::Us, 30_000.0, FeeModel::default());
        ledger.buy(BuyOrder::new("AAPL", "Apple", 100.0, 10)).unwrap();
        ledger.sell("AAPL", 110.0, 4, "harvest").unwrap();

        for entry in ledger.trade_log() {
            store.record_trade(Market::Us, entry).await.unwrap();
            // Duplicate writes are ignored
            store.record_trade(Market::Us, entry).await.unwrap();
        }
        store
            .save_account(Market::Us, &PersistedAccount::from_ledger(&ledger))
            .await
            .unwrap();

        let account = store.load_account(Market::Us).await.unwrap().unwrap();
        let log = store.load_trade_log(Market::Us).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(store.load_trade_log(Market::Kr).await.unwrap().is_empty());

        let mut restored = AccountLedger::with_capital(Market::Us, 30_000.0, FeeModel::default());
        restored.restore(account.cash, account.initial_capital, account.positions, log);
        assert!((restored.cash() - ledger.cash()).abs() < 1e-9);
        assert_eq!(restored.positions()[0].quantity, 6);
        assert_eq!(restored.closed_trades(10).len(), 1);
    }

    #[tokio::test]
    async fn test_strategy_configs_upsert() {
        let store = test_store().await;
        let mut config = StrategyConfig::new("EAGLE_EYE", 80.0, 0.5);
        store.save_strategy_configs(&[config.clone()]).await.unwrap();

        config.min_score_to_trade = 85.0;
        config.status = StrategyStatus::Probation;
        store.save_strategy_configs(&[config.clone()]).await.unwrap();

        let loaded = store.load_strategy_configs().await.unwrap();
        assert_eq!(loaded, vec![config]);
    }

    #[tokio::test]
    async fn test_gate_breaker_and_regime_log() {
        let store = test_store().await;
        let gate = BypassGate {
            threshold: 97.0,
            success_rate: 40.0,
            total_trades: 5,
        };
        store.save_bypass_gate(&gate).await.unwrap();
        assert_eq!(store.load_bypass_gate().await.unwrap(), Some(gate));

        let status = BreakerStatus {
            triggered: true,
            triggered_at: Some(chrono::Utc::now()),
            reason: Some("logic inconsistency".to_string()),
        };
        store.save_breaker(Market::Kr, &status).await.unwrap();
        assert_eq!(store.load_breaker(Market::Kr).await.unwrap(), Some(status));
        assert_eq!(store.load_breaker(Market::Us).await.unwrap(), None);

        let regime = RegimeStatus::neutral(Market::Kr, chrono::Utc::now(), "test");
        store.log_regime(&regime).await.unwrap();
        assert_eq!(store.last_regime(Market::Kr).await.unwrap().as_deref(), Some("SIDEWAYS"));
    }
}
