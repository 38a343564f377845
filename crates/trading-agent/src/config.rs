use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use account_ledger::FeeModel;
use market_regime_detector::{RegimeScorerConfig, RegimeServiceConfig};
use position_lifecycle::LifecycleConfig;
use request_governor::GovernorConfig;
use smart_watchlist::WatchlistConfig;
use trading_core::Market;

use crate::signal_executor::ExecutionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Market and cadence
    pub market: Market,                    // US
    pub cycle_interval_seconds: u64,       // 300 (5 minutes)
    pub evolution_interval_hours: u64,     // 4
    pub heartbeat_interval_cycles: u64,    // 6 (every 30 min at 5-min cycles)
    pub metrics_log_interval_cycles: u64,  // 12

    // Request governor
    pub governor_capacity: u32,            // 1500 tokens
    pub governor_refill_per_second: u32,   // 25
    pub governor_max_retries: u32,         // 3

    // Simulated account
    pub fee_rate: f64,                     // 0.00015 (0.015%)
    pub slippage_rate: f64,                // 0.001 (0.1%)
    pub initial_capital: f64,              // KR 50,000,000 / US 30,000

    // Regime
    pub regime_cache_minutes: i64,         // 30
    pub force_full_exposure: bool,         // false

    // Watchlist
    pub candidate_ttl_hours: i64,          // 24

    // Entry gate
    pub required_score: f64,               // 60
    pub hunger_score: f64,                 // 50
    pub hunger_max_exposure: f64,          // 0.1
    pub hunger_min_volatility: f64,        // 3.0 (%)
    pub hunger_min_relative_volume: f64,   // 2.0
    pub scout_fraction: f64,               // 0.05
    pub entry_hard_cap: f64,               // KR 10,000,000 / US 10,000
    pub liquidity_cap_ratio: f64,          // 0.01 of daily volume
    pub bypass_threshold: f64,             // 95

    // Position lifecycle
    pub atr_multiple: f64,                 // 2.0
    pub breaker_cooldown_minutes: i64,     // 60

    // External services
    pub polygon_api_key: String,
    pub polygon_base_url: String,
    pub advisor_url: String,
    pub http_timeout_seconds: u64,         // 30

    // Discord notifications
    pub discord_webhook_url: String,

    // Database
    pub database_url: String,

    // Live trading gate
    pub live_trading_approved: bool,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let market_raw = env::var("MARKET").unwrap_or_else(|_| "US".to_string());
        let market = Market::parse(&market_raw)
            .with_context(|| format!("MARKET must be KR or US, got {market_raw}"))?;

        let config = Self {
            market,
            cycle_interval_seconds: env::var("CYCLE_INTERVAL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            evolution_interval_hours: env::var("EVOLUTION_INTERVAL_HOURS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            heartbeat_interval_cycles: env::var("HEARTBEAT_INTERVAL_CYCLES")
                .unwrap_or_else(|_| "6".to_string())
                .parse()?,
            metrics_log_interval_cycles: env::var("METRICS_LOG_INTERVAL_CYCLES")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,

            governor_capacity: env::var("GOVERNOR_CAPACITY")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()?,
            governor_refill_per_second: env::var("GOVERNOR_REFILL_PER_SECOND")
                .unwrap_or_else(|_| "25".to_string())
                .parse()?,
            governor_max_retries: env::var("GOVERNOR_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,

            fee_rate: env::var("FEE_RATE")
                .unwrap_or_else(|_| "0.00015".to_string())
                .parse()?,
            slippage_rate: env::var("SLIPPAGE_RATE")
                .unwrap_or_else(|_| "0.001".to_string())
                .parse()?,
            initial_capital: match env::var("INITIAL_CAPITAL") {
                Ok(v) => v.parse().context("INITIAL_CAPITAL must be a number")?,
                Err(_) => market.default_capital(),
            },

            regime_cache_minutes: env::var("REGIME_CACHE_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            force_full_exposure: env::var("FORCE_FULL_EXPOSURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            candidate_ttl_hours: env::var("CANDIDATE_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,

            required_score: env::var("REQUIRED_SCORE")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            hunger_score: env::var("HUNGER_SCORE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            hunger_max_exposure: env::var("HUNGER_MAX_EXPOSURE")
                .unwrap_or_else(|_| "0.1".to_string())
                .parse()?,
            hunger_min_volatility: env::var("HUNGER_MIN_VOLATILITY")
                .unwrap_or_else(|_| "3.0".to_string())
                .parse()?,
            hunger_min_relative_volume: env::var("HUNGER_MIN_RVOL")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            scout_fraction: env::var("SCOUT_FRACTION")
                .unwrap_or_else(|_| "0.05".to_string())
                .parse()?,
            entry_hard_cap: match env::var("ENTRY_HARD_CAP") {
                Ok(v) => v.parse().context("ENTRY_HARD_CAP must be a number")?,
                Err(_) => market.entry_hard_cap(),
            },
            liquidity_cap_ratio: env::var("LIQUIDITY_CAP_RATIO")
                .unwrap_or_else(|_| "0.01".to_string())
                .parse()?,
            bypass_threshold: env::var("BYPASS_THRESHOLD")
                .unwrap_or_else(|_| "95".to_string())
                .parse()?,

            atr_multiple: env::var("ATR_MULTIPLE")
                .unwrap_or_else(|_| "2.0".to_string())
                .parse()?,
            breaker_cooldown_minutes: env::var("BREAKER_COOLDOWN_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            polygon_api_key: env::var("POLYGON_API_KEY").context("POLYGON_API_KEY not set")?,
            polygon_base_url: env::var("POLYGON_BASE_URL")
                .unwrap_or_else(|_| "https://api.polygon.io".to_string()),
            advisor_url: env::var("AI_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8010".to_string()),
            http_timeout_seconds: env::var("HTTP_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").unwrap_or_default(),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:trading-agent.db?mode=rwc".to_string()),

            live_trading_approved: env::var("LIVE_TRADING_APPROVED")
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the agent trade nonsensically.
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_seconds == 0 {
            bail!("CYCLE_INTERVAL must be greater than zero");
        }
        if self.evolution_interval_hours == 0 {
            bail!("EVOLUTION_INTERVAL_HOURS must be greater than zero");
        }
        if self.governor_capacity == 0 || self.governor_refill_per_second == 0 {
            bail!("Governor capacity and refill rate must be positive");
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            bail!("INITIAL_CAPITAL must be positive, got {}", self.initial_capital);
        }
        for (name, rate) in [("FEE_RATE", self.fee_rate), ("SLIPPAGE_RATE", self.slippage_rate)] {
            if !(0.0..0.1).contains(&rate) {
                bail!("{name} must be in [0, 0.1), got {rate}");
            }
        }
        if !(0.0..=1.0).contains(&self.scout_fraction) || self.scout_fraction == 0.0 {
            bail!("SCOUT_FRACTION must be in (0, 1], got {}", self.scout_fraction);
        }
        if !(0.0..=100.0).contains(&self.bypass_threshold) {
            bail!("BYPASS_THRESHOLD must be in [0, 100], got {}", self.bypass_threshold);
        }
        if self.atr_multiple <= 0.0 {
            bail!("ATR_MULTIPLE must be positive, got {}", self.atr_multiple);
        }
        if self.candidate_ttl_hours <= 0 {
            bail!("CANDIDATE_TTL_HOURS must be positive");
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_seconds)
    }

    pub fn evolution_interval(&self) -> Duration {
        Duration::from_secs(self.evolution_interval_hours * 3600)
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            capacity: self.governor_capacity,
            refill_per_second: self.governor_refill_per_second,
            max_retries: self.governor_max_retries,
            ..GovernorConfig::default()
        }
    }

    pub fn fee_model(&self) -> FeeModel {
        FeeModel {
            fee_rate: self.fee_rate,
            slippage_rate: self.slippage_rate,
        }
    }

    pub fn scorer_config(&self) -> RegimeScorerConfig {
        RegimeScorerConfig {
            force_full_exposure: self.force_full_exposure,
            ..RegimeScorerConfig::default()
        }
    }

    pub fn regime_service_config(&self) -> RegimeServiceConfig {
        RegimeServiceConfig {
            cache_ttl_minutes: self.regime_cache_minutes,
            ..RegimeServiceConfig::default()
        }
    }

    pub fn watchlist_config(&self) -> WatchlistConfig {
        WatchlistConfig {
            candidate_ttl: chrono::Duration::hours(self.candidate_ttl_hours),
            ..WatchlistConfig::default()
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            atr_multiple: self.atr_multiple,
            ..LifecycleConfig::default()
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            default_required_score: self.required_score,
            hunger_required_score: self.hunger_score,
            hunger_max_exposure: self.hunger_max_exposure,
            hunger_min_volatility: self.hunger_min_volatility,
            hunger_min_relative_volume: self.hunger_min_relative_volume,
            scout_fraction: self.scout_fraction,
            hard_cap: self.entry_hard_cap,
            liquidity_cap_ratio: self.liquidity_cap_ratio,
            ..ExecutionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this crate that touches the process environment.
    #[test]
    fn test_from_env_defaults() {
        env::set_var("POLYGON_API_KEY", "test-key");
        env::set_var("MARKET", "kr");
        let config = AgentConfig::from_env().unwrap();

        assert_eq!(config.market, Market::Kr);
        assert_eq!(config.cycle_interval_seconds, 300);
        assert_eq!(config.evolution_interval(), Duration::from_secs(4 * 3600));
        assert_eq!(config.initial_capital, 50_000_000.0);
        assert_eq!(config.entry_hard_cap, 10_000_000.0);
        assert_eq!(config.required_score, 60.0);
        assert_eq!(config.bypass_threshold, 95.0);
        assert!(!config.force_full_exposure);
        assert_eq!(config.governor_config().capacity, 1500);
        assert_eq!(config.fee_model(), FeeModel::default());

        env::set_var("MARKET", "LSE");
        assert!(AgentConfig::from_env().is_err());
        env::remove_var("MARKET");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AgentConfig::sample();
        assert!(config.validate().is_ok());

        config.scout_fraction = 0.0;
        assert!(config.validate().is_err());
        config.scout_fraction = 0.05;

        config.initial_capital = -1.0;
        assert!(config.validate().is_err());
        config.initial_capital = 30_000.0;

        config.slippage_rate = 0.5;
        assert!(config.validate().is_err());
    }

    impl AgentConfig {
        fn sample() -> Self {
            Self {
                market: Market::Us,
                cycle_interval_seconds: 300,
                evolution_interval_hours: 4,
                heartbeat_interval_cycles: 6,
                metrics_log_interval_cycles: 12,
                governor_capacity: 1500,
                governor_refill_per_second: 25,
                governor_max_retries: 3,
                fee_rate: 0.00015,
                slippage_rate: 0.001,
                initial_capital: 30_000.0,
                regime_cache_minutes: 30,
                force_full_exposure: false,
                candidate_ttl_hours: 24,
                required_score: 60.0,
                hunger_score: 50.0,
                hunger_max_exposure: 0.1,
                hunger_min_volatility: 3.0,
                hunger_min_relative_volume: 2.0,
                scout_fraction: 0.05,
                entry_hard_cap: 10_000.0,
                liquidity_cap_ratio: 0.01,
                bypass_threshold: 95.0,
                atr_multiple: 2.0,
                breaker_cooldown_minutes: 60,
                polygon_api_key: "k".to_string(),
                polygon_base_url: "http://localhost".to_string(),
                advisor_url: "http://localhost".to_string(),
                http_timeout_seconds: 30,
                discord_webhook_url: String::new(),
                database_url: "sqlite::memory:".to_string(),
                live_trading_approved: false,
            }
        }
    }
}
