use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::signal::unix::SignalKind;
use tokio::task::JoinHandle;
use tokio::time;

use account_ledger::AccountLedger;
use adaptive_params::{BypassGate, EvolverConfig, StrategyEvolver};
use broker_trait::{DryRunGateway, ExecutionGateway};
use market_regime_detector::{KeywordTable, RegimeScorer, RegimeService};
use position_lifecycle::{CircuitBreaker, PositionLifecycleManager};
use request_governor::RequestGovernor;
use smart_watchlist::SignalWatchlist;
use trading_core::{QualitativeAdvisor, QuoteProvider};

use trading_agent::advisor::HttpAdvisor;
use trading_agent::autopilot::{Autopilot, AutopilotDeps};
use trading_agent::config::AgentConfig;
use trading_agent::context::TradingContext;
use trading_agent::market_data::PolygonQuotes;
use trading_agent::metrics::AgentMetrics;
use trading_agent::notifier::DiscordNotifier;
use trading_agent::scheduler::CycleTimer;
use trading_agent::signal_executor::SignalExecutor;
use trading_agent::state_manager::StateManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting autonomous trading agent");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    let market = config.market;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Market: {} (benchmark {})", market, market.benchmark());
    tracing::info!("  Cycle interval: {}s", config.cycle_interval_seconds);
    tracing::info!("  Evolution interval: {}h", config.evolution_interval_hours);
    tracing::info!("  Initial capital: {:.0}", config.initial_capital);
    tracing::info!("  Bypass threshold: {:.0}", config.bypass_threshold);

    // 3. Execution venue. Orders only ever reach the dry-run gateway; the
    // simulated ledger is the account of record.
    let gateway: Arc<dyn ExecutionGateway> = Arc::new(DryRunGateway::new());
    if config.live_trading_approved {
        tracing::warn!(
            "LIVE_TRADING_APPROVED is set but no live gateway is configured; staying on {}",
            gateway.broker_name()
        );
    } else {
        tracing::info!("Paper trading mode ({})", gateway.broker_name());
    }

    // 4. Database
    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url).await?;
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;
    tracing::info!("Startup check: database OK");

    let store = Arc::new(StateManager::new(db_pool));
    store.init_tables().await?;
    tracing::info!("State manager initialized");

    // 5. Upstream clients, all behind one governor
    let governor = Arc::new(RequestGovernor::new(config.governor_config()));
    let _refill = governor.spawn_refill();

    let http_timeout = Duration::from_secs(config.http_timeout_seconds);
    let quotes: Arc<dyn QuoteProvider> = Arc::new(PolygonQuotes::new(
        config.polygon_api_key.clone(),
        config.polygon_base_url.clone(),
        http_timeout,
        governor.clone(),
    ));
    let advisor: Arc<dyn QualitativeAdvisor> =
        Arc::new(HttpAdvisor::new(config.advisor_url.clone(), http_timeout)?);
    tracing::info!("Market data and advisor clients ready ({})", config.advisor_url);

    let notifier = Arc::new(DiscordNotifier::new(config.discord_webhook_url.clone())?);
    tracing::info!(enabled = notifier.is_enabled(), "Discord notifier ready");

    // 6. Trading state
    let breaker = CircuitBreaker::new(chrono::Duration::minutes(config.breaker_cooldown_minutes));
    let ledger = AccountLedger::with_capital(market, config.initial_capital, config.fee_model());
    let context = Arc::new(TradingContext::new(
        ledger,
        breaker,
        AgentMetrics::new(config.metrics_log_interval_cycles),
    ));
    *context.bypass.write().await = BypassGate {
        threshold: config.bypass_threshold,
        ..BypassGate::default()
    };

    // 7. Components
    let regime = Arc::new(RegimeService::new(
        RegimeScorer::new(config.scorer_config(), KeywordTable::default()),
        config.regime_service_config(),
        quotes.clone(),
        advisor.clone(),
        governor.clone(),
    ));
    let watchlist = Arc::new(SignalWatchlist::new(config.watchlist_config(), quotes.clone()));
    let lifecycle = Arc::new(PositionLifecycleManager::new(
        config.lifecycle_config(),
        quotes.clone(),
        gateway.clone(),
    ));
    let executor = Arc::new(SignalExecutor::new(
        context.clone(),
        quotes.clone(),
        gateway.clone(),
        notifier.clone(),
        Some(store.clone()),
        config.execution_config(),
    ));

    let autopilot = Arc::new(Autopilot::new(AutopilotDeps {
        context,
        regime,
        watchlist,
        lifecycle,
        executor,
        evolver: StrategyEvolver::new(EvolverConfig::default()),
        advisor,
        governor,
        gateway,
        notifier: notifier.clone(),
        store: Some(store.clone()),
        heartbeat_interval_cycles: config.heartbeat_interval_cycles,
    }));

    // 8. Restore persisted state
    if let Err(e) = autopilot.restore_from_store().await {
        tracing::warn!("Failed to restore persisted state, starting fresh: {}", e);
    }
    let account = autopilot.account().await;
    tracing::info!(
        "Account: {:.2} cash, {:.2} equity, {} positions",
        account.cash,
        account.equity,
        account.positions.len()
    );

    autopilot.start().await;

    // 9. Main loop with graceful shutdown (SIGINT + SIGTERM)
    let cycle_interval = chrono::Duration::from_std(config.cycle_interval())?;
    let mut evolution = time::interval(config.evolution_interval());
    evolution.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    evolution.tick().await;

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut in_flight: Option<JoinHandle<()>> = Some(spawn_cycle(autopilot.clone()));
    let mut timer = CycleTimer::new(market, cycle_interval, Utc::now());

    loop {
        tokio::select! {
            _ = time::sleep_until(timer.deadline()) => {
                in_flight = Some(spawn_cycle(autopilot.clone()));
                let delay = timer.rearm(Utc::now());
                tracing::debug!(seconds = delay.as_secs(), "Next cycle scheduled");
            }
            _ = evolution.tick() => {
                if let Some(report) = autopilot.run_evolution(Utc::now()).await {
                    tracing::info!(
                        trades = report.evaluated_trades,
                        changes = report.changes.len(),
                        healthy = report.health.healthy,
                        "Evolution pass complete"
                    );
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                autopilot.stop().await;

                // Let a running cycle finish its exits
                if let Some(handle) = in_flight.take() {
                    if let Err(e) = handle.await {
                        tracing::error!("Trading cycle task failed: {}", e);
                    }
                }

                autopilot.context().metrics.lock().log_metrics();
                let metrics_json = autopilot.context().metrics.lock().to_json();
                store.save_metrics(&metrics_json).await.ok();
                break;
            }
        }
    }

    tracing::info!("Trading agent shut down.");
    Ok(())
}

fn spawn_cycle(autopilot: Arc<Autopilot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let now = Utc::now();
        match autopilot.run_cycle(now).await {
            Some(report) => tracing::info!(
                market = %autopilot.market(),
                regime = %report.regime,
                session = report.session.as_str(),
                transitions = report.transitions.len(),
                "Cycle complete"
            ),
            None => tracing::debug!("Cycle not run"),
        }
    })
}
