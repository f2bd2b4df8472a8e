mod persistence;
mod ports;

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use broker::{PaperBroker, RestBrokerClient};
use clock::SystemClock;
use common::{ChatPort, Config, TradingMode};
use coordinator::Coordinator;
use notify::TelegramNotifier;
use risk::{RiskGate, RiskLimits};

use crate::persistence::{spawn_active_trades_flusher, SqliteEventBus};
use crate::ports::{IstTradingHours, StaticSectorMap};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "trade fabric starting");

    let connect_options: SqliteConnectOptions = cfg
        .database_url
        .parse()
        .unwrap_or_else(|e| panic!("invalid DATABASE_URL {:?}: {e}", cfg.database_url))
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("database migration failed: {e}"));
    info!("database ready");

    let clock = Arc::new(SystemClock);
    let sector_map = Arc::new(StaticSectorMap::new());
    let trading_hours = Arc::new(IstTradingHours);

    let risk_gate = Arc::new(
        RiskGate::new(
            RiskLimits::from(&cfg),
            cfg.initial_portfolio_value,
            sector_map.clone(),
            clock.clone(),
        )
        .unwrap_or_else(|e| panic!("invalid risk limits: {e}")),
    );

    let chat: Option<Arc<dyn ChatPort>> = cfg
        .chat_bot_token
        .clone()
        .map(|token| Arc::new(TelegramNotifier::new(token)) as Arc<dyn ChatPort>);
    let event_bus = Arc::new(SqliteEventBus::new(db.clone(), chat, cfg.chat_channel.clone()));

    let (coordinator, handle, order_rx, verification_results_tx) = Coordinator::new(
        cfg.clone(),
        clock.clone(),
        risk_gate.clone(),
        trading_hours,
        event_bus,
    );

    let broker_client: Arc<dyn common::BrokerPort> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("live trading mode — using RestBrokerClient");
            let base_url = cfg
                .broker_base_url
                .clone()
                .unwrap_or_else(|| panic!("BROKER_BASE_URL is required in live trading mode"));
            let api_key = cfg
                .broker_api_key
                .clone()
                .unwrap_or_else(|| panic!("BROKER_API_KEY is required in live trading mode"));
            let api_secret = cfg
                .broker_api_secret
                .clone()
                .unwrap_or_else(|| panic!("BROKER_API_SECRET is required in live trading mode"));
            Arc::new(RestBrokerClient::new(base_url, api_key, api_secret))
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "paper trading mode — using PaperBroker");
            Arc::new(PaperBroker::new(cfg.paper_slippage_bps))
        }
    };

    let verifier = verifier::Verifier::new(broker_client, clock.clone(), cfg.clone(), verification_results_tx);

    spawn_active_trades_flusher(db.clone(), handle.clone(), Duration::from_secs(5));
    tokio::spawn(coordinator.run());
    tokio::spawn(verifier.clone().run(order_rx));

    info!("all subsystems started, waiting for shutdown signal");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
    info!("shutdown signal received, draining in-flight orders");
    verifier.shutdown().await;
    info!("shutdown complete");

    let _ = handle;
}
