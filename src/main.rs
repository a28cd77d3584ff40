//! Pledgemarket - Prediction-Market Accountability Service
//!
//! Users declare goals; a roster of LLM-backed agents debates each market
//! event in parallel, quotes spreads, and trades binary success tokens.
//! The discovered price is the market's belief that the goal will be met.

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pledgemarket_backend::{
    api::{agents, goals, AppState},
    market::MarketEngine,
    models::Config,
    oracle::OpenRouterOracle,
    store::{MarketStore, RedisBackend},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;

    info!("🚀 Pledgemarket starting");
    info!(
        model = %config.oracle_model,
        roster = config.num_agents,
        "market engine configuration"
    );

    // No total request timeout: reasoning calls run as long as they need;
    // a failed call just drops that agent from the round.
    let http_client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let backend = RedisBackend::connect(&config)
        .await
        .context("store connection failed")?;
    let store = MarketStore::new(Arc::new(backend));
    info!(host = %config.store_host, port = config.store_port, "💾 store connected");

    let oracle = Arc::new(OpenRouterOracle::new(http_client, &config));
    let engine = Arc::new(MarketEngine::new(store, oracle, config.num_agents));
    let state = AppState::new(engine);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/goals", post(goals::create_goal).get(goals::list_goals))
        .route("/goals/:id", get(goals::get_goal))
        .route(
            "/goals/:id/updates",
            post(goals::create_update).get(goals::list_updates),
        )
        .route("/goals/:id/resolve", patch(goals::resolve_goal))
        .route(
            "/goals/:id/updates/:uid/market-analysis",
            get(goals::market_analysis),
        )
        .route("/goals/:id/trades", get(goals::list_goal_trades))
        .route("/agents", post(agents::create_agent).get(agents::list_agents))
        .route("/agents/:id", get(agents::get_agent))
        .route("/agents/:id/history", get(agents::agent_history))
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(
            pledgemarket_backend::middleware::logging::request_logging,
        ))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "service": "pledgemarket",
        "status": "ok",
    }))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "pledgemarket=debug,pledgemarket_backend=debug,tower_http=debug".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
