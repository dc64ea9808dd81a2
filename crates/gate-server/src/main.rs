//! pix-gate HTTP Server
//!
//! Axum-based server exposing the charge, access-status, and payment
//! postback endpoints, with the expiration sweeper running alongside.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gate_core::{
    ChargeFlow, LedgerStore, Reconciler, SqliteLedgerStore, Sweeper, SystemClock,
};
use gate_runtime::{InvictusClient, TelegramNotifier};

use crate::handlers::{access_status, create_charge, health_check, invictus_postback};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Ledger store
    let db_path = std::env::var("GATE_DB_PATH").unwrap_or_else(|_| "gate.sqlite3".into());
    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::open(&db_path)?);
    tracing::info!("✓ Ledger store ready at {}", db_path);

    // External capabilities
    let provider = Arc::new(InvictusClient::from_env()?);
    let notifier = Arc::new(TelegramNotifier::from_env()?);
    tracing::info!("✓ Payment provider and notifier configured");

    let clock = Arc::new(SystemClock);

    let grant_days: i64 = std::env::var("GRANT_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let sweep_secs: u64 = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(600);

    // Reconciliation engine
    let mut reconciler = Reconciler::new(
        ledger.clone(),
        notifier.clone(),
        clock.clone(),
        chrono::Duration::days(grant_days),
    );
    if let Ok(link) = std::env::var("GROUP_INVITE_LINK") {
        reconciler = reconciler.with_invite_link(link);
    }

    // Expiration sweeper
    let sweeper = Sweeper::new(
        ledger.clone(),
        notifier.clone(),
        clock,
        std::time::Duration::from_secs(sweep_secs),
    );
    tokio::spawn(sweeper.run());
    tracing::info!("✓ Expiration sweeper running every {}s", sweep_secs);

    // Charge initiation flow
    let flow = ChargeFlow::new(provider, ledger.clone());

    // Build application state
    let state = AppState {
        ledger,
        flow: Arc::new(flow),
        reconciler: Arc::new(reconciler),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/charge", post(create_charge))
        .route("/api/access/{user_id}", get(access_status))
        .route("/invictus/postback", post(invictus_postback))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:10000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 pix-gate server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                - Health check");
    tracing::info!("  POST /api/charge            - Create a Pix charge");
    tracing::info!("  GET  /api/access/:user_id   - Entitlement status");
    tracing::info!("  POST /invictus/postback     - Provider notifications");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
