//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gate_core::{GateError, PaymentEvent, UserId, Visual};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub transaction_id: Option<String>,
    pub credential: Option<String>,
    pub visual: Option<Visual>,
    /// Advisory text when the provider response carried no usable credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub user_id: i64,
    pub state: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a Pix charge for a user
pub async fn create_charge(
    State(state): State<AppState>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Json<ChargeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let outcome = state
        .flow
        .initiate(UserId(payload.user_id))
        .await
        .map_err(|e| {
            tracing::error!(user_id = payload.user_id, error = %e, "charge initiation failed");
            let status = match e {
                GateError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.user_message().into(),
                    code: "CHARGE_ERROR".into(),
                }),
            )
        })?;

    let message = outcome.credential.is_none().then(|| {
        "The provider did not return a recognizable Pix code. Please try again.".to_string()
    });

    Ok(Json(ChargeResponse {
        transaction_id: outcome.provider_tx_id,
        credential: outcome.credential,
        visual: outcome.visual,
        message,
    }))
}

/// Entitlement state for a user
pub async fn access_status(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<AccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entitlement = state.ledger.entitlement(UserId(user_id)).map_err(|e| {
        tracing::error!(user_id, error = %e, "entitlement lookup failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.user_message().into(),
                code: "ACCESS_ERROR".into(),
            }),
        )
    })?;

    Ok(Json(AccessResponse {
        user_id,
        state: entitlement.state.as_str().into(),
        expires_at: entitlement.expires_at,
    }))
}

/// InvictusPay postback endpoint
///
/// The body is taken as text and parsed leniently: the provider's retry
/// policy is uncontrolled, so this endpoint acknowledges every delivery,
/// malformed, duplicated, or unmatched alike.
pub async fn invictus_postback(State(state): State<AppState>, body: String) -> Json<AckResponse> {
    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    tracing::info!(payload = %payload, "invictus postback received");

    let event = PaymentEvent::from_value(&payload);
    match state.reconciler.apply(event).await {
        Ok(outcome) => tracing::info!(?outcome, "postback reconciled"),
        Err(e) => tracing::error!(error = %e, "postback reconciliation failed"),
    }

    Json(AckResponse { ok: true })
}
