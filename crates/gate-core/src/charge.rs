//! Charge Initiation
//!
//! Turns a user request into a pending ledger row and a deliverable Pix
//! credential. The provider call is the only step allowed to fail the
//! request; once it returns, a row is recorded even when extraction finds
//! nothing, so a later postback for this charge can still be inspected
//! against the retained raw response.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::extract::{self, Visual};
use crate::ledger::{LedgerStore, NewCharge, TxStatus, UserId};

/// A charge-creation response, structured and raw
///
/// `body` is `Value::Null` when the provider sent something unparseable;
/// the raw text still feeds the extractor's fallback scan.
#[derive(Clone, Debug)]
pub struct ProviderResponse {
    pub body: Value,
    pub raw: String,
}

/// Charge-creation capability of the payment provider
#[async_trait]
pub trait ChargeProvider: Send + Sync {
    /// Create a fixed-amount Pix charge correlated to `user_id`
    async fn create_charge(&self, user_id: UserId) -> Result<ProviderResponse>;
}

/// What charge initiation produced for delivery
#[derive(Clone, Debug)]
pub struct ChargeOutcome {
    pub local_id: i64,
    pub provider_tx_id: Option<String>,
    pub credential: Option<String>,
    pub visual: Option<Visual>,
}

/// Orchestrates provider, extractor, and ledger
pub struct ChargeFlow {
    provider: Arc<dyn ChargeProvider>,
    ledger: Arc<dyn LedgerStore>,
}

impl ChargeFlow {
    pub fn new(provider: Arc<dyn ChargeProvider>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { provider, ledger }
    }

    /// Create a charge for `user_id` and record it as pending.
    ///
    /// Provider failures abort before any row is written. An extraction
    /// miss is not a failure: the row is recorded (possibly without a
    /// provider tx id) and the outcome carries no credential.
    pub async fn initiate(&self, user_id: UserId) -> Result<ChargeOutcome> {
        let response = self.provider.create_charge(user_id).await?;

        let provider_tx_id = extract::provider_tx_id(&response.body);
        let found = extract::extract(&response.body, &response.raw);

        let local_id = self.ledger.record_charge(NewCharge {
            user_id,
            provider_tx_id: provider_tx_id.clone(),
            status: TxStatus::pending(),
            raw_response: response.raw,
        })?;

        if found.credential.is_none() {
            tracing::warn!(
                user_id = %user_id,
                local_id,
                "provider response carried no recognizable Pix credential"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                local_id,
                provider_tx_id = ?provider_tx_id,
                "charge recorded as pending"
            );
        }

        Ok(ChargeOutcome {
            local_id,
            provider_tx_id,
            credential: found.credential,
            visual: found.visual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::ledger::MemoryLedgerStore;
    use serde_json::json;

    const PIX_CODE: &str = "00020126580014BR.GOV.BCB.PIX0136123e4567-e12b-12d1-a456-4266554400005204000053039865802BR5913Fulano de Tal6008BRASILIA62070503***63041D3D";

    struct StubProvider {
        body: Value,
    }

    #[async_trait]
    impl ChargeProvider for StubProvider {
        async fn create_charge(&self, _user_id: UserId) -> Result<ProviderResponse> {
            Ok(ProviderResponse {
                body: self.body.clone(),
                raw: self.body.to_string(),
            })
        }
    }

    struct DownProvider;

    #[async_trait]
    impl ChargeProvider for DownProvider {
        async fn create_charge(&self, _user_id: UserId) -> Result<ProviderResponse> {
            Err(GateError::ProviderUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_initiate_records_pending_row() {
        let provider = Arc::new(StubProvider {
            body: json!({"id": "tx-1", "pix": {"code": PIX_CODE}}),
        });
        let ledger = Arc::new(MemoryLedgerStore::new());
        let flow = ChargeFlow::new(provider, ledger.clone());

        let outcome = flow.initiate(UserId(42)).await.unwrap();
        assert_eq!(outcome.local_id, 1);
        assert_eq!(outcome.provider_tx_id.as_deref(), Some("tx-1"));
        assert_eq!(outcome.credential.as_deref(), Some(PIX_CODE));

        // The row is findable by its provider id
        assert_eq!(ledger.user_for_charge("tx-1").unwrap(), Some(UserId(42)));
    }

    #[tokio::test]
    async fn test_extraction_miss_still_records() {
        let provider = Arc::new(StubProvider {
            body: json!({"surprise": true}),
        });
        let ledger = Arc::new(MemoryLedgerStore::new());
        let flow = ChargeFlow::new(provider, ledger);

        let outcome = flow.initiate(UserId(42)).await.unwrap();
        assert_eq!(outcome.local_id, 1);
        assert_eq!(outcome.provider_tx_id, None);
        assert_eq!(outcome.credential, None);
        assert_eq!(outcome.visual, None);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_before_writing() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let flow = ChargeFlow::new(Arc::new(DownProvider), ledger.clone());

        let err = flow.initiate(UserId(42)).await.unwrap_err();
        assert!(matches!(err, GateError::ProviderUnavailable(_)));

        // Nothing was recorded, so a later charge starts the ledger fresh
        let provider = Arc::new(StubProvider {
            body: json!({"id": "tx-9"}),
        });
        let retry = ChargeFlow::new(provider, ledger);
        let outcome = retry.initiate(UserId(42)).await.unwrap();
        assert_eq!(outcome.local_id, 1);
    }
}
