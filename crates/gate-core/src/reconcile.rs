//! Payment Reconciliation
//!
//! Correlates an out-of-band provider notification (possibly duplicated,
//! possibly malformed, of unverified origin) with the originating charge, and
//! applies it to the ledger at most once per event. The inbound channel must
//! always be acknowledged: the provider's retry policy is uncontrolled, so
//! nothing here is allowed to make it treat an event as undeliverable.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::Result;
use crate::extract::tx_id_in;
use crate::ledger::{LedgerStore, TxStatus, UserId};
use crate::notify::Notifier;

/// Key of the correlation token set at charge-creation time, carried back
/// by the provider under `tracking`.
pub const TRACKING_USER_KEY: &str = "user_id";

/// Keys the provider is known to use for the payment status.
const STATUS_KEYS: &[&str] = &["status", "payment_status", "state"];

/// A notification event distilled from an inbound postback body
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentEvent {
    pub tx_id: Option<String>,
    /// Canonical lowercase status token, if one was found
    pub status: Option<String>,
    /// Out-of-band correlation token, used when the tx id resolves no user
    pub tracking_user: Option<UserId>,
}

impl PaymentEvent {
    /// Tolerant field guess over an arbitrary postback body.
    ///
    /// The provider sometimes nests the interesting fields one level under
    /// `data`; when no top-level tx id exists, both id and status are
    /// re-read there (the nested status wins in that case).
    pub fn from_value(payload: &Value) -> Self {
        let mut tx_id = tx_id_in(payload);
        let mut status = status_in(payload);

        if tx_id.is_none() {
            if let Some(data) = payload.get("data").filter(|d| d.is_object()) {
                tx_id = tx_id_in(data);
                status = status_in(data);
            }
        }

        Self {
            tx_id,
            status,
            tracking_user: tracking_user(payload),
        }
    }
}

fn status_in(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    STATUS_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .find(|s| !s.is_empty())
}

fn tracking_user(payload: &Value) -> Option<UserId> {
    let tracking = payload
        .get("tracking")
        .or_else(|| payload.get("data").and_then(|d| d.get("tracking")))?;
    match tracking.get(TRACKING_USER_KEY)? {
        Value::Number(n) => n.as_i64().map(UserId),
        Value::String(s) => s.parse().ok().map(UserId),
        _ => None,
    }
}

/// What applying a notification actually did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Payment approved; the entitlement was (re)activated
    Activated {
        user_id: UserId,
        expires_at: DateTime<Utc>,
    },

    /// Status written through; not an approval
    Recorded { tx_id: String, status: TxStatus },

    /// Approved payment with no resolvable user. Logged, not retried.
    Unmatched { tx_id: String },

    /// Nothing actionable in the payload
    Ignored,
}

/// Applies provider notifications to the ledger
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    grant: Duration,
    invite_link: Option<String>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        grant: Duration,
    ) -> Self {
        Self {
            ledger,
            notifier,
            clock,
            grant,
            invite_link: None,
        }
    }

    /// Include an access link in confirmation messages
    pub fn with_invite_link(mut self, link: impl Into<String>) -> Self {
        self.invite_link = Some(link.into());
        self
    }

    /// Apply one notification event.
    ///
    /// Idempotent under re-delivery: re-activating an already-active user
    /// overwrites the expiry with `now + grant`, one grant unit from the
    /// latest confirmation, never a sum.
    pub async fn apply(&self, event: PaymentEvent) -> Result<Outcome> {
        let Some(tx_id) = event.tx_id else {
            tracing::warn!("postback without a recognizable transaction id");
            return Ok(Outcome::Ignored);
        };

        // Write the status through unconditionally, approvals and terminal
        // rejections alike, so the ledger keeps the full audit trail.
        let status = TxStatus::new(event.status.as_deref().unwrap_or(""));
        let rows = self.ledger.set_charge_status(&tx_id, &status)?;
        tracing::info!(tx_id = %tx_id, status = %status, rows, "provider status recorded");

        if !status.is_approved() {
            return Ok(Outcome::Recorded { tx_id, status });
        }

        let user_id = match self.ledger.user_for_charge(&tx_id)? {
            Some(user_id) => user_id,
            None => match event.tracking_user {
                Some(user_id) => {
                    tracing::info!(tx_id = %tx_id, user_id = %user_id, "user resolved via tracking token");
                    user_id
                }
                None => {
                    tracing::warn!(tx_id = %tx_id, "approved payment matches no known user");
                    return Ok(Outcome::Unmatched { tx_id });
                }
            },
        };

        let expires_at = self.clock.now() + self.grant;
        self.ledger.activate(user_id, expires_at)?;
        tracing::info!(user_id = %user_id, expires_at = %expires_at, "entitlement activated");

        // The entitlement write is the source of truth; delivery is
        // best-effort and never rolled back.
        let text = self.confirmation_text(expires_at);
        if let Err(e) = self.notifier.notify(user_id, &text, None).await {
            tracing::warn!(user_id = %user_id, error = %e, "confirmation message failed");
        }

        Ok(Outcome::Activated {
            user_id,
            expires_at,
        })
    }

    fn confirmation_text(&self, expires_at: DateTime<Utc>) -> String {
        match &self.invite_link {
            Some(link) => format!(
                "✅ Payment confirmed!\n\nHere is your VIP access:\n{link}\n\n📅 Valid until: {} (UTC)",
                expires_at.date_naive()
            ),
            None => format!(
                "✅ Payment confirmed!\n\n📅 Access valid until: {} (UTC)",
                expires_at.date_naive()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::GateError;
    use crate::extract::Visual;
    use crate::ledger::{MemoryLedgerStore, NewCharge};
    use crate::notify::MemoryNotifier;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn pending_charge(ledger: &MemoryLedgerStore, user: i64, tx_id: &str) {
        ledger
            .record_charge(NewCharge {
                user_id: UserId(user),
                provider_tx_id: Some(tx_id.into()),
                status: TxStatus::pending(),
                raw_response: "{}".into(),
            })
            .unwrap();
    }

    fn reconciler(
        ledger: Arc<MemoryLedgerStore>,
        notifier: Arc<MemoryNotifier>,
        clock: Arc<ManualClock>,
    ) -> Reconciler {
        Reconciler::new(ledger, notifier, clock, Duration::days(30))
    }

    #[tokio::test]
    async fn test_approval_activates_with_grant_duration() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(start()));
        pending_charge(&ledger, 1, "tx-1");

        let engine = reconciler(ledger.clone(), notifier.clone(), clock);
        let event = PaymentEvent::from_value(&json!({"id": "tx-1", "status": "paid"}));
        let outcome = engine.apply(event).await.unwrap();

        let expected = start() + Duration::days(30);
        assert_eq!(
            outcome,
            Outcome::Activated {
                user_id: UserId(1),
                expires_at: expected
            }
        );

        let ent = ledger.entitlement(UserId(1)).unwrap();
        assert!(ent.is_active());
        assert_eq!(ent.expires_at, Some(expected));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_overwrites_expiry() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(start()));
        pending_charge(&ledger, 1, "tx-1");

        let engine = reconciler(ledger.clone(), notifier.clone(), clock.clone());
        let event = PaymentEvent::from_value(&json!({"id": "tx-1", "status": "paid"}));

        engine.apply(event.clone()).await.unwrap();
        clock.advance(Duration::hours(1));
        engine.apply(event).await.unwrap();

        // The second delivery wins; durations never stack
        let ent = ledger.entitlement(UserId(1)).unwrap();
        assert_eq!(
            ent.expires_at,
            Some(start() + Duration::hours(1) + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn test_non_approving_status_records_only() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(start()));
        pending_charge(&ledger, 1, "tx-1");

        let engine = reconciler(ledger.clone(), notifier.clone(), clock);
        let event = PaymentEvent::from_value(&json!({"id": "tx-1", "status": "refused"}));
        let outcome = engine.apply(event).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Recorded {
                tx_id: "tx-1".into(),
                status: TxStatus::new("refused")
            }
        );
        assert!(!ledger.entitlement(UserId(1)).unwrap().is_active());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_tracking_token_fallback() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(start()));

        // No charge row exists for this tx id at all
        let engine = reconciler(ledger.clone(), notifier.clone(), clock);
        let event = PaymentEvent::from_value(&json!({
            "id": "tx-unseen",
            "status": "approved",
            "tracking": {"user_id": 77},
        }));
        let outcome = engine.apply(event).await.unwrap();

        assert!(matches!(
            outcome,
            Outcome::Activated {
                user_id: UserId(77),
                ..
            }
        ));
        assert!(ledger.entitlement(UserId(77)).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_unmatched_approval_is_noop() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(start()));

        let engine = reconciler(ledger.clone(), notifier.clone(), clock);
        let event = PaymentEvent::from_value(&json!({"id": "tx-unseen", "status": "paid"}));
        let outcome = engine.apply(event).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Unmatched {
                tx_id: "tx-unseen".into()
            }
        );
        assert!(notifier.sent().is_empty());
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(
            &self,
            _user_id: UserId,
            _text: &str,
            _image: Option<&Visual>,
        ) -> Result<()> {
            Err(GateError::Notify("sink down".into()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_roll_back() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        pending_charge(&ledger, 1, "tx-1");

        let engine = Reconciler::new(
            ledger.clone(),
            Arc::new(FailingNotifier),
            clock,
            Duration::days(30),
        );
        let event = PaymentEvent::from_value(&json!({"id": "tx-1", "status": "paid"}));
        let outcome = engine.apply(event).await.unwrap();

        assert!(matches!(outcome, Outcome::Activated { .. }));
        assert!(ledger.entitlement(UserId(1)).unwrap().is_active());
    }

    #[test]
    fn test_event_from_top_level() {
        let event = PaymentEvent::from_value(&json!({
            "id": "tx-1",
            "payment_status": "PAID",
        }));
        assert_eq!(event.tx_id.as_deref(), Some("tx-1"));
        assert_eq!(event.status.as_deref(), Some("paid"));
    }

    #[test]
    fn test_event_from_data_nested() {
        let event = PaymentEvent::from_value(&json!({
            "event": "transaction.updated",
            "data": {"uuid": "tx-2", "state": "Confirmed"},
        }));
        assert_eq!(event.tx_id.as_deref(), Some("tx-2"));
        assert_eq!(event.status.as_deref(), Some("confirmed"));
    }

    #[test]
    fn test_nested_status_wins_when_id_is_nested() {
        let event = PaymentEvent::from_value(&json!({
            "status": "processing",
            "data": {"id": 42, "status": "paid"},
        }));
        assert_eq!(event.tx_id.as_deref(), Some("42"));
        assert_eq!(event.status.as_deref(), Some("paid"));
    }

    #[test]
    fn test_event_tracking_user_as_string() {
        let event = PaymentEvent::from_value(&json!({
            "data": {"id": "tx-3", "status": "paid", "tracking": {"user_id": "123"}},
        }));
        assert_eq!(event.tracking_user, Some(UserId(123)));
    }

    #[test]
    fn test_event_empty_body() {
        let event = PaymentEvent::from_value(&json!({}));
        assert_eq!(event, PaymentEvent::default());
    }
}
