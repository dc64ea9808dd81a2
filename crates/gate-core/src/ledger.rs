//! Entitlement and Charge Ledger
//!
//! The ledger is the single shared mutable resource: one entitlement row per
//! user, plus an append-only record of every charge attempt. All mutations
//! are single-row upserts or inserts; per provider transaction id, status
//! updates are ordered by write time only (last write wins).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Statuses the provider is known to use for "paid". Anything else,
/// including empty or unrecognized tokens, is non-approving.
pub const APPROVED_STATUSES: &[&str] = &[
    "approved",
    "paid",
    "confirmed",
    "completed",
    "success",
    "aprovado",
    "pago",
];

/// Opaque external user identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entitlement state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessState {
    #[default]
    Inactive,
    Active,
}

impl AccessState {
    pub fn as_str(&self) -> &str {
        match self {
            AccessState::Inactive => "inactive",
            AccessState::Active => "active",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => AccessState::Active,
            _ => AccessState::Inactive,
        }
    }
}

/// A user's time-boxed access grant
///
/// Active entitlements always carry an expiry; inactive ones never do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: UserId,
    pub state: AccessState,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// The implicit default for users the ledger has never seen
    pub fn inactive(user_id: UserId) -> Self {
        Self {
            user_id,
            state: AccessState::Inactive,
            expires_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AccessState::Active
    }
}

/// Charge status token, canonical lowercase
///
/// The provider's status vocabulary is open-ended, so this is a normalized
/// string rather than a closed enum; only the approved subset is fixed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus(String);

impl TxStatus {
    /// Normalize a raw provider token. Empty tokens become `unknown`.
    pub fn new(raw: &str) -> Self {
        let canonical = raw.trim().to_lowercase();
        if canonical.is_empty() {
            Self::unknown()
        } else {
            Self(canonical)
        }
    }

    pub fn pending() -> Self {
        Self("pending".into())
    }

    pub fn unknown() -> Self {
        Self("unknown".into())
    }

    /// Membership in the closed approved-status vocabulary
    pub fn is_approved(&self) -> bool {
        APPROVED_STATUSES.contains(&self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded charge attempt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identity, monotonically assigned, never reused
    pub local_id: i64,

    /// Owning user
    pub user_id: UserId,

    /// Provider-assigned id; absent when extraction found none
    pub provider_tx_id: Option<String>,

    pub status: TxStatus,

    pub created_at: DateTime<Utc>,

    /// Full provider response, retained for forensic inspection
    pub raw_response: String,
}

/// Input for recording a new charge attempt
#[derive(Clone, Debug)]
pub struct NewCharge {
    pub user_id: UserId,
    pub provider_tx_id: Option<String>,
    pub status: TxStatus,
    pub raw_response: String,
}

/// Row returned by [`LedgerStore::active_entitlements`]
///
/// The expiry is deliberately left as stored text so one corrupt row cannot
/// fail the whole listing; the sweeper owns interpretation.
#[derive(Clone, Debug)]
pub struct ActiveEntitlement {
    pub user_id: UserId,
    pub expires_at: String,
}

/// Parse a stored expiry timestamp (RFC 3339).
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| GateError::BadTimestamp(raw.to_string()))
}

/// Ledger storage trait
pub trait LedgerStore: Send + Sync {
    /// Get a user's entitlement. Unknown users are implicitly inactive;
    /// nothing is inserted.
    fn entitlement(&self, user_id: UserId) -> Result<Entitlement>;

    /// Activate an entitlement until `expires_at`. Idempotent under
    /// re-delivery: the expiry is overwritten, durations never stack.
    fn activate(&self, user_id: UserId, expires_at: DateTime<Utc>) -> Result<()>;

    /// Demote an entitlement to inactive, clearing its expiry
    fn deactivate(&self, user_id: UserId) -> Result<()>;

    /// Append a charge attempt, returning its local id
    fn record_charge(&self, charge: NewCharge) -> Result<i64>;

    /// Write a provider status through to every row carrying this provider
    /// id, returning how many rows changed
    fn set_charge_status(&self, provider_tx_id: &str, status: &TxStatus) -> Result<usize>;

    /// Find the user who owns a provider transaction id. Retried charge
    /// creation can leave several rows with the same provider id; the
    /// newest row (highest local id) is authoritative.
    fn user_for_charge(&self, provider_tx_id: &str) -> Result<Option<UserId>>;

    /// List every active entitlement with its stored expiry text
    fn active_entitlements(&self) -> Result<Vec<ActiveEntitlement>>;
}

/// In-memory ledger store (for development and tests)
#[derive(Default)]
pub struct MemoryLedgerStore {
    entitlements: RwLock<HashMap<UserId, Entitlement>>,
    charges: RwLock<Vec<Transaction>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn entitlement(&self, user_id: UserId) -> Result<Entitlement> {
        let entitlements = self.entitlements.read().unwrap();
        Ok(entitlements
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Entitlement::inactive(user_id)))
    }

    fn activate(&self, user_id: UserId, expires_at: DateTime<Utc>) -> Result<()> {
        let mut entitlements = self.entitlements.write().unwrap();
        entitlements.insert(
            user_id,
            Entitlement {
                user_id,
                state: AccessState::Active,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    fn deactivate(&self, user_id: UserId) -> Result<()> {
        let mut entitlements = self.entitlements.write().unwrap();
        entitlements.insert(user_id, Entitlement::inactive(user_id));
        Ok(())
    }

    fn record_charge(&self, charge: NewCharge) -> Result<i64> {
        let mut charges = self.charges.write().unwrap();
        let local_id = charges.len() as i64 + 1;
        charges.push(Transaction {
            local_id,
            user_id: charge.user_id,
            provider_tx_id: charge.provider_tx_id,
            status: charge.status,
            created_at: Utc::now(),
            raw_response: charge.raw_response,
        });
        Ok(local_id)
    }

    fn set_charge_status(&self, provider_tx_id: &str, status: &TxStatus) -> Result<usize> {
        let mut charges = self.charges.write().unwrap();
        let mut updated = 0;
        for tx in charges
            .iter_mut()
            .filter(|tx| tx.provider_tx_id.as_deref() == Some(provider_tx_id))
        {
            tx.status = status.clone();
            updated += 1;
        }
        Ok(updated)
    }

    fn user_for_charge(&self, provider_tx_id: &str) -> Result<Option<UserId>> {
        let charges = self.charges.read().unwrap();
        Ok(charges
            .iter()
            .rev()
            .find(|tx| tx.provider_tx_id.as_deref() == Some(provider_tx_id))
            .map(|tx| tx.user_id))
    }

    fn active_entitlements(&self) -> Result<Vec<ActiveEntitlement>> {
        let entitlements = self.entitlements.read().unwrap();
        Ok(entitlements
            .values()
            .filter(|e| e.is_active())
            .filter_map(|e| {
                e.expires_at.map(|at| ActiveEntitlement {
                    user_id: e.user_id,
                    expires_at: at.to_rfc3339(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unknown_user_defaults_inactive() {
        let store = MemoryLedgerStore::new();
        let ent = store.entitlement(UserId(1)).unwrap();
        assert_eq!(ent.state, AccessState::Inactive);
        assert_eq!(ent.expires_at, None);
    }

    #[test]
    fn test_activate_overwrites_expiry() {
        let store = MemoryLedgerStore::new();
        let first = Utc::now() + Duration::days(30);
        let second = first + Duration::hours(1);

        store.activate(UserId(1), first).unwrap();
        store.activate(UserId(1), second).unwrap();

        let ent = store.entitlement(UserId(1)).unwrap();
        assert!(ent.is_active());
        assert_eq!(ent.expires_at, Some(second));
    }

    #[test]
    fn test_deactivate_clears_expiry() {
        let store = MemoryLedgerStore::new();
        store.activate(UserId(1), Utc::now()).unwrap();
        store.deactivate(UserId(1)).unwrap();

        let ent = store.entitlement(UserId(1)).unwrap();
        assert_eq!(ent.state, AccessState::Inactive);
        assert_eq!(ent.expires_at, None);
    }

    #[test]
    fn test_newest_charge_row_wins() {
        let store = MemoryLedgerStore::new();
        for user in [UserId(1), UserId(2)] {
            store
                .record_charge(NewCharge {
                    user_id: user,
                    provider_tx_id: Some("tx-1".into()),
                    status: TxStatus::pending(),
                    raw_response: "{}".into(),
                })
                .unwrap();
        }

        assert_eq!(store.user_for_charge("tx-1").unwrap(), Some(UserId(2)));
    }

    #[test]
    fn test_status_write_through_updates_all_rows() {
        let store = MemoryLedgerStore::new();
        for _ in 0..2 {
            store
                .record_charge(NewCharge {
                    user_id: UserId(1),
                    provider_tx_id: Some("tx-1".into()),
                    status: TxStatus::pending(),
                    raw_response: "{}".into(),
                })
                .unwrap();
        }

        let updated = store
            .set_charge_status("tx-1", &TxStatus::new("refused"))
            .unwrap();
        assert_eq!(updated, 2);
    }

    #[test]
    fn test_active_entitlements_lists_only_active() {
        let store = MemoryLedgerStore::new();
        store.activate(UserId(1), Utc::now()).unwrap();
        store.activate(UserId(2), Utc::now()).unwrap();
        store.deactivate(UserId(2)).unwrap();

        let active = store.active_entitlements().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, UserId(1));
    }

    #[test]
    fn test_approved_vocabulary() {
        for token in ["paid", "Approved", "  PAGO  ", "confirmed"] {
            assert!(TxStatus::new(token).is_approved(), "{token}");
        }
        for token in ["refused", "chargeback", "pending", ""] {
            assert!(!TxStatus::new(token).is_approved(), "{token:?}");
        }
    }

    #[test]
    fn test_empty_status_is_unknown() {
        assert_eq!(TxStatus::new("  "), TxStatus::unknown());
    }

    #[test]
    fn test_parse_expiry_rejects_garbage() {
        assert!(matches!(
            parse_expiry("not-a-date"),
            Err(GateError::BadTimestamp(_))
        ));
        assert!(parse_expiry("2025-06-01T00:00:00+00:00").is_ok());
    }
}
