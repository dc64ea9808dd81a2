//! # gate-core
//!
//! Entitlement ledger, payment reconciliation, and payload extraction for
//! pix-gate.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         gate-core                            │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────────────┐  │
//! │  │ ChargeFlow │───│ LedgerStore │───│ Reconciler/Sweeper  │  │
//! │  └────────────┘   └─────────────┘   └─────────────────────┘  │
//! │        │                                      │              │
//! │  ChargeProvider (trait)                 Notifier (trait)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A charge is created through the `ChargeProvider` capability, its response
//! is mined by the extractor for a Pix credential and a QR image, and a
//! pending row lands in the ledger. Confirmation arrives out of band: the
//! reconciler correlates a provider postback back to the originating user and
//! activates their entitlement, and the sweeper demotes entitlements past
//! their expiry. The `ChargeProvider` and `Notifier` traits keep the payment
//! provider and the chat transport swappable; `gate-runtime` supplies the
//! real ones.

pub mod charge;
pub mod clock;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod notify;
pub mod reconcile;
pub mod sqlite;
pub mod sweeper;

pub use charge::{ChargeFlow, ChargeOutcome, ChargeProvider, ProviderResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, Result};
pub use extract::{Extracted, Visual, extract, provider_tx_id};
pub use ledger::{
    AccessState, ActiveEntitlement, Entitlement, LedgerStore, MemoryLedgerStore, NewCharge,
    Transaction, TxStatus, UserId,
};
pub use notify::{MemoryNotifier, Notifier, SentMessage};
pub use reconcile::{Outcome, PaymentEvent, Reconciler, TRACKING_USER_KEY};
pub use sqlite::SqliteLedgerStore;
pub use sweeper::Sweeper;
