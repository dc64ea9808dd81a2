//! Application State

use std::sync::Arc;

use gate_core::{ChargeFlow, LedgerStore, Reconciler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Entitlement and charge ledger
    pub ledger: Arc<dyn LedgerStore>,

    /// Charge initiation flow
    pub flow: Arc<ChargeFlow>,

    /// Applies inbound payment notifications
    pub reconciler: Arc<Reconciler>,
}
