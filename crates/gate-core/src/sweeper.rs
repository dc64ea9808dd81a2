//! Expiration Sweeper
//!
//! Periodic demotion of entitlements past their expiry, with a renewal
//! reminder per demoted user. Failures are isolated per row: a corrupt
//! stored timestamp or a failed delivery skips that row and the cycle
//! continues.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::error::Result;
use crate::ledger::{LedgerStore, parse_expiry};
use crate::notify::Notifier;

const DEFAULT_RENEWAL_TEXT: &str =
    "⚠️ Your VIP access expired.\n\nGenerate a new Pix to renew.";

/// Demotes expired entitlements on a fixed period
pub struct Sweeper {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    period: Duration,
    renewal_text: String,
}

impl Sweeper {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            ledger,
            notifier,
            clock,
            period,
            renewal_text: DEFAULT_RENEWAL_TEXT.into(),
        }
    }

    /// Override the renewal reminder text (e.g. to include the price)
    pub fn with_renewal_text(mut self, text: impl Into<String>) -> Self {
        self.renewal_text = text.into();
        self
    }

    /// Run sweep cycles until the process exits. Cycles never overlap; a
    /// failed cycle is logged and the next one runs on schedule.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "expiration sweep demoted entitlements"),
                Err(e) => tracing::error!(error = %e, "expiration sweep failed"),
            }
        }
    }

    /// One sweep cycle. Returns how many entitlements were demoted.
    pub async fn sweep_once(&self) -> Result<usize> {
        let rows = self.ledger.active_entitlements()?;
        let now = self.clock.now();
        let mut expired = 0;

        for row in rows {
            let expires_at = match parse_expiry(&row.expires_at) {
                Ok(at) => at,
                Err(_) => {
                    tracing::warn!(
                        user_id = %row.user_id,
                        raw = %row.expires_at,
                        "skipping entitlement with unparseable expiry"
                    );
                    continue;
                }
            };

            // Strictly past only; an expiry equal to `now` survives the cycle
            if expires_at >= now {
                continue;
            }

            if let Err(e) = self.ledger.deactivate(row.user_id) {
                tracing::warn!(user_id = %row.user_id, error = %e, "failed to demote entitlement");
                continue;
            }
            expired += 1;

            if let Err(e) = self
                .notifier
                .notify(row.user_id, &self.renewal_text, None)
                .await
            {
                tracing::warn!(user_id = %row.user_id, error = %e, "renewal reminder failed");
            }
        }

        Ok(expired)
    }
}
