//! Notification Sink
//!
//! Delivery is best-effort and at-least-once; callers log failures and never
//! roll back ledger writes because of them.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::extract::Visual;
use crate::ledger::UserId;

/// Outbound notification capability
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to a user, optionally with a visual code attached
    async fn notify(&self, user_id: UserId, text: &str, image: Option<&Visual>) -> Result<()>;
}

/// A delivered message, as recorded by [`MemoryNotifier`]
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub user_id: UserId,
    pub text: String,
    pub had_image: bool,
}

/// Notifier that records deliveries in memory (for development and tests)
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, user_id: UserId, text: &str, image: Option<&Visual>) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            user_id,
            text: text.to_string(),
            had_image: image.is_some(),
        });
        Ok(())
    }
}
