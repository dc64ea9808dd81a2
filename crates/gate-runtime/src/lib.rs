//! # gate-runtime
//!
//! Concrete implementations of the gate-core capabilities: the InvictusPay
//! Pix API as the [`gate_core::ChargeProvider`] and the Telegram Bot API as
//! the [`gate_core::Notifier`]. Both are plain HTTP clients; swapping either
//! means implementing the corresponding trait, nothing else changes.

pub mod invictus;
pub mod telegram;

pub use invictus::{CustomerProfile, InvictusClient, InvictusConfig};
pub use telegram::TelegramNotifier;
