//! Error Types

use thiserror::Error;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Gate error types
#[derive(Error, Debug)]
pub enum GateError {
    /// Charge creation rejected by the payment provider (non-2xx response)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Payment provider unreachable or timed out
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Ledger storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted timestamp could not be parsed
    #[error("Unparseable stored timestamp: {0}")]
    BadTimestamp(String),

    /// Outbound notification failure
    #[error("Notification error: {0}")]
    Notify(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::ProviderUnavailable(_) | GateError::Storage(_) | GateError::Notify(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            GateError::Provider(_) => "Could not create the Pix charge. Please try again.",
            GateError::ProviderUnavailable(_) => {
                "The payment provider is currently unavailable. Please try again."
            }
            GateError::Notify(_) => "The confirmation message could not be delivered.",
            GateError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(err: rusqlite::Error) -> Self {
        GateError::Storage(err.to_string())
    }
}
