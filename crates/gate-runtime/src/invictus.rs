//! InvictusPay Charge Provider
//!
//! Implementation of [`ChargeProvider`] for the InvictusPay Pix API. Every
//! charge carries the same fixed amount, offer, and customer profile; the
//! only per-request data is the correlation token embedding the user id,
//! which the provider echoes back in its postbacks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use gate_core::{
    ChargeProvider, GateError, ProviderResponse, Result, TRACKING_USER_KEY, UserId,
};

/// InvictusPay provider configuration
#[derive(Clone, Debug)]
pub struct InvictusConfig {
    /// API base URL
    pub base_url: String,

    /// API token (query-string authenticated)
    pub api_token: String,

    /// Where the provider should POST payment notifications
    pub postback_url: String,

    /// Fixed charge amount in cents
    pub amount_cents: u32,

    pub offer_hash: String,
    pub product_hash: String,

    /// Cart line title shown on the provider side
    pub product_title: String,

    /// Fixed customer profile sent with every charge
    pub customer: CustomerProfile,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Fixed customer profile
#[derive(Clone, Debug)]
pub struct CustomerProfile {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub document: String,
}

impl InvictusConfig {
    /// Create from environment variables. `INVICTUS_API_TOKEN`,
    /// `POSTBACK_URL`, `OFFER_HASH`, and `PRODUCT_HASH` are required.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("INVICTUS_BASE_URL")
                .unwrap_or_else(|_| "https://api.invictuspay.app.br/api/public/v1".into()),
            api_token: require("INVICTUS_API_TOKEN")?,
            postback_url: require("POSTBACK_URL")?,
            amount_cents: std::env::var("PRICE_CENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2990),
            offer_hash: require("OFFER_HASH")?,
            product_hash: require("PRODUCT_HASH")?,
            product_title: std::env::var("PRODUCT_TITLE")
                .unwrap_or_else(|_| "VIP access - 30 days".into()),
            customer: CustomerProfile {
                name: std::env::var("FIXED_NAME").unwrap_or_else(|_| "VIP Customer".into()),
                email: std::env::var("FIXED_EMAIL")
                    .unwrap_or_else(|_| "customer@example.com".into()),
                phone_number: std::env::var("FIXED_PHONE")
                    .unwrap_or_else(|_| "11999999999".into()),
                document: std::env::var("FIXED_DOCUMENT")
                    .unwrap_or_else(|_| "00000000000".into()),
            },
            timeout_secs: 25,
        })
    }
}

fn require(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| GateError::Config(format!("{var} not set")))
}

/// InvictusPay API client
pub struct InvictusClient {
    http: reqwest::Client,
    config: InvictusConfig,
}

impl InvictusClient {
    /// Create a new client with a bounded request timeout
    pub fn new(config: InvictusConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GateError::Config(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(InvictusConfig::from_env()?)
    }

    /// Build the charge-creation request body
    fn charge_body(&self, user_id: UserId) -> Value {
        json!({
            "amount": self.config.amount_cents,
            "offer_hash": self.config.offer_hash,
            "payment_method": "pix",
            "customer": {
                "name": self.config.customer.name,
                "email": self.config.customer.email,
                "phone_number": self.config.customer.phone_number,
                "document": self.config.customer.document,
            },
            "cart": [{
                "product_hash": self.config.product_hash,
                "title": self.config.product_title,
                "price": self.config.amount_cents,
                "quantity": 1,
                "operation_type": 1,
                "tangible": false,
            }],
            "expire_in_days": 1,
            "tracking": { (TRACKING_USER_KEY): user_id.0 },
        })
    }
}

#[async_trait]
impl ChargeProvider for InvictusClient {
    async fn create_charge(&self, user_id: UserId) -> Result<ProviderResponse> {
        let url = format!("{}/transactions", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .query(&[
                ("api_token", self.config.api_token.as_str()),
                ("postback_url", self.config.postback_url.as_str()),
            ])
            .header("Accept", "application/json")
            .json(&self.charge_body(user_id))
            .send()
            .await
            .map_err(|e| GateError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| GateError::ProviderUnavailable(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(%status, "charge creation rejected");
            return Err(GateError::Provider(format!(
                "charge creation returned {status}"
            )));
        }

        // The response schema is not a contract; an unparseable body still
        // feeds the extractor's raw-text fallback.
        let body = serde_json::from_str(&raw).unwrap_or(Value::Null);

        Ok(ProviderResponse { body, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> InvictusConfig {
        InvictusConfig {
            base_url: "https://api.example.test/v1".into(),
            api_token: "token".into(),
            postback_url: "https://bot.example.test/invictus/postback".into(),
            amount_cents: 2990,
            offer_hash: "offer".into(),
            product_hash: "product".into(),
            product_title: "VIP access - 30 days".into(),
            customer: CustomerProfile {
                name: "VIP Customer".into(),
                email: "customer@example.com".into(),
                phone_number: "11999999999".into(),
                document: "00000000000".into(),
            },
            timeout_secs: 25,
        }
    }

    #[test]
    fn test_charge_body_shape() {
        let client = InvictusClient::new(test_config()).unwrap();
        let body = client.charge_body(UserId(42));

        assert_eq!(body["payment_method"], "pix");
        assert_eq!(body["amount"], 2990);
        assert_eq!(body["cart"].as_array().unwrap().len(), 1);
        assert_eq!(body["cart"][0]["tangible"], false);
        assert_eq!(body["tracking"][TRACKING_USER_KEY], 42);
    }
}
