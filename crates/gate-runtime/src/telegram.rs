//! Telegram Notification Sink
//!
//! Implementation of [`Notifier`] over the Telegram Bot API. Inline visual
//! codes are decoded and uploaded as photos; remote ones are passed through
//! as URLs for Telegram to fetch.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::multipart;

use gate_core::{GateError, Notifier, Result, UserId, Visual};

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    /// Create from the `BOT_TOKEN` environment variable
    pub fn from_env() -> Result<Self> {
        let token =
            std::env::var("BOT_TOKEN").map_err(|_| GateError::Config("BOT_TOKEN not set".into()))?;
        Ok(Self::new(&token))
    }

    async fn send_message(&self, user_id: UserId, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.api_base))
            .json(&serde_json::json!({
                "chat_id": user_id.0,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| GateError::Notify(e.to_string()))?;
        Self::check(response).await
    }

    async fn send_photo_bytes(&self, user_id: UserId, caption: &str, bytes: Vec<u8>) -> Result<()> {
        let form = multipart::Form::new()
            .text("chat_id", user_id.0.to_string())
            .text("caption", caption.to_string())
            .part("photo", multipart::Part::bytes(bytes).file_name("pix_qr.png"));

        let response = self
            .http
            .post(format!("{}/sendPhoto", self.api_base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GateError::Notify(e.to_string()))?;
        Self::check(response).await
    }

    async fn send_photo_url(&self, user_id: UserId, caption: &str, url: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/sendPhoto", self.api_base))
            .json(&serde_json::json!({
                "chat_id": user_id.0,
                "caption": caption,
                "photo": url,
            }))
            .send()
            .await
            .map_err(|e| GateError::Notify(e.to_string()))?;
        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(GateError::Notify(format!(
            "telegram returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: UserId, text: &str, image: Option<&Visual>) -> Result<()> {
        match image {
            Some(Visual::Inline(encoded)) => match BASE64.decode(encoded.trim()) {
                Ok(bytes) => self.send_photo_bytes(user_id, text, bytes).await,
                Err(e) => {
                    // Something that merely looked like base64; the text
                    // (and the credential inside it) still matters.
                    tracing::warn!(user_id = %user_id, error = %e, "inline image failed to decode");
                    self.send_message(user_id, text).await
                }
            },
            Some(Visual::Remote(url)) => self.send_photo_url(user_id, text, url).await,
            None => self.send_message(user_id, text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_embeds_token() {
        let notifier = TelegramNotifier::new("123:abc");
        assert_eq!(notifier.api_base, "https://api.telegram.org/bot123:abc");
    }
}
