//! Telegram Bot API notifier

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{Notifier, RenderedChart};
use crate::error::DeliveryError;

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Destination chat id or `@channel` name
    pub chat_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Bot API envelope
#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers alerts through a Telegram bot
pub struct TelegramNotifier {
    client: Client,
    api_url: Url,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        let api_url = Url::parse(&config.api_url).context("Invalid Telegram API URL")?;

        Ok(Self {
            client,
            api_url,
            bot_token: config.bot_token.clone(),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url, DeliveryError> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/bot{}/{}", base, self.bot_token, method))
            .map_err(|e| DeliveryError::NotifierFailure(format!("invalid method URL: {}", e)))
    }

    /// Check the Bot API envelope; the token is kept out of error text
    async fn check_reply(response: reqwest::Response) -> Result<(), DeliveryError> {
        let status = response.status();
        let reply: ApiReply = response.json().await.map_err(|e| {
            DeliveryError::NotifierFailure(format!("unreadable reply ({}): {}", status, e.without_url()))
        })?;

        if reply.ok {
            Ok(())
        } else {
            Err(DeliveryError::NotifierFailure(format!(
                "telegram rejected request ({}): {}",
                status,
                reply.description.unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, channel: &str, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.method_url("sendMessage")?)
            .json(&json!({ "chat_id": channel, "text": text }))
            .send()
            .await
            .map_err(|e| DeliveryError::NotifierFailure(e.without_url().to_string()))?;

        Self::check_reply(response).await
    }

    async fn send_image(&self, channel: &str, image: &RenderedChart) -> Result<(), DeliveryError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(image.mime_type)
            .map_err(|e| DeliveryError::NotifierFailure(e.to_string()))?;
        let form = Form::new()
            .text("chat_id", channel.to_string())
            .part("photo", part);

        let response = self
            .client
            .post(self.method_url("sendPhoto")?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::NotifierFailure(e.without_url().to_string()))?;

        Self::check_reply(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn notifier(url: String) -> TelegramNotifier {
        TelegramNotifier::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100".to_string(),
            api_url: url,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_text_posts_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .match_body(Matcher::PartialJson(json!({
                "chat_id": "-100",
                "text": "Metric views: spike"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"message_id":1}}"#)
            .create_async()
            .await;

        notifier(server.url())
            .send_text("-100", "Metric views: spike")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_message_is_notifier_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:abc/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#)
            .create_async()
            .await;

        let err = notifier(server.url())
            .send_text("-100", "hello")
            .await
            .unwrap_err();

        let DeliveryError::NotifierFailure(message) = err else {
            panic!("expected notifier failure");
        };
        assert!(message.contains("chat not found"));
        assert!(!message.contains("123:abc"));
    }

    #[tokio::test]
    async fn test_send_image_uploads_photo() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:abc/sendPhoto")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="photo"; filename="views.png""#.to_string()),
                Matcher::Regex("image/png".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let chart = RenderedChart {
            bytes: b"png bytes".to_vec(),
            file_name: "views.png".to_string(),
            mime_type: "image/png",
        };
        notifier(server.url())
            .send_image("-100", &chart)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
