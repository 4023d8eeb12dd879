use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::types::{ApiResponse, EditMessageText, InlineKeyboardMarkup, SendMessage, Update};
use crate::models::Notification;
use crate::notify::{DeliveryError, NotificationSender};

/// Long-poll window requested from `getUpdates`.
pub const LONG_POLL_SECS: u64 = 30;

/// Minimal Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    /// `{api_url}/bot{token}`
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        // Must outlive the long-poll window
        let http = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(TelegramClient {
            http,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, DeliveryError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("{} ({})", e.without_url(), status)))?;

        if !envelope.ok {
            return Err(DeliveryError::Rejected(
                envelope
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }
        envelope
            .result
            .ok_or_else(|| DeliveryError::Rejected(format!("{} returned no result", method)))
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), DeliveryError> {
        debug!("sendMessage to {}", chat_id);
        let body = SendMessage {
            chat_id,
            text,
            reply_markup: keyboard,
        };
        self.call::<_, serde_json::Value>("sendMessage", &body)
            .await
            .map(|_| ())
    }

    /// Replace the text (and keyboard) of a message the bot sent earlier.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), DeliveryError> {
        debug!("editMessageText {} in {}", message_id, chat_id);
        let body = EditMessageText {
            chat_id,
            message_id,
            text,
            reply_markup: keyboard,
        };
        self.call::<_, serde_json::Value>("editMessageText", &body)
            .await
            .map(|_| ())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_query_id });
        self.call::<_, bool>("answerCallbackQuery", &body)
            .await
            .context("answerCallbackQuery failed")?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body)
            .await
            .context("getUpdates failed")
    }
}

#[async_trait]
impl NotificationSender for TelegramClient {
    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.send_message(notification.subscriber_id.0, &notification.message_text, None)
            .await
    }
}
