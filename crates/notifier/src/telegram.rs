// In crates/notifier/src/telegram.rs

use crate::format::event_text;
use crate::{Error, Notifier, Result};
use app_config::NotifierSettings;
use async_trait::async_trait;
use events::EngineEvent;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Seconds Telegram holds a `getUpdates` long poll open.
pub const LONG_POLL_SECS: u64 = 30;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram's response envelope.
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// A minimal Telegram Bot API client.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http_client: reqwest::Client,
    /// `https://api.telegram.org/bot<token>`.
    bot_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("trading-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        Ok(Self {
            http_client,
            bot_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body: TelegramResponse<T> = response.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Error::Telegram {
                description: body.description.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .http_client
            .post(format!("{}/sendMessage", self.bot_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }

    /// Long-polls for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response = self
            .http_client
            .get(format!("{}/getUpdates", self.bot_url))
            .query(&[("offset", offset.to_string()), ("timeout", LONG_POLL_SECS.to_string())])
            .timeout(Duration::from_secs(LONG_POLL_SECS) + REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::parse(response).await
    }
}

/// Pushes engine events to one Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: String,
    quote: String,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, chat_id: &str, quote: &str) -> Self {
        Self { client, chat_id: chat_id.to_string(), quote: quote.to_string() }
    }

    /// Builds a notifier from settings. `None` when notifications are off or
    /// Telegram is not configured.
    pub fn from_settings(settings: &NotifierSettings, quote: &str) -> Result<Option<Self>> {
        if !settings.active {
            return Ok(None);
        }
        match (&settings.telegram_token, &settings.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                let client = TelegramClient::new(&settings.telegram_api_url, token)?;
                Ok(Some(Self::new(client, chat_id, quote)))
            }
            _ => Ok(None),
        }
    }

    pub fn client(&self) -> &TelegramClient {
        &self.client
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, event: &EngineEvent) -> Result<()> {
        let text = event_text(event, &self.quote);
        self.client.send_message(&self.chat_id, &text).await?;
        tracing::debug!(kind = event.kind(), "Telegram notification sent.");
        Ok(())
    }
}
