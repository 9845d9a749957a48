//! Telegram adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::entities::{Message, Sender};
use crate::domain::traits::{Bot, BotInfo};
use crate::application::errors::BotError;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Long polling timeout in seconds
const POLL_TIMEOUT: i64 = 30;

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Telegram bot adapter using getUpdates long polling
pub struct TelegramAdapter {
    token: String,
    client: Client,
    info: BotInfo,
    offset: i64,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
            info: BotInfo {
                id: "unknown".to_string(),
                name: "botplug".to_string(),
                username: "botplug".to_string(),
            },
            offset: 0,
        }
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<Req: Serialize + ?Sized, Res: for<'de> Deserialize<'de>>(&self, method: &str, request: &Req) -> Result<Res, BotError> {
        let response = self.client
            .post(self.api_url(method))
            .json(request)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let status = response.status();
        let data: ApiResponse<Res> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        match (data.ok, data.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(BotError::Network(format!(
                "Telegram API error ({}): {}",
                status,
                data.description.unwrap_or_default()
            ))),
        }
    }

    /// Fetch bot info from Telegram API
    pub async fn fetch_bot_info(&mut self) -> Result<(), BotError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
            first_name: String,
            username: Option<String>,
        }

        let me: Me = self.call("getMe", &serde_json::json!({})).await?;
        self.info = BotInfo {
            id: me.id.to_string(),
            username: me.username.unwrap_or_else(|| me.first_name.clone()),
            name: me.first_name,
        };
        Ok(())
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: i64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: i64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: vec!["message".to_string()],
        };
        self.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
        updates.iter()
            .map(|u| u.update_id + 1)
            .max()
            .unwrap_or(current)
            .max(current)
    }

    /// Convert a Telegram update to an inbound message
    pub fn to_message(update: &Update) -> Option<Message> {
        let msg = update.message.as_ref()?;
        let text = msg.text.as_ref()?;
        let sender = msg.from.as_ref().map(|u| {
            let sender = Sender::new(u.id.to_string());
            match &u.username {
                Some(name) => sender.with_username(name.clone()),
                None => sender,
            }
        });
        Some(Message::from_text(msg.chat.id.to_string(), text.clone())
            .with_sender_opt(sender)
            .with_platform("telegram"))
    }
}

/// First characters of a token, safe to log
fn token_preview(token: &str) -> String {
    token.chars().take(8).collect()
}

#[async_trait]
impl Bot for TelegramAdapter {
    async fn start(&mut self) -> Result<(), BotError> {
        tracing::info!("Starting Telegram bot (token: {}...)", token_preview(&self.token));
        self.fetch_bot_info().await?;
        tracing::info!("Bot started: @{}", self.info.username);
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Message>, BotError> {
        let updates = self.get_updates(self.offset, POLL_TIMEOUT).await?;
        self.offset = Self::next_offset(self.offset, &updates);
        Ok(updates.iter().filter_map(Self::to_message).collect())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError> {
        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: &'a str,
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct MessageResult {
            message_id: i64,
        }

        let result: MessageResult = self.call("sendMessage", &SendMessageRequest { chat_id, text }).await?;
        Ok(result.message_id.to_string())
    }

    async fn stop(&mut self) -> Result<(), BotError> {
        // Acknowledge everything polled so far so it is not redelivered on restart
        if self.offset > 0 {
            if let Err(e) = self.get_updates(self.offset, 0).await {
                tracing::warn!("Could not acknowledge updates before offset {}: {}", self.offset, e);
            }
        }
        tracing::info!("Stopped Telegram bot @{}", self.info.username);
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
