use async_trait::async_trait;
use crate::domain::entities::Message;
use crate::application::errors::BotError;

/// Bot trait - abstraction for the messaging transport of one bot group
#[async_trait]
pub trait Bot: Send + Sync {
    /// Connect to the platform. A failure here aborts the group's startup.
    async fn start(&mut self) -> Result<(), BotError>;

    /// Wait for the next batch of inbound messages
    async fn poll(&mut self) -> Result<Vec<Message>, BotError>;

    /// Send a message to a chat
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, BotError>;

    /// Release the connection
    async fn stop(&mut self) -> Result<(), BotError>;

    /// Get bot info
    fn bot_info(&self) -> BotInfo;
}

/// Bot information
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
