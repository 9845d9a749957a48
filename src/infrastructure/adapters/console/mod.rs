//! Console adapter for development/testing

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use crate::domain::entities::{Message, Sender};
use crate::domain::traits::{Bot, BotInfo};
use crate::application::errors::BotError;

/// Chat id used for every console message
pub const CONSOLE_CHAT: &str = "console";

/// Console bot adapter: reads messages from stdin, prints replies
pub struct ConsoleAdapter {
    info: BotInfo,
    lines: Option<Lines<BufReader<Stdin>>>,
}

impl ConsoleAdapter {
    pub fn new(group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            info: BotInfo {
                id: CONSOLE_CHAT.to_string(),
                name: group.clone(),
                username: group,
            },
            lines: None,
        }
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    async fn start(&mut self) -> Result<(), BotError> {
        tracing::info!("Starting console bot '{}' (dev mode)", self.info.name);
        self.lines = Some(BufReader::new(tokio::io::stdin()).lines());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Message>, BotError> {
        let lines = self.lines.as_mut()
            .ok_or_else(|| BotError::Internal("Console adapter not started".to_string()))?;

        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim();
                if text.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![Message::from_text(CONSOLE_CHAT, text)
                    .with_sender(Sender::new("local").with_username("you"))
                    .with_platform("console")])
            }
            Ok(None) => {
                // stdin closed: idle instead of spinning
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
            Err(e) => Err(BotError::Network(format!("Failed to read stdin: {}", e))),
        }
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<String, BotError> {
        println!("[{}] {}", self.info.name, text);
        Ok("console_msg".to_string())
    }

    async fn stop(&mut self) -> Result<(), BotError> {
        self.lines = None;
        tracing::info!("Stopped console bot '{}'", self.info.name);
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
