//! Message dispatcher - Routes messages to the handlers bot instances registered

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::application::errors::{panic_message, BotError, DispatchError};
use crate::domain::entities::{Content, Handler, HandlerResult, HandlerToken, Message};
use crate::domain::traits::Dispatch;
use super::parser::MessageParser;

/// Message dispatcher - one per bot group
///
/// Handlers are kept in registration order and the first one whose kind
/// matches a message handles it. Handlers run outside the table lock, so bot
/// instances may add or remove handlers while events are being dispatched.
pub struct MessageDispatcher {
    parser: MessageParser,
    handlers: RwLock<Vec<(HandlerToken, Handler)>>,
    next_token: AtomicU64,
}

impl MessageDispatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            parser: MessageParser::new(prefix),
            handlers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    /// Process a raw text message
    pub fn process_text(&self, chat_id: impl Into<String>, text: impl Into<String>) -> HandlerResult {
        let message = self.parser.parse(chat_id, text, None);
        self.process(&message)
    }

    /// Process a message through the handler table
    pub fn process(&self, message: &Message) -> HandlerResult {
        // Transports deliver raw text; classify it before routing
        let parsed;
        let message = match &message.content {
            Content::Text(text) => {
                let mut copy = message.clone();
                copy.content = self.parser.parse_content(text);
                parsed = copy;
                &parsed
            }
            Content::Command { .. } => message,
        };

        let handler = {
            let handlers = self.handlers.read()
                .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?;
            handlers.iter()
                .find(|(_, h)| h.matches(message))
                .map(|(token, h)| (*token, h.clone()))
        };

        match handler {
            Some((token, handler)) => {
                tracing::debug!("[{}] {:?} {} handles message", message.chat_id, handler, token);
                // Plugin panics end here as handler errors
                panic::catch_unwind(AssertUnwindSafe(|| handler.call(message)))
                    .unwrap_or_else(|payload| {
                        let reason = panic_message(&*payload);
                        tracing::error!("[{}] {:?} {} panicked: {}", message.chat_id, handler, token, reason);
                        Err(BotError::Handler(format!("{:?} panicked: {}", handler, reason)))
                    })
            }
            None => {
                tracing::debug!("[{}] No handler for message", message.chat_id);
                Ok(None)
            }
        }
    }

    /// Number of live handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read()
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Whether a token is currently registered
    pub fn is_registered(&self, token: HandlerToken) -> bool {
        self.handlers.read()
            .map(|h| h.iter().any(|(t, _)| *t == token))
            .unwrap_or(false)
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Dispatch for MessageDispatcher {
    fn add_handler(&self, handler: Handler) -> Result<HandlerToken, DispatchError> {
        let token = HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write()
            .map_err(|_| DispatchError::Internal("Lock poisoned".to_string()))?;
        tracing::debug!("Adding handler {}: {:?}", token, handler);
        handlers.push((token, handler));
        Ok(token)
    }

    fn remove_handler(&self, token: HandlerToken) -> Result<(), DispatchError> {
        let mut handlers = self.handlers.write()
            .map_err(|_| DispatchError::Internal("Lock poisoned".to_string()))?;
        let index = handlers.iter()
            .position(|(t, _)| *t == token)
            .ok_or(DispatchError::UnknownToken(token))?;
        let (_, handler) = handlers.remove(index);
        tracing::debug!("Removed handler {}: {:?}", token, handler);
        Ok(())
    }
}
