//! Message parser - Parses raw text into command or text messages

use crate::domain::entities::{Content, Message, Sender};

/// Parses incoming text into structured Message objects
#[derive(Debug, Clone)]
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<Sender>) -> Message {
        Message::new(chat_id, self.parse_content(&text.into())).with_sender_opt(sender)
    }

    /// Classify raw text as a command or plain text
    pub fn parse_content(&self, text: &str) -> Content {
        let cmd_text = if let Some(rest) = text.strip_prefix('/') {
            rest
        } else if !self.command_prefix.is_empty() && text.starts_with(&self.command_prefix) {
            &text[self.command_prefix.len()..]
        } else {
            return Content::Text(text.to_string());
        };

        let mut parts = cmd_text.split_whitespace();
        let Some(head) = parts.next() else {
            return Content::Text(text.to_string());
        };

        // Telegram appends the bot username in groups: /fish@my_bot
        let name = head.split('@').next().unwrap_or(head).to_string();
        let args = parts.map(|s| s.to_string()).collect();

        Content::Command { name, args }
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_args() {
        let parser = MessageParser::default();
        let msg = parser.parse("1", "/fish big blue", None);
        assert_eq!(
            msg.content,
            Content::Command { name: "fish".into(), args: vec!["big".into(), "blue".into()] }
        );
    }

    #[test]
    fn strips_bot_username_suffix() {
        let parser = MessageParser::default();
        assert_eq!(parser.parse_content("/echo@my_bot").command(), Some("echo"));
    }

    #[test]
    fn honors_custom_prefix() {
        let parser = MessageParser::new("!");
        assert_eq!(parser.parse_content("!cookie").command(), Some("cookie"));
        assert_eq!(parser.parse_content("/cookie").command(), Some("cookie"));
    }

    #[test]
    fn plain_text_and_bare_prefix_are_text() {
        let parser = MessageParser::default();
        assert_eq!(parser.parse_content("hello there"), Content::Text("hello there".into()));
        assert_eq!(parser.parse_content("/"), Content::Text("/".into()));
    }
}
