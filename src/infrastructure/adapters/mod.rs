//! Transport adapters - deliver inbound messages and send replies

pub mod console;
pub mod telegram;

pub use console::ConsoleAdapter;
pub use telegram::TelegramAdapter;

use crate::domain::traits::Bot;
use crate::infrastructure::config::{AdapterKind, GroupConfig};

/// Build the transport configured for a group
pub fn for_group(group: &GroupConfig) -> Box<dyn Bot> {
    match group.adapter {
        AdapterKind::Telegram => Box::new(TelegramAdapter::new(group.token.clone())),
        AdapterKind::Console => Box::new(ConsoleAdapter::new(group.name.clone())),
    }
}
