//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod dispatch;

pub use bot::{Bot, BotInfo};
pub use dispatch::Dispatch;
