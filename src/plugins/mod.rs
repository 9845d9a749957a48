//! Plugin contract for botplug
//!
//! Every plugin file exports one bot factory. The bot it builds registers
//! handlers through a [`BotInstance`], which records them in a [`HandlerSet`]
//! so the host can revoke them when the file is reloaded.

pub mod handler_set;
pub mod instance;
pub mod trait_def;

#[cfg(test)]
pub(crate) mod testing;

pub use handler_set::HandlerSet;
pub use instance::BotInstance;
pub use trait_def::{
    BotFactory, BotPlugin, CodeUnit, FnFactory, PluginCreateFn, ABI_SYMBOL, ABI_VERSION, CREATE_SYMBOL,
};
