//! Application layer errors

use std::any::Any;

use thiserror::Error;
use crate::domain::entities::HandlerToken;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Plugin lifecycle errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// The code unit could not be read, parsed or mapped
    #[error("Load error: {0}")]
    Load(String),

    /// The code unit exports no bot factory
    #[error("No bot found in '{0}'")]
    NoBot(String),

    /// The code unit exports more than one bot factory
    #[error("Ambiguous bot definitions in '{path}': {candidates:?}")]
    Ambiguous {
        path: String,
        candidates: Vec<String>,
    },

    /// Factory or setup code of the plugin failed
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Bot instance is not initialized, register() must be called before adding handlers")]
    NotInitialized,

    #[error("Teardown of '{name}' left {} handler(s) registered", failed.len())]
    Teardown {
        name: String,
        failed: Vec<HandlerToken>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PluginError {
    /// Discovery found nothing to instantiate. Logged as a warning rather than an error.
    pub fn is_no_bot(&self) -> bool {
        matches!(self, PluginError::NoBot(_))
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Dispatch service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown handler token: {0}")]
    UnknownToken(HandlerToken),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// File watching errors
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot watch '{0}': not a directory")]
    Path(String),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload.downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
