//! botplug - a bot host that hot-reloads its bots from plugin folders

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod plugins;
