//! Plugin hosting for botplug
//! 
//! Plugin files are loaded into code units by a [`ModuleLoader`], tracked per
//! group by a [`PluginRegistry`] and reloaded when a [`DirectoryWatcher`]
//! reports that they changed.

pub mod loader;
pub mod registry;
pub mod script;
pub mod watcher;

pub use loader::{ModuleLoader, NativeLoader};
pub use registry::{PluginRegistry, PluginState};
pub use script::{ScriptFile, ScriptLoader, SCRIPT_EXTENSION};
pub use watcher::{DirectoryWatcher, WatchEvent, DEFAULT_DEBOUNCE_MS};
