//! Directory watcher - Reports changes to the plugin files of one folder

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::application::errors::WatchError;

/// Default debounce duration in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// A change to one plugin file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Created or modified
    Changed(PathBuf),
    /// No longer exists
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Changed(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// Watches one directory, non-recursively
///
/// The OS watch is released exactly once, by `stop` or on drop.
pub struct DirectoryWatcher {
    folder: PathBuf,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
}

impl DirectoryWatcher {
    /// Start watching `folder` and call `callback` for every change to a file
    /// with the given extension. Rapid writes within `debounce` of each other
    /// are reported once.
    pub fn start<F>(folder: impl Into<PathBuf>, extension: &str, debounce: Duration, callback: F) -> Result<Self, WatchError>
    where
        F: Fn(WatchEvent) + Send + 'static,
    {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(WatchError::Path(folder.display().to_string()));
        }

        let filter = extension.to_string();
        let label = folder.display().to_string();
        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| {
                match result {
                    Ok(events) => {
                        for event in events {
                            if let Some(change) = classify(&event.path, &filter) {
                                tracing::info!("File '{}' has changed", change.path().display());
                                callback(change);
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!("Watching {} failed: {}", label, WatchError::from(error));
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&folder, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} for *.{} changes", folder.display(), extension);
        Ok(Self {
            folder,
            debouncer: Some(debouncer),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_running(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Release the OS watch. Further calls do nothing.
    pub fn stop(&mut self) {
        if let Some(debouncer) = self.debouncer.take() {
            drop(debouncer);
            tracing::info!("Stopped watching {}", self.folder.display());
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Turn a raw path notification into a plugin file event
pub fn classify(path: &Path, extension: &str) -> Option<WatchEvent> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || path.extension()?.to_str()? != extension {
        return None;
    }
    if path.exists() {
        // Directories named like plugins are not plugins
        path.is_file().then(|| WatchEvent::Changed(path.to_path_buf()))
    } else {
        Some(WatchEvent::Removed(path.to_path_buf()))
    }
}
