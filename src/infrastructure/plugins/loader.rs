//! Plugin loaders - Turn plugin files into code units

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::application::errors::{PluginError, PluginResult};
use crate::plugins::{BotFactory, BotPlugin, CodeUnit, PluginCreateFn, ABI_SYMBOL, ABI_VERSION, CREATE_SYMBOL};

/// Loads one kind of plugin file
pub trait ModuleLoader: Send + Sync {
    /// File extension (without the dot) of the plugin files this loader reads
    fn extension(&self) -> &str;

    /// Load a fresh code unit from `path`. Never returns a cached unit.
    fn load(&self, path: &Path) -> PluginResult<Arc<dyn CodeUnit>>;

    /// Whether `path` names a plugin file for this loader
    fn is_plugin_file(&self, path: &Path) -> bool {
        let hidden = path.file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        !hidden && path.extension().and_then(|e| e.to_str()) == Some(self.extension())
    }
}

/// Loads native bots from shared libraries
///
/// Each load maps a uniquely named copy of the library so that the platform
/// loader cannot hand back the previously mapped image of the same file.
pub struct NativeLoader {
    shadow_dir: PathBuf,
}

impl NativeLoader {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
        }
    }

    pub fn shadow_dir(&self) -> &Path {
        &self.shadow_dir
    }

    fn shadow_path(&self, path: &Path) -> PathBuf {
        let stem = path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin");
        self.shadow_dir.join(format!(
            "{}-{}.{}",
            stem,
            uuid::Uuid::new_v4().simple(),
            std::env::consts::DLL_EXTENSION
        ))
    }
}

impl ModuleLoader for NativeLoader {
    fn extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    fn load(&self, path: &Path) -> PluginResult<Arc<dyn CodeUnit>> {
        if !path.is_file() {
            return Err(PluginError::Load(format!("Library not found: {}", path.display())));
        }

        std::fs::create_dir_all(&self.shadow_dir)
            .map_err(|e| PluginError::Load(format!("Failed to create shadow directory: {}", e)))?;
        let shadow = self.shadow_path(path);
        std::fs::copy(path, &shadow)
            .map_err(|e| PluginError::Load(format!("Failed to copy {}: {}", path.display(), e)))?;

        match NativeUnit::open(path, &shadow) {
            Ok(unit) => Ok(Arc::new(unit)),
            Err(e) => {
                let _ = std::fs::remove_file(&shadow);
                Err(e)
            }
        }
    }
}

/// A mapped native library
struct NativeUnit {
    source: PathBuf,
    shadow: PathBuf,
    library: Arc<Library>,
    create: Option<PluginCreateFn>,
}

impl NativeUnit {
    fn open(source: &Path, shadow: &Path) -> PluginResult<Self> {
        // SAFETY: loading a library runs its initializers; plugin files are trusted code.
        let library = unsafe {
            Library::new(shadow)
                .map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))?
        };

        // SAFETY: the symbol is a `u32` static emitted by `declare_bot!`.
        let version = unsafe {
            library.get::<*const u32>(ABI_SYMBOL)
                .map(|sym| **sym)
                .map_err(|e| PluginError::Load(format!("Missing ABI version: {}", e)))?
        };
        if version != ABI_VERSION {
            return Err(PluginError::Load(format!(
                "Plugin built for ABI {} but host expects {}",
                version, ABI_VERSION
            )));
        }

        // A library without the factory symbol exports no bot.
        // SAFETY: the symbol has the signature emitted by `declare_bot!`.
        let create = unsafe {
            library.get::<PluginCreateFn>(CREATE_SYMBOL)
                .map(|sym| *sym)
                .ok()
        };

        Ok(Self {
            source: source.to_path_buf(),
            shadow: shadow.to_path_buf(),
            library: Arc::new(library),
            create,
        })
    }
}

impl CodeUnit for NativeUnit {
    fn source(&self) -> &Path {
        &self.source
    }

    fn exports(&self) -> Vec<Arc<dyn BotFactory>> {
        let Some(create) = self.create else {
            return Vec::new();
        };
        let name = self.source.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("native")
            .to_string();
        vec![Arc::new(NativeFactory {
            name,
            create,
            _library: Arc::clone(&self.library),
        })]
    }
}

impl Drop for NativeUnit {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.shadow) {
            tracing::debug!("Could not remove shadow copy {}: {}", self.shadow.display(), e);
        }
    }
}

impl fmt::Debug for NativeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeUnit")
            .field("source", &self.source)
            .field("shadow", &self.shadow)
            .finish()
    }
}

struct NativeFactory {
    name: String,
    create: PluginCreateFn,
    _library: Arc<Library>,
}

impl BotFactory for NativeFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> PluginResult<Box<dyn BotPlugin>> {
        // SAFETY: `create` comes from the library `_library` keeps mapped and
        // returns a pointer produced by `Box::into_raw`.
        unsafe {
            let ptr = (self.create)();
            if ptr.is_null() {
                return Err(PluginError::Construction("Plugin create returned null".to_string()));
            }
            Ok(Box::from_raw(ptr))
        }
    }
}
