//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::application::errors::ConfigError;
use crate::infrastructure::plugins::{ModuleLoader, NativeLoader, ScriptLoader, DEFAULT_DEBOUNCE_MS};

/// Host configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    /// Bot groups as written in the file. Use [`Config::groups`] to get the valid ones.
    #[serde(default)]
    pub groups: Vec<RawGroupConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostConfig {
    /// Command prefix besides `/`
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Window in which repeated writes to a plugin file cause one reload
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Where native plugins are copied before being loaded
    #[serde(default)]
    pub shadow_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            shadow_dir: None,
        }
    }
}

impl HostConfig {
    pub fn shadow_dir(&self) -> PathBuf {
        self.shadow_dir.clone()
            .unwrap_or_else(|| std::env::temp_dir().join("botplug"))
    }
}

fn default_prefix() -> String {
    "/".to_string()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

/// Which loader reads a group's plugin files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderKind {
    /// YAML bot scripts (`*.plugin`)
    #[default]
    Script,
    /// Shared libraries exporting `botplug_create`
    Native,
}

/// Which transport connects a group to its users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    #[default]
    Telegram,
    Console,
}

/// A group entry as written in the config file, before validation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawGroupConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub folder: Option<PathBuf>,
    #[serde(default)]
    pub loader: LoaderKind,
    #[serde(default)]
    pub adapter: AdapterKind,
    /// Overrides the loader's plugin file extension
    #[serde(default)]
    pub extension: Option<String>,
}

/// One validated bot group: a credential and the folder its bots live in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub name: String,
    pub token: String,
    pub folder: PathBuf,
    pub loader: LoaderKind,
    pub adapter: AdapterKind,
    pub extension: Option<String>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, token: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            folder: folder.into(),
            loader: LoaderKind::default(),
            adapter: AdapterKind::default(),
            extension: None,
        }
    }

    pub fn with_adapter(mut self, adapter: AdapterKind) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_loader(mut self, loader: LoaderKind) -> Self {
        self.loader = loader;
        self
    }

    /// Build the loader for this group's plugin files
    pub fn build_loader(&self, host: &HostConfig) -> Arc<dyn ModuleLoader> {
        match (self.loader, &self.extension) {
            (LoaderKind::Script, Some(ext)) => Arc::new(ScriptLoader::with_extension(ext.clone())),
            (LoaderKind::Script, None) => Arc::new(ScriptLoader::new()),
            (LoaderKind::Native, _) => Arc::new(NativeLoader::new(host.shadow_dir().join(&self.name))),
        }
    }
}

impl RawGroupConfig {
    /// Validate the entry at `index`
    pub fn validate(&self, index: usize) -> Result<GroupConfig, ConfigError> {
        let name = self.name.clone()
            .unwrap_or_else(|| format!("group-{}", index + 1));
        let token = self.token.clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField(format!("{}.token", name)))?;
        let folder = self.folder.clone()
            .filter(|f| !f.as_os_str().is_empty())
            .ok_or_else(|| ConfigError::MissingField(format!("{}.folder", name)))?;

        Ok(GroupConfig {
            name,
            token,
            folder,
            loader: self.loader,
            adapter: self.adapter,
            extension: self.extension.clone(),
        })
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    /// Configured groups. Entries missing a token or folder are logged and
    /// skipped, and so is every console group after the first: they would
    /// all read the same stdin.
    pub fn groups(&self) -> Vec<GroupConfig> {
        let mut console: Option<String> = None;
        let mut groups = Vec::new();

        for (index, raw) in self.groups.iter().enumerate() {
            let group = match raw.validate(index) {
                Ok(group) => group,
                Err(e) => {
                    tracing::error!("CFG: Skipping group #{}: {}", index + 1, e);
                    continue;
                }
            };
            if group.adapter == AdapterKind::Console {
                if let Some(first) = &console {
                    let e = ConfigError::InvalidValue(format!("'{}' already uses the console", first));
                    tracing::error!("CFG: Skipping group '{}': {}", group.name, e);
                    continue;
                }
                console = Some(group.name.clone());
            }
            tracing::info!("CFG: Added bot folder '{}' for group '{}' with token xxxxxx", group.folder.display(), group.name);
            groups.push(group);
        }

        groups
    }

    pub fn load_env() -> Self {
        // Load from environment variables
        let mut config = Config::default();

        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            config.host.prefix = prefix;
        }

        let token = std::env::var("BOT_TOKEN").ok();
        let folder = std::env::var("BOT_FOLDER").ok().map(PathBuf::from);
        if token.is_some() || folder.is_some() {
            config.groups.push(RawGroupConfig {
                name: Some("env".to_string()),
                token,
                folder,
                ..RawGroupConfig::default()
            });
        }

        config
    }

    /// Example configuration written by `init-config`
    pub fn example() -> Self {
        Self {
            host: HostConfig::default(),
            groups: vec![
                RawGroupConfig {
                    name: Some("my_bots".to_string()),
                    token: Some("123456:replace-me".to_string()),
                    folder: Some(PathBuf::from("my_bots")),
                    ..RawGroupConfig::default()
                },
                RawGroupConfig {
                    name: Some("console".to_string()),
                    token: Some("local".to_string()),
                    folder: Some(PathBuf::from("my_bots2")),
                    adapter: AdapterKind::Console,
                    ..RawGroupConfig::default()
                },
            ],
        }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}
