//! Script plugins - bots declared in YAML `.plugin` files
//!
//! ```yaml
//! bots:
//!   - name: TheFishBot
//!     handlers:
//!       - command: fish
//!         reply: "You asked for fish! Here you go: 🐟🐟🐟"
//! ```
//!
//! A handler without `command` receives plain text. `set` raises a flag on
//! the bot instance when the handler fires and `when` makes a handler reply
//! only while its flag is raised. Flags start lowered on every (re)load.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::application::errors::{BotError, PluginError, PluginResult};
use crate::domain::entities::{Handler, HandlerKind, Message};
use crate::plugins::{BotFactory, BotInstance, BotPlugin, CodeUnit};
use super::loader::ModuleLoader;

/// Default extension of script plugin files
pub const SCRIPT_EXTENSION: &str = "plugin";

/// Contents of one script plugin file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptFile {
    #[serde(default)]
    pub bots: Vec<BotDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotDefinition {
    pub name: String,
    #[serde(default)]
    pub handlers: Vec<HandlerDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HandlerDefinition {
    /// Command name; plain text handler when absent
    #[serde(default)]
    pub command: Option<String>,
    /// Reply template with `{text}`, `{args}` and `{user}` placeholders
    #[serde(default)]
    pub reply: Option<String>,
    /// Flag raised when this handler fires
    #[serde(default)]
    pub set: Option<String>,
    /// Flag that must be raised for this handler to reply
    #[serde(default)]
    pub when: Option<String>,
}

impl ScriptFile {
    pub fn parse(content: &str) -> PluginResult<Self> {
        // An empty document is a file with no bots, not a syntax error
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| PluginError::Load(format!("Failed to parse bot script: {}", e)))
    }
}

/// Loader for YAML script plugins
#[derive(Debug, Clone)]
pub struct ScriptLoader {
    extension: String,
}

impl ScriptLoader {
    pub fn new() -> Self {
        Self::with_extension(SCRIPT_EXTENSION)
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

impl Default for ScriptLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for ScriptLoader {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn load(&self, path: &Path) -> PluginResult<Arc<dyn CodeUnit>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::Load(format!("Failed to read {}: {}", path.display(), e)))?;
        let file = ScriptFile::parse(&content)?;
        Ok(Arc::new(ScriptUnit {
            source: path.to_path_buf(),
            factories: file.bots.into_iter()
                .map(|def| Arc::new(ScriptFactory { def: Arc::new(def) }))
                .collect(),
        }))
    }
}

struct ScriptUnit {
    source: PathBuf,
    factories: Vec<Arc<ScriptFactory>>,
}

impl CodeUnit for ScriptUnit {
    fn source(&self) -> &Path {
        &self.source
    }

    fn exports(&self) -> Vec<Arc<dyn BotFactory>> {
        self.factories.iter()
            .map(|f| Arc::clone(f) as Arc<dyn BotFactory>)
            .collect()
    }
}

struct ScriptFactory {
    def: Arc<BotDefinition>,
}

impl BotFactory for ScriptFactory {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn create(&self) -> PluginResult<Box<dyn BotPlugin>> {
        for handler in &self.def.handlers {
            if handler.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(PluginError::Construction(format!(
                    "Bot '{}' declares a handler with an empty command",
                    self.def.name
                )));
            }
        }
        Ok(Box::new(ScriptBot {
            def: Arc::clone(&self.def),
            flags: Arc::new(Mutex::new(HashSet::new())),
        }))
    }
}

/// Running script bot
struct ScriptBot {
    def: Arc<BotDefinition>,
    flags: Arc<Mutex<HashSet<String>>>,
}

impl BotPlugin for ScriptBot {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn setup(&self, bot: &mut BotInstance) -> PluginResult<()> {
        let handlers = self.def.handlers.iter()
            .map(|def| self.build_handler(def.clone()))
            .collect::<Vec<_>>();
        bot.add_handlers(handlers);
        Ok(())
    }
}

impl ScriptBot {
    fn build_handler(&self, def: HandlerDefinition) -> Handler {
        let kind = match &def.command {
            Some(command) => HandlerKind::Command(command.trim().to_string()),
            None => HandlerKind::Text,
        };
        let flags = Arc::clone(&self.flags);

        Handler::new(kind, move |message: &Message| {
            let mut flags = flags.lock()
                .map_err(|_| BotError::Internal("Lock poisoned".to_string()))?;
            if let Some(required) = &def.when {
                if !flags.contains(required) {
                    return Ok(None);
                }
            }
            if let Some(flag) = &def.set {
                flags.insert(flag.clone());
            }
            Ok(def.reply.as_deref().map(|template| render(template, message)))
        })
    }
}

/// Fill the placeholders of a reply template
fn render(template: &str, message: &Message) -> String {
    let text = match message.content.text() {
        Some(text) => text.to_string(),
        None => message.args().join(" "),
    };
    let user = message.sender.as_ref()
        .map(|s| s.to_string())
        .unwrap_or_default();

    template
        .replace("{text}", &text)
        .replace("{args}", &message.args().join(" "))
        .replace("{user}", &user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::MessageDispatcher;
    use crate::domain::traits::Dispatch;

    const ECHO_BOT: &str = r#"
bots:
  - name: AnotherCustomBot
    handlers:
      - command: echo
        reply: "From now on I am going to be annoying"
        set: echo
      - when: echo
        reply: "I like to repeat you: {text}"
"#;

    fn start(source: &str) -> (Arc<MessageDispatcher>, BotInstance) {
        let file = ScriptFile::parse(source).unwrap();
        let factory = ScriptFactory { def: Arc::new(file.bots[0].clone()) };
        let plugin = factory.create().unwrap();
        let dispatcher = Arc::new(MessageDispatcher::default());
        let mut bot = BotInstance::new(plugin.name(), dispatcher.clone() as Arc<dyn Dispatch>);
        bot.register();
        plugin.setup(&mut bot).unwrap();
        bot.attach_plugin(plugin);
        (dispatcher, bot)
    }

    #[test]
    fn parses_bot_definitions() {
        let file = ScriptFile::parse(ECHO_BOT).unwrap();
        assert_eq!(file.bots.len(), 1);
        assert_eq!(file.bots[0].name, "AnotherCustomBot");
        assert_eq!(file.bots[0].handlers[0].command.as_deref(), Some("echo"));
        assert_eq!(file.bots[0].handlers[1].command, None);
    }

    #[test]
    fn syntax_errors_are_load_errors() {
        let err = ScriptFile::parse("bots: [ {name: broken").unwrap_err();
        assert!(matches!(err, PluginError::Load(_)));
    }

    #[test]
    fn empty_file_has_no_bots() {
        assert!(ScriptFile::parse("\n").unwrap().bots.is_empty());
        assert!(ScriptFile::parse("bots: []").unwrap().bots.is_empty());
    }

    #[test]
    fn flags_gate_text_replies() {
        let (dispatcher, bot) = start(ECHO_BOT);
        assert_eq!(bot.handler_count(), 2);

        assert_eq!(dispatcher.process_text("1", "hello").unwrap(), None);
        assert_eq!(
            dispatcher.process_text("1", "/echo").unwrap().as_deref(),
            Some("From now on I am going to be annoying")
        );
        assert_eq!(
            dispatcher.process_text("1", "hello").unwrap().as_deref(),
            Some("I like to repeat you: hello")
        );
    }

    #[test]
    fn reply_templates_use_args() {
        let (dispatcher, _bot) = start(
            "bots:\n  - name: Greeter\n    handlers:\n      - command: hi\n        reply: \"hi {args}\"\n",
        );
        assert_eq!(dispatcher.process_text("1", "/hi there you").unwrap().as_deref(), Some("hi there you"));
    }

    #[test]
    fn empty_command_name_fails_construction() {
        let file = ScriptFile::parse("bots:\n  - name: Bad\n    handlers:\n      - command: \" \"\n        reply: x\n").unwrap();
        let factory = ScriptFactory { def: Arc::new(file.bots[0].clone()) };
        assert!(matches!(factory.create().err(), Some(PluginError::Construction(_))));
    }

    #[test]
    fn loader_exports_one_factory_per_bot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.plugin");
        std::fs::write(&path, "bots:\n  - name: One\n  - name: Two\n").unwrap();

        let unit = ScriptLoader::new().load(&path).unwrap();
        let names: Vec<_> = unit.exports().iter().map(|f| f.name().to_string()).collect();

        assert_eq!(names, vec!["One", "Two"]);
        assert_eq!(unit.source(), path.as_path());
    }
}
