//! Plugin registry - Loads, reloads and unloads the bots of one group

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::application::errors::{panic_message, PluginError, PluginResult};
use crate::domain::traits::Dispatch;
use crate::plugins::{BotInstance, CodeUnit};
use super::loader::ModuleLoader;

/// Lifecycle state of one plugin file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Never loaded, or unloaded
    Unloaded,
    /// A bot instance is current and its handlers are live
    Loaded,
    /// The last load or reload failed; no bot instance is current
    LoadFailed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Unloaded => write!(f, "unloaded"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::LoadFailed => write!(f, "load-failed"),
        }
    }
}

struct RegistryEntry {
    unit: Option<Arc<dyn CodeUnit>>,
    instance: Option<BotInstance>,
    state: PluginState,
    generation: u64,
}

impl RegistryEntry {
    fn new() -> Self {
        Self {
            unit: None,
            instance: None,
            state: PluginState::Unloaded,
            generation: 0,
        }
    }
}

/// Registry of the plugin files of one bot group
///
/// Every operation holds the registry lock for its whole duration, so loads
/// and reloads of the same file never interleave.
pub struct PluginRegistry {
    group: String,
    loader: Arc<dyn ModuleLoader>,
    dispatcher: Arc<dyn Dispatch>,
    entries: Mutex<HashMap<PathBuf, RegistryEntry>>,
}

impl PluginRegistry {
    pub fn new(group: impl Into<String>, loader: Arc<dyn ModuleLoader>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            group: group.into(),
            loader,
            dispatcher,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    /// Resolve a path to the identity it is registered under
    pub fn identity(path: &Path) -> PathBuf {
        if let Ok(resolved) = path.canonicalize() {
            return resolved;
        }
        // Deleted files can't be canonicalized; resolve the parent instead
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
                parent.canonicalize()
                    .map(|p| p.join(name))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
            _ => path.to_path_buf(),
        }
    }

    /// Load the plugin at `path`, or reload it if it is already known.
    ///
    /// Failures are logged here and returned for inspection; they never
    /// affect other plugins.
    pub fn run(&self, path: impl AsRef<Path>) -> PluginResult<()> {
        let identity = Self::identity(path.as_ref());
        let mut entries = self.lock()?;

        let known = entries.contains_key(&identity);
        let entry = entries.entry(identity.clone()).or_insert_with(RegistryEntry::new);
        entry.generation += 1;

        if known {
            tracing::info!(group = %self.group, plugin = %identity.display(), "Reloading bot");
            self.retire(&identity, entry);
        } else {
            tracing::info!(group = %self.group, plugin = %identity.display(), "Bot file is new, loading it");
        }

        match self.instantiate(&identity) {
            Ok((unit, instance)) => {
                tracing::info!(
                    group = %self.group,
                    plugin = %identity.display(),
                    "Created bot instance '{}' with {} handler(s)",
                    instance.name(),
                    instance.handler_count()
                );
                entry.unit = Some(unit);
                entry.instance = Some(instance);
                entry.state = PluginState::Loaded;
                Ok(())
            }
            Err(e) => {
                if e.is_no_bot() {
                    tracing::warn!(group = %self.group, plugin = %identity.display(), "{}. Export exactly one bot from the file", e);
                } else {
                    tracing::error!(group = %self.group, plugin = %identity.display(), "Could not load bot: {}", e);
                }
                entry.state = PluginState::LoadFailed;
                Err(e)
            }
        }
    }

    /// Load every plugin file directly inside `dir`, in path order.
    /// Returns how many were loaded successfully.
    pub fn load_all(&self, dir: impl AsRef<Path>) -> PluginResult<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            tracing::warn!(group = %self.group, "Plugin directory does not exist: {}", dir.display());
            return Ok(0);
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .map_err(|e| PluginError::Load(format!("Failed to read plugin directory: {}", e)))?
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(group = %self.group, "Failed to read directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && self.loader.is_plugin_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let loaded = files.iter()
            .filter(|path| self.run(path).is_ok())
            .count();
        tracing::info!(group = %self.group, "Loaded {}/{} bot(s) from {}", loaded, files.len(), dir.display());
        Ok(loaded)
    }

    /// Tear down and forget the plugin at `path`. Returns whether it was known.
    pub fn unload(&self, path: impl AsRef<Path>) -> PluginResult<bool> {
        let identity = Self::identity(path.as_ref());
        let mut entries = self.lock()?;
        match entries.remove(&identity) {
            Some(mut entry) => {
                tracing::info!(group = %self.group, plugin = %identity.display(), "Unloading bot");
                self.retire(&identity, &mut entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unload every plugin
    pub fn unload_all(&self) -> PluginResult<()> {
        let mut entries = self.lock()?;
        for (identity, mut entry) in entries.drain() {
            self.retire(&identity, &mut entry);
        }
        Ok(())
    }

    pub fn state(&self, path: impl AsRef<Path>) -> PluginState {
        self.with_entry(path.as_ref(), |e| e.state)
            .unwrap_or(PluginState::Unloaded)
    }

    /// How many times `run` was called for the plugin since it became known
    pub fn generation(&self, path: impl AsRef<Path>) -> Option<u64> {
        self.with_entry(path.as_ref(), |e| e.generation)
    }

    /// Handler count of the current instance, if there is one
    pub fn handler_count(&self, path: impl AsRef<Path>) -> Option<usize> {
        self.with_entry(path.as_ref(), |e| e.instance.as_ref().map(BotInstance::handler_count))
            .flatten()
    }

    /// Name of the current instance, if there is one
    pub fn instance_name(&self, path: impl AsRef<Path>) -> Option<String> {
        self.with_entry(path.as_ref(), |e| e.instance.as_ref().map(|i| i.name().to_string()))
            .flatten()
    }

    /// Known plugin identities with their state, in path order
    pub fn identities(&self) -> Vec<(PathBuf, PluginState)> {
        let mut list: Vec<_> = self.entries.lock()
            .map(|entries| entries.iter().map(|(p, e)| (p.clone(), e.state)).collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.lock()
            .map(|e| e.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> PluginResult<MutexGuard<'_, HashMap<PathBuf, RegistryEntry>>> {
        self.entries.lock()
            .map_err(|_| PluginError::Internal("Lock poisoned".to_string()))
    }

    fn with_entry<T>(&self, path: &Path, f: impl FnOnce(&RegistryEntry) -> T) -> Option<T> {
        let identity = Self::identity(path);
        self.entries.lock().ok()?.get(&identity).map(f)
    }

    /// Tear down the current instance and drop the old code unit
    fn retire(&self, identity: &Path, entry: &mut RegistryEntry) {
        if let Some(mut instance) = entry.instance.take() {
            if let Err(e) = instance.teardown() {
                tracing::error!(group = %self.group, plugin = %identity.display(), "Could not remove handlers: {}", e);
            }
        }
        if let Some(unit) = entry.unit.take() {
            tracing::debug!(group = %self.group, "Dropping code unit of {}", unit.source().display());
        }
        entry.state = PluginState::Unloaded;
    }

    /// Load the code unit, pick its one bot factory and build a registered instance
    fn instantiate(&self, identity: &Path) -> PluginResult<(Arc<dyn CodeUnit>, BotInstance)> {
        let unit = self.loader.load(identity)?;

        let mut exports = unit.exports();
        let factory = match exports.len() {
            0 => return Err(PluginError::NoBot(identity.display().to_string())),
            1 => exports.remove(0),
            _ => {
                return Err(PluginError::Ambiguous {
                    path: identity.display().to_string(),
                    candidates: exports.iter().map(|f| f.name().to_string()).collect(),
                })
            }
        };

        let plugin = guard(|| factory.create())?;
        let mut instance = BotInstance::new(plugin.name(), Arc::clone(&self.dispatcher))
            .with_unit(Arc::clone(&unit));
        instance.register();

        if let Err(e) = guard(|| plugin.setup(&mut instance)) {
            // Handlers added before the failure must not stay live
            let _ = instance.teardown();
            return Err(e);
        }
        instance.attach_plugin(plugin);

        Ok((unit, instance))
    }
}

/// Run plugin code, turning a panic into a construction error
fn guard<T>(f: impl FnOnce() -> PluginResult<T>) -> PluginResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Construction(format!(
            "Plugin panicked: {}",
            panic_message(&*payload)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Handler;
    use crate::plugins::testing::{Call, RecordingDispatcher};
    use crate::plugins::{BotFactory, BotPlugin, FnFactory};

    /// In-memory loader: the "file content" is a list of (bot name, reply) pairs
    /// looked up by path, or an error string for a broken file.
    #[derive(Default)]
    struct FakeLoader {
        files: Mutex<HashMap<PathBuf, Result<Vec<(String, String)>, String>>>,
    }

    impl FakeLoader {
        fn write(&self, path: &Path, bots: &[(&str, &str)]) {
            let bots = bots.iter().map(|(n, r)| (n.to_string(), r.to_string())).collect();
            self.files.lock().unwrap().insert(PluginRegistry::identity(path), Ok(bots));
        }

        fn corrupt(&self, path: &Path) {
            self.files.lock().unwrap().insert(PluginRegistry::identity(path), Err("syntax error".to_string()));
        }
    }

    struct FakeUnit {
        source: PathBuf,
        bots: Vec<(String, String)>,
    }

    impl CodeUnit for FakeUnit {
        fn source(&self) -> &Path {
            &self.source
        }

        fn exports(&self) -> Vec<Arc<dyn BotFactory>> {
            self.bots.iter()
                .map(|(name, reply)| {
                    let (name, reply) = (name.clone(), reply.clone());
                    Arc::new(FnFactory::new(name.clone(), move || {
                        Ok(Box::new(ReplyBot { name: name.clone(), reply: reply.clone() }) as Box<dyn BotPlugin>)
                    })) as Arc<dyn BotFactory>
                })
                .collect()
        }
    }

    impl ModuleLoader for FakeLoader {
        fn extension(&self) -> &str {
            "plugin"
        }

        fn load(&self, path: &Path) -> PluginResult<Arc<dyn CodeUnit>> {
            match self.files.lock().unwrap().get(path).cloned() {
                Some(Ok(bots)) => Ok(Arc::new(FakeUnit { source: path.to_path_buf(), bots })),
                Some(Err(e)) => Err(PluginError::Load(e)),
                None => Err(PluginError::Load(format!("no such file {}", path.display()))),
            }
        }
    }

    /// Registers `/fish` answering with its reply. "panic" and "fail" replies
    /// make setup misbehave after the handler was added.
    struct ReplyBot {
        name: String,
        reply: String,
    }

    impl BotPlugin for ReplyBot {
        fn name(&self) -> &str {
            &self.name
        }

        fn setup(&self, bot: &mut BotInstance) -> PluginResult<()> {
            let reply = self.reply.clone();
            bot.add_handler(Handler::command("fish", move |_| Ok(Some(reply.clone()))));
            match self.reply.as_str() {
                "panic" => panic!("constructor exploded"),
                "fail" => Err(PluginError::Construction("refused".to_string())),
                _ => Ok(()),
            }
        }
    }

    fn setup() -> (Arc<FakeLoader>, Arc<RecordingDispatcher>, PluginRegistry, PathBuf) {
        let loader = Arc::new(FakeLoader::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let registry = PluginRegistry::new("test", loader.clone(), dispatcher.clone());
        (loader, dispatcher, registry, PathBuf::from("/bots/fish.plugin"))
    }

    fn reply(dispatcher: &RecordingDispatcher) -> Option<String> {
        dispatcher.inner().process_text("chat", "/fish").unwrap()
    }

    #[test]
    fn loaded_plugin_has_one_live_instance() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "fish!")]);

        registry.run(&path).unwrap();

        assert_eq!(registry.state(&path), PluginState::Loaded);
        assert_eq!(registry.instance_name(&path).as_deref(), Some("FishBot"));
        assert_eq!(registry.handler_count(&path), Some(1));
        assert_eq!(dispatcher.inner().handler_count(), 1);
        assert_eq!(reply(&dispatcher).as_deref(), Some("fish!"));
    }

    #[test]
    fn reload_removes_old_handlers_before_adding_new_ones() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "old")]);
        registry.run(&path).unwrap();
        let old = dispatcher.added();
        dispatcher.clear_calls();

        loader.write(&path, &[("FishBot", "new")]);
        registry.run(&path).unwrap();

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Call::Remove(old[0]));
        assert!(matches!(calls[1], Call::Add(_)));
        assert_eq!(reply(&dispatcher).as_deref(), Some("new"));
        assert_eq!(dispatcher.inner().handler_count(), 1);
        assert_eq!(registry.generation(&path), Some(2));
    }

    #[test]
    fn running_twice_yields_equivalent_instances() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "fish!")]);

        registry.run(&path).unwrap();
        let first = dispatcher.added();
        registry.run(&path).unwrap();
        let all = dispatcher.added();

        assert_eq!(registry.instance_name(&path).as_deref(), Some("FishBot"));
        assert_eq!(registry.handler_count(&path), Some(1));
        assert_eq!(all.len(), 2);
        assert_ne!(first[0], all[1]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn file_without_bot_creates_no_instance() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[]);

        let err = registry.run(&path).unwrap_err();

        assert!(err.is_no_bot());
        assert_eq!(registry.state(&path), PluginState::LoadFailed);
        assert_eq!(registry.instance_name(&path), None);
        assert!(dispatcher.calls().is_empty());
    }

    #[test]
    fn several_bots_in_one_file_are_rejected() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("One", "1"), ("Two", "2")]);

        let err = registry.run(&path).unwrap_err();

        match err {
            PluginError::Ambiguous { candidates, .. } => assert_eq!(candidates, vec!["One", "Two"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(dispatcher.calls().is_empty());
    }

    #[test]
    fn broken_reload_leaves_no_instance_and_no_handlers() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "fish!")]);
        registry.run(&path).unwrap();

        loader.corrupt(&path);
        let err = registry.run(&path).unwrap_err();

        assert!(matches!(err, PluginError::Load(_)));
        assert_eq!(registry.state(&path), PluginState::LoadFailed);
        assert_eq!(registry.handler_count(&path), None);
        assert_eq!(dispatcher.inner().handler_count(), 0);
        assert_eq!(reply(&dispatcher), None);

        // Fixing the file brings the bot back
        loader.write(&path, &[("FishBot", "fixed")]);
        registry.run(&path).unwrap();
        assert_eq!(reply(&dispatcher).as_deref(), Some("fixed"));
    }

    #[test]
    fn failing_setup_does_not_leave_handlers_behind() {
        let (loader, dispatcher, registry, path) = setup();
        for bad in ["fail", "panic"] {
            loader.write(&path, &[("FishBot", bad)]);

            let err = registry.run(&path).unwrap_err();

            assert!(matches!(err, PluginError::Construction(_)), "{bad}: {err}");
            assert_eq!(registry.state(&path), PluginState::LoadFailed);
            assert_eq!(dispatcher.inner().handler_count(), 0);
        }
    }

    #[test]
    fn failed_teardown_does_not_block_reload() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "old")]);
        registry.run(&path).unwrap();
        dispatcher.fail_removal_of(dispatcher.added()[0]);

        loader.write(&path, &[("FishBot", "new")]);
        registry.run(&path).unwrap();

        // The stale handler stays first in line; the new one is registered anyway
        assert_eq!(registry.state(&path), PluginState::Loaded);
        assert_eq!(dispatcher.inner().handler_count(), 2);
    }

    #[test]
    fn unload_removes_entry_and_handlers() {
        let (loader, dispatcher, registry, path) = setup();
        loader.write(&path, &[("FishBot", "fish!")]);
        registry.run(&path).unwrap();

        assert!(registry.unload(&path).unwrap());
        assert!(!registry.unload(&path).unwrap());

        assert_eq!(registry.state(&path), PluginState::Unloaded);
        assert!(registry.is_empty());
        assert_eq!(dispatcher.inner().handler_count(), 0);
    }

    #[test]
    fn unload_all_clears_every_plugin() {
        let (loader, dispatcher, registry, path) = setup();
        let other = PathBuf::from("/bots/cookie.plugin");
        loader.write(&path, &[("FishBot", "fish!")]);
        loader.write(&other, &[("CookieBot", "cookie!")]);
        registry.run(&path).unwrap();
        registry.run(&other).unwrap();

        registry.unload_all().unwrap();

        assert!(registry.is_empty());
        assert_eq!(dispatcher.inner().handler_count(), 0);
    }

    #[test]
    fn identity_survives_file_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone.plugin");
        std::fs::write(&file, "").unwrap();
        let before = PluginRegistry::identity(&file);

        std::fs::remove_file(&file).unwrap();

        assert_eq!(PluginRegistry::identity(&file), before);
    }
}
