//! Bot instance - the live object a loaded plugin registers its handlers through

use std::fmt;
use std::sync::Arc;

use crate::application::errors::{PluginError, PluginResult};
use crate::domain::entities::{Handler, HandlerToken};
use crate::domain::traits::Dispatch;
use super::handler_set::HandlerSet;
use super::trait_def::{BotPlugin, CodeUnit};

/// One live bot. Its handlers are registered with the group's dispatcher for
/// exactly as long as it is the current instance of its plugin file.
pub struct BotInstance {
    name: String,
    // Field order matters: the plugin object may live in a native library
    // that `unit` keeps mapped, so it must be dropped first.
    plugin: Option<Box<dyn BotPlugin>>,
    handlers: Option<HandlerSet>,
    dispatcher: Arc<dyn Dispatch>,
    unit: Option<Arc<dyn CodeUnit>>,
}

impl BotInstance {
    /// Create an uninitialized instance. `register` must be called before
    /// any handler can be added.
    pub fn new(name: impl Into<String>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            handlers: None,
            dispatcher,
            unit: None,
        }
    }

    /// Keep `unit` alive for the lifetime of this instance and of every
    /// handler it registers.
    pub fn with_unit(mut self, unit: Arc<dyn CodeUnit>) -> Self {
        self.unit = Some(unit);
        self
    }

    pub(crate) fn attach_plugin(&mut self, plugin: Box<dyn BotPlugin>) {
        self.plugin = Some(plugin);
    }

    /// Initialize the handler set. Idempotent.
    pub fn register(&mut self) -> &HandlerSet {
        self.handlers.get_or_insert_with(HandlerSet::new)
    }

    /// Register a handler with the dispatcher. Returns `None` and logs if the
    /// instance is not initialized or the dispatcher refused the handler.
    pub fn add_handler(&mut self, handler: Handler) -> Option<HandlerToken> {
        let Some(handlers) = self.handlers.as_mut() else {
            tracing::error!(bot = %self.name, "Cannot add {:?}: {}", handler, PluginError::NotInitialized);
            return None;
        };

        let handler = match &self.unit {
            Some(unit) => handler.retaining(Arc::clone(unit)),
            None => handler,
        };

        tracing::info!(bot = %self.name, "Adding handler: {:?}", handler);
        match self.dispatcher.add_handler(handler) {
            Ok(token) => {
                handlers.push(token);
                Some(token)
            }
            Err(e) => {
                tracing::error!(bot = %self.name, "Dispatcher refused handler: {}", e);
                None
            }
        }
    }

    /// Register several handlers in order. Returns how many were registered.
    pub fn add_handlers(&mut self, handlers: impl IntoIterator<Item = Handler>) -> usize {
        handlers.into_iter()
            .filter_map(|h| self.add_handler(h))
            .count()
    }

    /// Remove every registered handler, in the order they were added.
    ///
    /// A failing removal does not stop the others; the tokens that could not
    /// be removed are reported in the error. The instance is uninitialized
    /// afterwards.
    pub fn teardown(&mut self) -> PluginResult<()> {
        let Some(mut handlers) = self.handlers.take() else {
            return Ok(());
        };

        let mut failed = Vec::new();
        for token in handlers.drain() {
            tracing::info!(bot = %self.name, "Removing handler {}", token);
            if let Err(e) = self.dispatcher.remove_handler(token) {
                tracing::error!(bot = %self.name, "Could not remove handler {}: {}", token, e);
                failed.push(token);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Teardown {
                name: self.name.clone(),
                failed,
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `register` has been called and teardown has not
    pub fn is_registered(&self) -> bool {
        self.handlers.is_some()
    }

    pub fn handler_set(&self) -> Option<&HandlerSet> {
        self.handlers.as_ref()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.as_ref().map_or(0, HandlerSet::len)
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatch> {
        &self.dispatcher
    }
}

impl Drop for BotInstance {
    fn drop(&mut self) {
        if self.handlers.is_some() {
            let _ = self.teardown();
        }
    }
}

impl fmt::Debug for BotInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotInstance")
            .field("name", &self.name)
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::{Call, RecordingDispatcher};

    fn reply(text: &'static str) -> Handler {
        Handler::command(text, move |_| Ok(Some(text.to_string())))
    }

    #[test]
    fn adding_before_register_is_refused() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut bot = BotInstance::new("early", dispatcher.clone());

        assert_eq!(bot.add_handler(reply("fish")), None);
        assert!(!bot.is_registered());
        assert!(dispatcher.calls().is_empty());
    }

    #[test]
    fn handlers_are_registered_in_call_order() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut bot = BotInstance::new("ordered", dispatcher.clone());
        bot.register();

        let added = bot.add_handlers(vec![reply("a"), reply("b"), reply("c")]);

        assert_eq!(added, 3);
        let tokens = bot.handler_set().unwrap().tokens().to_vec();
        assert_eq!(dispatcher.added(), tokens);
        assert_eq!(dispatcher.inner().handler_count(), 3);
    }

    #[test]
    fn teardown_removes_in_add_order_and_uninitializes() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut bot = BotInstance::new("fish", dispatcher.clone());
        bot.register();
        bot.add_handlers(vec![reply("a"), reply("b")]);
        let tokens = bot.handler_set().unwrap().tokens().to_vec();

        bot.teardown().unwrap();

        assert_eq!(dispatcher.removed(), tokens);
        assert_eq!(dispatcher.inner().handler_count(), 0);
        assert!(!bot.is_registered());
        assert_eq!(bot.add_handler(reply("late")), None);
    }

    #[test]
    fn teardown_continues_past_failed_removal() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut bot = BotInstance::new("stubborn", dispatcher.clone());
        bot.register();
        let first = bot.add_handler(reply("a")).unwrap();
        let second = bot.add_handler(reply("b")).unwrap();
        let third = bot.add_handler(reply("c")).unwrap();
        dispatcher.fail_removal_of(second);

        let err = bot.teardown().unwrap_err();

        match err {
            PluginError::Teardown { name, failed } => {
                assert_eq!(name, "stubborn");
                assert_eq!(failed, vec![second]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dispatcher.inner().is_registered(first));
        assert!(!dispatcher.inner().is_registered(third));
        assert!(dispatcher.inner().is_registered(second));
    }

    #[test]
    fn dropping_a_registered_instance_removes_its_handlers() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        {
            let mut bot = BotInstance::new("scoped", dispatcher.clone());
            bot.register();
            bot.add_handler(reply("a"));
        }
        assert_eq!(dispatcher.inner().handler_count(), 0);
        assert!(matches!(dispatcher.calls().last(), Some(Call::Remove(_))));
    }
}
