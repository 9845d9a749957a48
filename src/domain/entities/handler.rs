use std::fmt;
use std::sync::Arc;

use super::{Content, Message};
use crate::application::errors::BotError;

/// Result of a handler invocation. `None` means the handler chose not to reply.
pub type HandlerResult = Result<Option<String>, BotError>;

/// Handler callback type
pub type HandlerFn = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync>;

/// Token returned by the dispatch service when a handler is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerToken(pub u64);

impl fmt::Display for HandlerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which events a handler receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// `/name` commands, matched case-insensitively
    Command(String),
    /// Any message that is not a command
    Text,
}

impl HandlerKind {
    pub fn matches(&self, content: &Content) -> bool {
        match (self, content) {
            (HandlerKind::Command(expected), Content::Command { name, .. }) => {
                expected.eq_ignore_ascii_case(name)
            }
            (HandlerKind::Text, Content::Text(_)) => true,
            _ => false,
        }
    }
}

/// Handler descriptor passed to the dispatch service
#[derive(Clone)]
pub struct Handler {
    pub kind: HandlerKind,
    callback: HandlerFn,
}

impl Handler {
    pub fn new<F>(kind: HandlerKind, callback: F) -> Self
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            kind,
            callback: Arc::new(callback),
        }
    }

    pub fn command<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(HandlerKind::Command(name.into()), callback)
    }

    pub fn text<F>(callback: F) -> Self
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(HandlerKind::Text, callback)
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.kind.matches(&message.content)
    }

    pub fn call(&self, message: &Message) -> HandlerResult {
        (self.callback)(message)
    }

    /// Wrap the callback so it keeps `guard` alive for as long as the handler exists.
    ///
    /// Handlers built by native plugins point into the plugin's library; the guard
    /// keeps that library mapped even if the handler outlives its bot instance.
    pub fn retaining<T>(self, guard: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let retained = Retained {
            callback: self.callback,
            _guard: guard,
        };
        Self {
            kind: self.kind,
            callback: Arc::new(move |message: &Message| retained.call(message)),
        }
    }
}

/// A callback bundled with the guard it depends on. Fields drop in
/// declaration order: the callback is always released before the guard.
struct Retained<T: ?Sized> {
    callback: HandlerFn,
    _guard: Arc<T>,
}

impl<T: ?Sized> Retained<T> {
    fn call(&self, message: &Message) -> HandlerResult {
        (self.callback)(message)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HandlerKind::Command(name) => write!(f, "CommandHandler(/{})", name),
            HandlerKind::Text => write!(f, "TextHandler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records its label when dropped
    struct DropLog {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for DropLog {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.label);
        }
    }

    #[test]
    fn command_matching_ignores_case() {
        let handler = Handler::command("fish", |_| Ok(None));
        let message = Message::from_command("1", "FISH", Vec::new());
        assert!(handler.matches(&message));
        assert!(!handler.matches(&Message::from_text("1", "fish")));
    }

    #[test]
    fn retained_guard_outlives_the_callback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let captured = DropLog { label: "callback", log: Arc::clone(&log) };
        let guard = Arc::new(DropLog { label: "guard", log: Arc::clone(&log) });

        let handler = Handler::command("fish", move |_| {
            let _keep = &captured;
            Ok(Some("fish".to_string()))
        })
        .retaining(guard);

        let in_flight = handler.clone();
        drop(handler);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(in_flight.call(&Message::from_command("1", "fish", Vec::new())).unwrap(), Some("fish".to_string()));

        drop(in_flight);
        assert_eq!(*log.lock().unwrap(), vec!["callback", "guard"]);
    }
}
