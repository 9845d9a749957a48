//! Test doubles shared by the plugin and registry tests

use std::collections::HashSet;
use std::sync::Mutex;

use crate::application::errors::DispatchError;
use crate::application::messaging::MessageDispatcher;
use crate::domain::entities::{Handler, HandlerToken};
use crate::domain::traits::Dispatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Add(HandlerToken),
    Remove(HandlerToken),
}

/// Dispatcher that records every add/remove and can be told to refuse removals
#[derive(Default)]
pub struct RecordingDispatcher {
    inner: MessageDispatcher,
    calls: Mutex<Vec<Call>>,
    refuse: Mutex<HashSet<HandlerToken>>,
}

impl RecordingDispatcher {
    pub fn inner(&self) -> &MessageDispatcher {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<HandlerToken> {
        self.calls().into_iter()
            .filter_map(|c| match c {
                Call::Add(t) => Some(t),
                Call::Remove(_) => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<HandlerToken> {
        self.calls().into_iter()
            .filter_map(|c| match c {
                Call::Remove(t) => Some(t),
                Call::Add(_) => None,
            })
            .collect()
    }

    pub fn fail_removal_of(&self, token: HandlerToken) {
        self.refuse.lock().unwrap().insert(token);
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Dispatch for RecordingDispatcher {
    fn add_handler(&self, handler: Handler) -> Result<HandlerToken, DispatchError> {
        let token = self.inner.add_handler(handler)?;
        self.calls.lock().unwrap().push(Call::Add(token));
        Ok(token)
    }

    fn remove_handler(&self, token: HandlerToken) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(Call::Remove(token));
        if self.refuse.lock().unwrap().contains(&token) {
            return Err(DispatchError::Internal(format!("refusing to remove {}", token)));
        }
        self.inner.remove_handler(token)
    }
}
