//! Handler tokens owned by one bot instance

use crate::domain::entities::HandlerToken;

/// Ordered tokens of the handlers a bot instance registered
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandlerSet {
    tokens: Vec<HandlerToken>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: HandlerToken) {
        self.tokens.push(token);
    }

    pub fn tokens(&self) -> &[HandlerToken] {
        &self.tokens
    }

    pub fn contains(&self, token: HandlerToken) -> bool {
        self.tokens.contains(&token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Take every token out in registration order, leaving the set empty
    pub fn drain(&mut self) -> Vec<HandlerToken> {
        std::mem::take(&mut self.tokens)
    }
}
