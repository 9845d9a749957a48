use crate::application::errors::DispatchError;
use crate::domain::entities::{Handler, HandlerToken};

/// Dispatch service - the routing table bot instances register their handlers with.
///
/// Implementations must accept add/remove calls while handlers are being invoked
/// for inbound events; a change only affects events dispatched afterwards.
pub trait Dispatch: Send + Sync {
    /// Make a handler live and return the token that revokes it
    fn add_handler(&self, handler: Handler) -> Result<HandlerToken, DispatchError>;

    /// Revoke a previously registered handler
    fn remove_handler(&self, token: HandlerToken) -> Result<(), DispatchError>;
}
