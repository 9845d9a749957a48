//! Domain entities - Core business objects with no external dependencies

pub mod handler;
pub mod message;

pub use handler::{Handler, HandlerFn, HandlerKind, HandlerResult, HandlerToken};
pub use message::{Content, Message, Sender};
