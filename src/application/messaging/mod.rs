//! Message handling - Parsing and routing of inbound messages

pub mod dispatcher;
pub mod parser;

pub use dispatcher::MessageDispatcher;
pub use parser::MessageParser;
