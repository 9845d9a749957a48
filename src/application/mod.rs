//! Application layer - Use cases and orchestration
//! 
//! This layer contains:
//! - Errors: Error types for every layer
//! - Messaging: Message parsing and dispatching
//! - Services: The supervisor running bot groups

pub mod errors;
pub mod messaging;
pub mod services;
