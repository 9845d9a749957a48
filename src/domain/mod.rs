//! Domain layer - Core objects shared by the plugin host
//! 
//! This layer contains:
//! - Entities: Messages and handler descriptors
//! - Traits: Abstractions for infrastructure (Bot transport, Dispatch service)

pub mod entities;
pub mod traits;
