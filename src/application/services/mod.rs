//! Application services - Business logic orchestration

pub mod supervisor;

pub use supervisor::{GroupHandle, Supervisor};
