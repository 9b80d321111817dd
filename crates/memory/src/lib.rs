//! Store implementations for huddle.
//!
//! Production deployments bring their own [`huddle_core::Store`]; this crate
//! ships the in-process one used by tests and ephemeral sessions.

pub mod in_memory;

pub use in_memory::InMemoryStore;
