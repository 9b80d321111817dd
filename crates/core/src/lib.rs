//! # Huddle Core
//!
//! Domain types, traits, and error definitions for the huddle planning-meeting
//! engine. This crate has **no I/O**; it defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the orchestration core talks to is a trait here
//! (`Backend` for model endpoints, `Store` for persistence). Implementations
//! live in their respective crates, so tests can swap in scripted backends
//! and the in-memory store.

pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod agenda;
pub mod session;
pub mod extraction;
pub mod ids;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError};
pub use message::{ChatMessage, Role};
pub use provider::{
    Backend, Connection, ModelTier, ProviderRequest, ReplyStream, StreamChunk, SystemBlock,
    SystemPrompt, Usage,
};
pub use store::{MemoryRecord, ProjectActivity, RecordKind, Store, TaskRow};
pub use agenda::{AgendaItem, ItemStatus, ItemType, Priority};
pub use session::{Session, SessionEvent, SessionState, SessionType};
pub use extraction::{
    AddDirective, AgendaUpdates, Commitment, Decision, DeferDirective, ExtractedTask,
    ExtractionResult, Extractions, ProfileField, ResolveDirective, WaitingFor,
};
pub use ids::{IdGenerator, shared_sessions};
