// Defensive programming lints - prevent panics and unsafe patterns
#![deny(clippy::indexing_slicing)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::fallible_impl_from)]
#![warn(clippy::wildcard_enum_match_arm)]
// Idiomatic Rust lints
#![warn(clippy::needless_return)]
#![warn(clippy::let_and_return)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::redundant_closure_for_method_calls)]
#![warn(clippy::map_unwrap_or)]

//! Retrieval-augmented context injection for chat clients.
//!
//! Fetches supporting passages from a RAGFlow-compatible retrieval service
//! and splices them into the next prompt without touching the persisted
//! conversation.

pub mod agents;
pub mod app;
pub mod config;
pub mod error;
pub mod injection;
pub mod query;
pub mod services;

pub use config::{ConversationMode, InjectionMode, Settings};
pub use error::{FailureKind, RetrievalError, RetrievalNotice};
pub use injection::{
    ContextInjector, ConversationId, InjectorStatus, InputDecision, PromptBuild, PromptOutcome,
};
pub use query::Query;
pub use services::{Chunk, RagflowClient, RetrievalBackend, RetrievalResult};
