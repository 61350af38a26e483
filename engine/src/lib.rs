#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Quipline engine: joke generation, guardrail validation, and audit
//! persistence behind a per-client admission layer.

/// Request/response contracts and the durable audit record.
#[path = "../contracts.rs"]
pub mod contracts;

/// Remote completion endpoint adapter.
#[path = "../completion.rs"]
pub mod completion;

/// Joke generation stage.
#[path = "../generator.rs"]
pub mod generator;

/// Model-backed safety check stage.
#[path = "../guardrail.rs"]
pub mod guardrail;

/// Per-client fixed-window admission control.
#[path = "../admission.rs"]
pub mod admission;

/// Append-only audit persistence and its read-side archive.
#[path = "../audit.rs"]
pub mod audit;

/// Pipeline orchestration.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use admission::{RateLimiter, DEFAULT_QUOTA, DEFAULT_WINDOW};
pub use audit::{AuditArchive, AuditLogWriter, AuditSession, AuditStore, AuditStoreError};
pub use completion::{
    ChatMessage, CompletionClient, CompletionError, CompletionRequest, HttpCompletionClient,
    LoopbackCompletionClient, MessageRole,
};
pub use contracts::{
    AuditRecord, JokeRequest, JokeResponse, JokeTone, ValidationError, MAX_TOPIC_CHARS,
};
pub use generator::{GeneratorError, JokeGenerator};
pub use guardrail::GuardrailValidator;
pub use pipeline::{JokePipeline, PipelineError};
