//! LLM collaborator interface.
//!
//! The pipeline treats the LLM endpoint as a shared bounded-concurrency
//! resource: a single [`LlmClient`] behind the [`LlmRegistry`] semaphore.
//! Prompt texts are owned by the phase runners; this crate only moves
//! messages over the wire.

pub mod openai_compat;
pub mod registry;
pub mod roles;
pub mod scripted;
pub mod traits;

pub use openai_compat::OpenAiCompatClient;
pub use registry::LlmRegistry;
pub use roles::Role;
pub use scripted::ScriptedClient;
pub use traits::{ChatMessage, ChatRequest, ChatResponse, ChatRole, LlmClient, Usage};
