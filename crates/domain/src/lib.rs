//! Shared types for the Pandora turn-orchestration engine.
//!
//! Everything that crosses a crate boundary lives here: the error taxonomy,
//! identifier helpers, the pipeline phase model, trace events, plans and
//! evidence, policy records, research types, and the configuration tree.

pub mod cancel;
pub mod config;
pub mod error;
pub mod ids;
pub mod plan;
pub mod policy;
pub mod research;
pub mod trace;

pub use cancel::CancelToken;
pub use error::{Error, Result, TimeoutKind};
