//! Turn Document Store — the structured per-turn workspace on disk.
//!
//! Layout per profile:
//!
//! ```text
//! <root>/<profile>/
//!   turns/<turn_id>/
//!     context.md        # sectioned by phase (§0..§7)
//!     research.md
//!     toolresults.md
//!     transcript.json?
//!     closed.json       # present once the turn is closed
//!     artifacts/
//!   indexes/            # relational + warning sinks
//! ```

pub mod document;
pub mod index;
pub mod store;

pub use document::{Section, TurnOutcome};
pub use index::{IndexSink, JsonlIndexSink, NoopVectorSink, TurnIndexEntry, VectorSink};
pub use store::TurnStore;
