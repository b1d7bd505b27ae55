//! rollcall-core — face embedding matching for the attendance kiosk.
//!
//! Embeddings come from an external face-recognition program; this crate
//! owns the nearest-embedding matcher and the embedder contract.

pub mod embedder;
pub mod external;
pub mod matcher;
pub mod types;

pub use embedder::{EmbedError, EmbedderGate, EmbedderLoader, FaceEmbedder};
pub use external::{ExternalEmbedder, ExternalEmbedderConfig};
pub use matcher::{find_match, EuclideanMatcher, Matcher};
pub use types::{Embedding, EnrolledRecord, MatchError, MatchResult, DEFAULT_MATCH_THRESHOLD};
