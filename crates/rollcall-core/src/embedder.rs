//! Face embedder contract and its one-time initialization gate.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model directory not found: {0}")]
    ModelNotFound(String),
    #[error("embedder program not found: {0}")]
    ProgramNotFound(String),
    #[error("invalid frame: expected {expected} RGB bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("embedder failed: {0}")]
    EmbedderFailed(String),
    #[error("malformed embedder output: {0}")]
    MalformedOutput(#[from] serde_json::Error),
    #[error("embedder returned an empty descriptor")]
    EmptyDescriptor,
    #[error("embedder dimension changed: expected {expected}, got {actual}")]
    DimensionChanged { expected: usize, actual: usize },
    #[error("embedder did not finish within {0:?}")]
    TimedOut(std::time::Duration),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a packed RGB8 frame into a face embedding.
pub trait FaceEmbedder {
    /// Returns `Ok(None)` when no face is found in the frame.
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Embedding>, EmbedError>;
}

/// Builds a ready-to-use embedder (loads models, probes the backend).
pub trait EmbedderLoader {
    type Embedder: FaceEmbedder;

    fn load(&self) -> Result<Self::Embedder, EmbedError>;
}

/// Loads an embedder exactly once and pins its output dimensionality.
///
/// A failed load is not remembered, so a later `ensure_ready` retries.
pub struct EmbedderGate<L: EmbedderLoader> {
    loader: L,
    embedder: Option<L::Embedder>,
    dim: Option<usize>,
}

impl<L: EmbedderLoader> EmbedderGate<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            embedder: None,
            dim: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.embedder.is_some()
    }

    /// Dimensionality of the embeddings produced so far, if any.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn ensure_ready(&mut self) -> Result<&mut L::Embedder, EmbedError> {
        let embedder = match self.embedder.take() {
            Some(e) => e,
            None => {
                let e = self.loader.load()?;
                tracing::info!("face embedder loaded");
                e
            }
        };
        Ok(self.embedder.insert(embedder))
    }

    /// Embed a frame, loading the embedder first if needed.
    pub fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Embedding>, EmbedError> {
        let expected_dim = self.dim;
        let Some(embedding) = self.ensure_ready()?.embed(rgb, width, height)? else {
            return Ok(None);
        };

        if embedding.is_empty() {
            return Err(EmbedError::EmptyDescriptor);
        }
        match expected_dim {
            Some(expected) if expected != embedding.dim() => {
                return Err(EmbedError::DimensionChanged {
                    expected,
                    actual: embedding.dim(),
                });
            }
            Some(_) => {}
            None => {
                tracing::debug!(dim = embedding.dim(), "embedder dimension pinned");
                self.dim = Some(embedding.dim());
            }
        }
        Ok(Some(embedding))
    }
}
