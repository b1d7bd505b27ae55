use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum Euclidean distance for two embeddings to be the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Face embedding vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding, when the embedder reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to `other`.
    ///
    /// Unlike a zipped sum, vectors of different length are rejected rather
    /// than compared over their common prefix.
    pub fn distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.values.len() != other.values.len() {
            return Err(MatchError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// An enrolled identity together with its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledRecord {
    pub identity: String,
    pub embedding: Embedding,
}

impl EnrolledRecord {
    pub fn new(identity: impl Into<String>, embedding: impl Into<Embedding>) -> Self {
        Self {
            identity: identity.into(),
            embedding: embedding.into(),
        }
    }
}

/// Outcome of matching a query embedding against the enrolled set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    NoMatch,
    /// `distance` is always strictly below the threshold used for the call.
    Matched { identity: String, distance: f32 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::NoMatch => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let a = Embedding::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.distance(&a.clone()).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_rejects_length_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(
            a.distance(&b),
            Err(MatchError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_distance_symmetric() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let a: Vec<f32> = (0..128).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let b: Vec<f32> = (0..128).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let a = Embedding::new(a);
            let b = Embedding::new(b);
            assert_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap());
        }
    }

    #[test]
    fn test_embedding_json_omits_missing_model_version() {
        let json = serde_json::to_string(&Embedding::new(vec![0.5])).unwrap();
        assert_eq!(json, r#"{"values":[0.5]}"#);
    }

    #[test]
    fn test_match_result_accessors() {
        let hit = MatchResult::Matched {
            identity: "u1".into(),
            distance: 0.1,
        };
        assert!(hit.is_match());
        assert_eq!(hit.identity(), Some("u1"));
        assert!(!MatchResult::NoMatch.is_match());
        assert_eq!(MatchResult::NoMatch.identity(), None);
    }
}
