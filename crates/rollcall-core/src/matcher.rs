//! Nearest-embedding identity matching.

use crate::types::{Embedding, EnrolledRecord, MatchError, MatchResult};

/// Strategy for comparing a query embedding against the enrolled set.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        enrolled: &[EnrolledRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbour matcher over a full linear scan.
///
/// A record is a candidate only when its distance is strictly below
/// `threshold`. The closest candidate wins; on an exact tie the record seen
/// first keeps the match. Records whose dimensionality differs from the
/// query are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        enrolled: &[EnrolledRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if query.is_empty() {
            return Err(MatchError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut best: Option<(usize, f32)> = None;

        for (i, record) in enrolled.iter().enumerate() {
            let distance = match query.distance(&record.embedding) {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(
                        identity = %record.identity,
                        error = %err,
                        "skipping enrolled record"
                    );
                    continue;
                }
            };

            // NaN never satisfies `<`, so it never becomes a candidate.
            if distance < threshold && best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        Ok(match best {
            Some((idx, distance)) => MatchResult::Matched {
                identity: enrolled[idx].identity.clone(),
                distance,
            },
            None => MatchResult::NoMatch,
        })
    }
}

/// Match `query` against `enrolled` with the Euclidean matcher.
pub fn find_match(
    query: &Embedding,
    enrolled: &[EnrolledRecord],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    EuclideanMatcher.compare(query, enrolled, threshold)
}
