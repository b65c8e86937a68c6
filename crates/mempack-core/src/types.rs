//! Shared value types: chunks, hits, statistics, deadlines.

use std::time::{Duration, Instant};

use crate::error::{MemPackError, MemPackResult};
use crate::meta::ChunkMeta;

/// A contiguous text fragment addressable by `chunk_id`.
///
/// Chunk ids are dense and equal insertion order; they never change after
/// build.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: u64,
    pub text: String,
    pub meta: ChunkMeta,
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: u64,
    /// `1 - distance` under the index metric (cosine).
    pub score: f32,
    pub text: String,
    pub meta: ChunkMeta,
}

/// Statistics reported by a completed build.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub chunks: u64,
    pub blocks: u32,
    pub vectors: u64,
    pub bytes_written: u64,
    pub build_time_ms: f64,
    pub embedding_time_ms: f64,
    /// uncompressed / compressed over all blocks.
    pub compression_ratio: f64,
}

/// Read-path statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieverStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_searches: u64,
    pub avg_search_ms: f64,
}

/// An optional wall-clock budget for a public call.
///
/// Expiry aborts the call with `Timeout` and leaves no partial state behind.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; checks always pass.
    #[must_use]
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Expire `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with `Timeout` once the budget is exhausted.
    pub fn check(&self) -> MemPackResult<()> {
        if self.is_expired() {
            Err(MemPackError::Timeout)
        } else {
            Ok(())
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_deadline_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired());
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(matches!(deadline.check(), Err(MemPackError::Timeout)));
    }

    #[test]
    fn generous_budget_passes() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        assert!(deadline.check().is_ok());
    }
}
