//! The embedding backend seam.
//!
//! The embedding model itself is external: the core only requires a backend
//! that turns a batch of texts into a float32 matrix. Backends must be
//! `Send + Sync` so the build pipeline can fan batches out across worker
//! threads.

use crate::error::{MemPackError, MemPackResult};

/// A pluggable embedding backend.
///
/// Implementations return one vector per input text, all of dimension
/// `dim()`. Outputs do not need to be normalized; callers apply
/// [`l2_normalize`] before indexing. Backend failures are surfaced verbatim
/// as `EmbedBackendError`.
pub trait EmbeddingBackend: Send + Sync {
    /// Encode a batch of texts into a float32 matrix.
    fn encode(&self, texts: &[&str]) -> MemPackResult<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn dim(&self) -> usize;

    /// Human-readable backend name, recorded in the pack config.
    fn name(&self) -> &str;
}

/// Normalize `vector` to unit L2 length in place.
///
/// Zero vectors are left untouched so the caller never divides by zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = norm_sq.sqrt().recip();
        for v in vector.iter_mut() {
            *v *= inv;
        }
    }
}

/// Deterministic offline embedding backend.
///
/// Hashes whitespace-separated lowercased tokens into a signed
/// random-projection space: each token contributes to a handful of
/// dimensions chosen by its XXH3 hash. Two texts sharing vocabulary land
/// near each other, which is enough for tests and for the CLI when no model
/// backend is wired up. Same text, same dim → same vector, always.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

/// Dimensions touched per token.
const PROJECTIONS_PER_TOKEN: usize = 4;

impl HashingEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut state = xxhash_rust::xxh3::xxh3_64(token.as_bytes());
            for _ in 0..PROJECTIONS_PER_TOKEN {
                let idx = (state % self.dim as u64) as usize;
                let sign = if (state >> 63) == 0 { 1.0 } else { -1.0 };
                vector[idx] += sign;
                // Advance with a fixed odd multiplier so each projection
                // lands independently.
                state = state.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn encode(&self, texts: &[&str]) -> MemPackResult<Vec<Vec<f32>>> {
        if self.dim == 0 {
            return Err(MemPackError::EmbedBackend {
                backend: self.name().to_string(),
                message: "dimension cannot be 0".to_string(),
            });
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "hashing-v1"
    }
}
