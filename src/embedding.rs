//! Speaker embeddings and the client that produces them.
//!
//! `EmbeddingClient` is the only place an [`Embedding`] can be constructed from model output:
//! - it bounds concurrent backend calls with [`EmbedPermits`]
//! - it checks the vector's dimensionality against the deployment's fixed size
//! - it unit-normalizes the vector so cosine similarity is a plain dot product downstream

use tracing::debug;

use crate::audio::CanonicalAudio;
use crate::backend::EmbeddingBackend;
use crate::pool::EmbedPermits;
use crate::{Error, Result};

/// A unit-length (L2 norm = 1) speaker vector of the process-wide dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Normalize a raw vector to unit length.
    ///
    /// Fails when the vector is empty, contains non-finite values, or has zero norm (no
    /// direction to compare against). The norm is accumulated in `f64` in index order so the
    /// result is reproducible for identical input.
    pub fn from_raw(mut values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::EmbeddingExtraction("backend returned an empty vector".into()));
        }
        if values.iter().any(|x| !x.is_finite()) {
            return Err(Error::EmbeddingExtraction(
                "backend returned non-finite values".into(),
            ));
        }

        let norm = values
            .iter()
            .map(|&x| (x as f64) * (x as f64))
            .sum::<f64>()
            .sqrt();
        if norm == 0.0 {
            return Err(Error::EmbeddingExtraction(
                "backend returned a zero vector".into(),
            ));
        }

        let scale = 1.0 / norm;
        for x in values.iter_mut() {
            *x = ((*x as f64) * scale) as f32;
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity with another embedding, clamped to `[-1, 1]`.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        cosine_of_unit(&self.0, &other.0)
    }
}

/// Dot product of two unit vectors, clamped to the cosine range.
///
/// Mismatched lengths score `-1.0`; callers are expected to have rejected them earlier.
pub fn cosine_of_unit(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return -1.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum();
    dot.clamp(-1.0, 1.0) as f32
}

/// Wraps an [`EmbeddingBackend`] with dimensionality checks, normalization and a worker bound.
pub struct EmbeddingClient<B> {
    backend: B,
    dimension: usize,
    permits: EmbedPermits,
}

impl<B: EmbeddingBackend> EmbeddingClient<B> {
    /// Create a client that expects `dimension`-length vectors and allows `workers` concurrent
    /// backend calls.
    pub fn new(backend: B, dimension: usize, workers: usize) -> Self {
        Self {
            backend,
            dimension,
            permits: EmbedPermits::new(workers),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn permits(&self) -> &EmbedPermits {
        &self.permits
    }

    /// Compute the unit-normalized embedding for validated audio.
    ///
    /// Backend errors are surfaced as `EmbeddingExtraction` and never retried.
    pub fn embed(&self, audio: &CanonicalAudio) -> Result<Embedding> {
        let raw = {
            let _permit = self.permits.acquire()?;
            self.backend
                .embed(audio)
                .map_err(|err| Error::EmbeddingExtraction(format!("{err:#}")))?
        };

        if raw.len() != self.dimension {
            return Err(Error::EmbeddingExtraction(format!(
                "expected {}-dimensional embedding, backend '{}' returned {}",
                self.dimension,
                self.backend.name(),
                raw.len()
            )));
        }

        let embedding = Embedding::from_raw(raw)?;
        debug!(
            backend = self.backend.name(),
            dimension = self.dimension,
            seconds = audio.duration_seconds(),
            "computed embedding"
        );
        Ok(embedding)
    }
}
