//! Vector store abstraction.
//!
//! The engine keeps no durable state of its own: every enrolled sample lives in a
//! [`VectorStore`] as one point (sample id, unit vector, [`SampleMetadata`]).

use std::cmp::Ordering;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

/// Payload stored next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub speaker_id: String,
    /// Unix timestamp (seconds) of the enrollment that produced the sample.
    pub enrolled_at: u64,
}

impl SampleMetadata {
    /// Metadata for a sample enrolled now.
    pub fn now(speaker_id: impl Into<String>) -> Self {
        let enrolled_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            speaker_id: speaker_id.into(),
            enrolled_at,
        }
    }
}

/// A single result from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSample {
    pub sample_id: String,
    /// Cosine similarity to the query vector, in `[-1, 1]`.
    pub score: f32,
    pub metadata: SampleMetadata,
}

/// Ordering used for query results: descending score, ties broken by speaker id, then
/// sample id.
pub fn rank(a: &ScoredSample, b: &ScoredSample) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.metadata.speaker_id.cmp(&b.metadata.speaker_id))
        .then_with(|| a.sample_id.cmp(&b.sample_id))
}

/// A stored sample without its vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSample {
    pub sample_id: String,
    pub metadata: SampleMetadata,
}

/// Restricts a query or listing to the samples of one speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakerFilter<'a> {
    pub speaker_id: &'a str,
}

impl<'a> SpeakerFilter<'a> {
    pub fn new(speaker_id: &'a str) -> Self {
        Self { speaker_id }
    }

    pub fn matches(&self, metadata: &SampleMetadata) -> bool {
        metadata.speaker_id == self.speaker_id
    }
}

/// Interface to the similarity-search backend.
///
/// Guarantees every implementation must uphold:
/// - `upsert` is idempotent by id: writing an existing id replaces the point.
/// - `query` only observes committed writes.
/// - Vectors whose length differs from the store's dimensionality fail with `StoreRejected`.
/// - Connectivity faults and timeouts fail with `StoreUnavailable`.
///
/// All implementations must be safe for concurrent use (Send + Sync).
pub trait VectorStore: Send + Sync {
    /// Insert or replace the point `id`.
    fn upsert(&self, id: &str, vector: &[f32], metadata: &SampleMetadata) -> Result<()>;

    /// Return up to `top_k` points ordered by [`rank`]: descending cosine similarity, then
    /// ascending speaker id and sample id.
    ///
    /// When more points tie at the cut-off score than fit in `top_k`, which of them are returned
    /// is up to the backend. `MemoryStore` ranks every match before truncating; a remote store
    /// may cut a tied point with a smaller speaker id. Callers that need the full tie set must
    /// raise `top_k`.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<SpeakerFilter<'_>>,
    ) -> Result<Vec<ScoredSample>>;

    /// Remove a point by id. No error if the id does not exist.
    fn delete(&self, id: &str) -> Result<()>;

    /// Remove every point owned by `speaker_id`.
    fn delete_speaker(&self, speaker_id: &str) -> Result<()>;

    /// List up to `limit` stored samples (without vectors).
    fn samples(&self, filter: Option<SpeakerFilter<'_>>, limit: usize)
    -> Result<Vec<StoredSample>>;

    /// Remove every point while keeping the store usable.
    fn clear(&self) -> Result<()>;

    /// Dimensionality every stored and queried vector must have.
    fn dimension(&self) -> usize;
}

/// Run an idempotent store operation, retrying once after `backoff` if it fails with a
/// retryable error.
///
/// Never wrap enrollment's upsert in this: a request that timed out may still have committed.
pub fn retry_once<T>(op_name: &str, backoff: Duration, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(err) if err.is_retryable() => {
            warn!(op = op_name, error = %err, backoff_ms = backoff.as_millis() as u64, "retrying store call");
            thread::sleep(backoff);
            op()
        }
        res => res,
    }
}
