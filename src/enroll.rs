use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::{AudioIngest, CanonicalAudio};
use crate::backend::EmbeddingBackend;
use crate::embedding::EmbeddingClient;
use crate::store::{SampleMetadata, VectorStore};
use crate::{Error, Result};

/// Outcome of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentReceipt {
    pub speaker_id: String,
    pub sample_id: String,
}

/// Registers reference samples for speaker identities.
///
/// Every call appends one new sample. We never deduplicate and never average samples into a
/// centroid: verification matches against whichever enrolled sample is closest, which keeps
/// recordings made in different conditions useful.
pub struct EnrollmentService<B, S: ?Sized> {
    ingest: AudioIngest,
    embedder: Arc<EmbeddingClient<B>>,
    store: Arc<S>,
}

impl<B, S> EnrollmentService<B, S>
where
    B: EmbeddingBackend,
    S: VectorStore + ?Sized,
{
    pub fn new(ingest: AudioIngest, embedder: Arc<EmbeddingClient<B>>, store: Arc<S>) -> Self {
        Self {
            ingest,
            embedder,
            store,
        }
    }

    /// Enroll one recording for `speaker_id` and return the new sample's id.
    ///
    /// The only write is a single-point upsert, so on failure nothing is left behind. The
    /// upsert is not retried: after a timeout the point may already be committed, and a retry
    /// under a new id would duplicate it.
    pub fn enroll(&self, speaker_id: &str, audio: &[u8]) -> Result<EnrollmentReceipt> {
        let speaker_id = normalize_speaker_id(speaker_id)?;
        let audio = self.ingest.ingest(audio)?;
        self.store_sample(speaker_id, &audio)
    }

    /// Like [`EnrollmentService::enroll`] for audio that was already ingested.
    pub fn enroll_audio(
        &self,
        speaker_id: &str,
        audio: &CanonicalAudio,
    ) -> Result<EnrollmentReceipt> {
        let speaker_id = normalize_speaker_id(speaker_id)?;
        self.ingest.check(audio)?;
        self.store_sample(speaker_id, audio)
    }

    fn store_sample(&self, speaker_id: &str, audio: &CanonicalAudio) -> Result<EnrollmentReceipt> {
        let embedding = self.embedder.embed(audio)?;

        let sample_id = Uuid::new_v4().to_string();
        let metadata = SampleMetadata::now(speaker_id);

        if let Err(err) = self
            .store
            .upsert(&sample_id, embedding.as_slice(), &metadata)
        {
            warn!(speaker_id, error = %err, "enrollment write failed");
            return Err(err);
        }

        info!(speaker_id, sample_id = %sample_id, "speaker enrolled");
        Ok(EnrollmentReceipt {
            speaker_id: speaker_id.to_owned(),
            sample_id,
        })
    }
}

/// Speaker ids are stored trimmed; blank ids are refused.
pub fn normalize_speaker_id(speaker_id: &str) -> Result<&str> {
    let trimmed = speaker_id.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidSpeakerId(
            "speaker id must not be empty".into(),
        ));
    }
    Ok(trimmed)
}
