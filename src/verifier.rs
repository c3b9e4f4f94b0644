//! High-level API for enrolling and verifying speakers.
//!
//! We expose a single entry point (`Verifier`) that owns the long-lived resources:
//! - the embedding client (backend handle + worker bound)
//! - the vector store connection
//! - the deployment `Config`
//!
//! The intent is:
//! - We connect once at startup (the store connection is an explicit object, not a global).
//! - We share the `Verifier` across requests; every method takes `&self`.
//! - Dropping the `Verifier` at shutdown releases the connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::audio::{AudioIngest, CanonicalAudio};
use crate::backend::EmbeddingBackend;
use crate::backends::http::HttpEmbeddingBackend;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::enroll::{EnrollmentReceipt, EnrollmentService, normalize_speaker_id};
use crate::store::{SpeakerFilter, StoredSample, VectorStore, retry_once};
use crate::stores::qdrant::QdrantStore;
use crate::verify::{VerificationResult, VerificationService};
use crate::{Error, Result};

/// A speaker and the samples currently enrolled for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeakerProfile {
    pub speaker_id: String,
    pub sample_ids: Vec<String>,
    /// Unix timestamp (seconds) of the speaker's earliest enrolled sample.
    pub created_at: u64,
}

/// The main enrollment/verification entry point.
pub struct Verifier<B: EmbeddingBackend, S: VectorStore + ?Sized> {
    config: Config,
    store: Arc<S>,
    enrollment: EnrollmentService<B, S>,
    verification: VerificationService<B, S>,
}

impl Verifier<HttpEmbeddingBackend, QdrantStore> {
    /// Connect to the configured HTTP embedding backend and Qdrant collection.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let backend =
            HttpEmbeddingBackend::new(&config.embedding_backend.url, config.request_timeout())
                .map_err(|err| Error::Config(format!("{err:#}")))?;
        let store = QdrantStore::connect(
            &config.store_connection,
            config.embedding_dimensionality,
            config.request_timeout(),
        )?;

        Self::with_parts(config, backend, Arc::new(store))
    }
}

impl<B, S> Verifier<B, S>
where
    B: EmbeddingBackend,
    S: VectorStore + ?Sized,
{
    /// Assemble a `Verifier` from an already-constructed backend and store.
    ///
    /// We fail fast if the store's dimensionality disagrees with the config, so a mismatch is
    /// caught at startup instead of on the first enrollment.
    pub fn with_parts(config: Config, backend: B, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        if store.dimension() != config.embedding_dimensionality {
            return Err(Error::Config(format!(
                "store dimensionality {} does not match embedding_dimensionality {}",
                store.dimension(),
                config.embedding_dimensionality
            )));
        }

        let ingest = AudioIngest::new(config.sample_rate_hz);
        let embedder = Arc::new(EmbeddingClient::new(
            backend,
            config.embedding_dimensionality,
            config.workers(),
        ));

        let enrollment =
            EnrollmentService::new(ingest, Arc::clone(&embedder), Arc::clone(&store));
        let verification = VerificationService::new(
            ingest,
            embedder,
            Arc::clone(&store),
            config.retry_backoff(),
        );

        info!(
            threshold = config.similarity_threshold,
            dimension = config.embedding_dimensionality,
            top_k = config.top_k,
            workers = config.workers(),
            "verifier ready"
        );

        Ok(Self {
            config,
            store,
            enrollment,
            verification,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Register `audio` as a new reference sample for `speaker_id`.
    pub fn enroll(&self, speaker_id: &str, audio: &[u8]) -> Result<EnrollmentReceipt> {
        self.enrollment.enroll(speaker_id, audio)
    }

    /// Validator for the audio format this verifier accepts.
    pub fn audio_ingest(&self) -> AudioIngest {
        AudioIngest::new(self.config.sample_rate_hz)
    }

    /// Enroll audio that was already ingested, for example with
    /// [`AudioIngest::ingest_file`].
    pub fn enroll_audio(
        &self,
        speaker_id: &str,
        audio: &CanonicalAudio,
    ) -> Result<EnrollmentReceipt> {
        self.enrollment.enroll_audio(speaker_id, audio)
    }

    /// Verify or identify already-ingested audio with the configured `top_k` and threshold.
    pub fn verify_audio(
        &self,
        audio: &CanonicalAudio,
        claimed_speaker_id: Option<&str>,
    ) -> Result<VerificationResult> {
        self.verification.verify_audio(
            audio,
            claimed_speaker_id,
            self.config.top_k,
            self.config.similarity_threshold,
        )
    }

    /// Verify against `claimed_speaker_id`, or identify when it is `None`, using the configured
    /// `top_k` and threshold.
    pub fn verify(
        &self,
        audio: &[u8],
        claimed_speaker_id: Option<&str>,
    ) -> Result<VerificationResult> {
        self.verify_with(
            audio,
            claimed_speaker_id,
            self.config.top_k,
            self.config.similarity_threshold,
        )
    }

    /// Like [`Verifier::verify`] with explicit search breadth and threshold.
    pub fn verify_with(
        &self,
        audio: &[u8],
        claimed_speaker_id: Option<&str>,
        top_k: usize,
        threshold: f32,
    ) -> Result<VerificationResult> {
        self.verification
            .verify(audio, claimed_speaker_id, top_k, threshold)
    }

    /// Remove one enrolled sample.
    pub fn delete_sample(&self, sample_id: &str) -> Result<()> {
        retry_once("delete", self.config.retry_backoff(), || {
            self.store.delete(sample_id)
        })?;
        info!(sample_id, "sample deleted");
        Ok(())
    }

    /// Remove a speaker and all of its samples.
    pub fn delete_speaker(&self, speaker_id: &str) -> Result<()> {
        let speaker_id = normalize_speaker_id(speaker_id)?;
        retry_once("delete_speaker", self.config.retry_backoff(), || {
            self.store.delete_speaker(speaker_id)
        })?;
        info!(speaker_id, "speaker deleted");
        Ok(())
    }

    /// Enrolled speakers, built from up to `sample_limit` stored samples, ordered by id.
    pub fn speakers(&self, sample_limit: usize) -> Result<Vec<SpeakerProfile>> {
        let samples = retry_once("samples", self.config.retry_backoff(), || {
            self.store.samples(None, sample_limit)
        })?;
        Ok(group_profiles(samples))
    }

    /// Profile of a single speaker, or `SpeakerNotFound` if it has no samples.
    pub fn speaker(&self, speaker_id: &str, sample_limit: usize) -> Result<SpeakerProfile> {
        let speaker_id = normalize_speaker_id(speaker_id)?;
        let samples = retry_once("samples", self.config.retry_backoff(), || {
            self.store
                .samples(Some(SpeakerFilter::new(speaker_id)), sample_limit)
        })?;
        group_profiles(samples)
            .into_iter()
            .next()
            .ok_or_else(|| Error::SpeakerNotFound(speaker_id.to_owned()))
    }

    /// Remove every enrolled sample.
    pub fn clear(&self) -> Result<()> {
        retry_once("clear", self.config.retry_backoff(), || self.store.clear())?;
        info!("all enrollments cleared");
        Ok(())
    }
}

fn group_profiles(samples: Vec<StoredSample>) -> Vec<SpeakerProfile> {
    let mut by_speaker: BTreeMap<String, SpeakerProfile> = BTreeMap::new();
    for sample in samples {
        let profile = by_speaker
            .entry(sample.metadata.speaker_id.clone())
            .or_insert_with(|| SpeakerProfile {
                speaker_id: sample.metadata.speaker_id.clone(),
                sample_ids: Vec::new(),
                created_at: sample.metadata.enrolled_at,
            });
        profile.created_at = profile.created_at.min(sample.metadata.enrolled_at);
        profile.sample_ids.push(sample.sample_id);
    }
    by_speaker.into_values().collect()
}
