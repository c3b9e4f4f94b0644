//! Accept/reject decisions for probe utterances.
//!
//! Two modes share one code path:
//! - verification: a claimed speaker is given and the query only sees that speaker's samples
//! - identification: no claim, the query searches every enrolled sample
//!
//! Multiple samples per speaker are aggregated by taking the best-scoring sample (max over
//! samples), never by averaging.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{AudioIngest, CanonicalAudio};
use crate::backend::EmbeddingBackend;
use crate::embedding::EmbeddingClient;
use crate::enroll::normalize_speaker_id;
use crate::store::{ScoredSample, SpeakerFilter, VectorStore, rank, retry_once};
use crate::{Error, Result};

/// Outcome of a verification or identification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub accept: bool,
    /// Speaker owning the best-matching sample.
    pub speaker_id: String,
    /// Cosine similarity of the best-matching sample, in `[-1, 1]`.
    pub score: f32,
    pub sample_id: String,
    /// Threshold the score was compared against.
    pub threshold: f32,
}

/// Pick the best candidate: highest score, ties broken by the lexicographically smallest
/// speaker id (then sample id).
pub fn select_best(candidates: &[ScoredSample]) -> Option<&ScoredSample> {
    candidates.iter().min_by(|a, b| rank(a, b))
}

/// Apply the acceptance rule to a candidate list.
///
/// `accept` requires `score >= threshold`, and, when a claim is given, that the best match
/// belongs to the claimed speaker. An empty candidate list is an explicit reject.
pub fn decide(
    candidates: &[ScoredSample],
    claimed_speaker_id: Option<&str>,
    threshold: f32,
) -> Result<VerificationResult> {
    let Some(best) = select_best(candidates) else {
        return Err(match claimed_speaker_id {
            Some(claimed) => Error::SpeakerNotFound(claimed.to_owned()),
            None => Error::NoEnrolledSpeakers,
        });
    };

    let identity_ok = claimed_speaker_id.is_none_or(|claimed| best.metadata.speaker_id == claimed);

    Ok(VerificationResult {
        accept: best.score >= threshold && identity_ok,
        speaker_id: best.metadata.speaker_id.clone(),
        score: best.score,
        sample_id: best.sample_id.clone(),
        threshold,
    })
}

/// Decides accept/reject for probe utterances against enrolled samples.
pub struct VerificationService<B, S: ?Sized> {
    ingest: AudioIngest,
    embedder: Arc<EmbeddingClient<B>>,
    store: Arc<S>,
    retry_backoff: Duration,
}

impl<B, S> VerificationService<B, S>
where
    B: EmbeddingBackend,
    S: VectorStore + ?Sized,
{
    pub fn new(
        ingest: AudioIngest,
        embedder: Arc<EmbeddingClient<B>>,
        store: Arc<S>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            ingest,
            embedder,
            store,
            retry_backoff,
        }
    }

    /// Verify (or, without a claim, identify) the speaker of `audio`.
    ///
    /// The store query is the only side effect and is retried once if the store is briefly
    /// unavailable.
    pub fn verify(
        &self,
        audio: &[u8],
        claimed_speaker_id: Option<&str>,
        top_k: usize,
        threshold: f32,
    ) -> Result<VerificationResult> {
        check_search(top_k, threshold)?;
        let claimed = claimed_speaker_id.map(normalize_speaker_id).transpose()?;
        let audio = self.ingest.ingest(audio)?;
        self.score(&audio, claimed, top_k, threshold)
    }

    /// Like [`VerificationService::verify`] for audio that was already ingested.
    pub fn verify_audio(
        &self,
        audio: &CanonicalAudio,
        claimed_speaker_id: Option<&str>,
        top_k: usize,
        threshold: f32,
    ) -> Result<VerificationResult> {
        check_search(top_k, threshold)?;
        let claimed = claimed_speaker_id.map(normalize_speaker_id).transpose()?;
        self.ingest.check(audio)?;
        self.score(audio, claimed, top_k, threshold)
    }

    fn score(
        &self,
        audio: &CanonicalAudio,
        claimed: Option<&str>,
        top_k: usize,
        threshold: f32,
    ) -> Result<VerificationResult> {
        let probe = self.embedder.embed(audio)?;

        let filter = claimed.map(SpeakerFilter::new);
        let candidates = retry_once("query", self.retry_backoff, || {
            self.store.query(probe.as_slice(), top_k, filter)
        })?;
        debug!(
            candidates = candidates.len(),
            claimed = claimed.unwrap_or("-"),
            "verification candidates"
        );

        let result = match decide(&candidates, claimed, threshold) {
            Ok(result) => result,
            Err(err) => {
                warn!(claimed = claimed.unwrap_or("-"), error = %err, "verification rejected");
                return Err(err);
            }
        };

        info!(
            accept = result.accept,
            speaker_id = %result.speaker_id,
            score = result.score,
            threshold,
            claimed = claimed.unwrap_or("-"),
            "verification decided"
        );
        Ok(result)
    }
}

fn check_search(top_k: usize, threshold: f32) -> Result<()> {
    if top_k == 0 {
        return Err(Error::Config("top_k must be greater than zero".into()));
    }
    if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
        return Err(Error::Config(format!(
            "threshold must be within [-1, 1], got {threshold}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleMetadata;

    fn candidate(sample_id: &str, speaker_id: &str, score: f32) -> ScoredSample {
        ScoredSample {
            sample_id: sample_id.to_owned(),
            score,
            metadata: SampleMetadata {
                speaker_id: speaker_id.to_owned(),
                enrolled_at: 0,
            },
        }
    }

    #[test]
    fn score_equal_to_threshold_is_accepted() -> anyhow::Result<()> {
        let result = decide(&[candidate("s1", "alice", 0.75)], Some("alice"), 0.75)?;
        assert!(result.accept);
        assert_eq!(result.score, 0.75);
        assert_eq!(result.threshold, 0.75);
        Ok(())
    }

    #[test]
    fn score_below_threshold_is_rejected() -> anyhow::Result<()> {
        let below = f32::from_bits(0.75f32.to_bits() - 1);
        let result = decide(&[candidate("s1", "alice", below)], Some("alice"), 0.75)?;
        assert!(!result.accept);
        assert_eq!(result.speaker_id, "alice");
        Ok(())
    }

    #[test]
    fn best_candidate_wins_not_the_average() -> anyhow::Result<()> {
        let candidates = [
            candidate("weak", "alice", 0.40),
            candidate("strong", "alice", 0.90),
        ];
        let result = decide(&candidates, Some("alice"), 0.80)?;
        assert!(result.accept);
        assert_eq!(result.sample_id, "strong");
        assert_eq!(result.score, 0.90);
        Ok(())
    }

    #[test]
    fn ties_go_to_smallest_speaker_id() -> anyhow::Result<()> {
        let candidates = [
            candidate("s-zoe", "zoe", 0.8),
            candidate("s-bob", "bob", 0.8),
            candidate("s-eve", "eve", 0.8),
            candidate("s-amy", "amy", 0.7),
        ];
        let result = decide(&candidates, None, 0.5)?;
        assert_eq!(result.speaker_id, "bob");
        assert_eq!(result.sample_id, "s-bob");
        Ok(())
    }

    #[test]
    fn ties_within_a_speaker_go_to_smallest_sample_id() {
        let candidates = [candidate("b", "alice", 0.8), candidate("a", "alice", 0.8)];
        let best = select_best(&candidates).expect("non-empty");
        assert_eq!(best.sample_id, "a");
    }

    #[test]
    fn claim_must_match_best_speaker() -> anyhow::Result<()> {
        let result = decide(&[candidate("s1", "mallory", 0.99)], Some("alice"), 0.5)?;
        assert!(!result.accept);
        assert_eq!(result.speaker_id, "mallory");
        Ok(())
    }

    #[test]
    fn identification_accepts_best_match_over_threshold() -> anyhow::Result<()> {
        let candidates = [candidate("a1", "alice", 0.3), candidate("b1", "bob", 0.85)];
        let result = decide(&candidates, None, 0.8)?;
        assert!(result.accept);
        assert_eq!(result.speaker_id, "bob");
        Ok(())
    }

    #[test]
    fn empty_candidates_are_explicit_rejects() {
        assert!(matches!(
            decide(&[], Some("bob"), 0.5),
            Err(Error::SpeakerNotFound(s)) if s == "bob"
        ));
        assert!(matches!(
            decide(&[], None, 0.5),
            Err(Error::NoEnrolledSpeakers)
        ));
    }
}
