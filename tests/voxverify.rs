use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hound::{SampleFormat, WavSpec, WavWriter};
use voxverify::{
    CanonicalAudio, Config, EmbeddingBackend, Error, MemoryStore, SampleMetadata, ScoredSample,
    SpeakerFilter, StoredSample, VectorStore, Verifier,
};

const DIM: usize = 4;
const THRESHOLD: f32 = 0.8;

/// Embeds a recording as its first `DIM` samples and counts how often it was called.
#[derive(Default)]
struct PrefixBackend {
    calls: Arc<AtomicUsize>,
}

impl EmbeddingBackend for PrefixBackend {
    fn embed(&self, audio: &CanonicalAudio) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(audio.samples.iter().take(DIM).copied().collect())
    }

    fn name(&self) -> &str {
        "prefix"
    }
}

struct FailingBackend;

impl EmbeddingBackend for FailingBackend {
    fn embed(&self, _audio: &CanonicalAudio) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("model crashed")
    }
}

/// A store that is always unavailable and counts every call it receives.
#[derive(Default)]
struct DownStore {
    upserts: AtomicUsize,
    queries: AtomicUsize,
}

impl VectorStore for DownStore {
    fn upsert(&self, _id: &str, _vector: &[f32], _metadata: &SampleMetadata) -> voxverify::Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn query(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _filter: Option<SpeakerFilter<'_>>,
    ) -> voxverify::Result<Vec<ScoredSample>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn delete(&self, _id: &str) -> voxverify::Result<()> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn delete_speaker(&self, _speaker_id: &str) -> voxverify::Result<()> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn samples(
        &self,
        _filter: Option<SpeakerFilter<'_>>,
        _limit: usize,
    ) -> voxverify::Result<Vec<StoredSample>> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn clear(&self) -> voxverify::Result<()> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

fn config() -> Config {
    let mut config = Config::with_threshold(THRESHOLD);
    config.embedding_dimensionality = DIM;
    config.embedding_workers = Some(2);
    config.retry_backoff_ms = 1;
    config
}

fn verifier_with_counter() -> (Verifier<PrefixBackend, MemoryStore>, Arc<AtomicUsize>) {
    let backend = PrefixBackend::default();
    let calls = Arc::clone(&backend.calls);
    let verifier = Verifier::with_parts(config(), backend, Arc::new(MemoryStore::new(DIM)))
        .expect("build verifier");
    (verifier, calls)
}

fn verifier() -> Verifier<PrefixBackend, MemoryStore> {
    verifier_with_counter().0
}

fn wav(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav writer");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

fn voice(samples: [i16; DIM]) -> Vec<u8> {
    let mut padded = samples.to_vec();
    padded.extend_from_slice(&[0; 12]);
    wav(1, 16_000, &padded)
}

fn voice_a() -> Vec<u8> {
    voice([12_000, 0, 0, 0])
}

fn voice_b() -> Vec<u8> {
    voice([0, 12_000, 0, 0])
}

#[test]
fn enrolled_recording_verifies_against_itself() -> anyhow::Result<()> {
    let verifier = verifier();
    let receipt = verifier.enroll("alice", &voice_a())?;

    let result = verifier.verify(&voice_a(), Some("alice"))?;
    assert!(result.accept);
    assert_eq!(result.speaker_id, "alice");
    assert_eq!(result.sample_id, receipt.sample_id);
    assert!((result.score - 1.0).abs() < 1e-4, "score {}", result.score);
    assert_eq!(result.threshold, THRESHOLD);
    Ok(())
}

#[test]
fn unknown_claim_is_speaker_not_found() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;

    let err = verifier.verify(&voice_a(), Some("bob")).unwrap_err();
    assert!(matches!(err, Error::SpeakerNotFound(ref id) if id == "bob"));
    Ok(())
}

#[test]
fn identification_on_empty_store_has_no_speakers() {
    let err = verifier().verify(&voice_a(), None).unwrap_err();
    assert!(matches!(err, Error::NoEnrolledSpeakers));
}

#[test]
fn best_sample_decides_for_multi_sample_speakers() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;
    let second = verifier.enroll("alice", &voice_b())?;

    let result = verifier.verify(&voice_b(), Some("alice"))?;
    assert!(result.accept);
    assert_eq!(result.sample_id, second.sample_id);
    assert!(result.score > 0.99);
    Ok(())
}

#[test]
fn claim_is_scored_only_against_its_own_samples() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;
    verifier.enroll("bob", &voice_b())?;

    let result = verifier.verify(&voice_b(), Some("alice"))?;
    assert!(!result.accept);
    assert_eq!(result.speaker_id, "alice");
    assert!(result.score < THRESHOLD);
    Ok(())
}

#[test]
fn identification_picks_the_closest_speaker() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;
    let bob = verifier.enroll("bob", &voice_b())?;

    let result = verifier.verify(&voice_b(), None)?;
    assert!(result.accept);
    assert_eq!(result.speaker_id, "bob");
    assert_eq!(result.sample_id, bob.sample_id);
    Ok(())
}

#[test]
fn identification_below_threshold_rejects() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;

    let result = verifier.verify(&voice([0, 0, 12_000, 0]), None)?;
    assert!(!result.accept);
    assert_eq!(result.speaker_id, "alice");
    Ok(())
}

#[test]
fn verification_is_deterministic() -> anyhow::Result<()> {
    let verifier = verifier();
    verifier.enroll("alice", &voice_a())?;
    verifier.enroll("bob", &voice_b())?;

    let recording = voice([9_000, 4_000, 100, 0]);
    let first = verifier.verify(&recording, None)?;
    let second = verifier.verify(&recording, None)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn repeated_enrollment_appends_samples() -> anyhow::Result<()> {
    let verifier = verifier();
    let first = verifier.enroll("alice", &voice_a())?;
    let second = verifier.enroll("alice", &voice_a())?;
    assert_ne!(first.sample_id, second.sample_id);

    let profile = verifier.speaker("alice", 100)?;
    assert_eq!(profile.sample_ids.len(), 2);
    assert_eq!(verifier.store().len()?, 2);
    Ok(())
}

#[test]
fn speaker_ids_are_trimmed_on_enroll_and_verify() -> anyhow::Result<()> {
    let verifier = verifier();
    let receipt = verifier.enroll("  alice ", &voice_a())?;
    assert_eq!(receipt.speaker_id, "alice");

    assert!(verifier.verify(&voice_a(), Some("alice  "))?.accept);
    Ok(())
}

#[test]
fn blank_speaker_ids_are_refused_before_embedding() {
    let (verifier, calls) = verifier_with_counter();
    assert!(matches!(
        verifier.enroll("   ", &voice_a()),
        Err(Error::InvalidSpeakerId(_))
    ));
    assert!(matches!(
        verifier.verify(&voice_a(), Some("")),
        Err(Error::InvalidSpeakerId(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn bad_audio_is_rejected_before_embedding() -> anyhow::Result<()> {
    let (verifier, calls) = verifier_with_counter();

    let stereo = wav(2, 16_000, &[1_000; 16]);
    let wrong_rate = wav(1, 8_000, &[1_000; 16]);
    for payload in [stereo, wrong_rate, b"not a wav".to_vec()] {
        assert!(matches!(
            verifier.enroll("alice", &payload),
            Err(Error::InvalidAudioFormat(_))
        ));
        assert!(matches!(
            verifier.verify(&payload, None),
            Err(Error::InvalidAudioFormat(_))
        ));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(verifier.store().is_empty()?);
    Ok(())
}

#[test]
fn backend_failure_writes_nothing() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(DIM));
    let verifier = Verifier::with_parts(config(), FailingBackend, Arc::clone(&store))?;

    let err = verifier.enroll("alice", &voice_a()).unwrap_err();
    assert!(matches!(err, Error::EmbeddingExtraction(_)));
    assert!(store.is_empty()?);
    Ok(())
}

#[test]
fn store_dimension_must_match_config() {
    let err = Verifier::with_parts(config(), PrefixBackend::default(), Arc::new(MemoryStore::new(8)))
        .err()
        .expect("mismatched dimension must fail");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn query_is_retried_once_but_enrollment_write_is_not() {
    let store = Arc::new(DownStore::default());
    let verifier = Verifier::with_parts(config(), PrefixBackend::default(), Arc::clone(&store))
        .expect("build verifier");

    let err = verifier.enroll("alice", &voice_a()).unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);

    let err = verifier.verify(&voice_a(), Some("alice")).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.queries.load(Ordering::SeqCst), 2);
}

#[test]
fn speakers_are_listed_and_deleted() -> anyhow::Result<()> {
    let verifier = verifier();
    let a1 = verifier.enroll("alice", &voice_a())?;
    verifier.enroll("alice", &voice_b())?;
    verifier.enroll("bob", &voice_b())?;

    let speakers = verifier.speakers(100)?;
    let names: Vec<&str> = speakers.iter().map(|p| p.speaker_id.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
    assert_eq!(speakers[0].sample_ids.len(), 2);

    verifier.delete_sample(&a1.sample_id)?;
    assert_eq!(verifier.speaker("alice", 100)?.sample_ids.len(), 1);

    verifier.delete_speaker("alice")?;
    assert!(matches!(
        verifier.speaker("alice", 100),
        Err(Error::SpeakerNotFound(_))
    ));
    assert!(matches!(
        verifier.verify(&voice_a(), Some("alice")),
        Err(Error::SpeakerNotFound(_))
    ));

    verifier.clear()?;
    assert!(verifier.speakers(100)?.is_empty());
    Ok(())
}

#[test]
fn concurrent_enrollments_all_land() -> anyhow::Result<()> {
    let verifier = Arc::new(verifier());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let verifier = Arc::clone(&verifier);
            std::thread::spawn(move || verifier.enroll(&format!("speaker-{i}"), &voice_a()))
        })
        .collect();
    for handle in handles {
        handle.join().expect("enroll thread panicked")?;
    }

    assert_eq!(verifier.speakers(100)?.len(), 8);
    Ok(())
}

#[test]
fn files_are_ingested_once_and_reused() -> anyhow::Result<()> {
    let (verifier, calls) = verifier_with_counter();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("alice.wav");
    std::fs::write(&path, voice_a())?;

    let audio = verifier.audio_ingest().ingest_file(&path)?;
    let receipt = verifier.enroll_audio("alice", &audio)?;
    let result = verifier.verify_audio(&audio, Some("alice"))?;
    assert!(result.accept);
    assert_eq!(result.sample_id, receipt.sample_id);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let resampled = CanonicalAudio {
        samples: audio.samples.clone(),
        sample_rate: 8_000,
    };
    assert!(matches!(
        verifier.verify_audio(&resampled, None),
        Err(Error::InvalidAudioFormat(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}
