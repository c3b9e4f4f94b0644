//! `voxverify`: a small speaker enrollment and verification engine.
//!
//! This crate provides:
//! - Audio validation (mono WAV at the backend's sample rate, no silent resampling)
//! - Embedding extraction through a pluggable backend, unit-normalized and dimension-checked
//! - A vector store abstraction with in-memory and Qdrant adapters
//! - Enrollment (append-only samples per speaker) and verification (max-over-samples,
//!   fixed threshold, deterministic tie-break)
//!
//! The library is designed to be used by both CLI tools and long-running services. Most
//! consumers should start with [`Verifier`].

// High-level API (most consumers should start here).
pub mod config;
pub mod verifier;

// Decision engine.
pub mod enroll;
pub mod verify;

// Audio validation.
pub mod audio;

// Embedding extraction.
pub mod backend;
pub mod backends;
pub mod embedding;
pub mod pool;

// Vector storage.
pub mod store;
pub mod stores;

mod error;

// Shared helpers for binaries.
#[cfg(feature = "cli")]
pub mod cli;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use audio::{AudioIngest, CanonicalAudio};
pub use backend::EmbeddingBackend;
pub use backends::http::HttpEmbeddingBackend;
pub use config::{Config, StoreConnection};
pub use embedding::{Embedding, EmbeddingClient};
pub use enroll::{EnrollmentReceipt, EnrollmentService};
pub use error::{Error, Result};
pub use store::{SampleMetadata, ScoredSample, SpeakerFilter, StoredSample, VectorStore};
pub use stores::memory::MemoryStore;
pub use stores::qdrant::QdrantStore;
pub use verifier::{SpeakerProfile, Verifier};
pub use verify::{VerificationResult, VerificationService};

#[cfg(feature = "logging")]
pub use logging::init as init_logging;
