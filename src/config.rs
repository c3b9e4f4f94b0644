//! Deployment configuration.
//!
//! `Config` is library-level configuration, not CLI flags directly. The binaries load it from
//! a JSON file and then apply flag overrides, so other frontends (services, tests, batch jobs)
//! can construct it programmatically.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Embedding size of the x-vector speaker model the default deployment runs against.
pub const DEFAULT_EMBEDDING_DIMENSIONALITY: usize = 512;

/// Sample rate the default embedding backend expects (Hz).
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Where the vector store lives and which collection isolates this dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConnection {
    pub host: String,
    pub port: u16,
    pub collection_name: String,
}

impl Default for StoreConnection {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 6333,
            collection_name: "speaker_verification".to_owned(),
        }
    }
}

impl StoreConnection {
    /// Base URL for the store's REST API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Location of the external embedding backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingBackendConfig {
    pub url: String,
}

impl Default for EmbeddingBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090/v1/embed".to_owned(),
        }
    }
}

/// Structured configuration for a verification deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Minimum cosine similarity required to accept, in `[-1, 1]`.
    ///
    /// Raising it trades false accepts for false rejects. There is no default:
    /// every deployment has to choose one for its embedding model.
    pub similarity_threshold: f32,

    /// Length of every embedding; must match the backend's output.
    #[serde(default = "default_embedding_dimensionality")]
    pub embedding_dimensionality: usize,

    #[serde(default)]
    pub store_connection: StoreConnection,

    /// Number of nearest stored samples retrieved per verification query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Sample rate every submitted recording must already be in.
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,

    /// Maximum number of concurrent embedding calls. `None` means one per CPU.
    #[serde(default)]
    pub embedding_workers: Option<usize>,

    /// Timeout applied to every network call (store and embedding backend).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delay before the single retry of an idempotent store call.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub embedding_backend: EmbeddingBackendConfig,
}

fn default_embedding_dimensionality() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONALITY
}

fn default_top_k() -> usize {
    10
}

fn default_sample_rate_hz() -> u32 {
    DEFAULT_SAMPLE_RATE_HZ
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl Config {
    /// Build a config with the given threshold and defaults for everything else.
    pub fn with_threshold(similarity_threshold: f32) -> Self {
        Self {
            similarity_threshold,
            embedding_dimensionality: default_embedding_dimensionality(),
            store_connection: StoreConnection::default(),
            top_k: default_top_k(),
            sample_rate_hz: default_sample_rate_hz(),
            embedding_workers: None,
            request_timeout_ms: default_request_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            embedding_backend: EmbeddingBackendConfig::default(),
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(raw).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("failed to read '{}': {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let t = self.similarity_threshold;
        if !t.is_finite() || !(-1.0..=1.0).contains(&t) {
            return Err(Error::Config(format!(
                "similarity_threshold must be within [-1, 1], got {t}"
            )));
        }
        if self.embedding_dimensionality == 0 {
            return Err(Error::Config(
                "embedding_dimensionality must be greater than zero".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be greater than zero".into()));
        }
        if self.sample_rate_hz == 0 {
            return Err(Error::Config("sample_rate_hz must be greater than zero".into()));
        }
        if self.embedding_workers == Some(0) {
            return Err(Error::Config(
                "embedding_workers must be greater than zero when set".into(),
            ));
        }
        if self.store_connection.host.trim().is_empty() {
            return Err(Error::Config("store_connection.host must be set".into()));
        }
        if self.store_connection.collection_name.trim().is_empty() {
            return Err(Error::Config(
                "store_connection.collection_name must be set".into(),
            ));
        }
        Ok(())
    }

    /// Effective worker count for the embedding pool.
    pub fn workers(&self) -> usize {
        self.embedding_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_fills_defaults() -> anyhow::Result<()> {
        let config = Config::from_json(r#"{ "similarity_threshold": 0.6 }"#)?;
        assert_eq!(config.similarity_threshold, 0.6);
        assert_eq!(config.embedding_dimensionality, 512);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.sample_rate_hz, 16_000);
        assert_eq!(config.store_connection, StoreConnection::default());
        assert_eq!(config.store_connection.base_url(), "http://localhost:6333");
        assert!(config.workers() >= 1);
        Ok(())
    }

    #[test]
    fn threshold_is_required() {
        let err = Config::from_json("{}").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn threshold_outside_cosine_range_is_rejected() {
        for raw in [
            r#"{ "similarity_threshold": 1.5 }"#,
            r#"{ "similarity_threshold": -1.01 }"#,
        ] {
            let err = Config::from_json(raw).unwrap_err();
            assert!(err.to_string().contains("within [-1, 1]"), "{err}");
        }
        assert!(Config::from_json(r#"{ "similarity_threshold": -1.0 }"#).is_ok());
        assert!(Config::from_json(r#"{ "similarity_threshold": 1.0 }"#).is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = Config::with_threshold(0.5);
        config.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::with_threshold(0.5);
        config.embedding_dimensionality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::with_threshold(0.5);
        config.embedding_workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::with_threshold(0.5);
        config.store_connection.collection_name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn nested_store_connection_parses() -> anyhow::Result<()> {
        let config = Config::from_json(
            r#"{
                "similarity_threshold": 0.25,
                "top_k": 3,
                "embedding_workers": 2,
                "store_connection": { "host": "qdrant", "port": 6334, "collection_name": "staging" }
            }"#,
        )?;
        assert_eq!(config.top_k, 3);
        assert_eq!(config.workers(), 2);
        assert_eq!(config.store_connection.host, "qdrant");
        assert_eq!(config.store_connection.collection_name, "staging");
        Ok(())
    }

    #[test]
    fn from_json_file_reads_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("voxverify.json");
        std::fs::write(&path, r#"{ "similarity_threshold": 0.7, "top_k": 5 }"#)?;

        let config = Config::from_json_file(&path)?;
        assert_eq!(config.top_k, 5);

        let err = Config::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
        Ok(())
    }
}
