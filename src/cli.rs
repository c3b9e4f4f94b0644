//! Flags shared by the binaries for building a [`Config`].
//!
//! Resolution order: an optional JSON config file first, then individual flags on top. The
//! threshold has no default, so it must come from one of the two.

use std::path::PathBuf;

use clap::Args;

use crate::config::Config;
use crate::{Error, Result};

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a JSON config file.
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// Similarity threshold in [-1, 1] (overrides the config file).
    #[arg(short = 't', long = "threshold", allow_hyphen_values = true)]
    pub threshold: Option<f32>,

    /// Number of nearest samples retrieved per verification.
    #[arg(short = 'k', long = "top-k")]
    pub top_k: Option<usize>,

    /// Embedding dimensionality the backend produces.
    #[arg(long = "dimension")]
    pub dimension: Option<usize>,

    /// Vector store host.
    #[arg(long = "store-host")]
    pub store_host: Option<String>,

    /// Vector store port.
    #[arg(long = "store-port")]
    pub store_port: Option<u16>,

    /// Vector store collection name.
    #[arg(long = "collection")]
    pub collection: Option<String>,

    /// Embedding backend URL.
    #[arg(long = "embedding-url")]
    pub embedding_url: Option<String>,

    /// Maximum concurrent embedding calls (defaults to the CPU count).
    #[arg(long = "workers")]
    pub workers: Option<usize>,
}

impl ConfigArgs {
    /// Load the config file (if any), apply flag overrides, and validate.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match (&self.config_path, self.threshold) {
            (Some(path), _) => Config::from_json_file(path)?,
            (None, Some(threshold)) => Config::with_threshold(threshold),
            (None, None) => {
                return Err(Error::Config(
                    "no similarity threshold: pass --threshold or --config".into(),
                ));
            }
        };

        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(dimension) = self.dimension {
            config.embedding_dimensionality = dimension;
        }
        if let Some(host) = &self.store_host {
            config.store_connection.host = host.clone();
        }
        if let Some(port) = self.store_port {
            config.store_connection.port = port;
        }
        if let Some(collection) = &self.collection {
            config.store_connection.collection_name = collection.clone();
        }
        if let Some(url) = &self.embedding_url {
            config.embedding_backend.url = url.clone();
        }
        if let Some(workers) = self.workers {
            config.embedding_workers = Some(workers);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_flag_alone_is_enough() -> anyhow::Result<()> {
        let args = ConfigArgs {
            threshold: Some(-0.2),
            top_k: Some(4),
            collection: Some("test".into()),
            ..Default::default()
        };
        let config = args.resolve()?;
        assert_eq!(config.similarity_threshold, -0.2);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.store_connection.collection_name, "test");
        Ok(())
    }

    #[test]
    fn missing_threshold_is_a_config_error() {
        let err = ConfigArgs::default().resolve().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn flags_override_file_values() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "similarity_threshold": 0.5, "top_k": 8 }"#)?;

        let args = ConfigArgs {
            config_path: Some(path),
            threshold: Some(0.9),
            store_port: Some(7000),
            ..Default::default()
        };
        let config = args.resolve()?;
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.top_k, 8);
        assert_eq!(config.store_connection.port, 7000);
        Ok(())
    }

    #[test]
    fn overrides_are_validated() {
        let args = ConfigArgs {
            threshold: Some(2.0),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
