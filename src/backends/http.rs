use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::audio::CanonicalAudio;
use crate::backend::EmbeddingBackend;

/// Embedding backend that delegates to a speaker-embedding model served over HTTP.
///
/// Wire format:
/// - request: `POST {url}` with `{"sample_rate": 16000, "samples": [f32, ...]}`
/// - response: `{"embedding": [f32, ...]}`
///
/// The model runs out of process, so this backend only owns a connection pool and a timeout.
pub struct HttpEmbeddingBackend {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    sample_rate: u32,
    samples: &'a [f32],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        anyhow::ensure!(!url.trim().is_empty(), "embedding backend URL must be provided");

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self { client, url })
    }
}

impl EmbeddingBackend for HttpEmbeddingBackend {
    fn embed(&self, audio: &CanonicalAudio) -> Result<Vec<f32>> {
        let body = serde_json::to_vec(&EmbedRequest {
            sample_rate: audio.sample_rate,
            samples: &audio.samples,
        })?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .context("failed to read embedding response body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "embedding backend returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            ));
        }

        decode_response(&bytes)
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn decode_response(bytes: &[u8]) -> Result<Vec<f32>> {
    let parsed: EmbedResponse =
        serde_json::from_slice(bytes).context("malformed embedding response")?;
    Ok(parsed.embedding)
}
