//! [`VectorStore`] adapter for a Qdrant server, spoken over its REST API.
//!
//! `QdrantStore` is the deployment's one connection object: construct it once at startup with
//! [`QdrantStore::connect`], hand it to the services behind an `Arc`, and let it drop at
//! shutdown. The underlying HTTP pool is released with it.
//!
//! Error mapping:
//! - transport failures, timeouts, `429` and `5xx` -> `StoreUnavailable` (retryable)
//! - any other non-success status, or a reply we can't decode -> `StoreRejected` (fatal)

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::StoreConnection;
use crate::store::{
    SampleMetadata, ScoredSample, SpeakerFilter, StoredSample, VectorStore, rank,
};
use crate::{Error, Result};

/// Qdrant's scroll endpoint caps a single page; larger listings are paged.
const SCROLL_PAGE_SIZE: usize = 256;

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Serialize)]
struct PointStruct<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a SampleMetadata,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    payload: Option<SampleMetadata>,
}

#[derive(Deserialize)]
struct Record {
    id: Value,
    payload: Option<SampleMetadata>,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<Record>,
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
}

impl QdrantStore {
    /// Connect to the configured collection, creating it if it does not exist.
    ///
    /// An existing collection with a different vector size is a schema conflict and fails with
    /// `StoreRejected`; we never silently mix dimensionalities.
    pub fn connect(conn: &StoreConnection, dimension: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| Error::unavailable(format!("failed to build HTTP client: {err}")))?;

        let store = Self {
            client,
            base_url: conn.base_url(),
            collection: conn.collection_name.clone(),
            dimension,
        };
        store.ensure_collection()?;
        info!(
            url = %store.base_url,
            collection = %store.collection,
            dimension,
            "connected to qdrant"
        );
        Ok(store)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn points_url(&self, suffix: &str) -> String {
        format!("{}/points{suffix}", self.collection_url())
    }

    fn ensure_collection(&self) -> Result<()> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            info!(collection = %self.collection, "collection not found, creating");
            return self.create_collection();
        }

        let info: CollectionInfo = decode(response)?;
        check_vector_size(info.config.params.vectors.size, self.dimension)
    }

    fn create_collection(&self) -> Result<()> {
        let body = json!({ "vectors": { "size": self.dimension, "distance": "Cosine" } });
        let _: Value = self.send_json(self.client.put(self.collection_url()), &body)?;
        Ok(())
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, body: &impl Serialize) -> Result<T> {
        let bytes = serde_json::to_vec(body)?;
        let response = request
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .map_err(transport_error)?;
        decode(response)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        check_vector_size(vector.len(), self.dimension)
    }
}

impl Drop for QdrantStore {
    fn drop(&mut self) {
        debug!(collection = %self.collection, "closing qdrant connection");
    }
}

impl VectorStore for QdrantStore {
    fn upsert(&self, id: &str, vector: &[f32], metadata: &SampleMetadata) -> Result<()> {
        self.check_dimension(vector)?;
        let point = PointStruct {
            id,
            vector,
            payload: metadata,
        };
        let body = json!({ "points": [point] });
        // wait=true: the call returns only once the point is committed and searchable.
        let _: Value = self.send_json(self.client.put(self.points_url("?wait=true")), &body)?;
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<SpeakerFilter<'_>>,
    ) -> Result<Vec<ScoredSample>> {
        self.check_dimension(vector)?;
        if top_k == 0 {
            return Ok(vec![]);
        }

        // One extra point shows whether the cut-off falls inside a run of equal scores.
        let mut body = json!({
            "vector": vector,
            "limit": top_k + 1,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter_json(filter);
        }

        let points: Vec<ScoredPoint> =
            self.send_json(self.client.post(self.points_url("/search")), &body)?;
        let mut samples = points
            .into_iter()
            .map(scored_sample)
            .collect::<Result<Vec<_>>>()?;
        samples.sort_by(rank);
        if cut_off_ties(&samples, top_k) {
            warn!(
                top_k,
                score = samples[top_k - 1].score,
                "equal scores straddle the top_k cut-off; the server chose which tied points to return"
            );
        }
        samples.truncate(top_k);
        Ok(samples)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let body = json!({ "points": [id] });
        let _: Value =
            self.send_json(self.client.post(self.points_url("/delete?wait=true")), &body)?;
        Ok(())
    }

    fn delete_speaker(&self, speaker_id: &str) -> Result<()> {
        let body = json!({ "filter": filter_json(SpeakerFilter::new(speaker_id)) });
        let _: Value =
            self.send_json(self.client.post(self.points_url("/delete?wait=true")), &body)?;
        Ok(())
    }

    fn samples(
        &self,
        filter: Option<SpeakerFilter<'_>>,
        limit: usize,
    ) -> Result<Vec<StoredSample>> {
        let mut out = Vec::new();
        let mut offset: Option<Value> = None;

        while out.len() < limit {
            let mut body = json!({
                "limit": (limit - out.len()).min(SCROLL_PAGE_SIZE),
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(filter) = filter {
                body["filter"] = filter_json(filter);
            }
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let page: ScrollResult =
                self.send_json(self.client.post(self.points_url("/scroll")), &body)?;
            for record in page.points {
                out.push(stored_sample(record)?);
            }

            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        out.truncate(limit);
        Ok(out)
    }

    fn clear(&self) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .map_err(transport_error)?;
        if response.status() != StatusCode::NOT_FOUND {
            let _: Value = decode(response)?;
        }
        self.create_collection()?;
        info!(collection = %self.collection, "collection cleared");
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn cut_off_ties(sorted: &[ScoredSample], top_k: usize) -> bool {
    top_k > 0 && sorted.len() > top_k && sorted[top_k].score == sorted[top_k - 1].score
}

fn check_vector_size(got: usize, want: usize) -> Result<()> {
    if got != want {
        return Err(Error::rejected(format!(
            "dimension mismatch: got {got}, want {want}"
        )));
    }
    Ok(())
}

fn filter_json(filter: SpeakerFilter<'_>) -> Value {
    json!({
        "must": [
            { "key": "speaker_id", "match": { "value": filter.speaker_id } }
        ]
    })
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::unavailable(format!("request timed out: {err}"));
    }
    Error::unavailable(err.to_string())
}

fn classify_status(status: StatusCode, body: &str) -> Error {
    let message = format!("qdrant returned {status}: {}", error_message(body));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::unavailable(message)
    } else {
        Error::rejected(message)
    }
}

// Qdrant reports failures as `{"status": {"error": "..."}}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["status"]["error"].as_str().map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}

fn decode<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().map_err(transport_error)?;
    if !status.is_success() {
        return Err(classify_status(status, &String::from_utf8_lossy(&bytes)));
    }
    decode_envelope(&bytes)
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice::<Envelope<T>>(bytes)
        .map(|envelope| envelope.result)
        .map_err(|err| Error::rejected(format!("malformed qdrant response: {err}")))
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scored_sample(point: ScoredPoint) -> Result<ScoredSample> {
    let sample_id = point_id(&point.id);
    let metadata = point
        .payload
        .ok_or_else(|| Error::rejected(format!("point {sample_id} has no payload")))?;
    Ok(ScoredSample {
        sample_id,
        score: point.score.clamp(-1.0, 1.0),
        metadata,
    })
}

fn stored_sample(record: Record) -> Result<StoredSample> {
    let sample_id = point_id(&record.id);
    let metadata = record
        .payload
        .ok_or_else(|| Error::rejected(format!("point {sample_id} has no payload")))?;
    Ok(StoredSample {
        sample_id,
        metadata,
    })
}
