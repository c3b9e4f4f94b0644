use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

mod metrics;

use voxverify::cli::ConfigArgs;
use voxverify::{
    EmbeddingBackend, EnrollmentReceipt, Error, HttpEmbeddingBackend, MemoryStore, QdrantStore,
    SpeakerProfile, VectorStore, VerificationResult, Verifier,
};

type SharedVerifier = Verifier<Box<dyn EmbeddingBackend>, dyn VectorStore>;

const DEFAULT_SPEAKER_LIMIT: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "voxverify-server")]
#[command(about = "HTTP server for speaker enrollment and verification")]
struct Params {
    #[command(flatten)]
    config: ConfigArgs,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 32 * 1024 * 1024)]
    max_bytes: usize,

    /// Keep enrollments in process memory instead of the configured vector store.
    #[arg(long = "in-memory")]
    in_memory: bool,
}

#[derive(Clone)]
struct AppState {
    verifier: Arc<SharedVerifier>,
}

#[derive(Debug, Deserialize)]
struct EnrollQuery {
    speaker_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(default, alias = "claim")]
    claimed_speaker_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeakersQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    accept: Option<bool>,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
    accept: Option<bool>,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            accept: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            accept: None,
        }
    }

    /// Verification errors that are explicit rejects carry `accept: false` in the body.
    fn from_verification(err: Error) -> Self {
        let reject = matches!(err, Error::SpeakerNotFound(_) | Error::NoEnrolledSpeakers);
        let mut app = Self::from(err);
        if reject {
            app.accept = Some(false);
        }
        app
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
            accept: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            accept: self.accept,
        });
        (self.status, body).into_response()
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidAudioFormat(_) | Error::InvalidSpeakerId(_) | Error::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::SpeakerNotFound(_) | Error::NoEnrolledSpeakers => StatusCode::NOT_FOUND,
        Error::EmbeddingExtraction(_) => StatusCode::BAD_GATEWAY,
        Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// An empty `claimed_speaker_id` parameter means identification, same as omitting it.
fn claim_from_query(raw: Option<String>) -> Option<String> {
    raw.filter(|claim| !claim.is_empty())
}

fn main() -> ExitCode {
    voxverify::init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "voxverify-server failed");
            ExitCode::FAILURE
        }
    }
}

// The store and backend clients block, so the verifier is built and dropped outside the async
// runtime. Handlers reach it through `spawn_blocking`.
fn run() -> Result<()> {
    let params = Params::parse();
    metrics::init();

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let config = params.config.resolve()?;
    let verifier = Arc::new(build_verifier(config, params.in_memory)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let state = AppState {
        verifier: Arc::clone(&verifier),
    };
    runtime.block_on(serve(addr, router(state, params.max_bytes)))?;
    drop(runtime);

    info!("shutdown complete");
    drop(verifier);
    Ok(())
}

fn build_verifier(config: voxverify::Config, in_memory: bool) -> Result<SharedVerifier> {
    let backend: Box<dyn EmbeddingBackend> = Box::new(HttpEmbeddingBackend::new(
        &config.embedding_backend.url,
        config.request_timeout(),
    )?);

    let store: Arc<dyn VectorStore> = if in_memory {
        info!("using in-memory store");
        Arc::new(MemoryStore::new(config.embedding_dimensionality))
    } else {
        Arc::new(
            QdrantStore::connect(
                &config.store_connection,
                config.embedding_dimensionality,
                config.request_timeout(),
            )
            .context("failed to connect to vector store")?,
        )
    };

    Verifier::with_parts(config, backend, store).context("failed to initialize verifier")
}

fn router(state: AppState, max_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/enroll", post(enroll))
        .route("/v1/verify", post(verify))
        .route("/v1/speakers", get(speakers))
        .route("/v1/speakers/{speaker_id}", delete(delete_speaker))
        .route("/v1/samples/{sample_id}", delete(delete_sample))
        .route("/v1/clear", post(clear))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}

async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run_blocking<T, F>(op: F) -> std::result::Result<voxverify::Result<T>, AppError>
where
    F: FnOnce() -> voxverify::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| AppError::internal(format!("worker task failed: {err}")))
}

async fn root() -> &'static str {
    "voxverify-server: POST /v1/enroll?speaker_id=ID, POST /v1/verify[?claimed_speaker_id=ID] (body: WAV)"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn enroll(
    State(state): State<AppState>,
    Query(query): Query<EnrollQuery>,
    body: Bytes,
) -> std::result::Result<Json<EnrollmentReceipt>, AppError> {
    if body.is_empty() {
        return Err(AppError::bad_request("request body was empty"));
    }

    let verifier = Arc::clone(&state.verifier);
    let result = run_blocking(move || verifier.enroll(&query.speaker_id, &body)).await?;

    metrics::record_enrollment(if result.is_ok() { "ok" } else { "error" });
    Ok(Json(result?))
}

async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
    body: Bytes,
) -> std::result::Result<Json<VerificationResult>, AppError> {
    if body.is_empty() {
        return Err(AppError::bad_request("request body was empty"));
    }

    let claim = claim_from_query(query.claimed_speaker_id);
    let claimed = claim.is_some();
    let verifier = Arc::clone(&state.verifier);
    let result = run_blocking(move || verifier.verify(&body, claim.as_deref())).await?;

    let outcome = match &result {
        Ok(decision) if decision.accept => "accept",
        Ok(_) | Err(Error::SpeakerNotFound(_) | Error::NoEnrolledSpeakers) => "reject",
        Err(_) => "error",
    };
    metrics::record_decision(claimed, outcome);

    result.map(Json).map_err(AppError::from_verification)
}

async fn speakers(
    State(state): State<AppState>,
    Query(query): Query<SpeakersQuery>,
) -> std::result::Result<Json<Vec<SpeakerProfile>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_SPEAKER_LIMIT);
    let verifier = Arc::clone(&state.verifier);
    let profiles = run_blocking(move || verifier.speakers(limit)).await??;
    Ok(Json(profiles))
}

async fn delete_speaker(
    State(state): State<AppState>,
    Path(speaker_id): Path<String>,
) -> std::result::Result<StatusCode, AppError> {
    let verifier = Arc::clone(&state.verifier);
    run_blocking(move || verifier.delete_speaker(&speaker_id)).await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_sample(
    State(state): State<AppState>,
    Path(sample_id): Path<String>,
) -> std::result::Result<StatusCode, AppError> {
    let verifier = Arc::clone(&state.verifier);
    run_blocking(move || verifier.delete_sample(&sample_id)).await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear(State(state): State<AppState>) -> std::result::Result<StatusCode, AppError> {
    let verifier = Arc::clone(&state.verifier);
    run_blocking(move || verifier.clear()).await??;
    Ok(StatusCode::NO_CONTENT)
}
