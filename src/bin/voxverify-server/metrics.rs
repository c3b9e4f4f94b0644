use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts as PromOpts, Registry,
    TextEncoder,
};

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    decisions_total: IntCounterVec,
    enrollments_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            PromOpts::new(
                "voxverify_http_requests_total",
                "Total HTTP requests served by voxverify-server.",
            ),
            &["route", "status"],
        )
        .expect("metrics definition must be valid");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "voxverify_http_request_duration_seconds",
                "HTTP request latency in seconds.",
            ),
            &["route"],
        )
        .expect("metrics definition must be valid");

        let http_in_flight_requests = IntGauge::new(
            "voxverify_http_in_flight_requests",
            "Current number of in-flight HTTP requests.",
        )
        .expect("metrics definition must be valid");

        let decisions_total = IntCounterVec::new(
            PromOpts::new(
                "voxverify_decisions_total",
                "Verification outcomes by mode (verify/identify) and outcome.",
            ),
            &["mode", "outcome"],
        )
        .expect("metrics definition must be valid");

        let enrollments_total = IntCounterVec::new(
            PromOpts::new(
                "voxverify_enrollments_total",
                "Enrollment attempts by outcome.",
            ),
            &["outcome"],
        )
        .expect("metrics definition must be valid");

        for collector in [
            Box::new(http_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_request_duration_seconds.clone()),
            Box::new(http_in_flight_requests.clone()),
            Box::new(decisions_total.clone()),
            Box::new(enrollments_total.clone()),
        ] {
            registry.register(collector).expect("metrics must register");
        }

        Metrics {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_in_flight_requests,
            decisions_total,
            enrollments_total,
        }
    })
}

pub fn init() {
    let _ = metrics();
}

/// Record a verification outcome: `accept`, `reject`, or `error`.
pub fn record_decision(claimed: bool, outcome: &str) {
    let mode = if claimed { "verify" } else { "identify" };
    metrics()
        .decisions_total
        .with_label_values(&[mode, outcome])
        .inc();
}

/// Record an enrollment outcome: `ok` or `error`.
pub fn record_enrollment(outcome: &str) {
    metrics()
        .enrollments_total
        .with_label_values(&[outcome])
        .inc();
}

pub async fn prometheus_metrics() -> Response {
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/healthz" {
        return next.run(req).await;
    }

    let start = Instant::now();

    metrics().http_in_flight_requests.inc();
    let response = next.run(req).await;
    metrics().http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    metrics()
        .http_requests_total
        .with_label_values(&[route.as_str(), status.as_str()])
        .inc();
    metrics()
        .http_request_duration_seconds
        .with_label_values(&[route.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}
