mod cache;
mod config;
mod metrics;

use agents::{AnalysisRequest, GenerativeBackend, OllamaClient, StructuredAnalysis};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use pipeline::{MarkdownRendering, Pipeline, PipelineError, UsageMetrics, render_markdown};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use syllabus::SyllabusCache;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::ValidationReport;

use crate::cache::AnalysisCache;
use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    metrics: Arc<Metrics>,
    cache: Option<Arc<AnalysisCache>>,
    backend_name: &'static str,
    backend_url: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    syllabus_loaded: bool,
    backend: String,
    cached_runs: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    run_id: Uuid,
    syllabus_topic: String,
    analysis: StructuredAnalysis,
    rendering: MarkdownRendering,
    validation: ValidationReport,
    usage: UsageMetrics,
    verified: bool,
    cached: bool,
}

#[derive(Deserialize)]
struct ValidateRequest {
    text: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: &PipelineError) -> ApiError {
    let status = match err {
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::Irrelevant { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::StageFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Cancelled { .. } | PipelineError::Reference(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
        }),
    )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/analyze", post(analyze))
        .route("/analyze/stream", post(analyze_stream))
        .route("/validate", post(validate_text))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing();

    // The syllabus is required for every request; fail fast if it cannot load
    let syllabus = Arc::new(SyllabusCache::new(config.syllabus.clone()));
    syllabus
        .get_syllabus_content()
        .await
        .context("Failed to load syllabus reference at startup")?;

    let backend = OllamaClient::new(
        config.backend.base_url.clone(),
        config.backend.model.clone(),
        config.request_timeout(),
        config.retry_policy(),
    )?;
    let backend_url = backend.base_url().to_string();
    let backend: Arc<dyn GenerativeBackend> = Arc::new(backend);

    let state = AppState {
        pipeline: Arc::new(Pipeline::new(
            Arc::clone(&backend),
            syllabus,
            config.pricing,
            config.limits,
        )),
        metrics: Metrics::new(),
        cache: config
            .cache
            .enabled
            .then(|| Arc::new(AnalysisCache::new(config.cache.max_entries))),
        backend_name: backend.name(),
        backend_url: Some(backend_url),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!(
        addr = %config.server.bind_addr,
        model = %config.backend.model,
        "Server listening"
    );

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend = match &state.backend_url {
        Some(url) => match reqwest::get(url).await {
            Ok(resp) if resp.status().is_success() => format!("{}: ok", state.backend_name),
            Ok(resp) => format!("{}: error: status {}", state.backend_name, resp.status()),
            Err(e) => format!("{}: error: {}", state.backend_name, e),
        },
        None => state.backend_name.to_string(),
    };

    Json(HealthResponse {
        status: "ok",
        syllabus_loaded: state.pipeline.syllabus().is_loaded(),
        backend,
        cached_runs: state.cache.as_ref().map(|cache| cache.len()),
    })
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let cached = state.cache.as_ref().and_then(|cache| cache.get(&req));
    let is_cached = cached.is_some();

    let run = match cached {
        Some(run) => {
            state.metrics.record_cache_hit();
            run
        }
        None => {
            let started = Instant::now();
            let outcome = state.pipeline.analyze(&req).await;
            state.metrics.record_run(&outcome, started.elapsed());

            let run = outcome.map_err(|e| {
                warn!(error = %e, "Analysis failed");
                error_response(&e)
            })?;
            if let Some(cache) = &state.cache {
                cache.insert(&req, run.clone());
            }
            run
        }
    };

    let rendering = render_markdown(&run.analysis);
    let validation = rendering.validate();
    if !validation.valid {
        warn!(
            run_id = %run.run_id,
            violations = validation.errors.len(),
            "Rendered questions failed the markup check"
        );
    }

    Ok(Json(AnalyzeResponse {
        run_id: run.run_id,
        syllabus_topic: run.syllabus_topic,
        analysis: run.analysis,
        rendering,
        validation,
        usage: run.usage,
        verified: run.verified,
        cached: is_cached,
    }))
}

async fn analyze_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let metrics = Arc::clone(&state.metrics);
    let started = Instant::now();

    let events = Arc::clone(&state.pipeline)
        .stream_with(req, move |outcome| {
            if let Err(e) = outcome {
                warn!(error = %e, "Streamed analysis failed");
            }
            metrics.record_run(outcome, started.elapsed());
        })
        .map(|chunk| Event::default().event(chunk.kind()).json_data(&chunk));

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn validate_text(Json(req): Json<ValidateRequest>) -> Json<ValidationReport> {
    Json(validator::validate(&req.text))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
