use axum::{
    Router,
    body::Body,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span};
use uuid::Uuid;
use xdoc_core::{
    ExplanationGenerator, GeminiConfig, GeminiGenerator, ModelRegistry, OpenRouterGenerator,
    Predictor, PredictorContext, RetryPolicy, RetryingGenerator,
};

use crate::{
    config::{Config, LlmProvider},
    error::{ApiError, ApiResult},
    history::{DiagnosisHistory, InMemoryDiagnosisHistory},
    models::{DiagnosisRecord, PredictRequest, PredictResponse},
};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub predictor: Predictor,
    pub history: Arc<dyn DiagnosisHistory>,
}

pub fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config)?;
    Ok(build_router(app_state))
}

fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let registry = ModelRegistry::load_dir(&config.model_dir)?;
    let loaded = registry.loaded();
    if loaded.is_empty() {
        tracing::warn!(
            dir = %config.model_dir.display(),
            "no disease models loaded, every prediction will return 503"
        );
    } else {
        info!("Loaded disease models: {:?}", loaded);
    }

    let predictor = Predictor::new(PredictorContext {
        registry,
        generator: create_generator(config)?,
        sampling: config.sampling,
    });

    Ok(AppState {
        predictor,
        history: Arc::new(InMemoryDiagnosisHistory::with_limit(config.history_limit)),
    })
}

fn create_generator(config: &Config) -> anyhow::Result<Arc<dyn ExplanationGenerator>> {
    let policy = RetryPolicy {
        max_attempts: config.llm_max_attempts,
        deadline: config.llm_deadline,
        ..RetryPolicy::default()
    };
    let generator: Arc<dyn ExplanationGenerator> = match config.provider {
        LlmProvider::Gemini => {
            let mut gemini = GeminiConfig::new(&config.api_key, &config.llm_model);
            if let Some(base_url) = &config.gemini_base_url {
                gemini.base_url = base_url.clone();
            }
            gemini.timeout = config.llm_timeout;
            Arc::new(RetryingGenerator::new(GeminiGenerator::new(gemini)?, policy))
        }
        LlmProvider::OpenRouter => Arc::new(RetryingGenerator::new(
            OpenRouterGenerator::new(&config.api_key, &config.llm_model, config.llm_timeout),
            policy,
        )),
    };
    info!(
        provider = generator.name(),
        model = %config.llm_model,
        "explanation generator ready"
    );
    Ok(generator)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/diagnosis/predict/{disease}", post(predict))
        .route("/diagnosis/history/{patient_id}", get(patient_history))
        .route("/diagnosis/record/{id}", get(get_record))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let correlation_id = req
                    .headers()
                    .get(CORRELATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri(),
                    correlation_id = %correlation_id,
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(correlation_id))
        .with_state(app_state)
}

/// Reuses the caller's correlation id or assigns one, and echoes it back.
async fn correlation_id(mut req: Request, next: Next) -> Response {
    let id = match req.headers().get(CORRELATION_HEADER) {
        Some(value) if !value.is_empty() => value.clone(),
        _ => {
            let generated = HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
            req.headers_mut().insert(CORRELATION_HEADER, generated.clone());
            generated
        }
    };

    let mut response = next.run(req).await;
    response.headers_mut().insert(CORRELATION_HEADER, id);
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Explainable Diagnosis Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Diabetes and cardiovascular risk predictions with per-feature attribution and generated explanations",
        "endpoints": {
            "POST /diagnosis/predict/{disease}": "Predict and explain (disease: diabetes | cardiovascular)",
            "GET /diagnosis/history/{patient_id}": "Stored diagnoses of a patient, newest first",
            "GET /diagnosis/record/{id}": "A single stored diagnosis",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let loaded: Vec<&str> = state
        .predictor
        .registry()
        .loaded()
        .iter()
        .map(|d| d.as_str())
        .collect();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "diseases_loaded": loaded
    }))
}

async fn predict(
    State(state): State<AppState>,
    Path(disease): Path<String>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PredictResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    info!(
        "Prediction requested for {} ({} features, audience {})",
        disease,
        request.features.len(),
        request.audience
    );

    let result = state
        .predictor
        .predict(&disease, &request.features, &request.audience)
        .await?;

    let id = Uuid::new_v4();
    let created_at = Utc::now();
    let record = DiagnosisRecord::from_result(id, &request, created_at, &result);
    state
        .history
        .save(record)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!("Diagnosis {} stored: {} ({:.3})", id, result.label, result.confidence);
    Ok((
        StatusCode::OK,
        Json(PredictResponse {
            id,
            created_at,
            result,
        }),
    ))
}

async fn patient_history(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> ApiResult<Vec<DiagnosisRecord>> {
    let records = state
        .history
        .for_patient(&patient_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(records))
}

async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DiagnosisRecord> {
    let not_found = || ApiError::NotFound(format!("Diagnosis record {id}"));
    let uuid = Uuid::parse_str(&id).map_err(|_| not_found())?;
    state
        .history
        .get(uuid)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(not_found)
}
