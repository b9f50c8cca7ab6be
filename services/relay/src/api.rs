use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::generation::GenerativeModel;
use crate::prompts::{recommendation_instruction, try_on_instruction, EMPTY_CLOSET_MESSAGE};
use crate::storage::ArtifactStore;
use crate::upload::{read_multipart, FieldNames, TryOnUpload};
use crate::wardrobe::WardrobeStore;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn GenerativeModel>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub wardrobe: Arc<dyn WardrobeStore>,
    pub field_names: FieldNames,
    /// Wardrobe items fed into one recommendation
    pub recent_item_limit: usize,
}

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Successful try-on response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnResponse {
    pub success: bool,
    pub image_url: String,
}

/// Recommendation request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub user_id: Option<String>,
}

/// Successful recommendation response
#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub success: bool,
    pub recommendation: String,
}

pub const USER_ID_MISSING_MESSAGE: &str = "userId가 필요합니다.";

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/try-on", post(try_on))
        .route("/get-recommendation", post(get_recommendation))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Liveness check
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        success: true,
        message: "CodiPOP relay is running".to_string(),
        timestamp: Utc::now(),
    })
}

/// Composite the uploaded clothing onto the person and return a public URL
#[instrument(skip(state, multipart))]
async fn try_on(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TryOnResponse>, ApiError> {
    metrics::counter!("relay.tryon.requests").increment(1);

    let multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let files = read_multipart(multipart).await?;
    let upload = TryOnUpload::from_files(files, &state.field_names)?;

    info!(
        subject_bytes = upload.subject.data.len(),
        overlays = upload.overlays.len(),
        "Try-on request accepted"
    );

    let instruction = try_on_instruction(upload.overlays.len());
    let started = std::time::Instant::now();

    let image = state
        .model
        .generate_image(&instruction, &upload.image_parts())
        .await
        .map_err(|e| {
            metrics::counter!("relay.tryon.generation_failures", "kind" => e.kind()).increment(1);
            ApiError::Generation(e)
        })?;

    metrics::histogram!("relay.tryon.generation_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    let artifact = state
        .artifacts
        .store(image.data, &image.mime_type)
        .await
        .map_err(ApiError::Storage)?;

    info!(image_url = %artifact.public_url, "Try-on completed");
    metrics::counter!("relay.tryon.completed").increment(1);

    Ok(Json(TryOnResponse {
        success: true,
        image_url: artifact.public_url,
    }))
}

/// Recommend an outfit from the user's most recent wardrobe items
#[instrument(skip(state, body))]
async fn get_recommendation(
    State(state): State<AppState>,
    body: Result<Json<RecommendationRequest>, JsonRejection>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    metrics::counter!("relay.recommendation.requests").increment(1);

    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let user_id = request
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest(USER_ID_MISSING_MESSAGE.to_string()))?;

    let items = state
        .wardrobe
        .recent_items(&user_id, state.recent_item_limit)
        .await
        .map_err(ApiError::Query)?;

    if items.is_empty() {
        info!(user_id = %user_id, "Closet is empty, skipping generation");
        metrics::counter!("relay.recommendation.empty_closet").increment(1);
        return Ok(Json(RecommendationResponse {
            success: true,
            recommendation: EMPTY_CLOSET_MESSAGE.to_string(),
        }));
    }

    let instruction = recommendation_instruction(&items);
    let recommendation = state.model.generate_text(&instruction).await?;

    info!(user_id = %user_id, items = items.len(), "Recommendation generated");

    Ok(Json(RecommendationResponse {
        success: true,
        recommendation,
    }))
}

/// Start the relay API server and run until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting relay API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
