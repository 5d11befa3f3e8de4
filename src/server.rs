use crate::config::{DigitizeConfig, ScaleConfig, ServerConfig};
use crate::error::{ApiError, DigitizeError};
use crate::extractors::{ExtractorInfo, ExtractorRegistry};
use crate::grid::GridCalibration;
use crate::image::{Image, Rect};
use crate::lead::{LeadGeometry, LeadId};
use crate::pipeline::{Digitization, DigitizeOptions, Digitizer};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub extractors: Arc<ExtractorRegistry>,
    pub digitize: Arc<DigitizeConfig>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, digitize: DigitizeConfig) -> Self {
        Self {
            extractors: Arc::new(ExtractorRegistry::new(&digitize.extraction)),
            digitize: Arc::new(digitize),
            config: Arc::new(config),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub default_method: String,
    pub available_methods: Vec<ExtractorInfo>,
    pub leads: Vec<&'static str>,
    pub max_file_size_bytes: usize,
    pub scale: ScaleConfig,
    pub rotation_enabled: bool,
}

/// Parsed multipart fields of a digitization request
#[derive(Default)]
struct DigitizeRequest {
    file: Option<Bytes>,
    leads: Option<Vec<LeadGeometry>>,
    options: DigitizeOptions,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route("/digitize", post(handle_digitize))
        .route("/digitize/:method", post(handle_digitize_with_method))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig, digitize: DigitizeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, digitize);

    tracing::info!(
        "Available extraction methods: {:?} (default: {})",
        state.extractors.list(),
        state.extractors.default_name()
    );

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Handle digitization with the configured default method
async fn handle_digitize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Digitization>, ApiError> {
    let method = state.extractors.default_name().to_string();
    digitize_request(state, &method, multipart).await
}

/// Handle digitization with an explicit method (e.g. /digitize/naive)
async fn handle_digitize_with_method(
    State(state): State<AppState>,
    Path(method): Path<String>,
    multipart: Multipart,
) -> Result<Json<Digitization>, ApiError> {
    digitize_request(state, &method, multipart).await
}

async fn digitize_request(
    state: AppState,
    method: &str,
    multipart: Multipart,
) -> Result<Json<Digitization>, ApiError> {
    let extractor = state
        .extractors
        .get(method)
        .ok_or_else(|| ApiError::UnsupportedMethod(method.to_string()))?;

    let request = parse_multipart(multipart).await?;
    let data = request.file.ok_or(ApiError::MissingFile)?;
    if data.len() > state.config.max_file_size {
        return Err(ApiError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }
    let leads = request
        .leads
        .ok_or_else(|| ApiError::InvalidRequest("Missing leads field".to_string()))?;
    let options = request.options;

    let digitizer = Digitizer::with_extractor((*state.digitize).clone(), extractor)?;

    // Decoding and digitization are CPU-bound
    let result = tokio::task::spawn_blocking(move || {
        let decoded = image::load_from_memory(&data)
            .map_err(|e| DigitizeError::InvalidImage(e.to_string()))?;
        let page = Image::from(decoded);
        digitizer.digitize(&page, &leads, &options)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Digitization task failed: {}", e)))??;

    tracing::info!(
        "Digitized {} of {} leads with {} in {}ms",
        result.signals.len(),
        result.signals.len() + result.failures.len(),
        result.method,
        result.total_time_ms
    );

    Ok(Json(result))
}

async fn parse_multipart(mut multipart: Multipart) -> Result<DigitizeRequest, ApiError> {
    let mut request = DigitizeRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                request.file = Some(field.bytes().await.map_err(multipart_error)?);
            }
            "leads" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.leads = Some(parse_json::<Vec<LeadGeometry>>("leads", &text)?);
            }
            "calibration" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.options.calibration =
                    Some(parse_json::<GridCalibration>("calibration", &text)?);
            }
            "grid_region" => {
                let text = field.text().await.map_err(multipart_error)?;
                request.options.grid_region = Some(parse_json::<Rect>("grid_region", &text)?);
            }
            "rotation" => {
                let text = field.text().await.map_err(multipart_error)?;
                let angle = text.trim().parse::<f64>().map_err(|e| {
                    ApiError::InvalidRequest(format!("Invalid rotation '{}': {}", text, e))
                })?;
                request.options.rotation = Some(angle);
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    Ok(request)
}

fn parse_json<T: serde::de::DeserializeOwned>(field: &str, text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid {}: {}", field, e)))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::BodyTooLarge(err.body_text())
    } else {
        ApiError::InvalidRequest(format!("Failed to parse multipart: {}", err.body_text()))
    }
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_method: state.extractors.default_name().to_string(),
        available_methods: state.extractors.info(),
        leads: LeadId::ALL.iter().map(LeadId::as_str).collect(),
        max_file_size_bytes: state.config.max_file_size,
        scale: state.digitize.scale.clone(),
        rotation_enabled: state.digitize.rotation.enabled,
    })
}
