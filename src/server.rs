//! HTTP control API over the [`WifiManager`].
//!
//! Manager calls block on subprocesses, so each handler hands its call to
//! `spawn_blocking`. A background task refreshes the status snapshot
//! periodically.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::error::WifiError;
use crate::manager::WifiManager;

pub struct ServerConfig {
    pub port: u16,
    /// Period of the background status refresh. Zero disables it.
    pub health_interval: Duration,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ssid: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HotspotRequest {
    pub ssid: String,
    pub password: String,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_channel() -> u8 {
    7
}

type AppState = Arc<WifiManager>;

pub fn router(manager: Arc<WifiManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/wifi/status", get(status_handler))
        .route("/api/wifi/refresh", post(refresh_handler))
        .route("/api/wifi/scan", get(scan_handler))
        .route("/api/wifi/connect", post(connect_handler))
        .route("/api/wifi/disconnect", post(disconnect_handler))
        .route("/api/wifi/hotspot", get(hotspot_status_handler))
        .route("/api/wifi/hotspot/start", post(hotspot_start_handler))
        .route("/api/wifi/hotspot/stop", post(hotspot_stop_handler))
        .layer(cors)
        .with_state(manager)
}

pub async fn run_server(manager: Arc<WifiManager>, config: ServerConfig) -> anyhow::Result<()> {
    if !config.health_interval.is_zero() {
        tokio::spawn(health_loop(manager.clone(), config.health_interval));
    }

    let app = router(manager);
    let addr = format!("0.0.0.0:{}", config.port);
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_loop(manager: Arc<WifiManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let manager = manager.clone();
        match tokio::task::spawn_blocking(move || manager.refresh_status()).await {
            Ok(Ok(info)) => debug!("health check: {}", info.state()),
            Ok(Err(e)) => warn!("health check failed: {}", e),
            Err(e) => warn!("health check task panicked: {}", e),
        }
    }
}

/// Runs a blocking manager call off the async runtime.
async fn blocking<T, F>(manager: AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&WifiManager) -> Result<T, WifiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&manager))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::Wifi)
}

pub enum ApiError {
    Wifi(WifiError),
    Internal(String),
}

pub fn status_code(error: &WifiError) -> StatusCode {
    match error {
        WifiError::Security(_) => StatusCode::BAD_REQUEST,
        WifiError::OperationInProgress { .. } => StatusCode::CONFLICT,
        WifiError::Interface(_) => StatusCode::SERVICE_UNAVAILABLE,
        WifiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Wifi(e) => {
                let body = json!({ "error": e.kind(), "message": e.to_string() });
                (status_code(&e), Json(body)).into_response()
            }
            ApiError::Internal(message) => {
                let body = json!({ "error": "internal", "message": message });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

async fn status_handler(State(manager): State<AppState>) -> impl IntoResponse {
    Json(manager.get_status())
}

async fn refresh_handler(State(manager): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(blocking(manager, |m| m.refresh_status()).await?))
}

async fn scan_handler(State(manager): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(blocking(manager, |m| m.scan()).await?))
}

async fn connect_handler(
    State(manager): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let info = blocking(manager, move |m| {
        m.connect(&request.ssid, request.password.as_deref())
    })
    .await?;
    Ok(Json(info))
}

async fn disconnect_handler(State(manager): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(blocking(manager, |m| m.disconnect()).await?))
}

async fn hotspot_status_handler(State(manager): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(blocking(manager, |m| Ok(m.hotspot_status())).await?))
}

async fn hotspot_start_handler(
    State(manager): State<AppState>,
    Json(request): Json<HotspotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let info = blocking(manager, move |m| {
        m.start_hotspot(&request.ssid, &request.password, request.channel)
    })
    .await?;
    Ok(Json(info))
}

async fn hotspot_stop_handler(State(manager): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(blocking(manager, |m| m.stop_hotspot()).await?))
}
