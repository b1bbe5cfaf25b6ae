use crate::alerts::{AlertStats, AlertStore, NewAlert, SecurityAlert};
use crate::api::websocket::{device_ingest_ws, live_view_ws, urgency_ws};
use crate::capture::{CaptureDesk, DeviceRelay, RecordingArtifact, SessionSnapshot};
use crate::config::ApiConfig;
use crate::error::Error;
use crate::escalation::{Action, ActionOutcome, EscalationController};
use crate::messaging::AlertEvents;
use crate::urgency::UrgencyTicker;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub controller: Arc<EscalationController>,
    pub capture: Arc<CaptureDesk>,
    pub relay: DeviceRelay,
    pub ticker: Arc<UrgencyTicker>,
    pub events: AlertEvents,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl ApiError {
    fn with_status(err: &Error, status: StatusCode) -> Self {
        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateId(_)
            | Error::SessionBusy(_)
            | Error::NotConnected(_)
            | Error::NotRecording(_) => StatusCode::CONFLICT,
            Error::AlreadyResolved(_) => StatusCode::GONE,
            Error::StreamUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Delivery(_) => StatusCode::BAD_GATEWAY,
            Error::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::with_status(&err, status)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Body of `POST /api/alerts/:id/actions`
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        // Create a CORS layer that allows all origins and preflight requests
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        Router::new()
            // Alert routes
            .route("/api/alerts", get(list_alerts).post(create_alert))
            .route("/api/alerts/:id", get(get_alert))
            .route("/api/alerts/:id/actions", post(apply_action))
            // Evidence capture routes
            .route("/api/capture", get(get_capture))
            .route("/api/capture/recording/start", post(start_recording))
            .route("/api/capture/recording/stop", post(stop_recording))
            .route("/api/recordings", get(list_recordings))
            .route("/api/stats", get(get_stats))
            // WebSocket routes
            .route("/ws/urgency", get(urgency_ws))
            .route("/ws/capture/live", get(live_view_ws))
            .route("/ws/devices/:alert_id", get(device_ingest_ws))
            .with_state(self.state.clone())
            .layer(cors)
    }

    /// Serve until `shutdown` completes
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        // Build the server address
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn list_alerts(State(state): State<AppState>) -> ApiResult<Json<Vec<SecurityAlert>>> {
    Ok(Json(state.store.list()?))
}

async fn create_alert(
    State(state): State<AppState>,
    Json(new_alert): Json<NewAlert>,
) -> ApiResult<(StatusCode, Json<SecurityAlert>)> {
    let alert = state.store.add(new_alert)?;
    state.events.alert_raised(&alert).await;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SecurityAlert>> {
    Ok(Json(state.store.get(&id)?))
}

async fn apply_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<Json<ActionOutcome>> {
    let outcome = state.controller.apply_action(&id, request.action).await?;
    Ok(Json(outcome))
}

async fn get_capture(State(state): State<AppState>) -> Json<Option<SessionSnapshot>> {
    Json(state.capture.snapshot().await)
}

async fn start_recording(State(state): State<AppState>) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.capture.start_recording().await?))
}

async fn stop_recording(State(state): State<AppState>) -> ApiResult<Json<RecordingArtifact>> {
    Ok(Json(state.capture.stop_recording().await?))
}

async fn list_recordings(State(state): State<AppState>) -> Json<Vec<RecordingArtifact>> {
    Json(state.capture.artifacts())
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<AlertStats>> {
    Ok(Json(state.store.stats()?))
}
