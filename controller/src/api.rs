use crate::control_plane::{ControlPlane, GrantStatusView};
use crate::error::{ControllerError, Result};
use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use policy::{GrantId, UsageReport, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

#[derive(Clone)]
struct AppState {
    control: Arc<ControlPlane>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenericResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct GrantsResponse {
    grants: Vec<GrantStatusView>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageAccepted {
    success: bool,
    billed_delta: u64,
    billed_bytes: u64,
    remaining_bytes: i64,
}

pub fn router(control: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/grants", get(list_grants))
        .route("/api/grants/{id}", get(get_grant))
        .route("/api/users/{id}", get(get_user))
        .route("/api/usage", post(report_usage))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { control })
}

pub async fn start_server(
    addr: &str,
    control: Arc<ControlPlane>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(control))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

fn error_response(error: ControllerError) -> Response {
    let status = match &error {
        ControllerError::GrantNotFound(_)
        | ControllerError::TunnelNotFound(_)
        | ControllerError::SpeedRuleNotFound(_)
        | ControllerError::UserNotFound(_) => StatusCode::NOT_FOUND,
        ControllerError::Validation(_) => StatusCode::BAD_REQUEST,
        ControllerError::Consistency(_) | ControllerError::GrantExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(GenericResponse {
            success: false,
            message: error.to_string(),
        }),
    )
        .into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(state))]
async fn list_grants(State(state): State<AppState>) -> impl IntoResponse {
    let grants = state.control.grant_statuses(Utc::now()).await;
    Json(GrantsResponse { grants })
}

#[instrument(skip(state))]
async fn get_grant(State(state): State<AppState>, Path(grant_id): Path<GrantId>) -> Response {
    match state.control.grant_status(grant_id, Utc::now()).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

#[instrument(skip(state))]
async fn get_user(State(state): State<AppState>, Path(user_id): Path<UserId>) -> Response {
    match state.control.user_status(user_id, Utc::now()) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

#[instrument(skip(state, report), fields(grant_id = report.grant_id))]
async fn report_usage(State(state): State<AppState>, Json(report): Json<UsageReport>) -> Response {
    match state.control.report_usage(&report, Utc::now()).await {
        Ok(result) => (
            StatusCode::OK,
            Json(UsageAccepted {
                success: true,
                billed_delta: result.billed_delta,
                billed_bytes: result.snapshot.billed_bytes,
                remaining_bytes: result.remaining(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
