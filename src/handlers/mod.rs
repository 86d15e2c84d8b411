//! HTTP handlers for the WebAuthn relying-party surface.

use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

#[derive(Debug, Deserialize)]
pub struct RegisterStartRequest {
    pub username: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterStartResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "publicKeyCredentialCreationOptions")]
    pub public_key_credential_creation_options: serde_json::Value,
}

pub async fn register_start(
    State(state): State<AppState>,
    Json(body): Json<RegisterStartRequest>,
) -> Result<impl IntoResponse> {
    if body.username.trim().is_empty() || body.display_name.trim().is_empty() {
        return Err(AppError::Malformed(
            "username and displayName are required".to_string(),
        ));
    }

    let start = state
        .ceremony_engine
        .start_registration(&body.username, &body.display_name)
        .await?;

    Ok(Json(RegisterStartResponse {
        request_id: start.request_id,
        public_key_credential_creation_options: serde_json::to_value(start.options)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("options serialize failed: {e}")))?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterCompleteRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub credential: RegisterPublicKeyCredential,
}

#[derive(Debug, Serialize)]
pub struct RegisterCompleteResponse {
    pub success: bool,
    pub message: String,
}

pub async fn register_complete(
    State(state): State<AppState>,
    Json(body): Json<RegisterCompleteRequest>,
) -> Result<impl IntoResponse> {
    state
        .ceremony_engine
        .finish_registration(&body.request_id, &body.credential)
        .await?;

    Ok(Json(RegisterCompleteResponse {
        success: true,
        message: "Registration successful".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateStartRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateStartResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "publicKeyCredentialRequestOptions")]
    pub public_key_credential_request_options: serde_json::Value,
}

pub async fn authenticate_start(
    State(state): State<AppState>,
    Json(body): Json<AuthenticateStartRequest>,
) -> Result<impl IntoResponse> {
    let username = body.username.as_deref().filter(|u| !u.trim().is_empty());
    let start = state
        .ceremony_engine
        .start_authentication(username)
        .await?;

    Ok(Json(AuthenticateStartResponse {
        request_id: start.request_id,
        public_key_credential_request_options: serde_json::to_value(start.options)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("options serialize failed: {e}")))?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateCompleteRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub credential: PublicKeyCredential,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateCompleteResponse {
    pub success: bool,
    pub username: String,
    pub token: String,
}

pub async fn authenticate_complete(
    State(state): State<AppState>,
    Json(body): Json<AuthenticateCompleteRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .ceremony_engine
        .finish_authentication(&body.request_id, &body.credential)
        .await?;

    Ok(Json(AuthenticateCompleteResponse {
        success: true,
        username: outcome.username,
        token: outcome.token,
    }))
}

pub async fn jwks(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let jwks = state.jwks_publisher.current_jwks().await?;
    Ok((
        [(
            header::CACHE_CONTROL,
            "max-age=300, stale-if-error=3600",
        )],
        Json(jwks),
    ))
}

/// Process liveness only — no dependency checks.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Alias for `health`, named separately because orchestrators probe the two
/// paths independently and the spec lists both.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let (db_ok, redis_ok) = state.check_ready().await;
    if db_ok && redis_ok {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Stub: no Prometheus registry is wired into this service (see
/// telemetry::init); this keeps the path present for deployments that probe
/// it without depending on a metrics export pipeline.
pub async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "")
}
