//! Authentication API endpoints
//!
//! Handles HTTP requests for the staff session:
//! - POST /api/v1/auth/login - Staff login
//! - GET /api/v1/auth/status - Whether the caller holds a live session
//! - POST /api/v1/auth/logout - Staff logout
//! - GET /api/v1/auth/session - Current session expiry

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{session_token, ApiError, AppState, AuthenticatedSession, SESSION_COOKIE};

/// Request body for staff login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response for successful login
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Response for the status check
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
}

/// Response describing the current session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

/// Build auth routes that need a session
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/session", get(current_session))
}

/// Build public auth routes
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/status", get(status))
}

fn session_cookie(token: &str, max_age_seconds: i64) -> Result<HeaderValue, ApiError> {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_seconds
    );
    HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)
}

/// POST /api/v1/auth/login - Staff login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .session_gate
        .login(&body.username, &body.password)
        .await?;

    let max_age = state.session_gate.lifetime().num_seconds();
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&issued.token, max_age)?);

    Ok((
        headers,
        Json(LoginResponse {
            token: issued.token,
            expires_at: issued.session.expires_at,
        }),
    ))
}

/// GET /api/v1/auth/status - Whether the caller holds a live session
async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    let authenticated = match session_token(&headers) {
        Some(token) => state.session_gate.is_authenticated(&token).await?,
        None => false,
    };
    Ok(Json(StatusResponse { authenticated }))
}

/// POST /api/v1/auth/logout - Staff logout
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.session_gate.logout(&token).await?;
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, session_cookie("", 0)?);

    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/v1/auth/session - Current session expiry
async fn current_session(
    Extension(AuthenticatedSession(session)): Extension<AuthenticatedSession>,
) -> Json<SessionResponse> {
    Json(SessionResponse {
        expires_at: session.expires_at,
        expires_in: session.remaining_seconds(),
    })
}
