//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error envelope used by every handler
//! - Session checking for the staff console routes

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::DynDatabasePool;
use crate::models::Session;
use crate::services::{SessionError, SessionGate, VoucherService, VoucherServiceError};

/// Name of the cookie carrying the staff session token
pub const SESSION_COOKIE: &str = "nalu_session";

/// Where the console sends an unauthenticated staff member
pub const LOGIN_PATH: &str = "/login";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub voucher_service: Arc<VoucherService>,
    pub session_gate: Arc<SessionGate>,
}

/// Live staff session attached to guarded requests
#[derive(Debug, Clone)]
pub struct AuthenticatedSession(pub Session);

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// 401 telling the console to show its login view
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_details(
            "UNAUTHORIZED",
            message,
            serde_json::json!({ "redirect": LOGIN_PATH }),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    /// Log the cause and return a generic 500
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Request failed: {}", cause);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<VoucherServiceError> for ApiError {
    fn from(e: VoucherServiceError) -> Self {
        match e {
            VoucherServiceError::ValidationError(msg) => Self::validation_error(msg),
            VoucherServiceError::NotFound(_) => Self::not_found("Voucher not found"),
            VoucherServiceError::AlreadyUsed(_) => {
                Self::new("CONFLICT", "Voucher has already been used")
            }
            VoucherServiceError::Backend(e) => Self::internal_error(e),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidCredentials => Self::unauthorized("Invalid username or password"),
            SessionError::Backend(e) => Self::internal_error(e),
        }
    }
}

/// Extract session token from the Authorization header or session cookie
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    let prefix = format!("{}=", SESSION_COOKIE);
    for cookie_header in headers.get_all(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix(prefix.as_str()) {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware for the staff console routes
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let session = state
        .session_gate
        .current(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedSession(session));
    Ok(next.run(request).await)
}
