//! Public voucher API endpoints
//!
//! Handles HTTP requests from the client form:
//! - POST /api/v1/vouchers - Issue a voucher
//! - GET /api/v1/vouchers/{id}/qr.svg - QR code as SVG
//! - GET /api/v1/vouchers/{id}/qr.png - QR code as a PNG download

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreateVoucherInput, Voucher};
use crate::services::qr;

/// Response wrapping a single voucher
#[derive(Debug, Serialize)]
pub struct VoucherResponse {
    pub voucher: Voucher,
}

/// Query parameters for the PNG download
#[derive(Debug, Deserialize)]
pub struct PngQuery {
    pub size: Option<u32>,
}

/// Build the public voucher router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_voucher))
        .route("/{id}/qr.svg", get(qr_svg))
        .route("/{id}/qr.png", get(qr_png))
}

/// POST /api/v1/vouchers - Issue a voucher
async fn create_voucher(
    State(state): State<AppState>,
    Json(body): Json<CreateVoucherInput>,
) -> Result<impl IntoResponse, ApiError> {
    let voucher = state.voucher_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(VoucherResponse { voucher })))
}

/// GET /api/v1/vouchers/{id}/qr.svg - QR code as SVG
async fn qr_svg(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let voucher = state.voucher_service.require(&id).await?;
    let svg = qr::render_svg(&voucher.id).map_err(ApiError::internal_error)?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

/// GET /api/v1/vouchers/{id}/qr.png?size= - QR code as a PNG download
async fn qr_png(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PngQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let voucher = state.voucher_service.require(&id).await?;
    let size = query.size.unwrap_or(qr::DEFAULT_PNG_SIZE);
    let png = qr::render_png(&voucher.id, size).map_err(ApiError::internal_error)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        qr::download_file_name(&voucher.id, Utc::now().date_naive())
    );

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        png,
    ))
}
