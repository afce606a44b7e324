//! Staff console API endpoints
//!
//! Every route here sits behind `require_auth`:
//! - GET /api/v1/admin/vouchers - List with search and status filter
//! - GET /api/v1/admin/vouchers/{id} - Voucher lookup
//! - POST /api/v1/admin/vouchers/validate - Redeem a scanned voucher
//! - GET /api/v1/admin/vouchers/export.csv - CSV download
//! - GET /api/v1/admin/vouchers/events - Live change feed (SSE)
//! - GET /api/v1/admin/statistics - Usage counters and chart series

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::middleware::{ApiError, AppState};
use crate::api::vouchers::VoucherResponse;
use crate::models::{
    StatusFilter, ValidationOutcome, Voucher, VoucherEvent, VoucherFilter, VoucherStatistics,
};
use crate::services::export;

/// Query parameters for the voucher list
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
}

/// Response for the voucher list
#[derive(Debug, Serialize)]
pub struct VoucherListResponse {
    pub vouchers: Vec<Voucher>,
    /// Number of vouchers in the store
    pub total: usize,
    /// Number of vouchers after filtering
    pub showing: usize,
}

/// Request body for redemption
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub id: String,
}

/// Build the staff console router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vouchers", get(list_vouchers))
        .route("/vouchers/validate", post(validate_voucher))
        .route("/vouchers/export.csv", get(export_vouchers))
        .route("/vouchers/events", get(voucher_events))
        .route("/vouchers/{id}", get(get_voucher))
        .route("/statistics", get(statistics))
}

impl TryFrom<ListQuery> for VoucherFilter {
    type Error = ApiError;

    fn try_from(query: ListQuery) -> Result<Self, Self::Error> {
        let status = match query.status.as_deref() {
            Some(raw) => raw
                .parse::<StatusFilter>()
                .map_err(|e| ApiError::validation_error(e.to_string()))?,
            None => StatusFilter::All,
        };
        let search = query.search.filter(|s| !s.trim().is_empty());
        Ok(VoucherFilter::new(search, status))
    }
}

/// GET /api/v1/admin/vouchers?search=&status=
async fn list_vouchers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<VoucherListResponse>, ApiError> {
    let filter = VoucherFilter::try_from(query)?;

    let all = state.voucher_service.list().await;
    let vouchers = filter.apply(&all);

    Ok(Json(VoucherListResponse {
        total: all.len(),
        showing: vouchers.len(),
        vouchers,
    }))
}

/// GET /api/v1/admin/vouchers/{id}
async fn get_voucher(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoucherResponse>, ApiError> {
    let voucher = state.voucher_service.require(&id).await?;
    Ok(Json(VoucherResponse { voucher }))
}

/// POST /api/v1/admin/vouchers/validate
///
/// Unknown and already used vouchers are `200` responses with
/// `valid = false` and a reason.
async fn validate_voucher(
    State(state): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ValidationOutcome>, ApiError> {
    let outcome = state.voucher_service.validate(&body.id).await?;
    Ok(Json(outcome))
}

/// GET /api/v1/admin/statistics
async fn statistics(State(state): State<AppState>) -> Json<VoucherStatistics> {
    Json(state.voucher_service.statistics().await)
}

/// GET /api/v1/admin/vouchers/export.csv
async fn export_vouchers(State(state): State<AppState>) -> impl IntoResponse {
    let vouchers = state.voucher_service.list().await;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        export::export_file_name(Utc::now().date_naive())
    );

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export::to_csv(&vouchers),
    )
}

/// GET /api/v1/admin/vouchers/events
async fn voucher_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(state.voucher_service.subscribe())).keep_alive(KeepAlive::default())
}

fn to_sse(event: &VoucherEvent) -> Option<Event> {
    match Event::default().event(event.name()).json_data(event.voucher()) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::warn!("Failed to serialize voucher event: {}", e);
            None
        }
    }
}

/// Turn store notifications into SSE events.
///
/// A subscriber that falls behind gets a `resync` event and should reload
/// the list.
fn event_stream(
    receiver: broadcast::Receiver<VoucherEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(sse) = to_sse(&event) {
                        return Some((Ok(sse), receiver));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", missed);
                    let resync = Event::default().event("resync").data(missed.to_string());
                    return Some((Ok(resync), receiver));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_list_query_to_filter() {
        let filter = VoucherFilter::try_from(ListQuery {
            search: Some("ana".to_string()),
            status: Some("used".to_string()),
        })
        .unwrap();
        assert_eq!(filter.search.as_deref(), Some("ana"));
        assert_eq!(filter.status, StatusFilter::Used);

        let filter = VoucherFilter::try_from(ListQuery {
            search: Some("  ".to_string()),
            status: None,
        })
        .unwrap();
        assert!(filter.search.is_none());
        assert_eq!(filter.status, StatusFilter::All);

        let invalid = VoucherFilter::try_from(ListQuery {
            search: None,
            status: Some("redeemed".to_string()),
        });
        assert!(invalid.is_err());
    }

    #[tokio::test]
    async fn test_event_stream_forwards_events() {
        let (sender, receiver) = broadcast::channel(8);
        let mut events = Box::pin(event_stream(receiver));

        sender
            .send(VoucherEvent::Created(Voucher::new("Ana", "0911234567")))
            .unwrap();
        assert!(events.next().await.is_some());

        drop(sender);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_stream_reports_lag() {
        let (sender, receiver) = broadcast::channel(1);
        let mut events = Box::pin(event_stream(receiver));

        for name in ["a", "b", "c"] {
            sender
                .send(VoucherEvent::Created(Voucher::new(name, "0911234567")))
                .unwrap();
        }

        // First item is the lag notice, then the one retained event.
        assert!(events.next().await.is_some());
        assert!(events.next().await.is_some());
        drop(sender);
        assert!(events.next().await.is_none());
    }
}
