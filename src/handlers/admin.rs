//! Administrative HTTP handlers.
//!
//! - GET /api/v1/admin/cancellations - List/filter/search all requests
//! - GET /api/v1/admin/cancellations/stats - Workflow aggregates
//! - GET /api/v1/admin/cancellations/:id - One request with its latest
//!   refund transaction
//!
//! All routes here require the `admin` role.

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::cancellation::CancellationResponse,
    models::pagination::{Paginated, PaginationParams},
    models::transaction::RefundTransactionResponse,
    services::admin_service::{self, CancellationFilter, CancellationStats, StatsQuery},
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Serialize;
use uuid::Uuid;

/// Admin view of a request with its most recent refund attempt.
#[derive(Debug, Serialize)]
pub struct AdminCancellationDetail {
    pub request: CancellationResponse,
    pub transaction: Option<RefundTransactionResponse>,
}

/// List all cancellation requests with optional filters.
///
/// # Query Parameters
///
/// - `status` - one workflow status
/// - `is_automatic` - policy-approved vs human-approved
/// - `from` / `to` - inclusive `requested_at` range (RFC 3339)
/// - `search` - case-insensitive match on identifiers and reason text
/// - `page` / `page_size` - pagination (page_size capped at 100)
pub async fn list_cancellations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<CancellationFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<Paginated<CancellationResponse>>, AppError> {
    require_admin(&auth)?;

    let page = admin_service::list_cancellations(&state.pool, &filter, &pagination).await?;

    Ok(Json(page.map(CancellationResponse::from)))
}

/// Aggregate statistics over an optional `requested_at` range.
pub async fn cancellation_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(range): Query<StatsQuery>,
) -> Result<Json<CancellationStats>, AppError> {
    require_admin(&auth)?;

    let stats = admin_service::cancellation_stats(&state.pool, &range).await?;

    Ok(Json(stats))
}

/// Fetch one request together with its latest refund transaction.
pub async fn get_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<AdminCancellationDetail>, AppError> {
    require_admin(&auth)?;

    let detail = admin_service::get_cancellation(&state.pool, request_id).await?;

    Ok(Json(AdminCancellationDetail {
        request: detail.request.into(),
        transaction: detail.transaction.map(RefundTransactionResponse::from),
    }))
}

fn require_admin(auth: &AuthContext) -> Result<(), AppError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
