//! Cancellation workflow HTTP handlers.
//!
//! This module implements the cancellation and refund endpoints:
//! - POST /api/v1/bookings/:booking_id/cancellation - Request a cancellation
//! - GET  /api/v1/cancellations - List the caller's requests
//! - GET  /api/v1/cancellations/:id - Fetch one request
//! - POST /api/v1/cancellations/:id/approve - Approve (owner/admin)
//! - POST /api/v1/cancellations/:id/reject - Reject (owner/admin)
//! - POST /api/v1/cancellations/:id/process - Drive the refund (admin)
//! - POST /api/v1/cancellations/:id/retry - Retry a failed refund (admin)
//! - POST /api/v1/cancellations/:id/complete-manual - Close without gateway (admin)
//! - GET  /api/v1/refund-transactions/:id/status - Read-only gateway poll (admin)
//! - POST /api/v1/refund-transactions/:id/reconcile - Resolve a stuck attempt (admin)

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::cancellation::{
        ApproveCancellationRequest, CancellationResponse, CreateCancellationRequest,
        ManualCompletionRequest, RejectCancellationRequest,
    },
    models::pagination::{Paginated, PaginationParams},
    models::transaction::RefundTransactionResponse,
    services::{cancellation_service, gateway_service},
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

/// Optional status filter for the caller's listing.
#[derive(Debug, Default, Deserialize)]
pub struct StatusFilterQuery {
    pub status: Option<String>,
}

/// Request cancellation of a booking.
///
/// The caller must be the booking's client. When the listing's policy
/// grants automatic refunds, the request is approved and processed before
/// this returns, so the response may already be `completed` (or `failed`).
///
/// # Request Body
///
/// ```json
/// {
///   "reason": "schedule_change",
///   "reason_note": "Meeting moved to next month"
/// }
/// ```
///
/// # Response
///
/// The full request including the refund calculation snapshot:
///
/// ```json
/// {
///   "id": "770e8400-...",
///   "status": "pending",
///   "refund_calculation": {
///     "original_amount_cents": 100000,
///     "refund_percentage": 50.0,
///     "final_refund_cents": 47500
///   },
///   "refund_amount": { "source": "computed", "amount_cents": 47500 }
/// }
/// ```
pub async fn create_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<CreateCancellationRequest>,
) -> Result<Json<CancellationResponse>, AppError> {
    let created = cancellation_service::create_request(
        &state.pool,
        &state.gateway,
        auth.user_id,
        booking_id,
        request,
    )
    .await?;

    Ok(Json(created.into()))
}

/// List the caller's cancellation requests (as client or owner).
pub async fn list_cancellations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<StatusFilterQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<Paginated<CancellationResponse>>, AppError> {
    let page = cancellation_service::list_requests_for_actor(
        &state.pool,
        auth.user_id,
        filter.status,
        &pagination,
    )
    .await?;

    Ok(Json(page.map(CancellationResponse::from)))
}

/// Get one cancellation request.
///
/// # Security
///
/// Returns 404 unless the caller is the request's client, the listing
/// owner, or an admin.
pub async fn get_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CancellationResponse>, AppError> {
    let request = cancellation_service::get_request_for_actor(
        &state.pool,
        request_id,
        auth.user_id,
        auth.is_admin(),
    )
    .await?;

    Ok(Json(request.into()))
}

/// Approve a pending request, optionally overriding the refund amount.
pub async fn approve_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<ApproveCancellationRequest>,
) -> Result<Json<CancellationResponse>, AppError> {
    let approved = cancellation_service::approve_request(
        &state.pool,
        request_id,
        auth.user_id,
        auth.is_admin(),
        request,
    )
    .await?;

    Ok(Json(approved.into()))
}

/// Reject a pending request with a reason.
pub async fn reject_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<RejectCancellationRequest>,
) -> Result<Json<CancellationResponse>, AppError> {
    let rejected = cancellation_service::reject_request(
        &state.pool,
        request_id,
        auth.user_id,
        auth.is_admin(),
        request,
    )
    .await?;

    Ok(Json(rejected.into()))
}

/// Drive an approved request through refund processing.
///
/// A failed gateway attempt is not an HTTP error: the response carries the
/// request in `failed` state with its `failure_reason`.
pub async fn process_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CancellationResponse>, AppError> {
    require_admin(&auth)?;

    let processed =
        cancellation_service::process_request(&state.pool, &state.gateway, request_id).await?;

    Ok(Json(processed.into()))
}

/// Retry a failed refund. Bounded; the fourth attempt is rejected.
pub async fn retry_cancellation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<CancellationResponse>, AppError> {
    require_admin(&auth)?;

    gateway_service::retry_refund(&state.pool, &state.gateway, request_id).await?;

    let request = cancellation_service::get_request_for_actor(
        &state.pool,
        request_id,
        auth.user_id,
        true,
    )
    .await?;

    Ok(Json(request.into()))
}

/// Complete an approved request without a gateway refund.
///
/// Only valid when the booking has no stored payment reference.
pub async fn complete_cancellation_manually(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(request_id): Path<Uuid>,
    Json(request): Json<ManualCompletionRequest>,
) -> Result<Json<CancellationResponse>, AppError> {
    require_admin(&auth)?;

    let completed =
        cancellation_service::complete_manually(&state.pool, request_id, auth.user_id, request)
            .await?;

    Ok(Json(completed.into()))
}

/// Poll the gateway for a refund transaction's current state.
///
/// Read-only; our records are never changed by this call.
pub async fn refund_transaction_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<gateway_service::StatusCheck>, AppError> {
    require_admin(&auth)?;

    let check =
        gateway_service::check_refund_status(&state.pool, &state.gateway, transaction_id).await?;

    Ok(Json(check))
}

/// Resolve a stuck pending transaction from the gateway's records.
pub async fn reconcile_refund_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<RefundTransactionResponse>, AppError> {
    require_admin(&auth)?;

    let transaction =
        gateway_service::reconcile_transaction(&state.pool, &state.gateway, transaction_id).await?;

    Ok(Json(transaction.into()))
}

fn require_admin(auth: &AuthContext) -> Result<(), AppError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
