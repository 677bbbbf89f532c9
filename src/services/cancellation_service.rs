//! Cancellation request workflow - creation, approval, and processing.
//!
//! This service drives the request state machine:
//!
//! ```text
//! pending ──► approved ──► processing ──► completed
//!    │                        ▲   │
//!    │                        └───┘ (bounded retry via failed)
//!    └──────► rejected
//! ```
//!
//! Every status mutation is a conditional UPDATE on the expected prior
//! status; `rows_affected() == 0` means another actor moved the row first
//! and surfaces as a conflict carrying the current status. Gateway work is
//! delegated to `gateway_service`.

use chrono::Utc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::gateway::GatewayClient;
use crate::models::booking::{Booking, BookingStatus};
use crate::models::cancellation::{
    ApproveCancellationRequest, CancellationRequest, CancellationStatus,
    CreateCancellationRequest, ManualCompletionRequest, RejectCancellationRequest,
};
use crate::models::listing::Listing;
use crate::models::pagination::{Paginated, PaginationParams};
use crate::models::policy::CancellationPolicy;
use crate::services::gateway_service::{self, RefundOutcome, RefundParams};
use crate::services::refund_policy;

/// Create a cancellation request for a booking.
///
/// # Process
///
/// 1. Verify the booking exists, belongs to the caller, and is cancellable
/// 2. Verify no other request currently owns the booking's refund
/// 3. Evaluate the listing's cancellation policy and snapshot the refund
///    calculation onto the new `pending` row
/// 4. If the policy grants automatic refunds, approve (with `approved_by`
///    NULL) and drive processing inline before returning
///
/// A concurrent duplicate loses either the pre-check or the partial unique
/// index race; both surface as the same conflict error.
pub async fn create_request(
    pool: &DbPool,
    gateway: &GatewayClient,
    client_id: Uuid,
    booking_id: Uuid,
    body: CreateCancellationRequest,
) -> Result<CancellationRequest, AppError> {
    let booking = fetch_booking(pool, booking_id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    // Other clients' bookings do not exist as far as this caller knows.
    if booking.client_id != client_id {
        return Err(AppError::BookingNotFound);
    }

    let cancellable = BookingStatus::parse(&booking.status)
        .map(|status| status.is_cancellable())
        .unwrap_or(false);
    if !cancellable {
        return Err(AppError::BookingNotCancellable);
    }

    if let Some(blocking) = blocking_request_status(pool, booking_id).await? {
        return Err(AppError::DuplicateActiveRequest {
            current_status: blocking,
        });
    }

    let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
        .bind(booking.listing_id)
        .fetch_optional(pool)
        .await?;
    let policy = match &listing {
        Some(listing) => listing.policy(),
        None => {
            tracing::warn!(
                listing_id = %booking.listing_id,
                "listing row missing; falling back to the default cancellation policy"
            );
            CancellationPolicy::default()
        }
    };

    let calculation = refund_policy::evaluate_and_calculate(
        &policy,
        booking.amount_cents,
        booking.start_date,
        Utc::now(),
    );
    let is_automatic = policy.allow_cancellation && policy.automatic_refund;

    let inserted = sqlx::query_as::<_, CancellationRequest>(
        r#"
        INSERT INTO cancellation_requests (
            booking_id,
            client_id,
            owner_id,
            listing_id,
            booking_start_date,
            booking_end_date,
            booking_amount_cents,
            currency,
            reason,
            reason_note,
            status,
            is_automatic,
            original_amount_cents,
            refund_percentage,
            refund_amount_cents,
            processing_fee_cents,
            final_refund_cents,
            hours_until_booking,
            applied_tier
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11,
                $12, $13, $14, $15, $16, $17, $18)
        RETURNING *
        "#,
    )
    .bind(booking.id)
    .bind(booking.client_id)
    .bind(booking.owner_id)
    .bind(booking.listing_id)
    .bind(booking.start_date)
    .bind(booking.end_date)
    .bind(booking.amount_cents)
    .bind(&booking.currency)
    .bind(body.reason.as_str())
    .bind(&body.reason_note)
    .bind(is_automatic)
    .bind(calculation.original_amount_cents)
    .bind(calculation.refund_percentage)
    .bind(calculation.refund_amount_cents)
    .bind(calculation.processing_fee_cents)
    .bind(calculation.final_refund_cents)
    .bind(calculation.hours_until_booking)
    .bind(&calculation.applied_tier)
    .fetch_one(pool)
    .await;

    let request = match inserted {
        Ok(request) => request,
        Err(err) if is_unique_violation(&err) => {
            // Lost the index race to a concurrent create.
            let blocking = blocking_request_status(pool, booking_id)
                .await?
                .unwrap_or_else(|| CancellationStatus::Pending.as_str().to_string());
            return Err(AppError::DuplicateActiveRequest {
                current_status: blocking,
            });
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        request_id = %request.id,
        booking_id = %booking_id,
        final_refund_cents = request.refund_calculation.final_refund_cents,
        automatic = is_automatic,
        "cancellation request created"
    );

    if !is_automatic {
        return Ok(request);
    }

    // Policy-driven approval, no human in the loop: approved_by stays NULL.
    let approved = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'approved', approved_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(request.id)
    .fetch_optional(pool)
    .await?;

    let Some(approved) = approved else {
        // Someone raced us between INSERT and auto-approval; return the
        // row as it stands.
        return fetch_request(pool, request.id)
            .await?
            .ok_or(AppError::CancellationNotFound);
    };

    tracing::info!(request_id = %approved.id, "cancellation request auto-approved by policy");

    match drive_processing(pool, gateway, approved, &booking).await {
        Ok(request) => Ok(request),
        Err(AppError::MissingPaymentReference) => {
            // Nothing to refund against; leave the request approved for an
            // admin to close manually.
            tracing::warn!(
                request_id = %request.id,
                "automatic refund skipped; booking has no payment reference"
            );
            fetch_request(pool, request.id)
                .await?
                .ok_or(AppError::CancellationNotFound)
        }
        Err(err) => Err(err),
    }
}

/// Fetch a request the actor is allowed to see.
///
/// Participants (the booking's client or owner) and admins see the
/// request; everyone else gets the same not-found as a nonexistent id.
pub async fn get_request_for_actor(
    pool: &DbPool,
    request_id: Uuid,
    actor_id: Uuid,
    is_admin: bool,
) -> Result<CancellationRequest, AppError> {
    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    if !is_admin && request.client_id != actor_id && request.owner_id != actor_id {
        return Err(AppError::CancellationNotFound);
    }

    Ok(request)
}

/// List the caller's requests, as client or owner, newest first.
pub async fn list_requests_for_actor(
    pool: &DbPool,
    actor_id: Uuid,
    status: Option<String>,
    pagination: &PaginationParams,
) -> Result<Paginated<CancellationRequest>, AppError> {
    let status = match status {
        Some(raw) => Some(
            CancellationStatus::parse(&raw)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let status_str = status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM cancellation_requests
        WHERE (client_id = $1 OR owner_id = $1)
          AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(actor_id)
    .bind(status_str)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, CancellationRequest>(
        r#"
        SELECT * FROM cancellation_requests
        WHERE (client_id = $1 OR owner_id = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY requested_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(actor_id)
    .bind(status_str)
    .bind(pagination.page_size())
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paginated::new(items, total, pagination))
}

/// Approve a pending request, optionally overriding the computed refund.
///
/// Only the listing owner or an admin may approve. The override, when
/// present, must stay within `[0, original_amount_cents]`.
pub async fn approve_request(
    pool: &DbPool,
    request_id: Uuid,
    approver_id: Uuid,
    is_admin: bool,
    body: ApproveCancellationRequest,
) -> Result<CancellationRequest, AppError> {
    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    if !is_admin && request.owner_id != approver_id {
        // The client sees their own request but only the owner side
        // decides it.
        return Err(if request.client_id == approver_id {
            AppError::Forbidden
        } else {
            AppError::CancellationNotFound
        });
    }

    if let Some(cents) = body.custom_refund_cents {
        let original = request.refund_calculation.original_amount_cents;
        if cents < 0 || cents > original {
            return Err(AppError::InvalidRequest(format!(
                "custom refund must be between 0 and {original} cents"
            )));
        }
    }

    let updated = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'approved',
            approved_by = $2,
            approved_at = NOW(),
            custom_refund_cents = $3,
            custom_refund_note = $4,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(approver_id)
    .bind(body.custom_refund_cents)
    .bind(&body.custom_refund_note)
    .fetch_optional(pool)
    .await?;

    let Some(updated) = updated else {
        return Err(conflict_with_current(pool, request_id).await?);
    };

    tracing::info!(
        request_id = %updated.id,
        approved_by = %approver_id,
        has_override = updated.custom_refund_cents.is_some(),
        "cancellation request approved"
    );

    Ok(updated)
}

/// Reject a pending request with a reason. Terminal.
pub async fn reject_request(
    pool: &DbPool,
    request_id: Uuid,
    rejecter_id: Uuid,
    is_admin: bool,
    body: RejectCancellationRequest,
) -> Result<CancellationRequest, AppError> {
    if body.reason.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "rejection reason is required".to_string(),
        ));
    }

    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    if !is_admin && request.owner_id != rejecter_id {
        return Err(if request.client_id == rejecter_id {
            AppError::Forbidden
        } else {
            AppError::CancellationNotFound
        });
    }

    let updated = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'rejected',
            rejected_by = $2,
            rejected_at = NOW(),
            rejection_reason = $3,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(rejecter_id)
    .bind(body.reason.trim())
    .fetch_optional(pool)
    .await?;

    let Some(updated) = updated else {
        return Err(conflict_with_current(pool, request_id).await?);
    };

    tracing::info!(
        request_id = %updated.id,
        rejected_by = %rejecter_id,
        "cancellation request rejected"
    );

    Ok(updated)
}

/// Drive an approved request through refund processing.
pub async fn process_request(
    pool: &DbPool,
    gateway: &GatewayClient,
    request_id: Uuid,
) -> Result<CancellationRequest, AppError> {
    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    if request.status != CancellationStatus::Approved.as_str() {
        return Err(AppError::InvalidTransition {
            current_status: request.status,
        });
    }

    let booking = fetch_booking(pool, request.booking_id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    drive_processing(pool, gateway, request, &booking).await
}

/// Close an approved request without a gateway refund.
///
/// Administrative override for bookings that carry no payment reference
/// (paid outside the gateway, or never charged). Appends a zero-movement
/// ledger entry so the audit trail shows the decision.
pub async fn complete_manually(
    pool: &DbPool,
    request_id: Uuid,
    admin_id: Uuid,
    body: ManualCompletionRequest,
) -> Result<CancellationRequest, AppError> {
    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    let booking = fetch_booking(pool, request.booking_id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    if booking.payment_reference.is_some() {
        return Err(AppError::InvalidRequest(
            "booking has a payment reference; the refund must go through the gateway".to_string(),
        ));
    }

    let note = body
        .note
        .filter(|note| !note.trim().is_empty())
        .unwrap_or_else(|| "closed administratively; no gateway refund issued".to_string());

    let mut db = pool.begin().await?;

    let updated = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'completed', processed_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = 'approved'
        RETURNING *
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut *db)
    .await?;

    let Some(updated) = updated else {
        db.rollback().await?;
        return Err(conflict_with_current(pool, request_id).await?);
    };

    sqlx::query(
        r#"
        INSERT INTO booking_refunds (
            booking_id,
            refund_transaction_id,
            gateway_refund_id,
            amount_cents,
            status,
            note
        )
        VALUES ($1, NULL, NULL, 0, 'manual', $2)
        "#,
    )
    .bind(booking.id)
    .bind(&note)
    .execute(&mut *db)
    .await?;

    sqlx::query("UPDATE bookings SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
        .bind(booking.id)
        .execute(&mut *db)
        .await?;

    db.commit().await?;

    tracing::warn!(
        request_id = %updated.id,
        completed_by = %admin_id,
        administrative_override = true,
        "cancellation completed manually without a gateway refund"
    );

    Ok(updated)
}

/// Move an approved request through `processing` and one gateway attempt.
///
/// A zero effective refund completes directly; there is no money to move,
/// so the gateway is never contacted. Otherwise the approved to processing
/// conditional UPDATE is the serialization point that guarantees a single
/// in-flight attempt per request.
async fn drive_processing(
    pool: &DbPool,
    gateway: &GatewayClient,
    request: CancellationRequest,
    booking: &Booking,
) -> Result<CancellationRequest, AppError> {
    if request.effective_refund_cents() <= 0 {
        return complete_without_refund(pool, &request, booking).await;
    }

    let params = RefundParams::from_request(&request, booking)?;
    params.validate()?;

    let moved = sqlx::query(
        r#"
        UPDATE cancellation_requests
        SET status = 'processing', updated_at = NOW()
        WHERE id = $1 AND status = 'approved'
        "#,
    )
    .bind(request.id)
    .execute(pool)
    .await?
    .rows_affected();

    if moved == 0 {
        return Err(conflict_with_current(pool, request.id).await?);
    }

    match gateway_service::process_refund(pool, gateway, params).await? {
        RefundOutcome::Completed { transaction } => {
            tracing::info!(
                request_id = %request.id,
                transaction_id = %transaction.id,
                "refund processed"
            );
        }
        RefundOutcome::Failed { reason, .. } => {
            tracing::warn!(
                request_id = %request.id,
                reason = %reason,
                "refund attempt failed; request can be retried"
            );
        }
    }

    fetch_request(pool, request.id)
        .await?
        .ok_or(AppError::CancellationNotFound)
}

/// Complete a request whose effective refund is zero.
async fn complete_without_refund(
    pool: &DbPool,
    request: &CancellationRequest,
    booking: &Booking,
) -> Result<CancellationRequest, AppError> {
    let mut db = pool.begin().await?;

    let updated = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'completed', processed_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = 'approved'
        RETURNING *
        "#,
    )
    .bind(request.id)
    .fetch_optional(&mut *db)
    .await?;

    let Some(updated) = updated else {
        db.rollback().await?;
        return Err(conflict_with_current(pool, request.id).await?);
    };

    sqlx::query(
        r#"
        INSERT INTO booking_refunds (
            booking_id,
            refund_transaction_id,
            gateway_refund_id,
            amount_cents,
            status,
            note
        )
        VALUES ($1, NULL, NULL, 0, 'completed', 'no refundable amount')
        "#,
    )
    .bind(booking.id)
    .execute(&mut *db)
    .await?;

    sqlx::query("UPDATE bookings SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
        .bind(booking.id)
        .execute(&mut *db)
        .await?;

    db.commit().await?;

    tracing::info!(
        request_id = %updated.id,
        "cancellation completed without gateway call; nothing to refund"
    );

    Ok(updated)
}

/// Status of the request currently blocking new requests for a booking.
async fn blocking_request_status(
    pool: &DbPool,
    booking_id: Uuid,
) -> Result<Option<String>, AppError> {
    let status = sqlx::query_scalar::<_, String>(
        r#"
        SELECT status FROM cancellation_requests
        WHERE booking_id = $1
          AND status IN ('pending', 'approved', 'processing', 'failed')
        LIMIT 1
        "#,
    )
    .bind(booking_id)
    .fetch_optional(pool)
    .await?;

    Ok(status)
}

/// Build the conflict error for a lost conditional UPDATE.
async fn conflict_with_current(pool: &DbPool, request_id: Uuid) -> Result<AppError, AppError> {
    let current = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;
    Ok(AppError::InvalidTransition {
        current_status: current.status,
    })
}

async fn fetch_request(
    pool: &DbPool,
    request_id: Uuid,
) -> Result<Option<CancellationRequest>, AppError> {
    let request = sqlx::query_as::<_, CancellationRequest>(
        "SELECT * FROM cancellation_requests WHERE id = $1",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    Ok(request)
}

async fn fetch_booking(pool: &DbPool, booking_id: Uuid) -> Result<Option<Booking>, AppError> {
    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_optional(pool)
        .await?;

    Ok(booking)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
