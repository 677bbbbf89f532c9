//! Refund execution against the payment gateway.
//!
//! This service owns the `refund_transactions` table and every interaction
//! with PayFlux. The contract with the rest of the workflow:
//!
//! - A `pending` transaction row is INSERTed before the gateway is called,
//!   so a crash mid-call leaves a durable anchor that `reconcile_transaction`
//!   can resolve later.
//! - Gateway outcomes are returned as data (`RefundOutcome`); a declined or
//!   failed refund is a recorded workflow state, not an HTTP error.
//! - Retries are bounded by `MAX_REFUND_ATTEMPTS` and take their retry slot
//!   atomically before the gateway sees the attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::gateway::{
    CreateRefundRequest, GATEWAY_PROVIDER, GatewayClient, GatewayError, GatewayRefund,
    GatewayRefundStatus,
};
use crate::models::booking::Booking;
use crate::models::cancellation::{CancellationRequest, MAX_REFUND_ATTEMPTS};
use crate::models::transaction::{RefundTransaction, RefundTransactionStatus};

/// Everything one gateway refund attempt needs.
///
/// Built from a cancellation request plus its booking; `amount_cents` is
/// the resolved effective refund (owner override when present, otherwise
/// the computed snapshot).
#[derive(Debug, Clone)]
pub struct RefundParams {
    pub cancellation_request_id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    /// The gateway's original charge id, refunded against.
    pub payment_reference: String,
    pub reason: String,
    pub note: Option<String>,
}

impl RefundParams {
    /// Assemble params for a request/booking pair.
    ///
    /// # Errors
    ///
    /// `MissingPaymentReference` when the booking has no stored charge id;
    /// such requests can only be closed via manual completion.
    pub fn from_request(
        request: &CancellationRequest,
        booking: &Booking,
    ) -> Result<Self, AppError> {
        let payment_reference = booking
            .payment_reference
            .clone()
            .ok_or(AppError::MissingPaymentReference)?;

        Ok(Self {
            cancellation_request_id: request.id,
            booking_id: request.booking_id,
            client_id: request.client_id,
            owner_id: request.owner_id,
            amount_cents: request.effective_refund_cents(),
            currency: request.currency.clone(),
            payment_method: booking.payment_method.clone(),
            payment_reference,
            reason: request.reason.clone(),
            note: request.reason_note.clone(),
        })
    }

    /// Reject unusable params before any row is written.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.cancellation_request_id.is_nil() {
            return Err(AppError::InvalidRequest(
                "cancellation request id is required".to_string(),
            ));
        }
        if self.booking_id.is_nil() {
            return Err(AppError::InvalidRequest(
                "booking id is required".to_string(),
            ));
        }
        if self.amount_cents <= 0 {
            return Err(AppError::InvalidRequest(
                "refund amount must be positive".to_string(),
            ));
        }
        if self.payment_reference.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "payment reference is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one gateway attempt produced.
#[derive(Debug)]
pub enum RefundOutcome {
    Completed {
        transaction: RefundTransaction,
    },
    Failed {
        transaction: RefundTransaction,
        reason: String,
    },
}

/// Read-only snapshot of a refund's state at the gateway.
#[derive(Debug, Serialize)]
pub struct StatusCheck {
    pub transaction_id: Uuid,
    /// What our ledger currently says.
    pub recorded_status: String,
    /// The gateway's answer mapped into our vocabulary.
    pub gateway_status: GatewayRefundStatus,
    pub gateway_raw_status: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub found_at_gateway: bool,
}

/// Execute one refund attempt against the gateway.
///
/// # Process
///
/// 1. Validate params (bad params mean no transaction row at all)
/// 2. INSERT the `pending` transaction as the durable recovery anchor
/// 3. Call the gateway, sending our transaction id as the merchant
///    reference
/// 4. Record the outcome: success updates the transaction, the request,
///    the append-only refund ledger, and the booking; failure captures the
///    most specific error into the transaction and request
///
/// Amounts are already held in the gateway's minor units, so the wire
/// amount is the stored amount unchanged.
pub async fn process_refund(
    pool: &DbPool,
    gateway: &GatewayClient,
    params: RefundParams,
) -> Result<RefundOutcome, AppError> {
    params.validate()?;

    let transaction = sqlx::query_as::<_, RefundTransaction>(
        r#"
        INSERT INTO refund_transactions (
            cancellation_request_id,
            booking_id,
            client_id,
            owner_id,
            amount_cents,
            currency,
            payment_method,
            original_transaction_id,
            status,
            gateway_provider
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
        RETURNING *
        "#,
    )
    .bind(params.cancellation_request_id)
    .bind(params.booking_id)
    .bind(params.client_id)
    .bind(params.owner_id)
    .bind(params.amount_cents)
    .bind(&params.currency)
    .bind(&params.payment_method)
    .bind(&params.payment_reference)
    .bind(GATEWAY_PROVIDER)
    .fetch_one(pool)
    .await?;

    tracing::info!(
        transaction_id = %transaction.id,
        request_id = %params.cancellation_request_id,
        amount_cents = params.amount_cents,
        "submitting refund to gateway"
    );

    let wire = CreateRefundRequest {
        amount_minor: params.amount_cents,
        currency: params.currency.clone(),
        payment_reference: params.payment_reference.clone(),
        reason: params.reason.clone(),
        note: params.note.clone(),
        merchant_reference: transaction.id.to_string(),
    };

    match gateway.create_refund(&wire).await {
        Ok(refund) if refund.status != GatewayRefundStatus::Failed => {
            // Accepted by the gateway; a still-settling refund is treated as
            // done here and disputes surface through the status check.
            let transaction = record_success(
                pool,
                transaction.id,
                params.cancellation_request_id,
                params.booking_id,
                params.amount_cents,
                &refund,
            )
            .await?;
            tracing::info!(
                transaction_id = %transaction.id,
                gateway_refund_id = %refund.id,
                "refund completed"
            );
            Ok(RefundOutcome::Completed { transaction })
        }
        Ok(refund) => {
            // 2xx answer whose body says the refund was declined.
            let reason = format!("gateway reported refund status '{}'", refund.raw_status);
            let transaction = record_failure(
                pool,
                transaction.id,
                params.cancellation_request_id,
                &reason,
                Some(&refund.body),
            )
            .await?;
            tracing::error!(
                transaction_id = %transaction.id,
                reason = %reason,
                "refund declined by gateway"
            );
            Ok(RefundOutcome::Failed {
                transaction,
                reason,
            })
        }
        Err(err) => {
            let reason = err.detail();
            let response = api_error_body(&err);
            let transaction = record_failure(
                pool,
                transaction.id,
                params.cancellation_request_id,
                &reason,
                response.as_ref(),
            )
            .await?;
            tracing::error!(
                transaction_id = %transaction.id,
                error = %reason,
                "gateway call failed"
            );
            Ok(RefundOutcome::Failed {
                transaction,
                reason,
            })
        }
    }
}

/// Poll the gateway for a transaction's current state. Mutates nothing.
///
/// A refund the gateway cannot find reports as `processing`: absence only
/// becomes `failed` through `reconcile_transaction`, never through a read.
pub async fn check_refund_status(
    pool: &DbPool,
    gateway: &GatewayClient,
    transaction_id: Uuid,
) -> Result<StatusCheck, AppError> {
    let transaction = fetch_transaction(pool, transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    let observed = poll_gateway(gateway, &transaction).await?;

    Ok(match observed {
        Some(refund) => StatusCheck {
            transaction_id: transaction.id,
            recorded_status: transaction.status,
            gateway_status: refund.status,
            gateway_raw_status: Some(refund.raw_status),
            gateway_refund_id: Some(refund.id),
            found_at_gateway: true,
        },
        None => StatusCheck {
            transaction_id: transaction.id,
            recorded_status: transaction.status,
            gateway_status: GatewayRefundStatus::Processing,
            gateway_raw_status: None,
            gateway_refund_id: transaction.gateway_refund_id,
            found_at_gateway: false,
        },
    })
}

/// Resolve a stuck `pending` transaction from the gateway's records.
///
/// Covers the crash/timeout window between the pending INSERT and the
/// outcome update. An observed `completed`/`failed` applies the normal
/// success/failure effects; `processing` leaves the row alone. A gateway
/// with no record of the refund resolves the attempt to `failed` only
/// once the row has outlived the client's request timeout; a younger row
/// may still have its create call in flight, so it stays `pending`.
pub async fn reconcile_transaction(
    pool: &DbPool,
    gateway: &GatewayClient,
    transaction_id: Uuid,
) -> Result<RefundTransaction, AppError> {
    let transaction = fetch_transaction(pool, transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    if transaction.status != RefundTransactionStatus::Pending.as_str() {
        return Err(AppError::InvalidTransition {
            current_status: transaction.status,
        });
    }

    let observed = poll_gateway(gateway, &transaction).await?;

    match observed {
        Some(refund) => match refund.status {
            GatewayRefundStatus::Completed => {
                let transaction = record_success(
                    pool,
                    transaction.id,
                    transaction.cancellation_request_id,
                    transaction.booking_id,
                    transaction.amount_cents,
                    &refund,
                )
                .await?;
                tracing::info!(
                    transaction_id = %transaction.id,
                    gateway_refund_id = %refund.id,
                    "reconciled stuck refund to completed"
                );
                Ok(transaction)
            }
            GatewayRefundStatus::Failed => {
                let reason = format!("gateway reported refund status '{}'", refund.raw_status);
                let transaction = record_failure(
                    pool,
                    transaction.id,
                    transaction.cancellation_request_id,
                    &reason,
                    Some(&refund.body),
                )
                .await?;
                tracing::warn!(
                    transaction_id = %transaction.id,
                    reason = %reason,
                    "reconciled stuck refund to failed"
                );
                Ok(transaction)
            }
            GatewayRefundStatus::Processing => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    "refund still in flight at the gateway"
                );
                Ok(transaction)
            }
        },
        None if !create_window_elapsed(transaction.initiated_at, Utc::now(), gateway.timeout()) => {
            tracing::info!(
                transaction_id = %transaction.id,
                "refund not yet visible at the gateway, leaving pending"
            );
            Ok(transaction)
        }
        None => {
            let reason = "gateway has no record of this refund attempt".to_string();
            let transaction = record_failure(
                pool,
                transaction.id,
                transaction.cancellation_request_id,
                &reason,
                None,
            )
            .await?;
            tracing::warn!(
                transaction_id = %transaction.id,
                "reconciled unreachable refund to failed"
            );
            Ok(transaction)
        }
    }
}

/// Retry a failed refund, bounded by `MAX_REFUND_ATTEMPTS`.
///
/// The retry slot (`retry_count`, `last_retry_at`) is taken in the same
/// conditional UPDATE that re-enters `processing`, BEFORE the gateway is
/// contacted, so a crash mid-retry can never under-count attempts. Once
/// the limit is reached the gateway is never called again for the request.
pub async fn retry_refund(
    pool: &DbPool,
    gateway: &GatewayClient,
    request_id: Uuid,
) -> Result<RefundOutcome, AppError> {
    let request = fetch_request(pool, request_id)
        .await?
        .ok_or(AppError::CancellationNotFound)?;

    // Fast fail without touching the gateway or the row.
    if request.retry_count >= MAX_REFUND_ATTEMPTS {
        return Err(AppError::RetryLimitReached {
            retry_count: request.retry_count,
        });
    }

    let booking = fetch_booking(pool, request.booking_id)
        .await?
        .ok_or(AppError::BookingNotFound)?;

    // Validate before taking the retry slot so a doomed attempt cannot
    // burn one.
    let params = RefundParams::from_request(&request, &booking)?;
    params.validate()?;

    let updated = sqlx::query_as::<_, CancellationRequest>(
        r#"
        UPDATE cancellation_requests
        SET status = 'processing',
            retry_count = retry_count + 1,
            last_retry_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'failed' AND retry_count < $2
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(MAX_REFUND_ATTEMPTS)
    .fetch_optional(pool)
    .await?;

    let Some(request) = updated else {
        // Lost a race or the state moved; re-read so the conflict error
        // can say what the row looks like now.
        let current = fetch_request(pool, request_id)
            .await?
            .ok_or(AppError::CancellationNotFound)?;
        if current.status == "failed" && current.retry_count >= MAX_REFUND_ATTEMPTS {
            return Err(AppError::RetryLimitReached {
                retry_count: current.retry_count,
            });
        }
        return Err(AppError::InvalidTransition {
            current_status: current.status,
        });
    };

    tracing::info!(
        request_id = %request.id,
        retry_count = request.retry_count,
        "retrying refund"
    );

    process_refund(pool, gateway, params).await
}

/// Get a refund transaction by ID.
pub async fn fetch_transaction(
    pool: &DbPool,
    transaction_id: Uuid,
) -> Result<Option<RefundTransaction>, AppError> {
    let transaction =
        sqlx::query_as::<_, RefundTransaction>("SELECT * FROM refund_transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(pool)
            .await?;

    Ok(transaction)
}

async fn fetch_request(
    pool: &DbPool,
    request_id: Uuid,
) -> Result<Option<CancellationRequest>, AppError> {
    let request =
        sqlx::query_as::<_, CancellationRequest>("SELECT * FROM cancellation_requests WHERE id = $1")
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

/// Look a refund up at the gateway by its id when we have one, else by
/// the merchant reference sent at create time. `None` means the gateway
/// definitively does not know the refund.
async fn poll_gateway(
    gateway: &GatewayClient,
    transaction: &RefundTransaction,
) -> Result<Option<GatewayRefund>, GatewayError> {
    match &transaction.gateway_refund_id {
        Some(refund_id) => match gateway.fetch_refund(refund_id).await {
            Ok(refund) => Ok(Some(refund)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        },
        None => {
            gateway
                .find_refund_by_reference(&transaction.id.to_string())
                .await
        }
    }
}

/// True once a pending row is older than the gateway client's request
/// timeout. Every create call is bounded by that timeout, so past it an
/// absent merchant reference means the create never reached the gateway.
fn create_window_elapsed(
    initiated_at: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    let age = now.signed_duration_since(initiated_at).num_seconds();
    age >= i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}

/// Apply the success effects of a confirmed refund atomically:
/// transaction completed, request completed, ledger appended, booking
/// cancelled.
async fn record_success(
    pool: &DbPool,
    transaction_id: Uuid,
    request_id: Uuid,
    booking_id: Uuid,
    amount_cents: i64,
    refund: &GatewayRefund,
) -> Result<RefundTransaction, AppError> {
    let mut db = pool.begin().await?;

    let transaction = sqlx::query_as::<_, RefundTransaction>(
        r#"
        UPDATE refund_transactions
        SET status = 'completed',
            gateway_refund_id = $2,
            gateway_response = $3,
            completed_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(&refund.id)
    .bind(&refund.body)
    .fetch_optional(&mut *db)
    .await?;

    let Some(transaction) = transaction else {
        // Someone else resolved the row first; keep their outcome.
        db.rollback().await?;
        tracing::warn!(
            transaction_id = %transaction_id,
            "refund transaction was already resolved"
        );
        return fetch_transaction(pool, transaction_id)
            .await?
            .ok_or(AppError::TransactionNotFound);
    };

    let updated = sqlx::query(
        r#"
        UPDATE cancellation_requests
        SET status = 'completed',
            processed_at = NOW(),
            refund_transaction_id = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(request_id)
    .bind(transaction_id)
    .execute(&mut *db)
    .await?
    .rows_affected();

    if updated == 0 {
        tracing::warn!(
            request_id = %request_id,
            "cancellation request left processing before completion was recorded"
        );
    }

    // Append-only money movement record.
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
        VALUES ($1, $2, $3, $4, 'completed', NULL)
        "#,
    )
    .bind(booking_id)
    .bind(transaction_id)
    .bind(&refund.id)
    .bind(amount_cents)
    .execute(&mut *db)
    .await?;

    sqlx::query("UPDATE bookings SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
        .bind(booking_id)
        .execute(&mut *db)
        .await?;

    db.commit().await?;

    Ok(transaction)
}

/// Capture a failed attempt: transaction failed with the gateway's error,
/// request failed with the human-readable reason.
async fn record_failure(
    pool: &DbPool,
    transaction_id: Uuid,
    request_id: Uuid,
    reason: &str,
    response: Option<&Value>,
) -> Result<RefundTransaction, AppError> {
    let mut db = pool.begin().await?;

    let transaction = sqlx::query_as::<_, RefundTransaction>(
        r#"
        UPDATE refund_transactions
        SET status = 'failed',
            gateway_error = $2,
            gateway_response = COALESCE($3, gateway_response),
            failed_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(reason)
    .bind(response)
    .fetch_optional(&mut *db)
    .await?;

    let Some(transaction) = transaction else {
        db.rollback().await?;
        tracing::warn!(
            transaction_id = %transaction_id,
            "refund transaction was already resolved"
        );
        return fetch_transaction(pool, transaction_id)
            .await?
            .ok_or(AppError::TransactionNotFound);
    };

    let updated = sqlx::query(
        r#"
        UPDATE cancellation_requests
        SET status = 'failed',
            failure_reason = $2,
            updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(request_id)
    .bind(reason)
    .execute(&mut *db)
    .await?
    .rows_affected();

    if updated == 0 {
        tracing::warn!(
            request_id = %request_id,
            "cancellation request left processing before failure was recorded"
        );
    }

    db.commit().await?;

    Ok(transaction)
}

/// JSON body of an `Api` gateway error, kept for the audit column.
fn api_error_body(err: &GatewayError) -> Option<Value> {
    match err {
        GatewayError::Api { body, .. } => serde_json::from_str(body).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cancellation::RefundCalculation;
    use chrono::{Duration, Utc};

    fn request_fixture() -> CancellationRequest {
        let now = Utc::now();
        CancellationRequest {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            booking_start_date: now + Duration::hours(30),
            booking_end_date: now + Duration::hours(38),
            booking_amount_cents: 100_000,
            currency: "USD".to_string(),
            reason: "schedule_change".to_string(),
            reason_note: None,
            status: "approved".to_string(),
            is_automatic: false,
            refund_calculation: RefundCalculation {
                original_amount_cents: 100_000,
                refund_percentage: 50.0,
                refund_amount_cents: 50_000,
                processing_fee_cents: 2_500,
                final_refund_cents: 47_500,
                hours_until_booking: 30.0,
                applied_tier: None,
            },
            approved_by: None,
            approved_at: Some(now),
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            custom_refund_cents: None,
            custom_refund_note: None,
            processed_at: None,
            refund_transaction_id: None,
            retry_count: 0,
            last_retry_at: None,
            failure_reason: None,
            requested_at: now,
            updated_at: now,
        }
    }

    fn booking_fixture() -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            status: "confirmed".to_string(),
            start_date: now + Duration::hours(30),
            end_date: now + Duration::hours(38),
            amount_cents: 100_000,
            currency: "USD".to_string(),
            payment_method: Some("card".to_string()),
            payment_reference: Some("ch_original_123".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn params_come_from_the_request_snapshot() {
        let request = request_fixture();
        let booking = booking_fixture();

        let params = RefundParams::from_request(&request, &booking).unwrap();
        assert_eq!(params.cancellation_request_id, request.id);
        assert_eq!(params.booking_id, request.booking_id);
        assert_eq!(params.amount_cents, 47_500);
        assert_eq!(params.payment_reference, "ch_original_123");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn params_use_the_override_when_present() {
        let mut request = request_fixture();
        request.custom_refund_cents = Some(30_000);
        let booking = booking_fixture();

        let params = RefundParams::from_request(&request, &booking).unwrap();
        assert_eq!(params.amount_cents, 30_000);
    }

    #[test]
    fn missing_payment_reference_is_rejected_up_front() {
        let request = request_fixture();
        let mut booking = booking_fixture();
        booking.payment_reference = None;

        let err = RefundParams::from_request(&request, &booking).unwrap_err();
        assert!(matches!(err, AppError::MissingPaymentReference));
    }

    #[test]
    fn validate_rejects_unusable_params() {
        let request = request_fixture();
        let booking = booking_fixture();
        let params = RefundParams::from_request(&request, &booking).unwrap();

        let mut bad = params.clone();
        bad.cancellation_request_id = Uuid::nil();
        assert!(matches!(
            bad.validate(),
            Err(AppError::InvalidRequest(_))
        ));

        let mut bad = params.clone();
        bad.booking_id = Uuid::nil();
        assert!(bad.validate().is_err());

        let mut bad = params.clone();
        bad.amount_cents = 0;
        assert!(bad.validate().is_err());

        let mut bad = params.clone();
        bad.amount_cents = -100;
        assert!(bad.validate().is_err());

        let mut bad = params;
        bad.payment_reference = "   ".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn absence_is_inconclusive_inside_the_create_window() {
        let now = Utc::now();
        let timeout = std::time::Duration::from_secs(10);

        // A row younger than the client timeout may still have its create
        // call in flight; reconciliation must not fail it yet.
        assert!(!create_window_elapsed(now - Duration::seconds(3), now, timeout));
        assert!(!create_window_elapsed(now, now, timeout));

        assert!(create_window_elapsed(now - Duration::seconds(10), now, timeout));
        assert!(create_window_elapsed(now - Duration::seconds(45), now, timeout));
    }

    #[test]
    fn create_window_never_elapses_backwards() {
        let now = Utc::now();
        let timeout = std::time::Duration::from_secs(10);

        // Clock skew can put initiated_at ahead of the caller's clock.
        assert!(!create_window_elapsed(now + Duration::seconds(30), now, timeout));
    }
}
