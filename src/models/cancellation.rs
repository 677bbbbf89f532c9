//! Cancellation request aggregate and its state machine vocabulary.
//!
//! This module defines:
//! - `CancellationRequest`: the durable record of a client's cancellation
//!   intent, with the immutable `RefundCalculation` snapshot taken at
//!   request time
//! - `CancellationStatus`: the workflow state machine
//! - `RefundAmount`: the computed-vs-overridden refund resolution
//! - Request/response types for the cancellation endpoints
//!
//! # Lifecycle
//!
//! A request is created once per cancellation attempt, mutated only by the
//! workflow transitions in `services::cancellation_service`, and never
//! deleted; terminal rows are permanent audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::policy::PolicyTier;

/// Upper bound on refund retries for a single cancellation request.
///
/// A request gets one initial processing attempt plus at most this many
/// retries; after that it stays `failed` and is handed to manual
/// financial reconciliation.
pub const MAX_REFUND_ATTEMPTS: i32 = 3;

/// Workflow state of a cancellation request.
///
/// ```text
/// pending ──► approved ──► processing ──► completed
///    │                        ▲   │
///    │                        └───┘ (bounded retry via failed)
///    └──────► rejected                 processing ──► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl CancellationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationStatus::Pending => "pending",
            CancellationStatus::Approved => "approved",
            CancellationStatus::Processing => "processing",
            CancellationStatus::Completed => "completed",
            CancellationStatus::Failed => "failed",
            CancellationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(CancellationStatus::Pending),
            "approved" => Some(CancellationStatus::Approved),
            "processing" => Some(CancellationStatus::Processing),
            "completed" => Some(CancellationStatus::Completed),
            "failed" => Some(CancellationStatus::Failed),
            "rejected" => Some(CancellationStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal states are final audit records and accept no transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CancellationStatus::Completed | CancellationStatus::Rejected
        )
    }

    /// States that keep the booking's refund "claimed": while a request is
    /// in one of these, no second request may be created for the booking.
    /// A `failed` request still owns the refund: it may be retried or
    /// needs manual reconciliation, and a parallel request would risk a
    /// double refund.
    pub fn blocks_new_request(&self) -> bool {
        matches!(
            self,
            CancellationStatus::Pending
                | CancellationStatus::Approved
                | CancellationStatus::Processing
                | CancellationStatus::Failed
        )
    }

    /// The legal transition table. `Approved -> Completed` is the
    /// administrative override path (manual completion without a gateway
    /// call, or a zero-amount refund with nothing to move).
    pub fn can_transition_to(&self, next: CancellationStatus) -> bool {
        use CancellationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Processing)
                | (Approved, Completed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl std::fmt::Display for CancellationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the client is cancelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    ScheduleChange,
    FoundAlternative,
    Emergency,
    Other,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::ScheduleChange => "schedule_change",
            CancellationReason::FoundAlternative => "found_alternative",
            CancellationReason::Emergency => "emergency",
            CancellationReason::Other => "other",
        }
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable refund breakdown computed when the request is created.
///
/// Persisted inline on the `cancellation_requests` row and never updated
/// afterwards; an owner override does not rewrite the snapshot, it lives
/// in `custom_refund_cents` next to it.
///
/// # Invariants
///
/// `0 <= final_refund_cents <= original_amount_cents` and
/// `processing_fee_cents >= 0`, guaranteed by the calculator.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RefundCalculation {
    /// The booking amount the refund is computed from, in cents.
    pub original_amount_cents: i64,

    /// Percentage granted by the applied tier (0..=100).
    pub refund_percentage: f64,

    /// `original_amount_cents × refund_percentage`, rounded to the cent.
    pub refund_amount_cents: i64,

    /// Fee charged on the refundable amount, not the original amount.
    pub processing_fee_cents: i64,

    /// `refund_amount_cents − processing_fee_cents`, floored at 0.
    pub final_refund_cents: i64,

    /// Lead time at request creation; negative when the booking had
    /// already started.
    pub hours_until_booking: f64,

    /// The tier that matched, or `None` when the policy disallows
    /// cancellation or no tier qualified.
    pub applied_tier: Option<Json<PolicyTier>>,
}

/// How much to actually send to the gateway: the computed snapshot, unless
/// an owner/admin recorded an explicit override at approval time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RefundAmount {
    Computed { amount_cents: i64 },
    Overridden {
        amount_cents: i64,
        note: Option<String>,
    },
}

impl RefundAmount {
    pub fn amount_cents(&self) -> i64 {
        match self {
            RefundAmount::Computed { amount_cents } => *amount_cents,
            RefundAmount::Overridden { amount_cents, .. } => *amount_cents,
        }
    }
}

/// A cancellation request row.
///
/// # Database Table
///
/// Maps to `cancellation_requests`. The booking snapshot columns and the
/// flattened `RefundCalculation` are written once at creation; everything
/// else is workflow bookkeeping mutated through conditional updates.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,
    pub listing_id: Uuid,

    /// Booking snapshot at request time (the booking row may change later).
    pub booking_start_date: DateTime<Utc>,
    pub booking_end_date: DateTime<Utc>,
    pub booking_amount_cents: i64,
    pub currency: String,

    pub reason: String,
    pub reason_note: Option<String>,

    /// Current state machine position (`CancellationStatus` as text).
    pub status: String,

    /// True when approval was granted by policy rather than a person.
    pub is_automatic: bool,

    #[sqlx(flatten)]
    pub refund_calculation: RefundCalculation,

    /// NULL for automatic approvals.
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,

    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    /// Owner/admin override of the computed refund, bounded by the
    /// original amount.
    pub custom_refund_cents: Option<i64>,
    pub custom_refund_note: Option<String>,

    pub processed_at: Option<DateTime<Utc>>,

    /// The successful refund transaction, set on completion.
    pub refund_transaction_id: Option<Uuid>,

    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,

    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CancellationRequest {
    /// Resolve the amount a refund attempt should move.
    pub fn refund_amount(&self) -> RefundAmount {
        match self.custom_refund_cents {
            Some(amount_cents) => RefundAmount::Overridden {
                amount_cents,
                note: self.custom_refund_note.clone(),
            },
            None => RefundAmount::Computed {
                amount_cents: self.refund_calculation.final_refund_cents,
            },
        }
    }

    pub fn effective_refund_cents(&self) -> i64 {
        self.refund_amount().amount_cents()
    }
}

/// Body of `POST /api/v1/bookings/:id/cancellation`.
///
/// ```json
/// {
///   "reason": "schedule_change",
///   "reason_note": "Meeting moved to next month"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateCancellationRequest {
    pub reason: CancellationReason,

    /// Free text, expected when `reason` is `other`.
    pub reason_note: Option<String>,
}

/// Body of `POST /api/v1/cancellations/:id/approve`.
///
/// An owner or admin may override the computed refund while approving;
/// the override must stay within `[0, original_amount_cents]`.
#[derive(Debug, Default, Deserialize)]
pub struct ApproveCancellationRequest {
    pub custom_refund_cents: Option<i64>,
    pub custom_refund_note: Option<String>,
}

/// Body of `POST /api/v1/cancellations/:id/reject`.
#[derive(Debug, Deserialize)]
pub struct RejectCancellationRequest {
    pub reason: String,
}

/// Body of `POST /api/v1/cancellations/:id/complete-manual`.
#[derive(Debug, Default, Deserialize)]
pub struct ManualCompletionRequest {
    pub note: Option<String>,
}

/// Response returned for all cancellation endpoints.
#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,
    pub listing_id: Uuid,
    pub booking_start_date: DateTime<Utc>,
    pub booking_end_date: DateTime<Utc>,
    pub booking_amount_cents: i64,
    pub currency: String,
    pub reason: String,
    pub reason_note: Option<String>,
    pub status: String,
    pub is_automatic: bool,
    pub refund_calculation: RefundCalculation,
    pub refund_amount: RefundAmount,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refund_transaction_id: Option<Uuid>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl From<CancellationRequest> for CancellationResponse {
    fn from(request: CancellationRequest) -> Self {
        let refund_amount = request.refund_amount();
        Self {
            id: request.id,
            booking_id: request.booking_id,
            client_id: request.client_id,
            owner_id: request.owner_id,
            listing_id: request.listing_id,
            booking_start_date: request.booking_start_date,
            booking_end_date: request.booking_end_date,
            booking_amount_cents: request.booking_amount_cents,
            currency: request.currency,
            reason: request.reason,
            reason_note: request.reason_note,
            status: request.status,
            is_automatic: request.is_automatic,
            refund_calculation: request.refund_calculation,
            refund_amount,
            approved_by: request.approved_by,
            approved_at: request.approved_at,
            rejected_by: request.rejected_by,
            rejected_at: request.rejected_at,
            rejection_reason: request.rejection_reason,
            processed_at: request.processed_at,
            refund_transaction_id: request.refund_transaction_id,
            retry_count: request.retry_count,
            last_retry_at: request.last_retry_at,
            failure_reason: request.failure_reason,
            requested_at: request.requested_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_allows_the_documented_paths() {
        use CancellationStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Processing));
        assert!(Approved.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
    }

    #[test]
    fn transition_table_rejects_everything_else() {
        use CancellationStatus::*;

        let all = [Pending, Approved, Processing, Completed, Failed, Rejected];
        for next in all {
            assert!(!Completed.can_transition_to(next));
            assert!(!Rejected.can_transition_to(next));
        }
        assert!(!Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn failed_requests_block_new_requests() {
        use CancellationStatus::*;

        assert!(Pending.blocks_new_request());
        assert!(Approved.blocks_new_request());
        assert!(Processing.blocks_new_request());
        assert!(Failed.blocks_new_request());
        assert!(!Completed.blocks_new_request());
        assert!(!Rejected.blocks_new_request());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            CancellationStatus::Pending,
            CancellationStatus::Approved,
            CancellationStatus::Processing,
            CancellationStatus::Completed,
            CancellationStatus::Failed,
            CancellationStatus::Rejected,
        ] {
            assert_eq!(CancellationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CancellationStatus::parse("refunded"), None);
    }

    #[test]
    fn refund_amount_prefers_the_override() {
        let computed = RefundAmount::Computed { amount_cents: 47500 };
        assert_eq!(computed.amount_cents(), 47500);

        let overridden = RefundAmount::Overridden {
            amount_cents: 30000,
            note: Some("goodwill partial refund".to_string()),
        };
        assert_eq!(overridden.amount_cents(), 30000);
    }
}
