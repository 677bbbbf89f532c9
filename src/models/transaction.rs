//! Refund transaction models.
//!
//! A `RefundTransaction` is the durable record of one attempt to move
//! money back through the payment gateway. The gateway service creates a
//! row in `pending` state *before* calling the gateway, so a crash
//! mid-call always leaves a recovery anchor behind; reconciliation later
//! resolves stuck rows against the gateway.
//!
//! Rows are created and mutated exclusively by
//! `services::gateway_service` and are read-only to everything else.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a single gateway refund attempt.
///
/// `pending` means the attempt was durably recorded but its outcome is
/// not yet known: either the call is in flight or the process died
/// before recording the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundTransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl RefundTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundTransactionStatus::Pending => "pending",
            RefundTransactionStatus::Completed => "completed",
            RefundTransactionStatus::Failed => "failed",
            RefundTransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RefundTransactionStatus::Pending),
            "completed" => Some(RefundTransactionStatus::Completed),
            "failed" => Some(RefundTransactionStatus::Failed),
            "cancelled" => Some(RefundTransactionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RefundTransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a refund transaction record from the database.
///
/// # Database Table
///
/// Maps to the `refund_transactions` table. Each row:
/// - Belongs to exactly one cancellation request (a request accumulates
///   one row per attempt across retries)
/// - Stores the amount in cents (never floats)
/// - Keeps the raw gateway response/error for audit
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RefundTransaction {
    pub id: Uuid,
    pub cancellation_request_id: Uuid,
    pub booking_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,

    /// Amount this attempt tried to refund, in cents.
    pub amount_cents: i64,

    /// Currency code (ISO 4217).
    pub currency: String,

    /// Payment method of the original charge, when known.
    pub payment_method: Option<String>,

    /// The gateway's identifier for the original charge being refunded.
    pub original_transaction_id: String,

    /// The gateway's identifier for the refund, set only on success.
    pub gateway_refund_id: Option<String>,

    /// `RefundTransactionStatus` as text.
    pub status: String,

    pub gateway_provider: String,

    /// Raw gateway response on success; persisted for audit, never
    /// exposed to clients.
    pub gateway_response: Option<serde_json::Value>,

    /// Most specific error message available on failure.
    pub gateway_error: Option<String>,

    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Refund transaction as returned to API callers.
///
/// The raw `gateway_response` payload stays internal; callers get the
/// human-readable `gateway_error` and the identifiers they need.
#[derive(Debug, Serialize)]
pub struct RefundTransactionResponse {
    pub id: Uuid,
    pub cancellation_request_id: Uuid,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub original_transaction_id: String,
    pub gateway_refund_id: Option<String>,
    pub status: String,
    pub gateway_provider: String,
    pub gateway_error: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<RefundTransaction> for RefundTransactionResponse {
    fn from(transaction: RefundTransaction) -> Self {
        Self {
            id: transaction.id,
            cancellation_request_id: transaction.cancellation_request_id,
            booking_id: transaction.booking_id,
            amount_cents: transaction.amount_cents,
            currency: transaction.currency,
            payment_method: transaction.payment_method,
            original_transaction_id: transaction.original_transaction_id,
            gateway_refund_id: transaction.gateway_refund_id,
            status: transaction.status,
            gateway_provider: transaction.gateway_provider,
            gateway_error: transaction.gateway_error,
            initiated_at: transaction.initiated_at,
            completed_at: transaction.completed_at,
            failed_at: transaction.failed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            RefundTransactionStatus::Pending,
            RefundTransactionStatus::Completed,
            RefundTransactionStatus::Failed,
            RefundTransactionStatus::Cancelled,
        ] {
            assert_eq!(
                RefundTransactionStatus::parse(status.as_str()),
                Some(status)
            );
        }
        assert_eq!(RefundTransactionStatus::parse("in_progress"), None);
    }
}
