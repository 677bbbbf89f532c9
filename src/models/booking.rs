//! Booking read model and the booking refund ledger.
//!
//! Bookings are created and managed by the reservation subsystem; the
//! refund workflow only reads them (and flips their status to `cancelled`
//! once a refund completes). The `booking_refunds` ledger is this
//! workflow's append-only record of money moved back against a booking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Booking lifecycle as owned by the reservation subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Only bookings that have not run or been cancelled can be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Represents a booking record from the database.
///
/// # Database Table
///
/// Maps to the `bookings` table. The refund workflow reads the fields it
/// snapshots into a cancellation request plus the payment reference it
/// needs to drive a gateway refund.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,

    /// `BookingStatus` as text.
    pub status: String,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    /// Booking amount in cents.
    pub amount_cents: i64,
    pub currency: String,

    /// How the booking was paid, when the payment subsystem recorded it.
    pub payment_method: Option<String>,

    /// The gateway's identifier for the original charge. Bookings paid
    /// outside the gateway (or imported) have none; those refunds can
    /// only be completed through the manual administrative override.
    pub payment_reference: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only ledger entry of a refund recorded against a booking.
///
/// Entries are only ever inserted, never updated or deleted, so
/// concurrent appends (a retry racing a manual correction) cannot
/// clobber each other.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BookingRefund {
    pub id: Uuid,
    pub booking_id: Uuid,

    /// The gateway attempt that moved the money; NULL for administrative
    /// entries where no money moved.
    pub refund_transaction_id: Option<Uuid>,

    pub gateway_refund_id: Option<String>,
    pub amount_cents: i64,
    pub status: String,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_upcoming_bookings_are_cancellable() {
        assert!(BookingStatus::Pending.is_cancellable());
        assert!(BookingStatus::Confirmed.is_cancellable());
        assert!(!BookingStatus::Completed.is_cancellable());
        assert!(!BookingStatus::Cancelled.is_cancellable());
    }
}
