//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::gateway::GatewayError;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and a stable machine
/// readable error code for clients.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Invalid or missing API keys, wrong role
/// - **Resource Errors**: Requested resources not found
/// - **Validation Errors**: Invalid request data or amounts
/// - **Conflict Errors**: Operations that lost a race or do not apply to the
///   record's current lifecycle state (these carry `current_status` so the
///   caller can see what the record looked like when the operation failed)
/// - **Gateway Errors**: Upstream payment provider failures
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Authenticated caller does not have the role required for this route.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("Forbidden")]
    Forbidden,

    /// Booking does not exist or does not belong to the authenticated user.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Booking not found")]
    BookingNotFound,

    /// Cancellation request does not exist or is not visible to the caller.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Cancellation request not found")]
    CancellationNotFound,

    /// Refund transaction does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Refund transaction not found")]
    TransactionNotFound,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Booking is in a state that cannot be cancelled (already cancelled or
    /// completed).
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Booking cannot be cancelled in its current state")]
    BookingNotCancellable,

    /// Booking has no payment reference, so no gateway refund can be issued.
    /// An admin can still close the request via manual completion.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Booking has no payment reference; use manual completion instead")]
    MissingPaymentReference,

    /// Booking already has a cancellation request that blocks a new one.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Booking already has an active cancellation request")]
    DuplicateActiveRequest { current_status: String },

    /// The request is not in a state the operation can act on. Covers both
    /// genuinely wrong calls (rejecting a completed request) and lost races
    /// (two admins approving at once).
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Operation does not apply to the request's current state")]
    InvalidTransition { current_status: String },

    /// The failed refund has already been retried the maximum number of times.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Refund retry limit reached")]
    RetryLimitReached { retry_count: i32 },

    /// Payment gateway call failed while checking or reconciling a refund.
    ///
    /// Returns HTTP 502 Bad Gateway with the provider's detail preserved.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Convert AppError into an HTTP response.
///
/// This implementation allows Axum handlers to return `Result<T, AppError>`
/// and have errors automatically converted to proper HTTP responses.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Conflict variants additionally carry `current_status` (and
/// `retry_count` for the retry limit) inside the `error` object.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Map each error variant to (HTTP status, error code, message, extras)
        let (status, code, message, extra) = match self {
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            AppError::BookingNotFound => (
                StatusCode::NOT_FOUND,
                "booking_not_found",
                self.to_string(),
                None,
            ),
            AppError::CancellationNotFound => (
                StatusCode::NOT_FOUND,
                "cancellation_not_found",
                self.to_string(),
                None,
            ),
            AppError::TransactionNotFound => (
                StatusCode::NOT_FOUND,
                "transaction_not_found",
                self.to_string(),
                None,
            ),
            AppError::InvalidRequest(ref msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                msg.clone(),
                None,
            ),
            AppError::BookingNotCancellable => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "booking_not_cancellable",
                self.to_string(),
                None,
            ),
            AppError::MissingPaymentReference => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_payment_reference",
                self.to_string(),
                None,
            ),
            AppError::DuplicateActiveRequest { ref current_status } => (
                StatusCode::CONFLICT,
                "duplicate_active_request",
                self.to_string(),
                Some(json!({ "current_status": current_status })),
            ),
            AppError::InvalidTransition { ref current_status } => (
                StatusCode::CONFLICT,
                "invalid_transition",
                self.to_string(),
                Some(json!({ "current_status": current_status })),
            ),
            AppError::RetryLimitReached { retry_count } => (
                StatusCode::CONFLICT,
                "retry_limit_reached",
                self.to_string(),
                Some(json!({ "retry_count": retry_count })),
            ),
            AppError::Gateway(ref err) => (
                StatusCode::BAD_GATEWAY,
                "gateway_error",
                err.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        // Build JSON error body, merging in any variant-specific fields
        let mut error = json!({
            "code": code,
            "message": message
        });
        if let (Some(obj), Some(serde_json::Value::Object(extra))) = (error.as_object_mut(), extra)
        {
            obj.extend(extra);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
