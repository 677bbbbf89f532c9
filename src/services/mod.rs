//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

pub mod admin_service;
pub mod cancellation_service;
pub mod gateway_service;
pub mod refund_policy;
