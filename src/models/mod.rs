//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response types the HTTP layer exchanges.

/// API key authentication model
pub mod api_key;
/// Booking read model and refund ledger entries
pub mod booking;
/// Cancellation request aggregate and state machine
pub mod cancellation;
/// Listing read model (cancellation policy carrier)
pub mod listing;
/// Pagination envelope shared by list endpoints
pub mod pagination;
/// Cancellation policy document and tiers
pub mod policy;
/// Refund transaction model
pub mod transaction;
