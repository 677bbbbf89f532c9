//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to the service layer
//! 3. Returns HTTP response (JSON, status code)

/// Administrative listing and statistics endpoints
pub mod admin;
/// Cancellation workflow endpoints
pub mod cancellations;
/// Health check endpoint
pub mod health;
