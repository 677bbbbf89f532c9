//! Listing read model.
//!
//! Listings belong to the search/inventory subsystem; the refund workflow
//! reads exactly one thing from them, the cancellation policy document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::policy::CancellationPolicy;

/// Represents a listing record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Listing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,

    /// Raw policy document as written by the listing-management subsystem.
    pub cancellation_policy: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Parse the stored policy document, defensively.
    pub fn policy(&self) -> CancellationPolicy {
        CancellationPolicy::from_json(self.cancellation_policy.as_ref())
    }
}
