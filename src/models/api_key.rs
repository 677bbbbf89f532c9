//! API key model for authentication.
//!
//! API keys identify the marketplace actor (client, owner, or platform
//! admin) making a request. They are stored as SHA-256 hashes; key
//! issuance belongs to the identity subsystem, this service only
//! verifies them.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const ROLE_CLIENT: &str = "client";
pub const ROLE_OWNER: &str = "owner";
pub const ROLE_ADMIN: &str = "admin";

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `user_id`: The marketplace user this key authenticates as
/// - `role`: `client`, `owner`, or `admin`
/// - `label`: Human-readable note about the key
/// - `is_active`: Whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters).
    pub key_hash: String,

    /// The user this key acts as; becomes `client_id`/`owner_id`/
    /// `approved_by`/`rejected_by` in workflow records.
    pub user_id: Uuid,

    /// Actor role. Workflow endpoints check identity (participant of the
    /// request); operational endpoints additionally require `admin`.
    pub role: String,

    pub label: String,

    pub created_at: DateTime<Utc>,

    /// Inactive keys are rejected during authentication, which revokes
    /// access without deleting the record.
    pub is_active: bool,
}
