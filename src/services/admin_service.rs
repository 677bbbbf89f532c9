//! Administrative queries over the cancellation workflow.
//!
//! Read-side operations for operators: filterable listing with free-text
//! search, per-request detail with the latest refund attempt, and the
//! aggregate statistics dashboard. Everything here is admin-gated at the
//! handler layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::cancellation::{CancellationRequest, CancellationStatus};
use crate::models::pagination::{Paginated, PaginationParams};
use crate::models::transaction::RefundTransaction;

/// Query-string filters for the admin listing.
#[derive(Debug, Default, Deserialize)]
pub struct CancellationFilter {
    pub status: Option<String>,
    pub is_automatic: Option<bool>,
    /// Inclusive lower bound on `requested_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `requested_at`.
    pub to: Option<DateTime<Utc>>,
    /// Matched case-insensitively against identifier columns (as text) and
    /// the free-text reason/failure columns.
    pub search: Option<String>,
}

/// Date range for the stats aggregate.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// A request plus its most recent refund attempt, if any.
///
/// Deliberately not serializable: the transaction still carries the raw
/// gateway payload, which handlers must strip before responding.
#[derive(Debug)]
pub struct CancellationWithTransaction {
    pub request: CancellationRequest,
    pub transaction: Option<RefundTransaction>,
}

/// Workflow aggregates over a `requested_at` range.
///
/// The money sums cover requests that reached approval or later
/// (`approved/processing/completed/failed`); pending and rejected requests
/// never committed to a refund and would skew the totals.
#[derive(Debug, Serialize)]
pub struct CancellationStats {
    pub total_requests: i64,
    pub pending: i64,
    pub approved: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub rejected: i64,
    pub automatic: i64,
    pub manual: i64,
    pub total_refund_cents: i64,
    pub average_refund_cents: i64,
    pub total_original_cents: i64,
    pub average_original_cents: i64,
    /// `total_refund / total_original × 100`, rounded to 2 decimals;
    /// 0 when nothing qualifies.
    pub refund_rate_percent: f64,
}

/// List cancellation requests with optional filters, newest first.
pub async fn list_cancellations(
    pool: &DbPool,
    filter: &CancellationFilter,
    pagination: &PaginationParams,
) -> Result<Paginated<CancellationRequest>, AppError> {
    let status = match &filter.status {
        Some(raw) => Some(
            CancellationStatus::parse(raw)
                .ok_or_else(|| AppError::InvalidRequest(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM cancellation_requests");
    push_filters(&mut count, status, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM cancellation_requests");
    push_filters(&mut query, status, filter);
    query.push(" ORDER BY requested_at DESC");
    query.push(" LIMIT ");
    query.push_bind(pagination.page_size());
    query.push(" OFFSET ");
    query.push_bind(pagination.offset());

    let items = query
        .build_query_as::<CancellationRequest>()
        .fetch_all(pool)
        .await?;

    Ok(Paginated::new(items, total, pagination))
}

/// One request with its latest refund transaction.
pub async fn get_cancellation(
    pool: &DbPool,
    request_id: Uuid,
) -> Result<CancellationWithTransaction, AppError> {
    let request = sqlx::query_as::<_, CancellationRequest>(
        "SELECT * FROM cancellation_requests WHERE id = $1",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::CancellationNotFound)?;

    let transaction = sqlx::query_as::<_, RefundTransaction>(
        r#"
        SELECT * FROM refund_transactions
        WHERE cancellation_request_id = $1
        ORDER BY initiated_at DESC
        LIMIT 1
        "#,
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    Ok(CancellationWithTransaction {
        request,
        transaction,
    })
}

/// Aggregate workflow statistics in a single query.
pub async fn cancellation_stats(
    pool: &DbPool,
    range: &StatsQuery,
) -> Result<CancellationStats, AppError> {
    let row = sqlx::query_as::<_, StatsRow>(
        r#"
        SELECT
            COUNT(*)                                          AS total_requests,
            COUNT(*) FILTER (WHERE status = 'pending')        AS pending,
            COUNT(*) FILTER (WHERE status = 'approved')       AS approved,
            COUNT(*) FILTER (WHERE status = 'processing')     AS processing,
            COUNT(*) FILTER (WHERE status = 'completed')      AS completed,
            COUNT(*) FILTER (WHERE status = 'failed')         AS failed,
            COUNT(*) FILTER (WHERE status = 'rejected')       AS rejected,
            COUNT(*) FILTER (WHERE is_automatic)              AS automatic,
            COUNT(*) FILTER (WHERE NOT is_automatic)          AS manual,
            COALESCE(SUM(final_refund_cents) FILTER (
                WHERE status IN ('approved', 'processing', 'completed', 'failed')
            ), 0)::BIGINT                                     AS total_refund_cents,
            COALESCE(ROUND(AVG(final_refund_cents) FILTER (
                WHERE status IN ('approved', 'processing', 'completed', 'failed')
            )), 0)::BIGINT                                    AS average_refund_cents,
            COALESCE(SUM(original_amount_cents) FILTER (
                WHERE status IN ('approved', 'processing', 'completed', 'failed')
            ), 0)::BIGINT                                     AS total_original_cents,
            COALESCE(ROUND(AVG(original_amount_cents) FILTER (
                WHERE status IN ('approved', 'processing', 'completed', 'failed')
            )), 0)::BIGINT                                    AS average_original_cents
        FROM cancellation_requests
        WHERE ($1::timestamptz IS NULL OR requested_at >= $1)
          AND ($2::timestamptz IS NULL OR requested_at <= $2)
        "#,
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_one(pool)
    .await?;

    Ok(CancellationStats {
        total_requests: row.total_requests,
        pending: row.pending,
        approved: row.approved,
        processing: row.processing,
        completed: row.completed,
        failed: row.failed,
        rejected: row.rejected,
        automatic: row.automatic,
        manual: row.manual,
        total_refund_cents: row.total_refund_cents,
        average_refund_cents: row.average_refund_cents,
        total_original_cents: row.total_original_cents,
        average_original_cents: row.average_original_cents,
        refund_rate_percent: refund_rate(row.total_refund_cents, row.total_original_cents),
    })
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total_requests: i64,
    pending: i64,
    approved: i64,
    processing: i64,
    completed: i64,
    failed: i64,
    rejected: i64,
    automatic: i64,
    manual: i64,
    total_refund_cents: i64,
    average_refund_cents: i64,
    total_original_cents: i64,
    average_original_cents: i64,
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    status: Option<CancellationStatus>,
    filter: &CancellationFilter,
) {
    builder.push(" WHERE 1 = 1");

    if let Some(status) = status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(is_automatic) = filter.is_automatic {
        builder.push(" AND is_automatic = ");
        builder.push_bind(is_automatic);
    }
    if let Some(from) = filter.from {
        builder.push(" AND requested_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND requested_at <= ");
        builder.push_bind(to);
    }
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let pattern = format!("%{search}%");
        builder.push(" AND (booking_id::text ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR client_id::text ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR owner_id::text ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR listing_id::text ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR reason_note ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR rejection_reason ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR failure_reason ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

fn refund_rate(total_refund_cents: i64, total_original_cents: i64) -> f64 {
    if total_original_cents <= 0 {
        return 0.0;
    }
    let rate = total_refund_cents as f64 / total_original_cents as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_rate_rounds_to_two_decimals() {
        assert_eq!(refund_rate(47_500, 100_000), 47.5);
        assert_eq!(refund_rate(1, 3), 33.33);
        assert_eq!(refund_rate(2, 3), 66.67);
        assert_eq!(refund_rate(100_000, 100_000), 100.0);
    }

    #[test]
    fn refund_rate_handles_an_empty_denominator() {
        assert_eq!(refund_rate(0, 0), 0.0);
        assert_eq!(refund_rate(500, 0), 0.0);
    }

    #[test]
    fn stats_payload_averages_both_money_columns() {
        let stats = CancellationStats {
            total_requests: 4,
            pending: 1,
            approved: 1,
            processing: 0,
            completed: 1,
            failed: 0,
            rejected: 1,
            automatic: 2,
            manual: 2,
            total_refund_cents: 95_000,
            average_refund_cents: 47_500,
            total_original_cents: 200_000,
            average_original_cents: 100_000,
            refund_rate_percent: 47.5,
        };

        let rendered = serde_json::to_value(&stats).unwrap();
        assert_eq!(rendered["average_refund_cents"], 47_500);
        assert_eq!(rendered["average_original_cents"], 100_000);

        let mut keys: Vec<String> = rendered.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "approved",
                "automatic",
                "average_original_cents",
                "average_refund_cents",
                "completed",
                "failed",
                "manual",
                "pending",
                "processing",
                "refund_rate_percent",
                "rejected",
                "total_original_cents",
                "total_refund_cents",
                "total_requests",
            ]
        );
    }
}
