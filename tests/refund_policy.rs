//! End-to-end refund evaluation over realistic policy documents.
//!
//! These tests feed whole policy documents, as listing owners actually
//! write them, through the public evaluation API and check the money
//! that comes out the other side.

use chrono::{Duration, Utc};
use serde_json::json;

use deskhive::models::cancellation::RefundAmount;
use deskhive::models::policy::{CancellationPolicy, PolicyType};
use deskhive::services::refund_policy::{evaluate, evaluate_and_calculate};

fn flexible_policy() -> CancellationPolicy {
    let doc = json!({
        "type": "flexible",
        "allowCancellation": true,
        "automaticRefund": true,
        "processingFeePercentage": 0,
        "tiers": [
            {"hoursBeforeBooking": 24, "refundPercentage": 100, "description": "Full refund up to a day before"},
            {"hoursBeforeBooking": 0, "refundPercentage": 50, "description": "Half refund until the booking starts"}
        ]
    });
    CancellationPolicy::from_json(Some(&doc))
}

fn strict_policy() -> CancellationPolicy {
    let doc = json!({
        "type": "strict",
        "allowCancellation": true,
        "automaticRefund": false,
        "processingFeePercentage": 10,
        "tiers": [
            {"hoursBeforeBooking": 336, "refundPercentage": 50}
        ]
    });
    CancellationPolicy::from_json(Some(&doc))
}

#[test]
fn flexible_policy_full_refund_a_week_out() {
    let policy = flexible_policy();
    let now = Utc::now();
    let start = now + Duration::hours(168);

    let calc = evaluate_and_calculate(&policy, 25_000, start, now);
    assert_eq!(calc.refund_percentage, 100.0);
    assert_eq!(calc.final_refund_cents, 25_000);
    assert_eq!(calc.processing_fee_cents, 0);
}

#[test]
fn flexible_policy_half_refund_same_day() {
    let policy = flexible_policy();
    let now = Utc::now();
    let start = now + Duration::hours(6);

    let calc = evaluate_and_calculate(&policy, 25_000, start, now);
    assert_eq!(calc.refund_percentage, 50.0);
    assert_eq!(calc.final_refund_cents, 12_500);
}

#[test]
fn strict_policy_needs_two_weeks_notice() {
    let policy = strict_policy();
    let now = Utc::now();

    // Thirteen days out: under the only tier's threshold, nothing back.
    let close = evaluate_and_calculate(&policy, 80_000, now + Duration::hours(312), now);
    assert_eq!(close.final_refund_cents, 0);
    assert!(close.applied_tier.is_none());

    // Fifteen days out: 50% minus the 10% processing fee on the refund.
    let far = evaluate_and_calculate(&policy, 80_000, now + Duration::hours(360), now);
    assert_eq!(far.refund_amount_cents, 40_000);
    assert_eq!(far.processing_fee_cents, 4_000);
    assert_eq!(far.final_refund_cents, 36_000);
}

#[test]
fn snapshot_serializes_with_applied_tier() {
    let policy = flexible_policy();
    let now = Utc::now();
    let calc = evaluate_and_calculate(&policy, 25_000, now + Duration::hours(100), now);

    let rendered = serde_json::to_value(&calc).expect("snapshot serializes");
    assert_eq!(rendered["final_refund_cents"], 25_000);
    assert_eq!(rendered["applied_tier"]["hoursBeforeBooking"], 24.0);
    assert_eq!(
        rendered["applied_tier"]["description"],
        "Full refund up to a day before"
    );
}

#[test]
fn legacy_document_with_string_numbers_still_evaluates() {
    let doc = json!({
        "type": "custom",
        "allowCancellation": true,
        "processingFeePercentage": "2.5",
        "tiers": [
            {"hoursBeforeBooking": "72", "refundPercentage": "100"}
        ]
    });
    let policy = CancellationPolicy::from_json(Some(&doc));
    assert_eq!(policy.policy_type, PolicyType::Custom);

    let now = Utc::now();
    let calc = evaluate_and_calculate(&policy, 10_000, now + Duration::hours(96), now);
    assert_eq!(calc.refund_amount_cents, 10_000);
    assert_eq!(calc.processing_fee_cents, 250);
    assert_eq!(calc.final_refund_cents, 9_750);
}

#[test]
fn unparseable_policy_still_produces_a_zero_refund_decision() {
    let policy = CancellationPolicy::from_json(Some(&json!([1, 2, 3])));
    let now = Utc::now();

    let decision = evaluate(&policy, now + Duration::hours(500), now);
    assert_eq!(decision.refund_percentage, 0.0);
    assert!(decision.applied_tier.is_none());
}

#[test]
fn refund_amount_serializes_tagged_by_source() {
    let computed = serde_json::to_value(RefundAmount::Computed {
        amount_cents: 12_500,
    })
    .expect("serialize");
    assert_eq!(computed["source"], "computed");
    assert_eq!(computed["amount_cents"], 12_500);

    let overridden = serde_json::to_value(RefundAmount::Overridden {
        amount_cents: 5_000,
        note: Some("goodwill".to_owned()),
    })
    .expect("serialize");
    assert_eq!(overridden["source"], "overridden");
    assert_eq!(overridden["note"], "goodwill");
}
