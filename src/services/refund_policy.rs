//! Refund policy evaluation and refund arithmetic.
//!
//! Pure functions, no I/O: given a listing's cancellation policy and the
//! time remaining before the booking starts, pick the tier that applies
//! and turn it into a `RefundCalculation` snapshot.
//!
//! # Tier selection
//!
//! Among tiers whose `hours_before_booking` is at most the actual lead
//! time, the largest threshold wins: the most generous tier the elapsed
//! time still qualifies for. On duplicate thresholds the first-listed
//! tier wins, so evaluation is deterministic even against sloppy
//! configuration. No qualifying tier means 0%.
//!
//! A booking that already started has a negative lead time and qualifies
//! for no ordinary tier, which makes 0% the safe default for post-start
//! cancellations; a policy can only change that by explicitly carrying a
//! negative-threshold tier.

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::models::cancellation::RefundCalculation;
use crate::models::policy::{CancellationPolicy, PolicyTier};

/// Outcome of evaluating a policy at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct TierDecision {
    /// Granted refund percentage (0 when nothing applies).
    pub refund_percentage: f64,

    /// The winning tier, or `None` when cancellation is disallowed or no
    /// tier qualified.
    pub applied_tier: Option<PolicyTier>,

    /// Fractional hours from `now` to the booking start; negative when
    /// the booking already started.
    pub hours_until_booking: f64,
}

/// Evaluate a cancellation policy against the time left before a booking.
///
/// When `allow_cancellation` is false this short-circuits to 0% with no
/// applied tier. Callers still create the cancellation record for audit,
/// they just must not move money for it.
pub fn evaluate(
    policy: &CancellationPolicy,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TierDecision {
    let hours_until_booking = hours_between(now, booking_start);

    if !policy.allow_cancellation {
        return TierDecision {
            refund_percentage: 0.0,
            applied_tier: None,
            hours_until_booking,
        };
    }

    let mut best: Option<&PolicyTier> = None;
    for tier in &policy.tiers {
        if tier.hours_before_booking > hours_until_booking {
            continue;
        }
        // Strict comparison keeps the first-listed tier on threshold ties.
        let improves = match best {
            Some(current) => tier.hours_before_booking > current.hours_before_booking,
            None => true,
        };
        if improves {
            best = Some(tier);
        }
    }

    TierDecision {
        refund_percentage: best.map(|tier| tier.refund_percentage).unwrap_or(0.0),
        applied_tier: best.cloned(),
        hours_until_booking,
    }
}

/// Build the immutable refund snapshot from a tier decision.
///
/// All arithmetic is exact integer math on cents; percentages are applied
/// in basis points with half-up rounding, so fractional percentages like
/// 12.5% stay exact. The result always satisfies
/// `0 <= final_refund_cents <= original_amount_cents`.
pub fn calculate(
    original_amount_cents: i64,
    refund_percentage: f64,
    fee_percentage: f64,
    hours_until_booking: f64,
    applied_tier: Option<PolicyTier>,
) -> RefundCalculation {
    let refund_percentage = refund_percentage.clamp(0.0, 100.0);
    let fee_percentage = fee_percentage.clamp(0.0, 100.0);

    let refund_amount_cents = percentage_of(original_amount_cents, refund_percentage);
    let processing_fee_cents = percentage_of(refund_amount_cents, fee_percentage);
    let final_refund_cents =
        (refund_amount_cents - processing_fee_cents).clamp(0, original_amount_cents.max(0));

    RefundCalculation {
        original_amount_cents,
        refund_percentage,
        refund_amount_cents,
        processing_fee_cents,
        final_refund_cents,
        hours_until_booking,
        applied_tier: applied_tier.map(Json),
    }
}

/// Evaluate a policy and produce the refund snapshot in one step.
pub fn evaluate_and_calculate(
    policy: &CancellationPolicy,
    original_amount_cents: i64,
    booking_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RefundCalculation {
    let decision = evaluate(policy, booking_start, now);
    calculate(
        original_amount_cents,
        decision.refund_percentage,
        policy.processing_fee_percentage,
        decision.hours_until_booking,
        decision.applied_tier,
    )
}

/// Fractional hours from `from` to `to` (negative when `to` is past).
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}

/// Exact integer percentage of a cent amount, rounded half-up to the cent.
///
/// The percentage is scaled to basis points before multiplying, keeping
/// the whole computation in integers.
fn percentage_of(amount_cents: i64, percentage: f64) -> i64 {
    if amount_cents <= 0 {
        return 0;
    }
    let basis_points = (percentage * 100.0).round() as i128;
    if basis_points <= 0 {
        return 0;
    }
    ((amount_cents as i128 * basis_points + 5_000) / 10_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn standard_policy() -> CancellationPolicy {
        let doc = json!({
            "type": "moderate",
            "allowCancellation": true,
            "automaticRefund": false,
            "processingFeePercentage": 5,
            "tiers": [
                {"hoursBeforeBooking": 168, "refundPercentage": 100},
                {"hoursBeforeBooking": 24, "refundPercentage": 50},
                {"hoursBeforeBooking": 0, "refundPercentage": 0}
            ]
        });
        CancellationPolicy::from_json(Some(&doc))
    }

    fn at_hours_before(hours: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now + Duration::hours(hours), now)
    }

    #[test]
    fn thirty_hours_out_hits_the_fifty_percent_tier() {
        let policy = standard_policy();
        let (start, now) = at_hours_before(30);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 50.0);
        let tier = decision.applied_tier.expect("tier should apply");
        assert_eq!(tier.hours_before_booking, 24.0);

        let calc = calculate(
            100_000,
            decision.refund_percentage,
            policy.processing_fee_percentage,
            decision.hours_until_booking,
            Some(tier),
        );
        assert_eq!(calc.refund_amount_cents, 50_000);
        assert_eq!(calc.processing_fee_cents, 2_500);
        assert_eq!(calc.final_refund_cents, 47_500);
    }

    #[test]
    fn two_hundred_hours_out_hits_the_full_refund_tier() {
        let policy = standard_policy();
        let (start, now) = at_hours_before(200);

        let calc = evaluate_and_calculate(&policy, 100_000, start, now);
        assert_eq!(calc.refund_percentage, 100.0);
        assert_eq!(calc.refund_amount_cents, 100_000);
        assert_eq!(calc.final_refund_cents, 95_000);
    }

    #[test]
    fn started_booking_gets_nothing() {
        let policy = standard_policy();
        let (start, now) = at_hours_before(-5);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 0.0);
        assert!(decision.applied_tier.is_none());
        assert!(decision.hours_until_booking < 0.0);

        let calc = evaluate_and_calculate(&policy, 100_000, start, now);
        assert_eq!(calc.final_refund_cents, 0);
    }

    #[test]
    fn exact_threshold_qualifies() {
        let policy = standard_policy();
        let (start, now) = at_hours_before(24);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 50.0);
    }

    #[test]
    fn duplicate_thresholds_resolve_to_the_first_listed_tier() {
        let doc = json!({
            "allowCancellation": true,
            "tiers": [
                {"hoursBeforeBooking": 24, "refundPercentage": 50, "description": "first"},
                {"hoursBeforeBooking": 24, "refundPercentage": 80, "description": "second"}
            ]
        });
        let policy = CancellationPolicy::from_json(Some(&doc));
        let (start, now) = at_hours_before(48);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 50.0);
        assert_eq!(
            decision.applied_tier.unwrap().description.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn disallowed_cancellation_short_circuits_to_zero() {
        let doc = json!({
            "allowCancellation": false,
            "tiers": [{"hoursBeforeBooking": 0, "refundPercentage": 100}]
        });
        let policy = CancellationPolicy::from_json(Some(&doc));
        let (start, now) = at_hours_before(500);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 0.0);
        assert!(decision.applied_tier.is_none());
    }

    #[test]
    fn empty_tier_list_refunds_nothing() {
        let policy = CancellationPolicy::from_json(None);
        let (start, now) = at_hours_before(1000);

        let calc = evaluate_and_calculate(&policy, 100_000, start, now);
        assert_eq!(calc.final_refund_cents, 0);
        assert!(calc.applied_tier.is_none());
    }

    #[test]
    fn negative_threshold_tier_can_grant_post_start_refunds() {
        let doc = json!({
            "allowCancellation": true,
            "tiers": [
                {"hoursBeforeBooking": 24, "refundPercentage": 50},
                {"hoursBeforeBooking": -48, "refundPercentage": 10}
            ]
        });
        let policy = CancellationPolicy::from_json(Some(&doc));
        let (start, now) = at_hours_before(-5);

        let decision = evaluate(&policy, start, now);
        assert_eq!(decision.refund_percentage, 10.0);
    }

    #[test]
    fn refund_never_improves_by_waiting_longer() {
        let policy = standard_policy();
        let now = Utc::now();

        let mut previous = i64::MAX;
        // Sweep from 300 hours out down to 10 hours past the start.
        for hours in (-10..=300).rev() {
            let start = now + Duration::hours(hours);
            let calc = evaluate_and_calculate(&policy, 100_000, start, now);
            assert!(
                calc.final_refund_cents <= previous,
                "refund grew from {previous} to {} at {hours}h",
                calc.final_refund_cents
            );
            previous = calc.final_refund_cents;
        }
    }

    #[test]
    fn final_refund_stays_within_bounds() {
        let policy = standard_policy();
        let now = Utc::now();

        for hours in [-50, 0, 12, 24, 100, 168, 500] {
            for amount in [1, 99, 100_000, 7_777_777] {
                let calc =
                    evaluate_and_calculate(&policy, amount, now + Duration::hours(hours), now);
                assert!(calc.final_refund_cents >= 0);
                assert!(calc.final_refund_cents <= amount);
                assert!(calc.processing_fee_cents >= 0);
            }
        }
    }

    #[test]
    fn percentage_arithmetic_rounds_half_up() {
        // 12.5% of 999 cents = 124.875 -> 125
        assert_eq!(percentage_of(999, 12.5), 125);
        // 50% of 101 cents = 50.5 -> 51
        assert_eq!(percentage_of(101, 50.0), 51);
        assert_eq!(percentage_of(100_000, 100.0), 100_000);
        assert_eq!(percentage_of(100_000, 0.0), 0);
        assert_eq!(percentage_of(0, 50.0), 0);
    }

    #[test]
    fn full_fee_floors_the_refund_at_zero() {
        let calc = calculate(100_000, 100.0, 100.0, 48.0, None);
        assert_eq!(calc.refund_amount_cents, 100_000);
        assert_eq!(calc.processing_fee_cents, 100_000);
        assert_eq!(calc.final_refund_cents, 0);
    }

    #[test]
    fn zero_fee_passes_the_refund_through() {
        let calc = calculate(100_000, 100.0, 0.0, 200.0, None);
        assert_eq!(calc.final_refund_cents, 100_000);
    }
}
