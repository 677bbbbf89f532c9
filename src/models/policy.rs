//! Cancellation policy types and defensive JSON parsing.
//!
//! Listings carry their cancellation policy as an embedded JSON document
//! written by the listing-management subsystem. The refund workflow only
//! ever reads it, and has to survive whatever shape historical documents
//! are in: missing fields, tiers with junk values, percentages out of
//! range. Parsing therefore never fails; bad pieces are skipped or
//! clamped with a logged warning and the rest of the policy is used.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Policy archetype as labelled by the listing owner.
///
/// The label is descriptive; refund behavior is driven entirely by
/// `allow_cancellation`, `automatic_refund` and the tier list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Flexible,
    Moderate,
    Strict,
    None,
    #[serde(other)]
    Custom,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Flexible => "flexible",
            PolicyType::Moderate => "moderate",
            PolicyType::Strict => "strict",
            PolicyType::None => "none",
            PolicyType::Custom => "custom",
        }
    }

    /// Parse a policy type label. Unknown labels are treated as `custom`
    /// rather than rejected, since the label carries no behavior.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "flexible" => PolicyType::Flexible,
            "moderate" => PolicyType::Moderate,
            "strict" => PolicyType::Strict,
            "none" => PolicyType::None,
            _ => PolicyType::Custom,
        }
    }
}

/// One refund tier: a minimum lead time (hours before the booking starts)
/// mapped to the refund percentage a cancellation at that lead time earns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTier {
    /// Minimum hours before the booking start for this tier to apply.
    pub hours_before_booking: f64,

    /// Refund percentage granted by this tier (0..=100).
    pub refund_percentage: f64,

    /// Owner-facing description, e.g. "Full refund up to a week before".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A listing's cancellation policy after defensive parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationPolicy {
    pub policy_type: PolicyType,

    /// Whether cancellation requests may be refunded at all. Even when
    /// false, a cancellation *record* can still be created for audit;
    /// the refund just evaluates to 0%.
    pub allow_cancellation: bool,

    /// When true, approval is system-granted at request time instead of
    /// waiting for the owner.
    pub automatic_refund: bool,

    /// Ordered tier list. Order matters: on duplicate thresholds the
    /// first-listed tier wins.
    pub tiers: Vec<PolicyTier>,

    /// Fee percentage applied to the refundable amount (not the original
    /// booking amount), 0..=100.
    pub processing_fee_percentage: f64,
}

impl Default for CancellationPolicy {
    /// The degraded policy used when a listing has no parseable policy:
    /// cancellation records are allowed (for audit) but nothing is
    /// refundable and nothing is approved automatically.
    fn default() -> Self {
        Self {
            policy_type: PolicyType::None,
            allow_cancellation: true,
            automatic_refund: false,
            tiers: Vec::new(),
            processing_fee_percentage: 0.0,
        }
    }
}

impl CancellationPolicy {
    /// Parse a policy from the raw JSON stored on a listing.
    ///
    /// Never fails: a missing or non-object document yields the default
    /// policy, malformed tiers are skipped with a warning, and
    /// out-of-range percentages are clamped.
    pub fn from_json(raw: Option<&Value>) -> Self {
        let Some(doc) = raw.and_then(Value::as_object) else {
            return Self::default();
        };

        let policy_type = doc
            .get("type")
            .and_then(Value::as_str)
            .map(PolicyType::parse)
            .unwrap_or(PolicyType::None);

        let allow_cancellation = doc
            .get("allowCancellation")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let automatic_refund = doc
            .get("automaticRefund")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let processing_fee_percentage = match doc.get("processingFeePercentage").map(numeric) {
            Some(Some(fee)) => clamp_percentage(fee, "processingFeePercentage"),
            Some(None) => {
                tracing::warn!("non-numeric processingFeePercentage in policy, using 0");
                0.0
            }
            None => 0.0,
        };

        Self {
            policy_type,
            allow_cancellation,
            automatic_refund,
            tiers: parse_tiers(doc.get("tiers")),
            processing_fee_percentage,
        }
    }
}

/// Parse the tier array, dropping entries that cannot be read.
fn parse_tiers(raw: Option<&Value>) -> Vec<PolicyTier> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match parse_tier(item) {
            Some(tier) => Some(tier),
            None => {
                tracing::warn!(index, "skipping malformed cancellation policy tier");
                None
            }
        })
        .collect()
}

/// Parse a single tier. Returns `None` when the threshold or percentage
/// is missing or non-numeric.
fn parse_tier(item: &Value) -> Option<PolicyTier> {
    let tier = item.as_object()?;

    let hours_before_booking = numeric(tier.get("hoursBeforeBooking")?)?;
    let refund_percentage = numeric(tier.get("refundPercentage")?)?;

    Some(PolicyTier {
        hours_before_booking,
        refund_percentage: clamp_percentage(refund_percentage, "refundPercentage"),
        description: tier
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

/// Read a JSON value as a finite float, accepting numeric strings the way
/// older policy documents stored them.
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    parsed.is_finite().then_some(parsed)
}

fn clamp_percentage(value: f64, field: &str) -> f64 {
    if (0.0..=100.0).contains(&value) {
        value
    } else {
        tracing::warn!(field, value, "percentage out of range, clamping");
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_complete_policy() {
        let doc = json!({
            "type": "moderate",
            "allowCancellation": true,
            "automaticRefund": true,
            "processingFeePercentage": 5,
            "tiers": [
                {"hoursBeforeBooking": 168, "refundPercentage": 100, "description": "Full refund"},
                {"hoursBeforeBooking": 24, "refundPercentage": 50},
                {"hoursBeforeBooking": 0, "refundPercentage": 0}
            ]
        });

        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy.policy_type, PolicyType::Moderate);
        assert!(policy.allow_cancellation);
        assert!(policy.automatic_refund);
        assert_eq!(policy.processing_fee_percentage, 5.0);
        assert_eq!(policy.tiers.len(), 3);
        assert_eq!(policy.tiers[0].hours_before_booking, 168.0);
        assert_eq!(policy.tiers[1].refund_percentage, 50.0);
        assert_eq!(policy.tiers[0].description.as_deref(), Some("Full refund"));
    }

    #[test]
    fn missing_policy_degrades_to_default() {
        let policy = CancellationPolicy::from_json(None);
        assert_eq!(policy.policy_type, PolicyType::None);
        assert!(policy.allow_cancellation);
        assert!(!policy.automatic_refund);
        assert!(policy.tiers.is_empty());
        assert_eq!(policy.processing_fee_percentage, 0.0);
    }

    #[test]
    fn non_object_policy_degrades_to_default() {
        let doc = json!("strict");
        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy, CancellationPolicy::default());
    }

    #[test]
    fn malformed_tiers_are_skipped() {
        let doc = json!({
            "type": "custom",
            "allowCancellation": true,
            "tiers": [
                {"hoursBeforeBooking": 48, "refundPercentage": 75},
                {"hoursBeforeBooking": "not a number", "refundPercentage": 50},
                {"refundPercentage": 25},
                "garbage",
                {"hoursBeforeBooking": 0, "refundPercentage": 0}
            ]
        });

        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy.tiers.len(), 2);
        assert_eq!(policy.tiers[0].hours_before_booking, 48.0);
        assert_eq!(policy.tiers[1].hours_before_booking, 0.0);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let doc = json!({
            "tiers": [{"hoursBeforeBooking": "24", "refundPercentage": "50.5"}]
        });

        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy.tiers.len(), 1);
        assert_eq!(policy.tiers[0].hours_before_booking, 24.0);
        assert_eq!(policy.tiers[0].refund_percentage, 50.5);
    }

    #[test]
    fn snake_case_keys_are_not_read() {
        // Documents are stored with camelCase keys; a snake_case document
        // degrades to the default policy instead of half-parsing.
        let doc = json!({
            "policy_type": "strict",
            "allow_cancellation": false,
            "automatic_refund": true,
            "processing_fee_percentage": 10,
            "tiers": [{"hours_before_booking": 48, "refund_percentage": 75}]
        });

        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy.policy_type, PolicyType::None);
        assert!(policy.allow_cancellation);
        assert!(!policy.automatic_refund);
        assert_eq!(policy.processing_fee_percentage, 0.0);
        assert!(policy.tiers.is_empty());
    }

    #[test]
    fn out_of_range_percentages_are_clamped() {
        let doc = json!({
            "processingFeePercentage": 180,
            "tiers": [
                {"hoursBeforeBooking": 24, "refundPercentage": 150},
                {"hoursBeforeBooking": 0, "refundPercentage": -20}
            ]
        });

        let policy = CancellationPolicy::from_json(Some(&doc));
        assert_eq!(policy.processing_fee_percentage, 100.0);
        assert_eq!(policy.tiers[0].refund_percentage, 100.0);
        assert_eq!(policy.tiers[1].refund_percentage, 0.0);
    }

    #[test]
    fn unknown_policy_type_reads_as_custom() {
        assert_eq!(PolicyType::parse("super_flexible"), PolicyType::Custom);
        assert_eq!(PolicyType::parse("strict"), PolicyType::Strict);
    }
}
