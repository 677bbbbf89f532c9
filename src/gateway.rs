//! HTTP client for the PayFlux payment gateway.
//!
//! This module owns everything that touches the provider's wire format:
//! request/response DTOs, endpoint paths, authentication headers, and the
//! mapping from the provider's status vocabulary to our internal one.
//! Workflow decisions (what to do with a gateway outcome) live in
//! `services::gateway_service`, not here.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Provider identifier recorded on every refund transaction.
pub const GATEWAY_PROVIDER: &str = "payflux";

/// Errors from the gateway client.
///
/// `Api` preserves the provider's HTTP status and raw body so failures can
/// be audited later; `detail()` extracts the most specific human-readable
/// message for storing as a failure reason.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure: connect error, timeout, TLS, etc.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("gateway api error status={status} body={body}")]
    Api { status: u16, body: String },

    /// The gateway answered 2xx but the body was not the expected shape.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// The configured base URL could not be parsed or uses a bad scheme.
    #[error("invalid gateway base url: {0}")]
    InvalidBaseUrl(String),
}

impl GatewayError {
    /// True when the gateway definitively answered "no such refund".
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Api { status: 404, .. })
    }

    /// Most specific human-readable message available.
    ///
    /// For `Api` errors, tries the conventional JSON error shapes
    /// (`{"message": ...}` or `{"error": {"message": ...}}` or a bare
    /// `{"error": "..."}`) before falling back to the raw body.
    pub fn detail(&self) -> String {
        match self {
            GatewayError::Api { status, body } => {
                let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
                    v.get("message")
                        .and_then(Value::as_str)
                        .or_else(|| v.get("error").and_then(|e| e.get("message")).and_then(Value::as_str))
                        .or_else(|| v.get("error").and_then(Value::as_str))
                        .map(str::to_string)
                });
                match message {
                    Some(msg) => format!("gateway declined (status {status}): {msg}"),
                    None if body.trim().is_empty() => format!("gateway error (status {status})"),
                    None => format!("gateway error (status {status}): {}", body.trim()),
                }
            }
            other => other.to_string(),
        }
    }
}

/// Internal view of a refund's lifecycle at the gateway.
///
/// The provider's vocabulary is wider than ours; `from_provider` collapses
/// it. Anything unrecognized maps to `Processing`: an in-flight refund must
/// never be declared failed on the strength of a word we do not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRefundStatus {
    Completed,
    Processing,
    Failed,
}

impl GatewayRefundStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "succeeded" | "completed" | "refunded" => GatewayRefundStatus::Completed,
            "failed" | "declined" | "error" | "rejected" => GatewayRefundStatus::Failed,
            "pending" | "processing" | "in_progress" | "submitted" => {
                GatewayRefundStatus::Processing
            }
            _ => GatewayRefundStatus::Processing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayRefundStatus::Completed => "completed",
            GatewayRefundStatus::Processing => "processing",
            GatewayRefundStatus::Failed => "failed",
        }
    }
}

/// Body for `POST /refunds`.
///
/// `merchant_reference` carries our refund transaction id so a response
/// lost to a crash or timeout can later be matched back to its attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRefundRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub payment_reference: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub merchant_reference: String,
}

/// A refund resource as the gateway reports it.
///
/// `body` keeps the full raw response for audit storage; `id` and `status`
/// are the only fields the workflow acts on.
#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub id: String,
    pub status: GatewayRefundStatus,
    pub raw_status: String,
    pub body: Value,
}

fn parse_refund(value: Value) -> Result<GatewayRefund, GatewayError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("missing refund id; body={value}")))?
        .to_string();
    let raw_status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            GatewayError::InvalidResponse(format!("missing refund status; body={value}"))
        })?
        .to_string();

    Ok(GatewayRefund {
        id,
        status: GatewayRefundStatus::from_provider(&raw_status),
        raw_status,
        body: value,
    })
}

/// PayFlux API client.
///
/// Holds a reqwest client configured with the per-request timeout from
/// config. Cheap to clone; shared through application state.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl GatewayClient {
    /// Build a client for the given base URL and API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not a valid http(s) URL or the
    /// underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, GatewayError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidBaseUrl(format!(
                "{base_url}: scheme must be http or https"
            )));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Upper bound on a single request to the gateway.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit a refund to the gateway.
    pub async fn create_refund(
        &self,
        request: &CreateRefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        let resp = self
            .http
            .post(format!("{}/refunds", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(request)
            .send()
            .await?;

        self.read_refund(resp).await
    }

    /// Fetch a refund by the gateway's own id. Read-only.
    pub async fn fetch_refund(&self, refund_id: &str) -> Result<GatewayRefund, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/refunds/{refund_id}", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        self.read_refund(resp).await
    }

    /// Look a refund up by the merchant reference we sent at create time.
    ///
    /// Returns `Ok(None)` when the gateway has no refund under that
    /// reference, which is a definitive answer: the create call never
    /// reached it.
    pub async fn find_refund_by_reference(
        &self,
        merchant_reference: &str,
    ) -> Result<Option<GatewayRefund>, GatewayError> {
        let resp = self
            .http
            .get(format!("{}/refunds", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[("merchantReference", merchant_reference)])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value = serde_json::from_str::<Value>(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;

        // The lookup endpoint answers with {"items": [...]}; an empty list
        // is the same definitive "never seen" as a 404.
        let first = match value.get("items").and_then(Value::as_array) {
            Some(items) => match items.first() {
                Some(item) => item.clone(),
                None => return Ok(None),
            },
            None => value,
        };

        parse_refund(first).map(Some)
    }

    async fn read_refund(&self, resp: reqwest::Response) -> Result<GatewayRefund, GatewayError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value = serde_json::from_str::<Value>(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;
        parse_refund(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_vocabulary_maps_to_internal_status() {
        for raw in ["succeeded", "completed", "refunded", "REFUNDED"] {
            assert_eq!(
                GatewayRefundStatus::from_provider(raw),
                GatewayRefundStatus::Completed,
                "{raw}"
            );
        }
        for raw in ["failed", "declined", "error", "rejected"] {
            assert_eq!(
                GatewayRefundStatus::from_provider(raw),
                GatewayRefundStatus::Failed,
                "{raw}"
            );
        }
        for raw in ["pending", "processing", "in_progress", "submitted"] {
            assert_eq!(
                GatewayRefundStatus::from_provider(raw),
                GatewayRefundStatus::Processing,
                "{raw}"
            );
        }
    }

    #[test]
    fn unknown_vocabulary_is_optimistic() {
        // A word we do not recognize must never be escalated to failed.
        assert_eq!(
            GatewayRefundStatus::from_provider("partially_settled"),
            GatewayRefundStatus::Processing
        );
        assert_eq!(
            GatewayRefundStatus::from_provider(""),
            GatewayRefundStatus::Processing
        );
    }

    #[test]
    fn create_request_serializes_to_camel_case() {
        let request = CreateRefundRequest {
            amount_minor: 47_500,
            currency: "USD".to_string(),
            payment_reference: "ch_123".to_string(),
            reason: "schedule_change".to_string(),
            note: None,
            merchant_reference: "7b6a4f3e".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["amountMinor"], 47_500);
        assert_eq!(value["paymentReference"], "ch_123");
        assert_eq!(value["merchantReference"], "7b6a4f3e");
        assert!(value.get("note").is_none());
    }

    #[test]
    fn parse_refund_requires_id_and_status() {
        let ok = parse_refund(json!({"id": "rf_1", "status": "succeeded", "extra": 1})).unwrap();
        assert_eq!(ok.id, "rf_1");
        assert_eq!(ok.status, GatewayRefundStatus::Completed);
        assert_eq!(ok.raw_status, "succeeded");
        assert_eq!(ok.body["extra"], 1);

        assert!(parse_refund(json!({"status": "succeeded"})).is_err());
        assert!(parse_refund(json!({"id": "rf_1"})).is_err());
    }

    #[test]
    fn detail_extracts_the_most_specific_message() {
        let err = GatewayError::Api {
            status: 402,
            body: json!({"error": {"message": "insufficient balance"}}).to_string(),
        };
        assert_eq!(
            err.detail(),
            "gateway declined (status 402): insufficient balance"
        );

        let err = GatewayError::Api {
            status: 400,
            body: json!({"message": "bad reference"}).to_string(),
        };
        assert_eq!(err.detail(), "gateway declined (status 400): bad reference");

        let err = GatewayError::Api {
            status: 500,
            body: "upstream exploded".to_string(),
        };
        assert_eq!(err.detail(), "gateway error (status 500): upstream exploded");

        let err = GatewayError::Api {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.detail(), "gateway error (status 503)");
    }

    #[test]
    fn not_found_is_only_the_404_api_answer() {
        assert!(
            GatewayError::Api {
                status: 404,
                body: String::new()
            }
            .is_not_found()
        );
        assert!(
            !GatewayError::Api {
                status: 500,
                body: String::new()
            }
            .is_not_found()
        );
        assert!(!GatewayError::InvalidResponse("x".into()).is_not_found());
    }

    #[test]
    fn client_rejects_non_http_base_urls() {
        let err = GatewayClient::new(
            "ftp://api.payflux.io/v1",
            "key".to_string(),
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidBaseUrl(_)));

        assert!(
            GatewayClient::new(
                "not a url",
                "key".to_string(),
                Duration::from_secs(10)
            )
            .is_err()
        );

        let client = GatewayClient::new(
            "https://api.payflux.io/v1/",
            "key".to_string(),
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://api.payflux.io/v1");
    }
}
