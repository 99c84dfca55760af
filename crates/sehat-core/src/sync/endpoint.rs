//! Upstream sync endpoint client

use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, QueuedAction};
use crate::util::{base_url, excerpt};

/// One action as sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    /// `{device_id}:{action_id}`; the endpoint deduplicates on this
    pub idempotency_key: String,
    /// Local action id
    pub id: ActionId,
    /// Action type tag
    pub kind: ActionKind,
    /// Action payload
    pub payload: serde_json::Value,
    /// Local creation timestamp (Unix ms)
    pub created_at: i64,
    /// 1-based attempt number
    pub attempt: u32,
}

impl DeliveryRequest {
    /// Build the request for the next attempt of `action`.
    pub fn for_action(device_id: &str, action: &QueuedAction) -> Self {
        Self {
            idempotency_key: format!("{device_id}:{}", action.id),
            id: action.id,
            kind: action.kind,
            payload: action.payload.clone(),
            created_at: action.created_at,
            attempt: action.attempts + 1,
        }
    }
}

/// The remote service queued actions are delivered to.
///
/// Implementations must be idempotent on `idempotency_key`: delivery is
/// at-least-once and the same action can arrive twice.
pub trait SyncEndpoint: Send + Sync + 'static {
    /// Deliver one action; any error counts as a failed attempt.
    fn deliver(&self, request: &DeliveryRequest) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP implementation posting actions as JSON
#[derive(Clone)]
pub struct HttpSyncEndpoint {
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSyncEndpoint")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpSyncEndpoint {
    /// Create a client for `{base_url}/v1/actions`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            endpoint: format!("{base_url}/v1/actions"),
            client,
        })
    }

    /// Full URL actions are posted to.
    pub fn url(&self) -> &str {
        &self.endpoint
    }
}

impl SyncEndpoint for HttpSyncEndpoint {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", &request.idempotency_key)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|error| Error::DeliveryFailed(error.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::DeliveryFailed(parse_api_error(status, &body)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = excerpt(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    base_url(&raw).ok_or_else(|| {
        Error::Config(format!(
            "sync endpoint URL must be an http:// or https:// URL, got '{}'",
            raw.trim()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionStatus;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("sync.example.com".to_string()).is_err());
    }

    #[test]
    fn endpoint_url_appends_actions_path() {
        let endpoint = HttpSyncEndpoint::new("https://sync.example.com/").unwrap();
        assert_eq!(endpoint.url(), "https://sync.example.com/v1/actions");
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::BAD_GATEWAY,
            r#"{"message": "upstream down"}"#,
        );
        assert_eq!(message, "upstream down (502)");
        assert_eq!(
            parse_api_error(StatusCode::SERVICE_UNAVAILABLE, "  "),
            "HTTP 503"
        );
    }

    #[test]
    fn delivery_request_scopes_key_by_device() {
        let action = QueuedAction {
            id: ActionId::new(7),
            kind: ActionKind::ChwShare,
            payload: serde_json::json!({ "date": "2024-01-01" }),
            created_at: 1,
            status: ActionStatus::InFlight,
            attempts: 2,
            last_error: None,
        };
        let request = DeliveryRequest::for_action("device-a", &action);

        assert_eq!(request.idempotency_key, "device-a:7");
        assert_eq!(request.attempt, 3);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["idempotencyKey"], "device-a:7");
        assert_eq!(json["kind"], "chw-share");
    }
}
