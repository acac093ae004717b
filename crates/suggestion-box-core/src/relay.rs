use std::cell::RefCell;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::protocol::CompositeIdentity;

pub const SUBMISSION_SOURCE: &str = "suggestion_box_form";
pub const TEST_SOURCE: &str = "suggestion_box_config_test";
const TEST_WEBHOOK_SEGMENT: &str = "/webhook-test/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("webhook url must not be empty")]
    MissingUrl,
    #[error("webhook url must use http:// or https:// and include a host: {0}")]
    InvalidUrl(String),
    #[error("webhook payload could not be encoded: {0}")]
    Encode(String),
    #[error("webhook request failed: {0}")]
    Transport(String),
    #[error("webhook returned status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Success,
    Error,
}

impl TestResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Outbound webhook settings, edited by an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    pub webhook_url: String,
    pub is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test_result: Option<TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test_time: Option<String>,
}

impl RelayConfig {
    #[must_use]
    pub fn enabled(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            is_enabled: true,
            ..Self::default()
        }
    }

    pub fn validated_url(&self) -> Result<url::Url, RelayError> {
        let raw = self.webhook_url.trim();
        if raw.is_empty() {
            return Err(RelayError::MissingUrl);
        }
        let parsed = url::Url::parse(raw).map_err(|_| RelayError::InvalidUrl(raw.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(RelayError::InvalidUrl(raw.to_string()));
        }
        Ok(parsed)
    }

    /// Test-mode webhook endpoints only accept traffic while an editor has
    /// the workflow open.
    #[must_use]
    pub fn is_test_webhook_url(&self) -> bool {
        self.webhook_url.contains(TEST_WEBHOOK_SEGMENT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStore {
    pub id: String,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPreferences {
    pub preferred_method: String,
    pub contact_value: String,
    pub email: String,
    pub whatsapp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionInfo {
    pub timestamp: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPayload {
    pub category: String,
    pub suggestion: String,
    pub user: RelayUser,
    pub store: RelayStore,
    pub contact_preferences: ContactPreferences,
    pub submission_info: SubmissionInfo,
}

impl RelayPayload {
    #[must_use]
    pub fn new(
        category: &str,
        suggestion: &str,
        identity: &CompositeIdentity,
        contact_preferences: ContactPreferences,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            category: category.to_string(),
            suggestion: suggestion.to_string(),
            user: RelayUser {
                id: identity.account_id.clone(),
                name: identity.user_full_name.clone(),
                email: identity.user_email.clone(),
            },
            store: RelayStore {
                id: identity.store_id.clone(),
                name: identity.trade_name.clone(),
                phone: identity.store_phone1.clone(),
            },
            contact_preferences,
            submission_info: SubmissionInfo {
                timestamp: rfc3339(submitted_at),
                source: SUBMISSION_SOURCE.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TestUser {
    name: &'static str,
    email: &'static str,
    id: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TestStore {
    id: &'static str,
    phone: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TestPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    suggestion: &'static str,
    user: TestUser,
    store: TestStore,
    timestamp: String,
    source: &'static str,
}

#[must_use]
pub fn test_payload(now: DateTime<Utc>) -> Value {
    let payload = TestPayload {
        kind: "test",
        suggestion: "Esta é uma sugestão de teste para validar a conexão com n8n",
        user: TestUser {
            name: "Usuário Teste",
            email: "teste@example.com",
            id: "test-user",
        },
        store: TestStore {
            id: "test-store",
            phone: "00000000000",
        },
        timestamp: rfc3339(now),
        source: TEST_SOURCE,
    };
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Posts JSON bodies to a webhook endpoint.
#[async_trait(?Send)]
pub trait WebhookTransport {
    async fn post_json(&self, url: &url::Url, body: &Value) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayOutcome {
    Skipped { reason: String },
    Delivered,
    Failed { message: String },
}

/// Fire-and-forget forwarding of accepted suggestions to the configured
/// webhook. Failures never propagate to the submitter.
pub struct WebhookRelay<T> {
    transport: T,
}

impl<T: WebhookTransport> WebhookRelay<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn dispatch(
        &self,
        config: Option<&RelayConfig>,
        payload: &RelayPayload,
    ) -> RelayOutcome {
        let Some(config) = config.filter(|config| config.is_enabled) else {
            return RelayOutcome::Skipped {
                reason: "relay disabled".to_string(),
            };
        };
        let url = match config.validated_url() {
            Ok(url) => url,
            Err(error) => {
                warn!(error = %error, "relay configured with an unusable webhook url");
                return RelayOutcome::Skipped {
                    reason: error.to_string(),
                };
            }
        };
        if config.is_test_webhook_url() {
            warn!(
                url = %url,
                "relay targets a test-mode webhook; delivery requires an open editor session"
            );
        }
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(error) => {
                return RelayOutcome::Failed {
                    message: RelayError::Encode(error.to_string()).to_string(),
                };
            }
        };
        match self.transport.post_json(&url, &body).await {
            Ok(()) => {
                info!(url = %url, category = %payload.category, "suggestion relayed");
                RelayOutcome::Delivered
            }
            Err(error) => {
                warn!(url = %url, error = %error, "suggestion relay failed");
                RelayOutcome::Failed {
                    message: error.to_string(),
                }
            }
        }
    }

    /// Sends the connectivity test payload and records the result on
    /// `config`. An unusable URL is returned as an error without recording.
    pub async fn send_test(
        &self,
        config: &mut RelayConfig,
        now: DateTime<Utc>,
    ) -> Result<TestResult, RelayError> {
        let url = config.validated_url()?;
        let result = match self.transport.post_json(&url, &test_payload(now)).await {
            Ok(()) => TestResult::Success,
            Err(error) => {
                warn!(url = %url, error = %error, "relay test failed");
                TestResult::Error
            }
        };
        config.last_test_result = Some(result);
        config.last_test_time = Some(rfc3339(now));
        info!(url = %url, result = result.as_str(), "relay test recorded");
        Ok(result)
    }
}

/// Transport that records every post instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    posts: RefCell<Vec<(String, Value)>>,
    failure: RefCell<Option<RelayError>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(error: RelayError) -> Self {
        Self {
            posts: RefCell::new(Vec::new()),
            failure: RefCell::new(Some(error)),
        }
    }

    #[must_use]
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.borrow().clone()
    }
}

#[async_trait(?Send)]
impl WebhookTransport for RecordingTransport {
    async fn post_json(&self, url: &url::Url, body: &Value) -> Result<(), RelayError> {
        self.posts
            .borrow_mut()
            .push((url.to_string(), body.clone()));
        match self.failure.borrow().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn payload() -> RelayPayload {
        RelayPayload::new(
            "melhorias",
            "Adicionar modo escuro ao painel",
            &CompositeIdentity {
                account_id: "88251".to_string(),
                visitor_id: "63702".to_string(),
                user_full_name: "Igor".to_string(),
                user_email: "igor@example.com".to_string(),
                store_phone1: "5511999990000".to_string(),
                trade_name: "Loja Teste".to_string(),
                store_id: "63702 - Loja Teste".to_string(),
            },
            ContactPreferences {
                preferred_method: "email".to_string(),
                contact_value: "igor@example.com".to_string(),
                email: "igor@example.com".to_string(),
                whatsapp: String::new(),
            },
            at(),
        )
    }

    #[test]
    fn payload_has_nested_wire_shape() {
        let value = serde_json::to_value(payload()).expect("encode");
        assert_eq!(value["user"]["id"], "88251");
        assert_eq!(value["store"]["id"], "63702 - Loja Teste");
        assert_eq!(value["store"]["name"], "Loja Teste");
        assert_eq!(value["contact_preferences"]["preferred_method"], "email");
        assert_eq!(
            value["submission_info"]["timestamp"],
            "2026-03-14T12:30:00.000Z"
        );
        assert_eq!(value["submission_info"]["source"], "suggestion_box_form");
    }

    #[test]
    fn config_url_validation() {
        assert_eq!(
            RelayConfig::default().validated_url(),
            Err(RelayError::MissingUrl)
        );
        assert!(matches!(
            RelayConfig::enabled("mailto:ops@example.com").validated_url(),
            Err(RelayError::InvalidUrl(_))
        ));
        let config = RelayConfig::enabled("https://n8n.example.com/webhook-test/abc");
        assert!(config.validated_url().is_ok());
        assert!(config.is_test_webhook_url());
        assert!(!RelayConfig::enabled("https://n8n.example.com/webhook/abc").is_test_webhook_url());
    }

    #[test]
    fn config_uses_camel_case_keys() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "webhookUrl": "https://n8n.example.com/webhook/x",
            "isEnabled": true,
            "lastTestResult": "success"
        }))
        .expect("decode");
        assert!(config.is_enabled);
        assert_eq!(config.last_test_result, Some(TestResult::Success));
        assert_eq!(config.last_test_time, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_or_missing_config_skips_delivery() {
        let relay = WebhookRelay::new(RecordingTransport::new());
        let mut config = RelayConfig::enabled("https://n8n.example.com/webhook/x");
        config.is_enabled = false;

        assert!(matches!(
            relay.dispatch(None, &payload()).await,
            RelayOutcome::Skipped { .. }
        ));
        assert!(matches!(
            relay.dispatch(Some(&config), &payload()).await,
            RelayOutcome::Skipped { .. }
        ));
        assert!(relay.transport().posts().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn enabled_config_posts_payload() {
        let relay = WebhookRelay::new(RecordingTransport::new());
        let config = RelayConfig::enabled("https://n8n.example.com/webhook/x");
        assert_eq!(
            relay.dispatch(Some(&config), &payload()).await,
            RelayOutcome::Delivered
        );

        let posts = relay.transport().posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "https://n8n.example.com/webhook/x");
        assert_eq!(posts[0].1["category"], "melhorias");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transport_failure_is_reported_not_raised() {
        let relay = WebhookRelay::new(RecordingTransport::failing(RelayError::Status(502)));
        let config = RelayConfig::enabled("https://n8n.example.com/webhook/x");
        assert_eq!(
            relay.dispatch(Some(&config), &payload()).await,
            RelayOutcome::Failed {
                message: "webhook returned status 502".to_string()
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_send_records_result_and_time() {
        let relay = WebhookRelay::new(RecordingTransport::new());
        let mut config = RelayConfig::enabled("https://n8n.example.com/webhook/x");
        let result = relay.send_test(&mut config, at()).await.expect("test");

        assert_eq!(result, TestResult::Success);
        assert_eq!(config.last_test_result, Some(TestResult::Success));
        assert_eq!(
            config.last_test_time.as_deref(),
            Some("2026-03-14T12:30:00.000Z")
        );
        let posts = relay.transport().posts();
        assert_eq!(posts[0].1["type"], "test");
        assert_eq!(posts[0].1["source"], "suggestion_box_config_test");

        let failing = WebhookRelay::new(RecordingTransport::failing(RelayError::Transport(
            "connection refused".to_string(),
        )));
        let result = failing.send_test(&mut config, at()).await.expect("test");
        assert_eq!(result, TestResult::Error);
        assert_eq!(config.last_test_result, Some(TestResult::Error));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_send_rejects_unusable_url_without_recording() {
        let relay = WebhookRelay::new(RecordingTransport::new());
        let mut config = RelayConfig::default();
        assert_eq!(
            relay.send_test(&mut config, at()).await,
            Err(RelayError::MissingUrl)
        );
        assert_eq!(config.last_test_result, None);
        assert!(relay.transport().posts().is_empty());
    }
}
