#![cfg_attr(test, allow(clippy::expect_used))]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use suggestion_box_core::persistence::{
    DEFAULT_RELAY_ACCOUNT, RecordStoreConfig, RelayConfigRow, StoreError, StoredSuggestion,
    SuggestionStore,
};
use suggestion_box_core::relay::{RelayConfig, RelayError, WebhookTransport};
use suggestion_box_core::submission::SuggestionRecord;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct SuggestionStoreClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl SuggestionStoreClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

/// Record store client speaking the PostgREST dialect over HTTP.
#[derive(Debug, Clone)]
pub struct SuggestionStoreClient {
    store: RecordStoreConfig,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("suggestion_store_config_invalid:{0}")]
    Config(StoreError),
    #[error("suggestion_store_request_failed:{message}")]
    Request { message: String },
    #[error("suggestion_store_read_failed:{message}")]
    Read { message: String },
    #[error("suggestion_store_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("suggestion_store_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("suggestion_store_insert_empty")]
    EmptyInsert,
}

impl From<ClientError> for StoreError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Config(error) => error,
            ClientError::Request { message } | ClientError::Read { message } => {
                Self::Transport(message)
            }
            ClientError::Http { status, body } => Self::Status {
                status: status.as_u16(),
                message: body,
            },
            ClientError::Decode { message } => Self::Decode(message),
            ClientError::EmptyInsert => Self::EmptyInsert,
        }
    }
}

impl SuggestionStoreClient {
    pub fn new(config: SuggestionStoreClientConfig) -> Result<Self, ClientError> {
        let store =
            RecordStoreConfig::new(&config.base_url, &config.api_key).map_err(ClientError::Config)?;
        Ok(Self {
            store,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn record_store(&self) -> &RecordStoreConfig {
        &self.store
    }

    pub async fn insert_suggestion(
        &self,
        record: &SuggestionRecord,
    ) -> Result<StoredSuggestion, ClientError> {
        let rows: Vec<StoredSuggestion> = self
            .post_json(&self.store.insert_url(), &[record], "return=representation")
            .await?;
        rows.into_iter().next().ok_or(ClientError::EmptyInsert)
    }

    pub async fn list_suggestions(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredSuggestion>, ClientError> {
        self.get_json(&self.store.history_url(user_id)).await
    }

    pub async fn load_relay_config(&self) -> Result<Option<RelayConfig>, ClientError> {
        let rows: Vec<RelayConfigRow> = self.get_json(&self.store.relay_config_url()).await?;
        Ok(rows.into_iter().next().map(RelayConfigRow::into_config))
    }

    pub async fn upsert_relay_config(&self, config: &RelayConfig) -> Result<(), ClientError> {
        let row = RelayConfigRow::from_config(DEFAULT_RELAY_ACCOUNT, config);
        let _: Value = self
            .post_json(
                &self.store.relay_upsert_url(),
                &[row],
                "resolution=merge-duplicates,return=representation",
            )
            .await?;
        Ok(())
    }

    pub async fn get_json<T>(&self, url: &str) -> Result<T, ClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut last_error: Option<String> = None;
        for attempt in 0..self.request_attempts {
            let request = self.authorized(self.http.get(url));
            match request.send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    debug!(attempt, error = %error, "record store GET failed");
                    last_error = Some(error.to_string());
                }
            }
        }
        Err(ClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Inserts are not idempotent, so a POST is only retried when the request
    /// never left the client.
    pub async fn post_json<Req, Res>(
        &self,
        url: &str,
        payload: &Req,
        prefer: &str,
    ) -> Result<Res, ClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let mut last_error: Option<String> = None;
        for attempt in 0..self.request_attempts {
            let request = self
                .authorized(self.http.post(url))
                .header("Prefer", prefer)
                .json(payload);
            match request.send().await {
                Ok(response) => return decode_json_response(response).await,
                Err(error) => {
                    debug!(attempt, error = %error, "record store POST failed");
                    let retryable = error.is_connect();
                    last_error = Some(error.to_string());
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(ClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", self.store.api_key.as_str())
            .bearer_auth(self.store.api_key.as_str())
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
    }
}

#[async_trait(?Send)]
impl SuggestionStore for SuggestionStoreClient {
    async fn insert(&self, record: &SuggestionRecord) -> Result<StoredSuggestion, StoreError> {
        Ok(self.insert_suggestion(record).await?)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSuggestion>, StoreError> {
        Ok(self.list_suggestions(user_id).await?)
    }

    async fn relay_config(&self) -> Result<Option<RelayConfig>, StoreError> {
        Ok(self.load_relay_config().await?)
    }

    async fn save_relay_config(&self, config: &RelayConfig) -> Result<(), StoreError> {
        Ok(self.upsert_relay_config(config).await?)
    }
}

/// Webhook transport over reqwest. Unlike the browser transport the response
/// status is visible, so non-2xx answers are reported as failures.
#[derive(Debug, Clone)]
pub struct ReqwestWebhookTransport {
    timeout: Duration,
    http: reqwest::Client,
}

impl Default for ReqwestWebhookTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl ReqwestWebhookTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait(?Send)]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn post_json(&self, url: &url::Url, body: &Value) -> Result<(), RelayError> {
        let response = self
            .http
            .post(url.as_str())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|error| RelayError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RelayError::Status(status.as_u16()))
        }
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ClientError::Http { status, body }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ClientError::Read {
        message: error.to_string(),
    })?;
    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestion_box_core::relay::TestResult;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers exactly one HTTP request and hands back the raw request text.
    async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.expect("read");
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{address}"), handle)
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= content_length
    }

    fn client(base_url: &str) -> SuggestionStoreClient {
        SuggestionStoreClient::new(SuggestionStoreClientConfig::new(base_url, "anon-key"))
            .expect("client")
    }

    fn record() -> SuggestionRecord {
        SuggestionRecord {
            suggestion: "[melhorias] Adicionar modo escuro".to_string(),
            user_id: "88251".to_string(),
            user_full_name: "Igor".to_string(),
            store_id: "63702 - Loja Teste".to_string(),
            preferred_contact_method: "email".to_string(),
            contact_value: "igor@example.com".to_string(),
            source: "webapp".to_string(),
            ..SuggestionRecord::default()
        }
    }

    #[test]
    fn config_errors_surface_before_any_request() {
        let config = SuggestionStoreClientConfig::new("   ", "key");
        let result = SuggestionStoreClient::new(config);
        assert!(matches!(result, Err(ClientError::Config(StoreError::InvalidBaseUrl))));
        let config = SuggestionStoreClientConfig::new("https://db.example.com", "");
        let result = SuggestionStoreClient::new(config);
        assert!(matches!(result, Err(ClientError::Config(StoreError::EmptyApiKey))));
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::CONFLICT, b" duplicate key ");
        assert_eq!(
            error.to_string(),
            "suggestion_store_http_409 Conflict:duplicate key"
        );
        assert_eq!(
            StoreError::from(error),
            StoreError::Status {
                status: 409,
                message: "duplicate key".to_string()
            }
        );

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            empty_body.to_string(),
            "suggestion_store_http_503 Service Unavailable:<empty>"
        );
    }

    #[tokio::test]
    async fn insert_posts_row_and_decodes_representation() {
        let row = serde_json::json!([{
            "id": "6f1c2a52-2f7e-4df0-9a39-0d3f3f7c9b11",
            "created_at": "2026-03-14T12:30:00Z",
            "suggestion": "[melhorias] Adicionar modo escuro",
            "user_id": "88251",
            "user_full_name": "Igor",
            "store_id": "63702 - Loja Teste",
            "preferred_contact_method": "email",
            "contact_value": "igor@example.com",
            "source": "webapp",
            "status": "new"
        }]);
        let (base_url, server) = serve_once("201 Created", row.to_string()).await;

        let stored = client(&base_url)
            .insert(&record())
            .await
            .expect("insert");
        assert_eq!(stored.record.user_id, "88251");
        assert_eq!(stored.record.store_id, "63702 - Loja Teste");

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /rest/v1/suggestions HTTP/1.1"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("apikey: anon-key"));
        assert!(lower.contains("authorization: bearer anon-key"));
        assert!(lower.contains("prefer: return=representation"));
        assert!(request.contains(r#""suggestion":"[melhorias] Adicionar modo escuro""#));
    }

    #[tokio::test]
    async fn history_filters_by_user_and_orders_newest_first() {
        let (base_url, server) = serve_once("200 OK", "[]".to_string()).await;
        let rows = client(&base_url)
            .list_for_user("88251")
            .await
            .expect("history");
        assert!(rows.is_empty());

        let request = server.await.expect("server");
        assert!(request.starts_with(
            "GET /rest/v1/suggestions?select=*&user_id=eq.88251&order=created_at.desc HTTP/1.1"
        ));
    }

    #[tokio::test]
    async fn relay_config_reads_first_row() {
        let rows = serde_json::json!([{
            "account_id": "default-account",
            "webhook_url": "https://n8n.example.com/webhook/abc",
            "is_enabled": true,
            "last_test_result": "success",
            "last_test_time": "2026-03-14T12:30:00.000Z"
        }]);
        let (base_url, _server) = serve_once("200 OK", rows.to_string()).await;
        let config = client(&base_url)
            .relay_config()
            .await
            .expect("config")
            .expect("row");
        assert!(config.is_enabled);
        assert_eq!(config.webhook_url, "https://n8n.example.com/webhook/abc");
        assert_eq!(config.last_test_result, Some(TestResult::Success));
    }

    #[tokio::test]
    async fn error_status_maps_to_store_error() {
        let body = r#"{"message":"Invalid API key"}"#.to_string();
        let (base_url, _server) = serve_once("401 Unauthorized", body).await;
        let error = client(&base_url)
            .list_for_user("1")
            .await
            .expect_err("unauthorized");
        assert_eq!(
            error,
            StoreError::Status {
                status: 401,
                message: r#"{"message":"Invalid API key"}"#.to_string()
            }
        );
    }

    #[tokio::test]
    async fn webhook_transport_reports_status() {
        let (base_url, server) = serve_once("200 OK", "{}".to_string()).await;
        let url = url::Url::parse(&format!("{base_url}/webhook/abc")).expect("url");
        ReqwestWebhookTransport::default()
            .post_json(&url, &serde_json::json!({"category": "outros"}))
            .await
            .expect("delivered");
        let request = server.await.expect("server");
        assert!(request.starts_with("POST /webhook/abc HTTP/1.1"));
        assert!(request.contains(r#"{"category":"outros"}"#));

        let (base_url, _server) = serve_once("404 Not Found", "{}".to_string()).await;
        let url = url::Url::parse(&format!("{base_url}/webhook-test/abc")).expect("url");
        let error = ReqwestWebhookTransport::default()
            .post_json(&url, &serde_json::json!({}))
            .await
            .expect_err("not registered");
        assert_eq!(error, RelayError::Status(404));
    }
}
