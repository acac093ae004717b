use std::cell::RefCell;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relay::RelayConfig;
use crate::submission::SuggestionRecord;

pub const SUGGESTIONS_TABLE: &str = "suggestions";
pub const RELAY_CONFIG_TABLE: &str = "n8n_configs";
/// The relay configuration is stored under one fixed account key.
pub const DEFAULT_RELAY_ACCOUNT: &str = "default-account";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record store base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("record store api key must not be empty")]
    EmptyApiKey,
    #[error("record store request failed: {0}")]
    Transport(String),
    #[error("record store returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("record store response could not be decoded: {0}")]
    Decode(String),
    #[error("record store returned no row for the insert")]
    EmptyInsert,
}

/// A suggestion row as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSuggestion {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: SuggestionRecord,
}

/// Row shape of the relay configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfigRow {
    pub account_id: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_time: Option<String>,
}

impl RelayConfigRow {
    #[must_use]
    pub fn from_config(account_id: &str, config: &RelayConfig) -> Self {
        Self {
            account_id: account_id.to_string(),
            webhook_url: Some(config.webhook_url.clone()),
            is_enabled: Some(config.is_enabled),
            last_test_result: config.last_test_result.map(|result| result.as_str().to_string()),
            last_test_time: config.last_test_time.clone(),
        }
    }

    #[must_use]
    pub fn into_config(self) -> RelayConfig {
        RelayConfig {
            webhook_url: self.webhook_url.unwrap_or_default(),
            is_enabled: self.is_enabled.unwrap_or(false),
            last_test_result: self
                .last_test_result
                .as_deref()
                .and_then(crate::relay::TestResult::parse),
            last_test_time: self.last_test_time,
        }
    }
}

/// Persistence for submitted suggestions and the relay configuration.
#[async_trait(?Send)]
pub trait SuggestionStore {
    async fn insert(&self, record: &SuggestionRecord) -> Result<StoredSuggestion, StoreError>;

    /// Suggestions submitted by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSuggestion>, StoreError>;

    async fn relay_config(&self) -> Result<Option<RelayConfig>, StoreError>;

    async fn save_relay_config(&self, config: &RelayConfig) -> Result<(), StoreError>;
}

/// Connection settings for a PostgREST-style record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStoreConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RecordStoreConfig {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let base_url = normalize_base_url(base_url)?;
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(StoreError::EmptyApiKey);
        }
        Ok(Self {
            base_url,
            api_key: api_key.to_string(),
        })
    }

    #[must_use]
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    #[must_use]
    pub fn insert_url(&self) -> String {
        self.table_url(SUGGESTIONS_TABLE)
    }

    #[must_use]
    pub fn history_url(&self, user_id: &str) -> String {
        format!(
            "{}?select=*&user_id=eq.{}&order=created_at.desc",
            self.table_url(SUGGESTIONS_TABLE),
            encode_query_value(user_id)
        )
    }

    #[must_use]
    pub fn relay_config_url(&self) -> String {
        format!(
            "{}?select=*&account_id=eq.{}",
            self.table_url(RELAY_CONFIG_TABLE),
            encode_query_value(DEFAULT_RELAY_ACCOUNT)
        )
    }

    #[must_use]
    pub fn relay_upsert_url(&self) -> String {
        format!(
            "{}?on_conflict=account_id",
            self.table_url(RELAY_CONFIG_TABLE)
        )
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|_| StoreError::InvalidBaseUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(StoreError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Store kept entirely in memory. Backs tests and the offline web build.
#[derive(Debug, Default)]
pub struct InMemorySuggestionStore {
    rows: RefCell<Vec<StoredSuggestion>>,
    relay: RefCell<Option<RelayConfig>>,
}

impl InMemorySuggestionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_relay_config(config: RelayConfig) -> Self {
        Self {
            rows: RefCell::new(Vec::new()),
            relay: RefCell::new(Some(config)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.borrow().is_empty()
    }
}

#[async_trait(?Send)]
impl SuggestionStore for InMemorySuggestionStore {
    async fn insert(&self, record: &SuggestionRecord) -> Result<StoredSuggestion, StoreError> {
        let stored = StoredSuggestion {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            record: record.clone(),
        };
        self.rows.borrow_mut().push(stored.clone());
        Ok(stored)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredSuggestion>, StoreError> {
        let rows = self.rows.borrow();
        let mut matching = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.record.user_id == user_id)
            .collect::<Vec<_>>();
        // Insertion index breaks ties between rows created in the same instant.
        matching.sort_by(|(left_index, left), (right_index, right)| {
            right
                .created_at
                .cmp(&left.created_at)
                .then(right_index.cmp(left_index))
        });
        Ok(matching.into_iter().map(|(_, row)| row.clone()).collect())
    }

    async fn relay_config(&self) -> Result<Option<RelayConfig>, StoreError> {
        Ok(self.relay.borrow().clone())
    }

    async fn save_relay_config(&self, config: &RelayConfig) -> Result<(), StoreError> {
        *self.relay.borrow_mut() = Some(config.clone());
        Ok(())
    }
}
