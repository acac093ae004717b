use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_STORAGE_KEY: &str = "ngStorage-user";
pub const DEFAULT_STORE_STORAGE_KEY: &str = "ngStorage-currentStore";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;
pub const DEFAULT_RESPONDER_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_FALLBACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_SEARCH_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("pollIntervalMs ({poll_ms}) must be shorter than responderTimeoutMs ({timeout_ms})")]
    PollNotShorterThanTimeout { poll_ms: u64, timeout_ms: u64 },
    #[error("{field} must not be empty")]
    EmptyStorageKey { field: &'static str },
    #[error("maxSearchDepth must be at least 1")]
    ZeroSearchDepth,
}

/// Tunables shared by both sides of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandshakeConfig {
    pub user_storage_key: String,
    pub store_storage_key: String,
    pub poll_interval_ms: u64,
    pub responder_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    pub deep_search_store: bool,
    pub deep_search_user: bool,
    pub max_search_depth: usize,
    pub allow_fallback_submission: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            user_storage_key: DEFAULT_USER_STORAGE_KEY.to_string(),
            store_storage_key: DEFAULT_STORE_STORAGE_KEY.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            responder_timeout_ms: DEFAULT_RESPONDER_TIMEOUT_MS,
            fallback_timeout_ms: DEFAULT_FALLBACK_TIMEOUT_MS,
            deep_search_store: true,
            deep_search_user: false,
            max_search_depth: DEFAULT_MAX_SEARCH_DEPTH,
            allow_fallback_submission: true,
        }
    }
}

impl HandshakeConfig {
    /// Parses a JSON config object. Missing keys keep their defaults; blank
    /// input yields the default config.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_json::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_storage_key.trim().is_empty() {
            return Err(ConfigError::EmptyStorageKey {
                field: "userStorageKey",
            });
        }
        if self.store_storage_key.trim().is_empty() {
            return Err(ConfigError::EmptyStorageKey {
                field: "storeStorageKey",
            });
        }
        for (field, value) in [
            ("pollIntervalMs", self.poll_interval_ms),
            ("responderTimeoutMs", self.responder_timeout_ms),
            ("fallbackTimeoutMs", self.fallback_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.poll_interval_ms >= self.responder_timeout_ms {
            return Err(ConfigError::PollNotShorterThanTimeout {
                poll_ms: self.poll_interval_ms,
                timeout_ms: self.responder_timeout_ms,
            });
        }
        if self.max_search_depth == 0 {
            return Err(ConfigError::ZeroSearchDepth);
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn responder_timeout(&self) -> Duration {
        Duration::from_millis(self.responder_timeout_ms)
    }

    #[must_use]
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_yields_defaults() {
        let config = HandshakeConfig::from_json_str("  ").expect("defaults");
        assert_eq!(config, HandshakeConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(300));
        assert_eq!(config.fallback_timeout(), Duration::from_secs(5));
        assert!(config.allow_fallback_submission);
    }

    #[test]
    fn fallback_submission_can_be_disabled() {
        let config = HandshakeConfig::from_json_str(r#"{"allowFallbackSubmission": false}"#)
            .expect("valid config");
        assert!(!config.allow_fallback_submission);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config =
            HandshakeConfig::from_json_str(r#"{"pollIntervalMs": 250, "deepSearchStore": false}"#)
                .expect("valid config");
        assert_eq!(config.poll_interval_ms, 250);
        assert!(!config.deep_search_store);
        assert_eq!(config.responder_timeout_ms, DEFAULT_RESPONDER_TIMEOUT_MS);
        assert_eq!(config.user_storage_key, DEFAULT_USER_STORAGE_KEY);
    }

    #[test]
    fn zero_durations_are_rejected() {
        let error = HandshakeConfig::from_json_str(r#"{"fallbackTimeoutMs": 0}"#)
            .expect_err("expected invalid config");
        assert_eq!(
            error,
            ConfigError::ZeroDuration {
                field: "fallbackTimeoutMs"
            }
        );
    }

    #[test]
    fn poll_interval_must_be_shorter_than_timeout() {
        let error =
            HandshakeConfig::from_json_str(r#"{"pollIntervalMs": 900, "responderTimeoutMs": 900}"#)
                .expect_err("expected invalid config");
        assert!(matches!(error, ConfigError::PollNotShorterThanTimeout { .. }));
    }

    #[test]
    fn malformed_json_reports_parse_error() {
        let error = HandshakeConfig::from_json_str("{pollIntervalMs").expect_err("parse error");
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_storage_key_is_rejected() {
        let error = HandshakeConfig::from_json_str(r#"{"storeStorageKey": " "}"#)
            .expect_err("expected invalid config");
        assert_eq!(
            error,
            ConfigError::EmptyStorageKey {
                field: "storeStorageKey"
            }
        );
    }
}
