use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::HandshakeConfig;
use crate::storage::KeyValueStorage;

/// Shown in human-facing views for fields that could not be resolved. Never
/// used in comparisons; resolved records always carry `""` instead.
pub const NOT_FOUND_PLACEHOLDER: &str = "não encontrado";

/// Ordered synonyms for one logical field. Earlier names win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCandidates {
    pub field: &'static str,
    pub names: &'static [&'static str],
}

pub const ACCOUNT_ID: FieldCandidates = FieldCandidates {
    field: "accountId",
    names: &["id_user", "userId", "user_id", "id"],
};

pub const USER_FULL_NAME: FieldCandidates = FieldCandidates {
    field: "userFullName",
    names: &[
        "full_name",
        "fullName",
        "name",
        "nome_completo",
        "nomeCompleto",
        "displayName",
        "first_name",
    ],
};

pub const USER_EMAIL: FieldCandidates = FieldCandidates {
    field: "userEmail",
    names: &["email", "e_mail", "user_email", "login"],
};

pub const STORE_ID: FieldCandidates = FieldCandidates {
    field: "visitorId",
    names: &["id_store", "storeId", "store_id", "id", "loja_id"],
};

pub const TRADE_NAME: FieldCandidates = FieldCandidates {
    field: "tradeName",
    names: &[
        "trade_name",
        "tradeName",
        "nome_fantasia",
        "nome",
        "name",
        "razao_social",
    ],
};

pub const STORE_PHONE: FieldCandidates = FieldCandidates {
    field: "storePhone1",
    names: &[
        "phone_1",
        "phone1",
        "telefone",
        "phone",
        "telefone1",
        "fone1",
        "tel1",
        "phone_2",
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub deep: bool,
    pub max_depth: usize,
}

impl SearchOptions {
    #[must_use]
    pub fn top_level() -> Self {
        Self {
            deep: false,
            max_depth: 0,
        }
    }

    #[must_use]
    pub fn deep(max_depth: usize) -> Self {
        Self {
            deep: true,
            max_depth,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub account_id: String,
    pub user_full_name: String,
    pub user_email: String,
}

impl UserIdentity {
    #[must_use]
    pub fn from_record(raw: &Value, options: SearchOptions) -> Self {
        Self {
            account_id: resolve_field(raw, &ACCOUNT_ID, options),
            user_full_name: resolve_field(raw, &USER_FULL_NAME, options),
            user_email: resolve_field(raw, &USER_EMAIL, options),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreIdentity {
    pub visitor_id: String,
    pub trade_name: String,
    pub store_phone: String,
}

impl StoreIdentity {
    #[must_use]
    pub fn from_record(raw: &Value, options: SearchOptions) -> Self {
        Self {
            visitor_id: resolve_field(raw, &STORE_ID, options),
            trade_name: resolve_field(raw, &TRADE_NAME, options),
            store_phone: resolve_field(raw, &STORE_PHONE, options),
        }
    }
}

/// How the raw record behind an extraction was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    Loaded,
    Missing,
    Unavailable(String),
    Malformed(String),
    NotAnObject,
}

impl RecordSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Missing => "missing",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
            Self::NotAnObject => "not_an_object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<T> {
    pub identity: T,
    pub source: RecordSource,
}

/// Reads the user and store records from host storage and normalizes them.
///
/// Every call reads storage afresh. Failures degrade to an all-empty record
/// and are reported through [`Extraction::source`], never as errors.
#[derive(Clone)]
pub struct IdentityExtractor {
    storage: Rc<dyn KeyValueStorage>,
    user_key: String,
    store_key: String,
    user_search: SearchOptions,
    store_search: SearchOptions,
}

impl IdentityExtractor {
    pub fn new(storage: Rc<dyn KeyValueStorage>, config: &HandshakeConfig) -> Self {
        let options_for = |deep: bool| {
            if deep {
                SearchOptions::deep(config.max_search_depth)
            } else {
                SearchOptions::top_level()
            }
        };
        Self {
            storage,
            user_key: config.user_storage_key.clone(),
            store_key: config.store_storage_key.clone(),
            user_search: options_for(config.deep_search_user),
            store_search: options_for(config.deep_search_store),
        }
    }

    pub fn extract_user(&self) -> Extraction<UserIdentity> {
        let (record, source) = self.load_record(&self.user_key);
        let identity = record
            .map(|raw| UserIdentity::from_record(&raw, self.user_search))
            .unwrap_or_default();
        Extraction { identity, source }
    }

    pub fn extract_store(&self) -> Extraction<StoreIdentity> {
        let (record, source) = self.load_record(&self.store_key);
        let identity = record
            .map(|raw| StoreIdentity::from_record(&raw, self.store_search))
            .unwrap_or_default();
        Extraction { identity, source }
    }

    fn load_record(&self, key: &str) -> (Option<Value>, RecordSource) {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "identity record not present in storage");
                return (None, RecordSource::Missing);
            }
            Err(error) => {
                warn!(key, error = %error, "identity storage read failed");
                return (None, RecordSource::Unavailable(error.to_string()));
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => (Some(value), RecordSource::Loaded),
            Ok(_) => {
                warn!(key, "identity record is not a JSON object");
                (None, RecordSource::NotAnObject)
            }
            Err(error) => {
                warn!(key, error = %error, "identity record is not valid JSON");
                (None, RecordSource::Malformed(error.to_string()))
            }
        }
    }
}

/// Resolves one logical field: top-level candidates first, then, if enabled,
/// a depth-first search through nested values. Unresolved fields are `""`.
#[must_use]
pub fn resolve_field(raw: &Value, candidates: &FieldCandidates, options: SearchOptions) -> String {
    let Value::Object(record) = raw else {
        return String::new();
    };
    first_present(record, candidates.names)
        .or_else(|| {
            if options.deep {
                deep_find(raw, candidates.names, options.max_depth)
            } else {
                None
            }
        })
        .unwrap_or_default()
}

/// Returns the value of the first candidate that is present. Only `null`,
/// a missing key and `""` count as absent; `0` and `false` are values.
#[must_use]
pub fn first_present(record: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|name| record.get(*name).and_then(scalar_text))
}

/// Depth-first search below the root for the first nested object holding any
/// candidate. Keys are visited in insertion order; `max_depth` bounds how far
/// below the root the search descends.
#[must_use]
pub fn deep_find(root: &Value, candidates: &[&str], max_depth: usize) -> Option<String> {
    children(root).find_map(|child| find_nested(child, candidates, 1, max_depth))
}

fn find_nested(
    value: &Value,
    candidates: &[&str],
    depth: usize,
    max_depth: usize,
) -> Option<String> {
    if depth > max_depth {
        return None;
    }
    if let Value::Object(map) = value
        && let Some(found) = first_present(map, candidates)
    {
        return Some(found);
    }
    children(value).find_map(|child| find_nested(child, candidates, depth + 1, max_depth))
}

fn children(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

/// String form of a scalar JSON value, or `None` when the value counts as
/// absent or is not a scalar.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number_text(number)),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn number_text(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract().abs() < f64::EPSILON && float.abs() < MAX_SAFE_INTEGER => {
            format!("{}", float as i64)
        }
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}

/// Human-facing rendering of a resolved field.
#[must_use]
pub fn display_value(value: &str) -> &str {
    if value.is_empty() {
        NOT_FOUND_PLACEHOLDER
    } else {
        value
    }
}
