use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::initiator::Resolution;
use crate::persistence::{StoreError, StoredSuggestion, SuggestionStore};
use crate::protocol::CompositeIdentity;
use crate::relay::{ContactPreferences, RelayOutcome, RelayPayload, WebhookRelay, WebhookTransport};

pub const MIN_SUGGESTION_CHARS: usize = 10;
pub const MAX_SUGGESTION_CHARS: usize = 5000;
pub const MAX_CONTACT_CHARS: usize = 255;
pub const MIN_WHATSAPP_DIGITS: usize = 10;
pub const MAX_WHATSAPP_DIGITS: usize = 15;
pub const RECORD_SOURCE: &str = "webapp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionCategory {
    Atendimento,
    MalFuncionamento,
    Melhorias,
    Outros,
}

impl SuggestionCategory {
    pub const ALL: [Self; 4] = [
        Self::Atendimento,
        Self::MalFuncionamento,
        Self::Melhorias,
        Self::Outros,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Atendimento => "atendimento",
            Self::MalFuncionamento => "mal-funcionamento",
            Self::Melhorias => "melhorias",
            Self::Outros => "outros",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    Email,
    Whatsapp,
}

impl ContactMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
        }
    }
}

/// Form input as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SuggestionDraft {
    pub category: Option<SuggestionCategory>,
    pub suggestion: String,
    pub preferred_contact_method: Option<ContactMethod>,
    pub contact_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("a category must be selected")]
    MissingCategory,
    #[error("suggestion must have at least {MIN_SUGGESTION_CHARS} characters")]
    SuggestionTooShort,
    #[error("suggestion must have at most {MAX_SUGGESTION_CHARS} characters")]
    SuggestionTooLong,
    #[error("a contact method must be selected")]
    MissingContactMethod,
    #[error("contact value is required")]
    EmptyContactValue,
    #[error("contact value must have at most {MAX_CONTACT_CHARS} characters")]
    ContactValueTooLong,
    #[error("e-mail address is invalid")]
    InvalidEmail,
    #[error("whatsapp number must have {MIN_WHATSAPP_DIGITS} to {MAX_WHATSAPP_DIGITS} digits")]
    InvalidWhatsapp,
}

impl ValidationError {
    /// Form field the error belongs to.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingCategory => "category",
            Self::SuggestionTooShort | Self::SuggestionTooLong => "suggestion",
            Self::MissingContactMethod => "preferredContactMethod",
            Self::EmptyContactValue | Self::ContactValueTooLong => "contactValue",
            Self::InvalidEmail => "contactEmail",
            Self::InvalidWhatsapp => "contactWhatsapp",
        }
    }
}

/// A draft that passed validation, with the text trimmed and the contact
/// normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSuggestion {
    pub category: SuggestionCategory,
    pub text: String,
    pub contact_method: ContactMethod,
    pub contact_value: String,
    pub contact_whatsapp: String,
}

/// Validates every field and reports all failures at once.
pub fn validate(draft: &SuggestionDraft) -> Result<ValidSuggestion, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let text = draft.suggestion.trim();
    let length = text.chars().count();
    if length < MIN_SUGGESTION_CHARS {
        errors.push(ValidationError::SuggestionTooShort);
    } else if length > MAX_SUGGESTION_CHARS {
        errors.push(ValidationError::SuggestionTooLong);
    }
    if draft.category.is_none() {
        errors.push(ValidationError::MissingCategory);
    }

    let contact_value = draft.contact_value.trim();
    if contact_value.is_empty() {
        errors.push(ValidationError::EmptyContactValue);
    } else if contact_value.chars().count() > MAX_CONTACT_CHARS {
        errors.push(ValidationError::ContactValueTooLong);
    }

    let mut contact_whatsapp = String::new();
    match draft.preferred_contact_method {
        None => errors.push(ValidationError::MissingContactMethod),
        Some(ContactMethod::Email) => {
            if !contact_value.is_empty() && !is_valid_email(contact_value) {
                errors.push(ValidationError::InvalidEmail);
            }
        }
        Some(ContactMethod::Whatsapp) => {
            contact_whatsapp = sanitize_phone_number(contact_value);
            if !contact_value.is_empty()
                && !(MIN_WHATSAPP_DIGITS..=MAX_WHATSAPP_DIGITS).contains(&contact_whatsapp.len())
            {
                errors.push(ValidationError::InvalidWhatsapp);
            }
        }
    }

    match (draft.category, draft.preferred_contact_method) {
        (Some(category), Some(contact_method)) if errors.is_empty() => Ok(ValidSuggestion {
            category,
            text: text.to_string(),
            contact_method,
            contact_value: contact_value.to_string(),
            contact_whatsapp,
        }),
        _ => Err(errors),
    }
}

/// Strips everything but ASCII digits.
#[must_use]
pub fn sanitize_phone_number(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Structural e-mail check: one `@`, a non-empty local part, and a dotted
/// domain without empty labels. No whitespace anywhere.
#[must_use]
pub fn is_valid_email(raw: &str) -> bool {
    if raw.chars().count() > MAX_CONTACT_CHARS || raw.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels = domain.split('.').collect::<Vec<_>>();
    labels.len() >= 2
        && labels.iter().all(|label| !label.is_empty())
        && labels
            .last()
            .is_some_and(|tld| tld.chars().count() >= 2)
}

/// Row written to the `suggestions` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionRecord {
    pub suggestion: String,
    pub user_id: String,
    pub user_full_name: String,
    pub user_email: String,
    pub store_id: String,
    pub store_name: String,
    pub store_phone1: String,
    pub preferred_contact_method: String,
    pub contact_value: String,
    pub contact_whatsapp: String,
    pub source: String,
}

#[must_use]
pub fn build_record(identity: &CompositeIdentity, valid: &ValidSuggestion) -> SuggestionRecord {
    SuggestionRecord {
        suggestion: format!("[{}] {}", valid.category.as_str(), valid.text),
        user_id: identity.account_id.clone(),
        user_full_name: identity.user_full_name.clone(),
        user_email: identity.user_email.clone(),
        store_id: identity.store_id.clone(),
        store_name: identity.trade_name.clone(),
        store_phone1: identity.store_phone1.clone(),
        preferred_contact_method: valid.contact_method.as_str().to_string(),
        contact_value: valid.contact_value.clone(),
        contact_whatsapp: valid.contact_whatsapp.clone(),
        source: RECORD_SOURCE.to_string(),
    }
}

#[must_use]
pub fn build_relay_payload(
    identity: &CompositeIdentity,
    valid: &ValidSuggestion,
    submitted_at: DateTime<Utc>,
) -> RelayPayload {
    RelayPayload::new(
        valid.category.as_str(),
        &valid.text,
        identity,
        ContactPreferences {
            preferred_method: valid.contact_method.as_str().to_string(),
            contact_value: valid.contact_value.clone(),
            email: identity.user_email.clone(),
            whatsapp: valid.contact_whatsapp.clone(),
        },
        submitted_at,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("identity handshake has not completed")]
    IdentityPending,
    #[error("placeholder identity cannot be used to submit")]
    FallbackIdentity,
    #[error("suggestion is invalid: {}", describe(.0))]
    Invalid(Vec<ValidationError>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub stored: StoredSuggestion,
    pub relay: RelayOutcome,
}

/// Validates, persists, then relays suggestions for the resolved identity.
pub struct SuggestionSubmitter<S, T> {
    store: S,
    relay: WebhookRelay<T>,
    allow_fallback: bool,
}

impl<S: SuggestionStore, T: WebhookTransport> SuggestionSubmitter<S, T> {
    pub fn new(store: S, transport: T, allow_fallback: bool) -> Self {
        Self {
            store,
            relay: WebhookRelay::new(transport),
            allow_fallback,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn relay(&self) -> &WebhookRelay<T> {
        &self.relay
    }

    fn identity<'a>(
        &self,
        resolution: &'a Resolution,
    ) -> Result<&'a CompositeIdentity, SubmitError> {
        match resolution {
            Resolution::Pending => Err(SubmitError::IdentityPending),
            Resolution::Fallback { .. } if !self.allow_fallback => {
                Err(SubmitError::FallbackIdentity)
            }
            Resolution::Resolved { identity } | Resolution::Fallback { identity } => Ok(identity),
        }
    }

    pub async fn submit(
        &self,
        resolution: &Resolution,
        draft: &SuggestionDraft,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let identity = self.identity(resolution)?;
        let valid = validate(draft).map_err(SubmitError::Invalid)?;

        let stored = self.store.insert(&build_record(identity, &valid)).await?;
        info!(
            suggestion_id = %stored.id,
            category = valid.category.as_str(),
            user_id = %identity.account_id,
            "suggestion stored"
        );

        let relay_config = match self.store.relay_config().await {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %error, "relay config unavailable; skipping relay");
                None
            }
        };
        let payload = build_relay_payload(identity, &valid, submitted_at);
        let relay = self.relay.dispatch(relay_config.as_ref(), &payload).await;
        Ok(SubmissionReceipt { stored, relay })
    }

    /// Past suggestions of the resolved user, newest first.
    pub async fn history(
        &self,
        resolution: &Resolution,
    ) -> Result<Vec<StoredSuggestion>, SubmitError> {
        let identity = self.identity(resolution)?;
        Ok(self.store.list_for_user(&identity.account_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initiator::placeholder_identity;
    use crate::persistence::InMemorySuggestionStore;
    use crate::relay::{RecordingTransport, RelayConfig};

    fn draft(method: ContactMethod, contact: &str) -> SuggestionDraft {
        SuggestionDraft {
            category: Some(SuggestionCategory::Melhorias),
            suggestion: "  Adicionar modo escuro ao painel  ".to_string(),
            preferred_contact_method: Some(method),
            contact_value: contact.to_string(),
        }
    }

    fn resolved() -> Resolution {
        Resolution::Resolved {
            identity: CompositeIdentity {
                account_id: "88251".to_string(),
                visitor_id: "63702".to_string(),
                user_full_name: "Igor".to_string(),
                user_email: "igor@example.com".to_string(),
                store_phone1: "5511999990000".to_string(),
                trade_name: "Loja Teste".to_string(),
                store_id: "63702 - Loja Teste".to_string(),
            },
        }
    }

    fn empty_submitter(
        allow_fallback: bool,
    ) -> SuggestionSubmitter<InMemorySuggestionStore, RecordingTransport> {
        let store = InMemorySuggestionStore::new();
        SuggestionSubmitter::new(store, RecordingTransport::new(), allow_fallback)
    }

    #[test]
    fn categories_use_kebab_case_wire_names() {
        assert_eq!(
            SuggestionCategory::parse("mal-funcionamento"),
            Some(SuggestionCategory::MalFuncionamento)
        );
        assert_eq!(SuggestionCategory::parse("elogios"), None);
        assert_eq!(
            serde_json::to_value(SuggestionCategory::MalFuncionamento).expect("encode"),
            "mal-funcionamento"
        );
    }

    #[test]
    fn valid_email_draft_is_trimmed() {
        let valid = validate(&draft(ContactMethod::Email, " igor@example.com ")).expect("valid");
        assert_eq!(valid.text, "Adicionar modo escuro ao painel");
        assert_eq!(valid.contact_value, "igor@example.com");
        assert_eq!(valid.contact_whatsapp, "");
    }

    #[test]
    fn whatsapp_contact_is_sanitized_and_length_checked() {
        let valid =
            validate(&draft(ContactMethod::Whatsapp, "+55 (11) 99999-0000")).expect("valid");
        assert_eq!(valid.contact_whatsapp, "5511999990000");

        assert_eq!(
            validate(&draft(ContactMethod::Whatsapp, "12345")),
            Err(vec![ValidationError::InvalidWhatsapp])
        );
    }

    #[test]
    fn all_failures_are_reported() {
        let errors = validate(&SuggestionDraft {
            suggestion: "curta".to_string(),
            ..SuggestionDraft::default()
        })
        .expect_err("invalid");
        assert_eq!(
            errors,
            vec![
                ValidationError::SuggestionTooShort,
                ValidationError::MissingCategory,
                ValidationError::EmptyContactValue,
                ValidationError::MissingContactMethod,
            ]
        );
        assert_eq!(errors[0].field(), "suggestion");
    }

    #[test]
    fn suggestion_length_counts_characters_not_bytes() {
        let mut input = draft(ContactMethod::Email, "igor@example.com");
        input.suggestion = "ç".repeat(MAX_SUGGESTION_CHARS);
        assert!(validate(&input).is_ok());
        input.suggestion.push('ç');
        assert_eq!(
            validate(&input),
            Err(vec![ValidationError::SuggestionTooLong])
        );
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("ana@loja.com.br"));
        assert!(!is_valid_email("ana@loja"));
        assert!(!is_valid_email("@loja.com"));
        assert!(!is_valid_email("ana@@loja.com"));
        assert!(!is_valid_email("ana @loja.com"));
        assert!(!is_valid_email("ana@loja..com"));
    }

    #[test]
    fn record_prefixes_category_and_copies_identity() {
        let valid = validate(&draft(ContactMethod::Email, "igor@example.com")).expect("valid");
        let identity = resolved().identity().cloned().expect("resolved fixture");
        let record = build_record(&identity, &valid);
        assert_eq!(
            record.suggestion,
            "[melhorias] Adicionar modo escuro ao painel"
        );
        assert_eq!(record.user_id, "88251");
        assert_eq!(record.store_id, "63702 - Loja Teste");
        assert_eq!(record.store_name, "Loja Teste");
        assert_eq!(record.store_phone1, "5511999990000");
        assert_eq!(record.preferred_contact_method, "email");
        assert_eq!(record.source, "webapp");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn submit_stores_then_relays() {
        let store = InMemorySuggestionStore::with_relay_config(RelayConfig::enabled(
            "https://n8n.example.com/webhook/abc",
        ));
        let submitter = SuggestionSubmitter::new(store, RecordingTransport::new(), false);

        let input = draft(ContactMethod::Email, "igor@example.com");
        let receipt = submitter.submit(&resolved(), &input, Utc::now()).await.expect("submit");
        assert_eq!(receipt.relay, RelayOutcome::Delivered);
        assert_eq!(receipt.stored.record.user_id, "88251");

        let posts = submitter.relay().transport().posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1["suggestion"], "Adicionar modo escuro ao painel");

        let history = submitter.history(&resolved()).await.expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn relay_failure_does_not_fail_submission() {
        let store = InMemorySuggestionStore::with_relay_config(RelayConfig::enabled(
            "https://n8n.example.com/webhook/abc",
        ));
        let transport =
            RecordingTransport::failing(crate::relay::RelayError::Transport("offline".to_string()));
        let submitter = SuggestionSubmitter::new(store, transport, false);

        let input = draft(ContactMethod::Email, "igor@example.com");
        let receipt = submitter.submit(&resolved(), &input, Utc::now()).await.expect("submit");
        assert!(matches!(receipt.relay, RelayOutcome::Failed { .. }));
        assert_eq!(submitter.store().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unresolved_identities_are_gated() {
        let submitter = empty_submitter(false);
        let input = draft(ContactMethod::Email, "igor@example.com");
        let fallback = Resolution::Fallback {
            identity: placeholder_identity(1_700_000_000_000),
        };

        assert_eq!(
            submitter.submit(&Resolution::Pending, &input, Utc::now()).await,
            Err(SubmitError::IdentityPending)
        );
        assert_eq!(
            submitter.submit(&fallback, &input, Utc::now()).await,
            Err(SubmitError::FallbackIdentity)
        );
        assert!(submitter.store().is_empty());

        let permissive = empty_submitter(true);
        let receipt = permissive.submit(&fallback, &input, Utc::now()).await.expect("submit");
        assert_eq!(
            receipt.stored.record.user_id,
            "fallback_account_1700000000000"
        );
        assert!(matches!(receipt.relay, RelayOutcome::Skipped { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_draft_is_not_stored() {
        let submitter = empty_submitter(false);
        let input = draft(ContactMethod::Email, "not-an-email");
        let result = submitter.submit(&resolved(), &input, Utc::now()).await;
        assert_eq!(
            result,
            Err(SubmitError::Invalid(vec![ValidationError::InvalidEmail]))
        );
        assert!(submitter.store().is_empty());
    }
}
