use serde_json::Value;
use suggestion_box_core::identity::display_value;
use suggestion_box_core::protocol::message_kind;
use suggestion_box_core::{
    CompositeIdentity, ConfigError, ContextId, HandshakeConfig, MessageKind, Resolution,
};

pub(crate) const FRAME_ID_PREFIX: &str = "suggestion-box-frame-";
pub(crate) const EXTERNAL_CONTEXT_PREFIX: &str = "external-";
pub(crate) const UNREGISTERED_CONTEXT_ID: &str = "unregistered";

/// Hands out element ids for launched form frames. Ids are never reused
/// within a page so late replies cannot reach a newer frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameIds {
    issued: u64,
}

impl FrameIds {
    pub(crate) fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("{FRAME_ID_PREFIX}{}", self.issued)
    }

    pub(crate) fn issued(&self) -> u64 {
        self.issued
    }
}

/// Windows this page exchanges messages with, keyed by context id.
#[derive(Debug, Clone)]
pub(crate) struct SourceRegistry<W> {
    windows: Vec<(ContextId, W)>,
    next_external: u64,
}

impl<W> Default for SourceRegistry<W> {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            next_external: 0,
        }
    }
}

impl<W: Clone> SourceRegistry<W> {
    pub(crate) fn register(&mut self, context: ContextId, window: W) {
        self.windows.retain(|(existing, _)| existing != &context);
        self.windows.push((context, window));
    }

    pub(crate) fn unregister(&mut self, context: &ContextId) -> bool {
        let before = self.windows.len();
        self.windows.retain(|(existing, _)| existing != context);
        self.windows.len() != before
    }

    pub(crate) fn window(&self, context: &ContextId) -> Option<W> {
        self.windows
            .iter()
            .find(|(existing, _)| existing == context)
            .map(|(_, window)| window.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.windows.len()
    }

    /// Names the sender of `data`. An unknown sender is only remembered,
    /// under a fresh `external-N` id, when it announces readiness; any other
    /// traffic from it gets a shared id that is never stored.
    pub(crate) fn classify(
        &mut self,
        source: W,
        data: &Value,
        same: impl Fn(&W, &W) -> bool,
    ) -> ContextId {
        let known = self.windows.iter().find(|(_, window)| same(window, &source));
        if let Some((context, _)) = known {
            return context.clone();
        }
        if message_kind(data) != Ok(MessageKind::Ready) {
            return ContextId::new(UNREGISTERED_CONTEXT_ID);
        }
        self.next_external += 1;
        let context = ContextId::new(format!("{EXTERNAL_CONTEXT_PREFIX}{}", self.next_external));
        self.windows.push((context.clone(), source));
        context
    }
}

/// Parses the optional JSON configuration passed by the page. Blank input
/// yields defaults.
pub(crate) fn parse_config(raw: Option<&str>) -> Result<HandshakeConfig, ConfigError> {
    HandshakeConfig::from_json_str(raw.unwrap_or_default())
}

/// Logging is raised to debug by `sb_debug=1` or `debug=1` in the query.
pub(crate) fn debug_requested(search: &str) -> bool {
    search
        .trim_start_matches('?')
        .split('&')
        .any(|pair| matches!(pair, "sb_debug=1" | "debug=1"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusView {
    pub(crate) label: &'static str,
    pub(crate) tone: &'static str,
    pub(crate) lines: Vec<(&'static str, String)>,
}

pub(crate) fn status_view(resolution: &Resolution) -> StatusView {
    match resolution {
        Resolution::Pending => StatusView {
            label: "Conectando ao sistema...",
            tone: "pending",
            lines: Vec::new(),
        },
        Resolution::Resolved { identity } => StatusView {
            label: "Conectado",
            tone: "connected",
            lines: identity_lines(identity),
        },
        Resolution::Fallback { identity } => StatusView {
            label: "Modo offline: dados do usuário indisponíveis",
            tone: "fallback",
            lines: identity_lines(identity),
        },
    }
}

fn identity_lines(identity: &CompositeIdentity) -> Vec<(&'static str, String)> {
    vec![
        ("Usuário", display_value(&identity.user_full_name).to_string()),
        ("E-mail", display_value(&identity.user_email).to_string()),
        ("Loja", display_value(&identity.store_id).to_string()),
        ("Telefone", display_value(&identity.store_phone1).to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use suggestion_box_core::initiator::placeholder_identity;

    #[test]
    fn frame_ids_are_sequential_and_prefixed() {
        let mut ids = FrameIds::default();
        assert_eq!(ids.next_id(), "suggestion-box-frame-1");
        assert_eq!(ids.next_id(), "suggestion-box-frame-2");
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn only_ready_senders_are_remembered() {
        let mut registry = SourceRegistry::<u32>::default();
        registry.register(ContextId::new("suggestion-box-frame-1"), 1);
        let same = |a: &u32, b: &u32| a == b;

        let known = registry.classify(1, &json!({"source": "react-devtools"}), same);
        assert_eq!(known.as_str(), "suggestion-box-frame-1");

        let noise = [
            json!({"source": "react-devtools"}),
            json!("ping"),
            json!({"type": "resize"}),
        ];
        for data in &noise {
            let context = registry.classify(7, data, same);
            assert_eq!(context.as_str(), UNREGISTERED_CONTEXT_ID);
        }
        assert_eq!(registry.len(), 1);

        let ready = json!({"type": "SUGGESTION_FORM_READY"});
        let external = registry.classify(7, &ready, same);
        assert_eq!(external.as_str(), "external-1");
        let resize = json!({"type": "resize"});
        assert_eq!(registry.classify(7, &resize, same), external);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.window(&external), Some(7));

        assert!(registry.unregister(&external));
        assert!(!registry.unregister(&external));
        assert_eq!(registry.window(&external), None);
    }

    #[test]
    fn config_defaults_when_absent() {
        let config = parse_config(None).expect("defaults");
        assert_eq!(config, HandshakeConfig::default());
        let config = parse_config(Some(r#"{"pollIntervalMs": 500}"#)).expect("config");
        assert_eq!(config.poll_interval_ms, 500);
        assert!(parse_config(Some("{")).is_err());
    }

    #[test]
    fn debug_flag_parsing() {
        assert!(debug_requested("?sb_debug=1"));
        assert!(debug_requested("?page=2&debug=1"));
        assert!(!debug_requested("?debug=0"));
        assert!(!debug_requested(""));
    }

    #[test]
    fn status_view_uses_placeholder_for_missing_fields() {
        let view = status_view(&Resolution::Resolved {
            identity: CompositeIdentity {
                account_id: "88251".to_string(),
                user_full_name: "Igor".to_string(),
                store_id: "63702 - Loja Teste".to_string(),
                ..CompositeIdentity::default()
            },
        });
        assert_eq!(view.tone, "connected");
        assert_eq!(view.lines[0], ("Usuário", "Igor".to_string()));
        assert_eq!(view.lines[1], ("E-mail", "não encontrado".to_string()));
        assert_eq!(view.lines[2], ("Loja", "63702 - Loja Teste".to_string()));

        let fallback = status_view(&Resolution::Fallback {
            identity: placeholder_identity(10),
        });
        assert_eq!(fallback.tone, "fallback");
        assert_eq!(fallback.lines[2].1, "fallback_visitor_10");
        assert!(status_view(&Resolution::Pending).lines.is_empty());
    }
}
