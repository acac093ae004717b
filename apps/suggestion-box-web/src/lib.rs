#![cfg_attr(test, allow(clippy::expect_used))]

#[cfg(any(target_arch = "wasm32", test))]
mod embed;
#[cfg(target_arch = "wasm32")]
mod wasm_constants;
#[cfg(target_arch = "wasm32")]
mod wasm_state;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde::Serialize;
    use suggestion_box_core::persistence::RecordStoreConfig;
    use suggestion_box_core::relay::RelayConfig;
    use suggestion_box_core::{
        ContextId, HandshakeInitiator, HandshakeResponder, IdentityExtractor, InboundMessage,
        KeyValueStorage, Resolution, SuggestionDraft, SuggestionStore, SuggestionSubmitter,
        WebhookRelay,
    };
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::{future_to_promise, spawn_local};
    use web_sys::{HtmlElement, HtmlIFrameElement, MessageEvent, MouseEvent};

    use crate::embed::{
        SourceRegistry, StatusView, UNREGISTERED_CONTEXT_ID, debug_requested, parse_config,
        status_view,
    };
    use crate::wasm_constants::*;
    use crate::wasm_state::{EmbeddedRuntime, HostRuntime};

    mod dom;
    mod lifecycle;
    mod messaging;
    mod network;
    mod storage;
    mod timers;

    use dom::*;
    use lifecycle::*;
    use messaging::*;
    use network::*;
    use storage::*;
    use timers::*;

    thread_local! {
        static DIAGNOSTICS: RefCell<Diagnostics> = RefCell::new(Diagnostics::default());
        static HOST: RefCell<HostRuntime> = RefCell::new(HostRuntime::default());
        static EMBEDDED: RefCell<EmbeddedRuntime> = RefCell::new(EmbeddedRuntime::default());
        static MESSAGE_HANDLER: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>> = const { RefCell::new(None) };
        static DOCUMENT_CLICK_HANDLER: RefCell<Option<Closure<dyn FnMut(MouseEvent)>>> = const { RefCell::new(None) };
    }

    #[derive(Debug, Clone, Serialize)]
    struct Diagnostics {
        role: String,
        phase: String,
        detail: String,
        started_at_unix_ms: Option<u64>,
        messages_received: u64,
        messages_ignored: u64,
        cycles_started: u64,
        frames_opened: u64,
        frames_closed: u64,
        resolution: Option<String>,
        resolved_after_ms: Option<u64>,
        submissions: u64,
        submission_failures: u64,
        last_error: Option<String>,
    }

    impl Default for Diagnostics {
        fn default() -> Self {
            Self {
                role: "idle".to_string(),
                phase: "loading".to_string(),
                detail: "module not started".to_string(),
                started_at_unix_ms: None,
                messages_received: 0,
                messages_ignored: 0,
                cycles_started: 0,
                frames_opened: 0,
                frames_closed: 0,
                resolution: None,
                resolved_after_ms: None,
                submissions: 0,
                submission_failures: 0,
                last_error: None,
            }
        }
    }

    #[wasm_bindgen(start)]
    pub fn start() {
        console_error_panic_hook::set_once();
        init_tracing();
        set_phase("loaded", "waiting for host or embedded start");
    }

    /// Host page entry point. Answers readiness signals from any frame and,
    /// when `form_url` is given, mounts the launcher button.
    #[wasm_bindgen]
    pub fn start_host(
        config_json: Option<String>,
        form_url: Option<String>,
    ) -> Result<(), JsValue> {
        let config =
            parse_config(config_json.as_deref()).map_err(|error| fail(&error.to_string()))?;
        let storage: Rc<dyn KeyValueStorage> = Rc::new(WebLocalStorage);
        let responder = HandshakeResponder::new(
            IdentityExtractor::new(storage, &config),
            Rc::new(WindowSink),
            Rc::new(BrowserScheduler::new()),
            &config,
        );
        let form_url = form_url.unwrap_or_default();
        let mount = !form_url.trim().is_empty();
        HOST.with(|host| {
            let mut host = host.borrow_mut();
            host.responder = Some(responder);
            host.form_url = form_url;
        });
        begin_role("host");

        install_message_listener(on_host_message).map_err(|error| fail(&error))?;
        if mount {
            mount_launcher().map_err(|error| fail(&error))?;
        }
        set_phase("ready", "listening for readiness signals");
        tracing::info!(launcher = mount, "suggestion box host started");
        Ok(())
    }

    /// Embedded form entry point. Announces readiness to the parent window
    /// and settles the identity by reply or fallback.
    #[wasm_bindgen]
    pub fn start_embedded(
        config_json: Option<String>,
        store_base_url: Option<String>,
        store_api_key: Option<String>,
    ) -> Result<(), JsValue> {
        let config =
            parse_config(config_json.as_deref()).map_err(|error| fail(&error.to_string()))?;
        let record_store = match (store_base_url, store_api_key) {
            (Some(base_url), Some(api_key)) if !base_url.trim().is_empty() => {
                let store = RecordStoreConfig::new(&base_url, &api_key)
                    .map_err(|error| fail(&error.to_string()))?;
                Some(store)
            }
            _ => None,
        };
        if record_store.is_none() {
            tracing::warn!("no record store configured; suggestions are kept in memory");
        }

        register_parent_context().map_err(|error| fail(&error))?;
        let initiator = HandshakeInitiator::new(
            Rc::new(WindowSink),
            Rc::new(BrowserScheduler::new()),
            ContextId::new(PARENT_CONTEXT_ID),
            &config,
        );
        initiator.on_resolved(|resolution| {
            record_resolution(resolution);
            if let Err(error) = render_embedded_status(&status_view(resolution)) {
                set_error(&error);
            }
        });
        EMBEDDED.with(|embedded| {
            let mut embedded = embedded.borrow_mut();
            embedded.initiator = Some(initiator.clone());
            embedded.config = config;
            embedded.record_store = record_store;
        });
        begin_role("embedded");

        render_embedded_status(&status_view(&Resolution::Pending)).map_err(|error| fail(&error))?;
        install_message_listener(on_embedded_message).map_err(|error| fail(&error))?;
        initiator.start();
        set_phase("waiting", "readiness signal sent");
        Ok(())
    }

    fn on_host_message(message: InboundMessage) {
        let responder = HOST.with(|host| host.borrow().responder.clone());
        let Some(responder) = responder else {
            return;
        };
        match responder.handle_message(&message) {
            Some(_) => DIAGNOSTICS.with(|state| state.borrow_mut().cycles_started += 1),
            None => record_message_ignored(),
        }
    }

    fn on_embedded_message(message: InboundMessage) {
        let initiator = EMBEDDED.with(|embedded| embedded.borrow().initiator.clone());
        let Some(initiator) = initiator else {
            return;
        };
        if initiator.handle_message(&message) == suggestion_box_core::MessageDisposition::Ignored {
            record_message_ignored();
        }
    }

    #[wasm_bindgen]
    pub fn diagnostics_json() -> String {
        DIAGNOSTICS.with(|state| {
            serde_json::to_string(&*state.borrow()).unwrap_or_else(|_| {
                "{\"phase\":\"error\",\"detail\":\"diagnostics serialization failed\"}".to_string()
            })
        })
    }

    #[wasm_bindgen]
    pub fn resolution_json() -> String {
        let resolution = EMBEDDED.with(|embedded| {
            embedded
                .borrow()
                .initiator
                .as_ref()
                .map_or(Resolution::Pending, HandshakeInitiator::resolution)
        });
        serde_json::to_string(&resolution).unwrap_or_else(|_| "{}".to_string())
    }

    #[wasm_bindgen]
    pub fn host_cycles_json() -> String {
        let cycles = HOST.with(|host| {
            host.borrow()
                .responder
                .as_ref()
                .map(HandshakeResponder::cycles)
                .unwrap_or_default()
        });
        serde_json::to_string(&cycles).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen]
    pub fn open_suggestion_modal() -> Result<(), JsValue> {
        open_modal().map_err(|error| fail(&error))
    }

    #[wasm_bindgen]
    pub fn close_suggestion_modal() {
        close_modal();
    }

    /// Tears down the embedded handshake, e.g. before the form unmounts.
    #[wasm_bindgen]
    pub fn stop_embedded() -> bool {
        let initiator = EMBEDDED.with(|embedded| embedded.borrow_mut().initiator.take());
        initiator.is_some_and(|initiator| initiator.shutdown())
    }

    fn submitter() -> (Resolution, SuggestionSubmitter<WebStore, NoCorsWebhookTransport>) {
        EMBEDDED.with(|embedded| {
            let embedded = embedded.borrow();
            let resolution = embedded
                .initiator
                .as_ref()
                .map_or(Resolution::Pending, HandshakeInitiator::resolution);
            let store = WebStore::new(
                embedded.record_store.clone(),
                embedded.offline_store.clone(),
            );
            let submitter = SuggestionSubmitter::new(
                store,
                NoCorsWebhookTransport,
                embedded.config.allow_fallback_submission,
            );
            (resolution, submitter)
        })
    }

    /// Resolves to the JSON receipt, or rejects with the validation or
    /// storage error message.
    #[wasm_bindgen]
    pub fn submit_suggestion(draft_json: String) -> js_sys::Promise {
        future_to_promise(async move {
            let draft: SuggestionDraft = serde_json::from_str(&draft_json)
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            let (resolution, submitter) = submitter();
            match submitter.submit(&resolution, &draft, chrono::Utc::now()).await {
                Ok(receipt) => {
                    DIAGNOSTICS.with(|state| state.borrow_mut().submissions += 1);
                    Ok(JsValue::from_str(
                        &serde_json::to_string(&receipt).unwrap_or_else(|_| "{}".to_string()),
                    ))
                }
                Err(error) => {
                    tracing::warn!(error = %error, "suggestion submission rejected");
                    DIAGNOSTICS.with(|state| state.borrow_mut().submission_failures += 1);
                    Err(JsValue::from_str(&error.to_string()))
                }
            }
        })
    }

    #[wasm_bindgen]
    pub fn suggestion_history_json() -> js_sys::Promise {
        future_to_promise(async move {
            let (resolution, submitter) = submitter();
            let history = submitter
                .history(&resolution)
                .await
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            Ok(JsValue::from_str(
                &serde_json::to_string(&history).unwrap_or_else(|_| "[]".to_string()),
            ))
        })
    }

    #[wasm_bindgen]
    pub fn save_relay_config(config_json: String) -> js_sys::Promise {
        future_to_promise(async move {
            let config: RelayConfig = serde_json::from_str(&config_json)
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            if config.is_enabled {
                config
                    .validated_url()
                    .map_err(|error| JsValue::from_str(&error.to_string()))?;
            }
            let (_, submitter) = submitter();
            submitter
                .store()
                .save_relay_config(&config)
                .await
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            Ok(JsValue::TRUE)
        })
    }

    /// Sends the test payload to the configured webhook and persists the
    /// recorded result. Resolves to `"success"` or `"error"`.
    #[wasm_bindgen]
    pub fn test_relay_webhook() -> js_sys::Promise {
        future_to_promise(async move {
            let (_, submitter) = submitter();
            let store = submitter.store();
            let mut config = store
                .relay_config()
                .await
                .map_err(|error| JsValue::from_str(&error.to_string()))?
                .ok_or_else(|| JsValue::from_str("relay is not configured"))?;
            let result = WebhookRelay::new(NoCorsWebhookTransport)
                .send_test(&mut config, chrono::Utc::now())
                .await
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            store
                .save_relay_config(&config)
                .await
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            Ok(JsValue::from_str(result.as_str()))
        })
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm::diagnostics_json;

#[cfg(not(target_arch = "wasm32"))]
pub fn diagnostics_json() -> String {
    "{\"phase\":\"native\",\"detail\":\"suggestion box diagnostics only available on wasm\"}"
        .to_string()
}
