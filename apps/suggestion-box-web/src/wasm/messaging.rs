use super::*;

    use js_sys::{Function, Object, Reflect};
    use serde_json::Value;
    use suggestion_box_core::{DeliveryError, HandshakeMessage, MessageSink};

    thread_local! {
        static CONTEXTS: RefCell<SourceRegistry<Object>> = RefCell::new(SourceRegistry::default());
    }

    pub(super) fn register_context(context: ContextId, window: Object) {
        CONTEXTS.with(|registry| registry.borrow_mut().register(context, window));
    }

    pub(super) fn unregister_context(context: &ContextId) -> bool {
        CONTEXTS.with(|registry| registry.borrow_mut().unregister(context))
    }

    pub(super) fn register_parent_context() -> Result<(), String> {
        let window = web_sys::window().ok_or_else(|| "window is unavailable".to_string())?;
        let parent = window
            .parent()
            .map_err(|_| "parent window is not accessible".to_string())?
            .ok_or_else(|| "parent window is unavailable".to_string())?;
        register_context(ContextId::new(PARENT_CONTEXT_ID), parent.into());
        Ok(())
    }

    fn context_for_source(source: Option<Object>, data: &Value) -> ContextId {
        let Some(source) = source else {
            return ContextId::new(UNREGISTERED_CONTEXT_ID);
        };
        let same = |known: &Object, candidate: &Object| Object::is(known, candidate);
        CONTEXTS.with(|registry| registry.borrow_mut().classify(source, data, same))
    }

    fn window_for(context: &ContextId) -> Option<Object> {
        CONTEXTS.with(|registry| registry.borrow().window(context))
    }

    fn is_closed(window: &Object) -> bool {
        Reflect::get(window, &JsValue::from_str("closed"))
            .ok()
            .and_then(|closed| closed.as_bool())
            .unwrap_or(false)
    }

    pub(super) fn js_to_json(value: &JsValue) -> Option<Value> {
        let text = js_sys::JSON::stringify(value).ok()?.as_string()?;
        serde_json::from_str(&text).ok()
    }

    pub(super) fn json_to_js(value: &Value) -> Result<JsValue, String> {
        let text = serde_json::to_string(value).map_err(|error| error.to_string())?;
        js_sys::JSON::parse(&text).map_err(|error| js_error_text(&error))
    }

    /// Posts handshake messages to registered windows.
    pub(super) struct WindowSink;

    impl MessageSink for WindowSink {
        fn send(
            &self,
            target: &ContextId,
            message: &HandshakeMessage,
        ) -> Result<(), DeliveryError> {
            let window = window_for(target)
                .filter(|window| !is_closed(window))
                .ok_or_else(|| DeliveryError::TargetGone(target.clone()))?;
            let data = message
                .to_value()
                .map_err(|error| DeliveryError::Encode(error.to_string()))?;
            let data = json_to_js(&data).map_err(DeliveryError::Encode)?;

            // Cross-origin proxies only expose a few members, so look
            // postMessage up on the proxy itself.
            let post = Reflect::get(&window, &JsValue::from_str("postMessage"))
                .ok()
                .and_then(|post| post.dyn_into::<Function>().ok())
                .ok_or_else(|| DeliveryError::TargetGone(target.clone()))?;
            let origin = JsValue::from_str(POST_MESSAGE_TARGET_ORIGIN);
            post.call2(&window, &data, &origin)
                .map_err(|error| DeliveryError::Rejected {
                    target: target.clone(),
                    message: js_error_text(&error),
                })?;
            Ok(())
        }
    }

    pub(super) fn install_message_listener(handler: fn(InboundMessage)) -> Result<(), String> {
        let window = web_sys::window().ok_or_else(|| "window is unavailable".to_string())?;
        let closure = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let Some(data) = js_to_json(&event.data()) else {
                record_message_ignored();
                return;
            };
            record_message_received();
            let source = context_for_source(event.source(), &data);
            handler(InboundMessage::new(source, data));
        });
        window
            .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
            .map_err(|_| "failed to install message listener".to_string())?;

        let previous = MESSAGE_HANDLER.with(|slot| slot.borrow_mut().replace(closure));
        if let Some(previous) = previous {
            let _ = window
                .remove_event_listener_with_callback("message", previous.as_ref().unchecked_ref());
        }
        Ok(())
    }
