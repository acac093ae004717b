use super::*;

    use std::io;

    use tracing::Level;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt::MakeWriter;
    use web_sys::console;

    /// Buffers one formatted event and hands it to the console method that
    /// matches its level.
    pub(super) struct ConsoleWriter {
        level: Level,
        buffer: Vec<u8>,
    }

    impl io::Write for ConsoleWriter {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.buffer.extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for ConsoleWriter {
        fn drop(&mut self) {
            let text = String::from_utf8_lossy(&self.buffer);
            let text = text.trim_end();
            if text.is_empty() {
                return;
            }
            let line = JsValue::from_str(text);
            if self.level == Level::ERROR {
                console::error_1(&line);
            } else if self.level == Level::WARN {
                console::warn_1(&line);
            } else {
                console::log_1(&line);
            }
        }
    }

    pub(super) struct ConsoleMakeWriter;

    impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
        type Writer = ConsoleWriter;

        fn make_writer(&'a self) -> Self::Writer {
            ConsoleWriter {
                level: Level::INFO,
                buffer: Vec::new(),
            }
        }

        fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
            ConsoleWriter {
                level: *meta.level(),
                buffer: Vec::new(),
            }
        }
    }

    pub(super) fn init_tracing() {
        let directive = if debug_requested(&current_search()) {
            "debug"
        } else {
            "info"
        };
        // No clock on wasm32-unknown-unknown; the console stamps lines itself.
        let _ = tracing_subscriber::fmt()
            .with_writer(ConsoleMakeWriter)
            .with_env_filter(EnvFilter::new(directive))
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .try_init();
    }

    pub(super) fn begin_role(role: &str) {
        DIAGNOSTICS.with(|state| {
            let mut state = state.borrow_mut();
            state.role = role.to_string();
            state.started_at_unix_ms = Some(epoch_millis_now());
        });
    }

    pub(super) fn set_phase(phase: &str, detail: &str) {
        DIAGNOSTICS.with(|state| {
            let mut state = state.borrow_mut();
            state.phase = phase.to_string();
            state.detail = detail.to_string();
        });
        tracing::debug!(phase, detail, "suggestion box phase");
    }

    pub(super) fn set_error(message: &str) {
        DIAGNOSTICS.with(|state| {
            let mut state = state.borrow_mut();
            state.phase = "error".to_string();
            state.last_error = Some(message.to_string());
        });
        tracing::error!(error = message, "suggestion box error");
    }

    /// Records the error and converts it for return across the JS boundary.
    pub(super) fn fail(message: &str) -> JsValue {
        set_error(message);
        JsValue::from_str(message)
    }

    pub(super) fn record_message_received() {
        DIAGNOSTICS.with(|state| state.borrow_mut().messages_received += 1);
    }

    pub(super) fn record_message_ignored() {
        DIAGNOSTICS.with(|state| state.borrow_mut().messages_ignored += 1);
    }

    pub(super) fn record_frame_opened(issued: u64) {
        DIAGNOSTICS.with(|state| state.borrow_mut().frames_opened = issued);
    }

    pub(super) fn record_frame_closed() {
        DIAGNOSTICS.with(|state| state.borrow_mut().frames_closed += 1);
    }

    pub(super) fn record_resolution(resolution: &Resolution) {
        let now = epoch_millis_now();
        DIAGNOSTICS.with(|state| {
            let mut state = state.borrow_mut();
            state.resolution = Some(resolution.status_label().to_string());
            state.resolved_after_ms = state
                .started_at_unix_ms
                .map(|started| now.saturating_sub(started));
            state.phase = "settled".to_string();
            state.detail = format!("identity {}", resolution.status_label());
        });
    }

    pub(super) fn epoch_millis_now() -> u64 {
        let now = js_sys::Date::now();
        if !now.is_finite() || now.is_sign_negative() {
            return 0;
        }
        now.floor().min(u64::MAX as f64) as u64
    }

    pub(super) fn current_search() -> String {
        let Some(window) = web_sys::window() else {
            return String::new();
        };
        window.location().search().unwrap_or_default()
    }

    pub(super) fn js_error_text(value: &JsValue) -> String {
        if let Some(text) = value.as_string() {
            return text;
        }
        js_sys::JSON::stringify(value)
            .ok()
            .and_then(|text| text.as_string())
            .unwrap_or_else(|| "unknown javascript error".to_string())
    }
