use super::*;

    fn document() -> Result<web_sys::Document, String> {
        web_sys::window()
            .ok_or_else(|| "window is unavailable".to_string())?
            .document()
            .ok_or_else(|| "document is unavailable".to_string())
    }

    fn create_html(
        document: &web_sys::Document,
        tag: &str,
        id: &str,
    ) -> Result<HtmlElement, String> {
        let element = document
            .create_element(tag)
            .map_err(|_| format!("failed to create {tag} element"))?;
        element.set_id(id);
        element
            .dyn_into::<HtmlElement>()
            .map_err(|_| format!("{tag} element is not HtmlElement"))
    }

    fn apply_styles(element: &HtmlElement, styles: &[(&str, &str)]) -> Result<(), String> {
        let style = element.style();
        for (property, value) in styles {
            style
                .set_property(property, value)
                .map_err(|_| format!("failed to set {property} on #{}", element.id()))?;
        }
        Ok(())
    }

    /// Adds the floating launcher button and the delegated click handler
    /// that drives the modal. Idempotent.
    pub(super) fn mount_launcher() -> Result<(), String> {
        let document = document()?;
        let body = document
            .body()
            .ok_or_else(|| "document body is unavailable".to_string())?;

        if document.get_element_by_id(LAUNCHER_BUTTON_ID).is_none() {
            let button = create_html(&document, "button", LAUNCHER_BUTTON_ID)?;
            button.set_inner_text(LAUNCHER_LABEL);
            button
                .set_attribute("type", "button")
                .map_err(|_| "failed to set launcher type".to_string())?;
            apply_styles(
                &button,
                &[
                    ("position", "fixed"),
                    ("right", "24px"),
                    ("bottom", "24px"),
                    ("z-index", LAUNCHER_Z_INDEX),
                    ("padding", "12px 20px"),
                    ("border", "none"),
                    ("border-radius", "999px"),
                    ("background", BRAND_COLOR),
                    ("color", "#ffffff"),
                    ("font", "600 14px system-ui, sans-serif"),
                    ("cursor", "pointer"),
                    ("box-shadow", "0 6px 20px rgba(0, 0, 0, 0.2)"),
                ],
            )?;
            body.append_child(&button)
                .map_err(|_| "failed to append launcher".to_string())?;
        }

        let installed = DOCUMENT_CLICK_HANDLER.with(|slot| slot.borrow().is_some());
        if installed {
            return Ok(());
        }
        let closure = Closure::<dyn FnMut(MouseEvent)>::new(|event: MouseEvent| {
            let Some(target) = event
                .target()
                .and_then(|target| target.dyn_into::<web_sys::Element>().ok())
            else {
                return;
            };
            match target.id().as_str() {
                LAUNCHER_BUTTON_ID => {
                    if let Err(error) = open_modal() {
                        set_error(&error);
                    }
                }
                MODAL_OVERLAY_ID | MODAL_CLOSE_ID => close_modal(),
                _ => {}
            }
        });
        document
            .add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())
            .map_err(|_| "failed to install click handler".to_string())?;
        DOCUMENT_CLICK_HANDLER.with(|slot| *slot.borrow_mut() = Some(closure));
        Ok(())
    }

    /// Opens the form in a fresh frame. A second call while a frame is open
    /// does nothing.
    pub(super) fn open_modal() -> Result<(), String> {
        let Some((form_url, frame_id, issued)) = HOST.with(|host| {
            let mut host = host.borrow_mut();
            if host.open_frame.is_some() || host.form_url.trim().is_empty() {
                return None;
            }
            let frame_id = host.frame_ids.next_id();
            Some((host.form_url.clone(), frame_id, host.frame_ids.issued()))
        }) else {
            return Ok(());
        };

        let document = document()?;
        let body = document
            .body()
            .ok_or_else(|| "document body is unavailable".to_string())?;

        let overlay = create_html(&document, "div", MODAL_OVERLAY_ID)?;
        apply_styles(
            &overlay,
            &[
                ("position", "fixed"),
                ("inset", "0"),
                ("z-index", MODAL_Z_INDEX),
                ("display", "flex"),
                ("align-items", "center"),
                ("justify-content", "center"),
                ("background", "rgba(15, 23, 42, 0.55)"),
            ],
        )?;

        let panel = create_html(&document, "div", MODAL_PANEL_ID)?;
        apply_styles(
            &panel,
            &[
                ("position", "relative"),
                ("background", "#ffffff"),
                ("border-radius", "12px"),
                ("overflow", "hidden"),
                ("box-shadow", "0 20px 60px rgba(0, 0, 0, 0.35)"),
            ],
        )?;

        let close = create_html(&document, "button", MODAL_CLOSE_ID)?;
        close.set_inner_text("×");
        close
            .set_attribute("aria-label", "Fechar")
            .map_err(|_| "failed to label close button".to_string())?;
        apply_styles(
            &close,
            &[
                ("position", "absolute"),
                ("top", "8px"),
                ("right", "12px"),
                ("border", "none"),
                ("background", "transparent"),
                ("font-size", "24px"),
                ("cursor", "pointer"),
            ],
        )?;

        let frame = document
            .create_element("iframe")
            .map_err(|_| "failed to create form frame".to_string())?
            .dyn_into::<HtmlIFrameElement>()
            .map_err(|_| "form frame is not HtmlIFrameElement".to_string())?;
        frame.set_id(&frame_id);
        frame.set_src(&form_url);
        apply_styles(
            &frame,
            &[
                ("display", "block"),
                ("border", "none"),
                ("width", MODAL_FRAME_WIDTH),
                ("height", MODAL_FRAME_HEIGHT),
            ],
        )?;

        panel
            .append_child(&close)
            .map_err(|_| "failed to append close button".to_string())?;
        panel
            .append_child(&frame)
            .map_err(|_| "failed to append form frame".to_string())?;
        overlay
            .append_child(&panel)
            .map_err(|_| "failed to append modal panel".to_string())?;
        body.append_child(&overlay)
            .map_err(|_| "failed to append modal".to_string())?;

        // The browsing context survives navigation, so it can be registered
        // before the form loads.
        let context = ContextId::new(frame_id);
        let content = frame
            .content_window()
            .ok_or_else(|| "form frame has no browsing context".to_string())?;
        register_context(context.clone(), content.into());
        HOST.with(|host| host.borrow_mut().open_frame = Some(context.clone()));
        record_frame_opened(issued);
        tracing::info!(frame = %context, "suggestion form opened");
        Ok(())
    }

    /// Removes the modal and stops any handshake still polling for it.
    pub(super) fn close_modal() {
        let (context, responder) = HOST.with(|host| {
            let mut host = host.borrow_mut();
            (host.open_frame.take(), host.responder.clone())
        });
        if let Ok(document) = document() {
            if let Some(overlay) = document.get_element_by_id(MODAL_OVERLAY_ID) {
                overlay.remove();
            }
        }
        let Some(context) = context else {
            return;
        };
        unregister_context(&context);
        let abandoned = responder.map_or(0, |responder| responder.abandon_target(&context));
        record_frame_closed();
        tracing::info!(frame = %context, abandoned, "suggestion form closed");
    }

    /// Shows the connection state inside the embedded form.
    pub(super) fn render_embedded_status(view: &StatusView) -> Result<(), String> {
        let document = document()?;
        let status = match document.get_element_by_id(EMBEDDED_STATUS_ID) {
            Some(existing) => existing
                .dyn_into::<HtmlElement>()
                .map_err(|_| "status element exists but is not HtmlElement".to_string())?,
            None => {
                let status = create_html(&document, "div", EMBEDDED_STATUS_ID)?;
                apply_styles(
                    &status,
                    &[
                        ("font", "13px system-ui, sans-serif"),
                        ("padding", "8px 12px"),
                        ("border-radius", "8px"),
                        ("margin-bottom", "12px"),
                    ],
                )?;
                let body = document
                    .body()
                    .ok_or_else(|| "document body is unavailable".to_string())?;
                body.prepend_with_node_1(&status)
                    .map_err(|_| "failed to insert status element".to_string())?;
                status
            }
        };

        let mut text = view.label.to_string();
        for (label, value) in &view.lines {
            text.push('\n');
            text.push_str(label);
            text.push_str(": ");
            text.push_str(value);
        }
        status.set_inner_text(&text);
        status
            .set_attribute("data-tone", view.tone)
            .map_err(|_| "failed to set status tone".to_string())?;
        let (background, color) = match view.tone {
            "connected" => ("#dcfce7", "#166534"),
            "fallback" => ("#fef3c7", "#92400e"),
            _ => ("#e2e8f0", "#334155"),
        };
        apply_styles(&status, &[("background", background), ("color", color)])
    }
