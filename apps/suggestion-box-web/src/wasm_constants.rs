pub(crate) const LAUNCHER_BUTTON_ID: &str = "suggestion-box-launcher";
pub(crate) const LAUNCHER_LABEL: &str = "Enviar Sugestão";
pub(crate) const MODAL_OVERLAY_ID: &str = "suggestion-box-modal";
pub(crate) const MODAL_PANEL_ID: &str = "suggestion-box-modal-panel";
pub(crate) const MODAL_CLOSE_ID: &str = "suggestion-box-modal-close";
pub(crate) const EMBEDDED_STATUS_ID: &str = "suggestion-box-status";

pub(crate) const PARENT_CONTEXT_ID: &str = "parent";
pub(crate) const POST_MESSAGE_TARGET_ORIGIN: &str = "*";

pub(crate) const LAUNCHER_Z_INDEX: &str = "9999";
pub(crate) const MODAL_Z_INDEX: &str = "10000";
pub(crate) const MODAL_FRAME_WIDTH: &str = "min(480px, 94vw)";
pub(crate) const MODAL_FRAME_HEIGHT: &str = "min(640px, 90vh)";
pub(crate) const BRAND_COLOR: &str = "#6d28d9";
