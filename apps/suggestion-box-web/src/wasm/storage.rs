use super::*;

    use suggestion_box_core::StorageError;

    /// Read-only view over `window.localStorage`. Looked up on every read
    /// because the host application may replace entries at any time.
    pub(super) struct WebLocalStorage;

    impl WebLocalStorage {
        fn storage() -> Result<web_sys::Storage, StorageError> {
            let window = web_sys::window()
                .ok_or_else(|| StorageError::Unavailable("window is unavailable".to_string()))?;
            window
                .local_storage()
                .map_err(|error| StorageError::Unavailable(js_error_text(&error)))?
                .ok_or_else(|| StorageError::Unavailable("local storage is disabled".to_string()))
        }
    }

    impl KeyValueStorage for WebLocalStorage {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            Self::storage()?
                .get_item(key)
                .map_err(|error| StorageError::Read {
                    key: key.to_string(),
                    message: js_error_text(&error),
                })
        }
    }
