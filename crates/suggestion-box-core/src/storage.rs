use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("storage read failed for {key}: {message}")]
    Read { key: String, message: String },
}

/// Read-only view of the host page's key/value storage.
///
/// The handshake never writes through this trait; the host application owns
/// the data and may change it between reads.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// In-process storage used by tests and native simulations.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<HashMap<String, String>>,
    unavailable: RefCell<Option<String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.items.borrow_mut().insert(key.into(), value.into());
    }

    pub fn remove_item(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }

    /// Makes every subsequent read fail until [`MemoryStorage::restore`].
    pub fn make_unavailable(&self, reason: impl Into<String>) {
        *self.unavailable.borrow_mut() = Some(reason.into());
    }

    pub fn restore(&self) {
        *self.unavailable.borrow_mut() = None;
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(reason) = self.unavailable.borrow().as_ref() {
            return Err(StorageError::Unavailable(reason.clone()));
        }
        Ok(self.items.borrow().get(key).cloned())
    }
}
