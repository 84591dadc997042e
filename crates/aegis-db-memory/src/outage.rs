use std::sync::atomic::{AtomicBool, Ordering};

use aegis_storage::{StorageError, StorageResult};

/// Makes a store fail every call with `Unavailable` while switched on.
#[derive(Debug, Default)]
pub struct OutageSwitch(AtomicBool);

impl OutageSwitch {
    pub fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, store: &str) -> StorageResult<()> {
        if self.is_down() {
            Err(StorageError::unavailable(format!("{store} is unavailable")))
        } else {
            Ok(())
        }
    }
}
