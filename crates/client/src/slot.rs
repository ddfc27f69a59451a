//! Durable single-record session storage.
//!
//! The slot holds at most one [`UploadSession`]: saving overwrites any prior
//! record, and a corrupt record is discarded on load so the caller starts
//! clean. Any embedded key-value persistence fulfills this contract; the
//! default implementation is one JSON file.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use crate::session::UploadSession;

/// A durable slot holding at most one session record.
pub trait SessionSlot: Send + Sync {
    /// Loads the stored session, if any. A record that fails to parse is
    /// discarded and `None` is returned.
    fn load(&self) -> Option<UploadSession>;

    /// Persists `session`, overwriting any prior record.
    fn save(&self, session: &UploadSession) -> io::Result<()>;

    /// Removes the stored record. Clearing an empty slot is not an error.
    fn clear(&self) -> io::Result<()>;
}

/// File-backed slot: one pretty-printed JSON document.
pub struct JsonFileSlot {
    path: PathBuf,
}

impl JsonFileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionSlot for JsonFileSlot {
    fn load(&self) -> Option<UploadSession> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read session record: {e}");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "discarding corrupt session record: {e}"
                );
                let _ = std::fs::remove_file(&self.path);
                None
            }
        }
    }

    fn save(&self, session: &UploadSession) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, json)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory slot for tests. Stores the serialized form so serde round-trips
/// are exercised the same way the file slot does.
#[derive(Default)]
pub struct MemorySlot {
    record: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionSlot for MemorySlot {
    fn load(&self) -> Option<UploadSession> {
        let record = self.record.lock().unwrap();
        let json = record.as_ref()?;
        match serde_json::from_str(json) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("discarding corrupt session record: {e}");
                None
            }
        }
    }

    fn save(&self, session: &UploadSession) -> io::Result<()> {
        let json = serde_json::to_string(session)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        *self.record.lock().unwrap() = Some(json);
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        *self.record.lock().unwrap() = None;
        Ok(())
    }
}
