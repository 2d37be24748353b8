//! Child-process registry.
//!
//! The worker inserts the kill handle of every spawned tool process
//! before waiting on it and removes it right after; the cancel path
//! looks the handle up by entry id and terminates the process. At most
//! one process per entry is ever live (stages are sequential), so a new
//! registration simply replaces the old handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use murmur_audio::process::KillHandle;
use tracing::debug;

/// Shared table of live tool processes keyed by entry id.
#[derive(Clone, Default)]
pub struct ChildRegistry {
    inner: Arc<Mutex<HashMap<String, KillHandle>>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the live process for an entry.
    pub fn register(&self, entry_id: &str, handle: KillHandle) {
        debug!(entry_id, label = handle.label(), "Registered child process");
        self.inner
            .lock()
            .expect("child registry lock poisoned")
            .insert(entry_id.to_string(), handle);
    }

    /// Drop the entry's registration after the wait completes.
    pub fn clear(&self, entry_id: &str) {
        self.inner
            .lock()
            .expect("child registry lock poisoned")
            .remove(entry_id);
    }

    /// Best-effort kill of the entry's live process, if any.
    pub async fn kill(&self, entry_id: &str) {
        let handle = {
            self.inner
                .lock()
                .expect("child registry lock poisoned")
                .get(entry_id)
                .cloned()
        };
        if let Some(handle) = handle {
            handle.kill().await;
        }
    }

    /// Number of live registrations (diagnostics only).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("child registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
