//! Ephemeral resource handles.
//!
//! Each render cycle mints one opaque token; every stored file gets a
//! locator of the form `preview://<token>/<path>` backed by a snapshot
//! of its bytes. Handles for generation N stay valid for the whole of
//! N's execution and are revoked only once generation N+1 begins
//! rendering, so in-flight fetches never see their locator die.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use uuid::Uuid;

use crate::store::FileRecord;

pub const LOCATOR_SCHEME: &str = "preview";

/// Snapshot of one file, addressable inside the sandbox for exactly one
/// render cycle. Never persisted, never shared across cycles.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub locator: String,
    pub path: String,
    pub mime_type: &'static str,
    pub generation: u64,
    pub bytes: Vec<u8>,
    pub is_text: bool,
}

/// Mints locators for one render cycle.
#[derive(Debug, Clone)]
pub struct CycleToken {
    token: Uuid,
    generation: u64,
}

impl CycleToken {
    pub fn mint(generation: u64) -> Self {
        Self {
            token: Uuid::new_v4(),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn locator_for(&self, path: &str) -> String {
        format!("{}://{}/{}", LOCATOR_SCHEME, self.token, path)
    }

    /// Handle for a stored file under this cycle's token.
    pub fn handle_for(&self, record: &FileRecord) -> ResourceHandle {
        ResourceHandle {
            locator: self.locator_for(&record.path),
            path: record.path.clone(),
            mime_type: record.mime_type(),
            generation: self.generation,
            bytes: record.content.as_bytes().to_vec(),
            is_text: record.content.is_text(),
        }
    }
}

/// Live handles across all generations that have not been revoked yet.
///
/// Keyed by locator; a secondary path index serves the module loader,
/// which resolves relative imports back to project paths. Shared
/// between the host and the sandbox ops as `Rc<RefCell<_>>` - store
/// mutation and scheduling run on a single logical thread.
#[derive(Debug, Default)]
pub struct HandleTable {
    by_locator: HashMap<String, ResourceHandle>,
}

pub type SharedHandleTable = Rc<RefCell<HandleTable>>;

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedHandleTable {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn insert(&mut self, handle: ResourceHandle) {
        self.by_locator.insert(handle.locator.clone(), handle);
    }

    pub fn resolve(&self, locator: &str) -> Option<&ResourceHandle> {
        self.by_locator.get(locator)
    }

    /// Resolve by project path within a specific generation. Used by the
    /// module loader after joining a relative specifier.
    pub fn resolve_path(&self, path: &str, generation: u64) -> Option<&ResourceHandle> {
        self.by_locator
            .values()
            .find(|h| h.generation == generation && h.path == path)
    }

    /// Drop every handle belonging to exactly `generation`.
    pub fn revoke_generation(&mut self, generation: u64) {
        let before = self.by_locator.len();
        self.by_locator.retain(|_, h| h.generation != generation);
        let dropped = before - self.by_locator.len();
        if dropped > 0 {
            log::debug!("revoked {dropped} resource handle(s) of generation {generation}");
        }
    }

    /// Drop every handle older than `generation`. Used when a cycle
    /// loads successfully: its predecessors can no longer be fetched
    /// from, including generations whose own successor failed to
    /// resolve and so never revoked anything.
    pub fn revoke_before(&mut self, generation: u64) {
        let before = self.by_locator.len();
        self.by_locator.retain(|_, h| h.generation >= generation);
        let dropped = before - self.by_locator.len();
        if dropped > 0 {
            log::debug!("revoked {dropped} resource handle(s) older than generation {generation}");
        }
    }

    pub fn live_handles(&self) -> usize {
        self.by_locator.len()
    }
}
