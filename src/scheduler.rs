//! Render scheduler: coalesces edit and entry-change events into render
//! cycles and owns the generation counter.
//!
//! State machine: Idle -> Pending -> Rendering -> Rendered | Failed.
//! Every event while Pending pushes the debounce deadline and may
//! retarget the entry; no event ever stacks a second cycle. The
//! generation increments exactly once per Pending -> Rendering
//! transition - it is the correlation key for diagnostic staleness
//! filtering and handle revocation ordering.

use std::time::Duration;

use tokio::time::Instant;

use crate::resolver::ResolveError;

/// Debounce interval measured from the most recent event.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Idle,
    Pending,
    Rendering,
    Rendered,
    Failed(ResolveError),
}

/// Host-visible snapshot of the render cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderState {
    pub entry_path: String,
    pub generation: u64,
    pub status: RenderStatus,
}

#[derive(Debug)]
pub struct RenderScheduler {
    state: RenderState,
    debounce: Duration,
    deadline: Option<Instant>,
    /// Entry the next cycle will target; events retarget this without
    /// starting a cycle of their own.
    pending_entry: String,
    /// Set when an event arrives mid-render; re-arms Pending once the
    /// cycle finishes.
    dirty: bool,
}

impl RenderScheduler {
    pub fn new(entry_path: impl Into<String>, debounce: Duration) -> Self {
        let entry_path = entry_path.into();
        Self {
            pending_entry: entry_path.clone(),
            state: RenderState {
                entry_path,
                generation: 0,
                status: RenderStatus::Idle,
            },
            debounce,
            deadline: None,
            dirty: false,
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Deadline of the pending cycle, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// An edit to some stored file: re-render the current target.
    pub fn note_edit(&mut self) {
        self.arm();
    }

    /// The user (or an intercepted navigation) opened a different entry.
    pub fn note_entry_change(&mut self, entry_path: impl Into<String>) {
        self.pending_entry = entry_path.into();
        self.arm();
    }

    fn arm(&mut self) {
        if self.state.status == RenderStatus::Rendering {
            self.dirty = true;
            return;
        }
        self.state.status = RenderStatus::Pending;
        self.deadline = Some(Instant::now() + self.debounce);
    }

    /// Whether the pending cycle's debounce window has elapsed.
    pub fn due(&self, now: Instant) -> bool {
        matches!(self.state.status, RenderStatus::Pending)
            && self.deadline.is_some_and(|d| now >= d)
    }

    /// Transition Pending -> Rendering. Increments the generation and
    /// returns `(generation, entry_path)` for the cycle.
    pub fn begin_render(&mut self) -> (u64, String) {
        debug_assert_eq!(self.state.status, RenderStatus::Pending);
        self.deadline = None;
        self.state.generation += 1;
        self.state.entry_path = self.pending_entry.clone();
        self.state.status = RenderStatus::Rendering;
        (self.state.generation, self.state.entry_path.clone())
    }

    /// Record the cycle's outcome. Events that arrived mid-render re-arm
    /// a fresh Pending window.
    pub fn finish_render(&mut self, result: Result<(), ResolveError>) {
        self.state.status = match result {
            Ok(()) => RenderStatus::Rendered,
            Err(kind) => {
                log::warn!(
                    "render of {:?} failed: {kind} (generation {})",
                    self.state.entry_path,
                    self.state.generation
                );
                RenderStatus::Failed(kind)
            }
        };
        if std::mem::take(&mut self.dirty) {
            self.arm();
        }
    }
}
