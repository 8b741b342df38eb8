//! Debounced persistence scheduling for edited vox models.
//!
//! Local edits mark a document dirty; [`WritebackQueue::due`] hands out
//! each dirty id at most once per interval so a burst of edits turns
//! into a single storage write.

use std::time::{Duration, Instant};

use golem_grid::VoxId;
use hashbrown::HashMap;

#[derive(Debug, Clone, Copy)]
struct DirtyState {
    dirty: bool,
    last_flush: Option<Instant>,
}

/// Coalesces storage writes: one flush per document per interval.
#[derive(Debug)]
pub struct WritebackQueue {
    interval: Duration,
    entries: HashMap<VoxId, DirtyState>,
}

impl WritebackQueue {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: HashMap::new(),
        }
    }

    /// Records an edit. The id surfaces from [`due`](Self::due) once its
    /// debounce window allows.
    pub fn mark_dirty(&mut self, id: VoxId) {
        self.entries
            .entry(id)
            .and_modify(|s| s.dirty = true)
            .or_insert(DirtyState {
                dirty: true,
                last_flush: None,
            });
    }

    /// Drops all pending state for an id, e.g. when its entry is
    /// destroyed before the next flush.
    pub fn forget(&mut self, id: VoxId) {
        self.entries.remove(&id);
    }

    /// Returns the ids whose write is due at `now` and marks them
    /// flushed. An id never appears twice within one interval, and a
    /// first-ever edit flushes immediately.
    pub fn due(&mut self, now: Instant) -> Vec<VoxId> {
        let mut out = Vec::new();
        for (id, state) in self.entries.iter_mut() {
            if !state.dirty {
                continue;
            }
            let ready = match state.last_flush {
                None => true,
                Some(t) => now.duration_since(t) >= self.interval,
            };
            if ready {
                state.dirty = false;
                state.last_flush = Some(now);
                out.push(*id);
            }
        }
        out.sort_unstable();
        out
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.entries.values().filter(|s| s.dirty).count()
    }
}
