//! Tick-bucketed event queue plus the manager's outward notifications.

use std::collections::{BTreeMap, VecDeque};

use golem_grid::VoxId;

use crate::slots::SourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A source finished registration: its entry's first mesh build is
    /// done (or was already done) and it joined the shared mesh.
    SourceRegistered {
        vox: VoxId,
        source: SourceId,
        slot: u8,
    },
    /// The last source unregistered and every resource was released.
    EntryDestroyed { vox: VoxId },
    /// A frame mesh finished (re)building this tick.
    FrameMeshReady { vox: VoxId, frame: usize },
    /// The LOD step table picked a new quad size for the entry.
    QuadSizeChanged { vox: VoxId, quad_size: u8 },
    /// Deferred collision-shape rebuild fired. Stale `seq` values are
    /// superseded timers and are ignored.
    ShapeRegenDue { vox: VoxId, seq: u64 },
}

pub struct EventEnvelope {
    pub id: u64,
    pub tick: u64,
    pub kind: Event,
}

/// FIFO per tick, ordered across ticks; `emit_after` is the debounce
/// primitive (reschedule by emitting again with a newer sequence).
pub struct EventQueue {
    by_tick: BTreeMap<u64, VecDeque<EventEnvelope>>,
    pub now: u64,
    next_id: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            by_tick: BTreeMap::new(),
            now: 0,
            next_id: 1,
        }
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_at(&mut self, tick: u64, kind: Event) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.by_tick
            .entry(tick)
            .or_default()
            .push_back(EventEnvelope { id, tick, kind });
        id
    }

    pub fn emit_now(&mut self, kind: Event) -> u64 {
        self.emit_at(self.now, kind)
    }

    pub fn emit_after(&mut self, delta: u64, kind: Event) -> u64 {
        self.emit_at(self.now + delta, kind)
    }

    /// Next event scheduled at or before the current tick.
    pub fn pop_ready(&mut self) -> Option<EventEnvelope> {
        loop {
            let (&tick, queue) = self.by_tick.iter_mut().next()?;
            if tick > self.now {
                return None;
            }
            match queue.pop_front() {
                Some(env) => return Some(env),
                None => {
                    self.by_tick.remove(&tick);
                }
            }
        }
    }

    pub fn advance_tick(&mut self) {
        self.now = self.now.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regen(seq: u64) -> Event {
        Event::ShapeRegenDue {
            vox: VoxId(1),
            seq,
        }
    }

    #[test]
    fn events_fire_in_tick_then_fifo_order() {
        let mut q = EventQueue::new();
        q.emit_after(1, regen(2));
        q.emit_now(regen(0));
        q.emit_now(regen(1));

        assert!(matches!(q.pop_ready().unwrap().kind, Event::ShapeRegenDue { seq: 0, .. }));
        assert!(matches!(q.pop_ready().unwrap().kind, Event::ShapeRegenDue { seq: 1, .. }));
        assert!(q.pop_ready().is_none(), "future event not ready yet");

        q.advance_tick();
        assert!(matches!(q.pop_ready().unwrap().kind, Event::ShapeRegenDue { seq: 2, .. }));
        assert!(q.pop_ready().is_none());
    }

    #[test]
    fn overdue_events_still_fire() {
        let mut q = EventQueue::new();
        q.emit_after(1, regen(5));
        q.advance_tick();
        q.advance_tick();
        q.advance_tick();
        assert!(q.pop_ready().is_some());
    }
}
