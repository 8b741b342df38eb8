//! Delta replication and conflict resolution for shared vox models.
//!
//! Peers exchange deltas over a best-effort transport with no ordering
//! or exactly-once guarantee. Each participant resolves an incoming
//! delta against a fixed recency window of already-finalized deltas so
//! that everyone converges on the same grid regardless of arrival
//! order.
//!
//! Merge rules, per cell of the incoming patch, against every buffered
//! delta on the same frame with revision >= the incoming one:
//!
//! - buffered revision strictly greater: the buffered delta's whole
//!   rectangle takes precedence wherever it overlaps, erased cells
//!   included; the incoming cell is overwritten with the buffered value
//!   so applying the resolved patch re-asserts it.
//! - equal revisions: a non-empty claim beats empty, and two non-empty
//!   claims are ordered by their `(r, g, b, kind)` color tuple, greater
//!   tuple wins. That is a total order, so the surviving cell is the
//!   maximum of all claims and identical for any processing order.
//!
//! Deltas older than the window that arrive very late are applied
//! without conflict-checking against the evicted history; that loss of
//! fidelity is accepted.
#![forbid(unsafe_code)]

mod writeback;

pub use writeback::WritebackQueue;

use golem_grid::{Delta, Model, PaletteColor, VoxelGrid};

/// Finalized-delta retention window per vox entry.
pub const RING_CAPACITY: usize = 32;

/// Fixed-size ring of recently finalized deltas, oldest evicted first.
#[derive(Debug, Default)]
pub struct DeltaRing {
    slots: Vec<Delta>,
    next: usize,
}

impl DeltaRing {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(RING_CAPACITY),
            next: 0,
        }
    }

    pub fn push(&mut self, delta: Delta) {
        if self.slots.len() < RING_CAPACITY {
            self.slots.push(delta);
        } else {
            self.slots[self.next] = delta;
        }
        self.next = (self.next + 1) % RING_CAPACITY;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delta> {
        self.slots.iter()
    }
}

/// Deterministic winner between two non-empty same-revision claims.
#[inline]
fn claim_wins(challenger: PaletteColor, incumbent: PaletteColor) -> bool {
    (challenger.r, challenger.g, challenger.b, challenger.kind)
        > (incumbent.r, incumbent.g, incumbent.b, incumbent.kind)
}

// Overwrites incoming cells that lose to `buffered`, in place.
fn mask_against(incoming: &mut Delta, buffered: &Delta) {
    let strictly_newer = buffered.revision > incoming.revision;
    let [px, py, pz] = incoming.patch.size();
    let bsize = buffered.patch.size();
    for ly in 0..py {
        let by = incoming.offset[1] + ly as i32 - buffered.offset[1];
        if by < 0 || by >= bsize[1] as i32 {
            continue;
        }
        for lz in 0..pz {
            let bz = incoming.offset[2] + lz as i32 - buffered.offset[2];
            if bz < 0 || bz >= bsize[2] as i32 {
                continue;
            }
            for lx in 0..px {
                let bx = incoming.offset[0] + lx as i32 - buffered.offset[0];
                if bx < 0 || bx >= bsize[0] as i32 {
                    continue;
                }
                let bc = buffered
                    .patch
                    .color_at(bx as usize, by as usize, bz as usize);
                if strictly_newer {
                    // The newer rectangle stands in full, erases included.
                    match bc {
                        Some(c) => {
                            incoming.patch.paint(lx, ly, lz, c);
                        }
                        None => incoming.patch.erase(lx, ly, lz),
                    }
                    continue;
                }
                // Equal revision: only non-empty buffered cells claim.
                let Some(bc) = bc else {
                    continue;
                };
                let keep_incoming = matches!(
                    incoming.patch.color_at(lx, ly, lz),
                    Some(ic) if claim_wins(ic, bc)
                );
                if !keep_incoming {
                    incoming.patch.paint(lx, ly, lz, bc);
                }
            }
        }
    }
}

/// Resolves an incoming delta against the ring: every buffered delta on
/// the same frame with revision >= the incoming one masks it. The
/// returned delta is final and safe to apply and rebroadcast-merge.
pub fn resolve(mut incoming: Delta, ring: &DeltaRing) -> Delta {
    // Ascending revision order, so a strictly newer delta's masking is
    // never undone by an equal-revision one checked after it.
    let mut matching: Vec<&Delta> = ring
        .iter()
        .filter(|b| b.frame == incoming.frame && b.revision >= incoming.revision)
        .collect();
    matching.sort_by_key(|b| b.revision);
    let checked = matching.len();
    for buffered in matching {
        mask_against(&mut incoming, buffered);
    }
    if checked > 0 {
        log::debug!(
            "resolved delta rev={} frame={} against {} buffered",
            incoming.revision,
            incoming.frame,
            checked
        );
    }
    incoming
}

/// Resolves `incoming`, records it in the ring, and overlays it onto the
/// model (allocating the frame if needed). Returns the touched frame, or
/// `None` when the frame index is past the cap and the delta is dropped.
pub fn apply(model: &mut Model, ring: &mut DeltaRing, incoming: Delta) -> Option<usize> {
    let resolved = resolve(incoming, ring);
    let frame = resolved.frame;
    let Some(grid) = model.ensure_frame(frame) else {
        log::warn!("dropping delta for out-of-range frame {}", frame);
        return None;
    };
    grid.overlay(&resolved.patch, resolved.offset);
    model.revision = model.revision.max(resolved.revision);
    ring.push(resolved);
    Some(frame)
}

/// Builds the delta for a local edit: bumps the model revision and tags
/// the patch with it. The caller applies it through [`apply`] (so it
/// lands in the ring) and broadcasts its encoded form.
pub fn local_edit(model: &mut Model, frame: usize, patch: VoxelGrid, offset: [i32; 3]) -> Delta {
    Delta {
        frame,
        patch,
        offset,
        revision: model.next_revision(),
    }
}
