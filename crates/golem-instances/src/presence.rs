//! Per-source presence state machine.
//!
//! A registered source is `Pending` until the entry's first mesh build
//! lands, rides the shared instanced mesh while `Active`, and is
//! `Frozen` while it is detached onto a standalone targeting mesh for
//! live edit preview.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Pending,
    Active,
    Frozen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The entry's mesh pipeline reached a consistent state.
    MeshReady,
    /// Detach this source onto the targeting mesh.
    Freeze,
    /// Commit the preview overlay and rejoin the shared mesh.
    UnfreezeApply,
    /// Discard the preview overlay and rejoin the shared mesh.
    UnfreezeRevert,
}

/// Pure transition function; undefined pairs leave the state unchanged.
pub fn step(state: Presence, event: PresenceEvent) -> Presence {
    use Presence::*;
    use PresenceEvent::*;
    match (state, event) {
        (Pending, MeshReady) => Active,
        (Active, Freeze) => Frozen,
        (Frozen, UnfreezeApply) | (Frozen, UnfreezeRevert) => Active,
        (s, _) => s,
    }
}
