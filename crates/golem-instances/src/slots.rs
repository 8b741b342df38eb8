//! Instance-slot allocation for one vox entry.
//!
//! Slots are stable indices into the shared instance transform buffer.
//! Freed slots go onto an explicit free list (O(1) allocate/free); the
//! upload length is recomputed as the tight bound over occupied slots,
//! which is at most a 255-element scan once per upload.

/// Hard cap on placed instances per vox model.
pub const MAX_INSTANCES: usize = 255;

/// Host scene-node handle for one placed instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

#[derive(Debug, Default)]
pub struct SlotMap {
    slots: Vec<Option<SourceId>>,
    free: Vec<u8>,
}

impl SlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a slot, reusing holes before growing. `None` when all
    /// 255 slots are taken.
    pub fn alloc(&mut self, source: SourceId) -> Option<u8> {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(source);
            return Some(slot);
        }
        if self.slots.len() >= MAX_INSTANCES {
            return None;
        }
        let slot = self.slots.len() as u8;
        self.slots.push(Some(source));
        Some(slot)
    }

    /// Frees a slot, returning its occupant.
    pub fn free(&mut self, slot: u8) -> Option<SourceId> {
        let taken = self.slots.get_mut(slot as usize)?.take();
        if taken.is_some() {
            self.free.push(slot);
        }
        taken
    }

    #[inline]
    pub fn get(&self, slot: u8) -> Option<SourceId> {
        self.slots.get(slot as usize).copied().flatten()
    }

    #[inline]
    pub fn occupied(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Instance count to upload: highest occupied slot plus one.
    pub fn upload_len(&self) -> usize {
        self.slots
            .iter()
            .rposition(|s| s.is_some())
            .map_or(0, |i| i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_freed_holes() {
        let mut m = SlotMap::new();
        let a = m.alloc(SourceId(1)).unwrap();
        let b = m.alloc(SourceId(2)).unwrap();
        let c = m.alloc(SourceId(3)).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        assert_eq!(m.free(b), Some(SourceId(2)));
        assert_eq!(m.alloc(SourceId(4)), Some(1), "hole reused before growth");
        assert_eq!(m.occupied(), 3);
    }

    #[test]
    fn allocation_stops_at_the_cap() {
        let mut m = SlotMap::new();
        for i in 0..MAX_INSTANCES {
            assert!(m.alloc(SourceId(i as u64)).is_some());
        }
        assert_eq!(m.alloc(SourceId(999)), None);
        m.free(7);
        assert_eq!(m.alloc(SourceId(999)), Some(7));
    }

    #[test]
    fn upload_len_is_a_tight_bound() {
        let mut m = SlotMap::new();
        assert_eq!(m.upload_len(), 0);
        m.alloc(SourceId(1));
        m.alloc(SourceId(2));
        m.alloc(SourceId(3));
        assert_eq!(m.upload_len(), 3);
        m.free(2);
        assert_eq!(m.upload_len(), 2);
        m.free(0);
        assert_eq!(m.upload_len(), 2, "hole below the top keeps the bound");
    }

    #[test]
    fn double_free_is_inert() {
        let mut m = SlotMap::new();
        m.alloc(SourceId(1));
        assert_eq!(m.free(0), Some(SourceId(1)));
        assert_eq!(m.free(0), None);
        assert_eq!(m.occupied(), 0);
    }
}
