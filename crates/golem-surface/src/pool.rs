//! Length-keyed free-lists for meshing scratch buffers.
//!
//! Remeshing can run every tick during interactive edits, so vertex
//! buffers are acquired from and released back to these pools instead
//! of being allocated fresh. Callers must not assume acquired buffers
//! are zeroed; they come back cleared to length 0 with their capacity
//! intact.

use hashbrown::HashMap;

struct FreeLists<T> {
    by_len: HashMap<usize, Vec<Vec<T>>>,
}

impl<T> FreeLists<T> {
    fn new() -> Self {
        Self {
            by_len: HashMap::new(),
        }
    }

    fn acquire(&mut self, len: usize) -> Vec<T> {
        if let Some(list) = self.by_len.get_mut(&len) {
            if let Some(v) = list.pop() {
                return v;
            }
        }
        Vec::with_capacity(len)
    }

    fn release(&mut self, mut v: Vec<T>) {
        v.clear();
        self.by_len.entry(v.capacity()).or_default().push(v);
    }

    fn free_count(&self) -> usize {
        self.by_len.values().map(|l| l.len()).sum()
    }
}

/// Pool of typed scratch buffers keyed by requested length. Buffers are
/// borrowed for the duration of one surface build and returned on
/// disposal or regeneration.
pub struct BufferPool {
    f32s: FreeLists<f32>,
    u8s: FreeLists<u8>,
    u16s: FreeLists<u16>,
    u32s: FreeLists<u32>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            f32s: FreeLists::new(),
            u8s: FreeLists::new(),
            u16s: FreeLists::new(),
            u32s: FreeLists::new(),
        }
    }

    pub fn acquire_f32(&mut self, len: usize) -> Vec<f32> {
        self.f32s.acquire(len)
    }

    pub fn release_f32(&mut self, v: Vec<f32>) {
        self.f32s.release(v);
    }

    pub fn acquire_u8(&mut self, len: usize) -> Vec<u8> {
        self.u8s.acquire(len)
    }

    pub fn release_u8(&mut self, v: Vec<u8>) {
        self.u8s.release(v);
    }

    pub fn acquire_u16(&mut self, len: usize) -> Vec<u16> {
        self.u16s.acquire(len)
    }

    pub fn release_u16(&mut self, v: Vec<u16>) {
        self.u16s.release(v);
    }

    pub fn acquire_u32(&mut self, len: usize) -> Vec<u32> {
        self.u32s.acquire(len)
    }

    pub fn release_u32(&mut self, v: Vec<u32>) {
        self.u32s.release(v);
    }

    /// Total buffers currently sitting in the free-lists.
    pub fn free_buffers(&self) -> usize {
        self.f32s.free_count() + self.u8s.free_count() + self.u16s.free_count()
            + self.u32s.free_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused_before_allocating() {
        let mut pool = BufferPool::new();
        let mut v = pool.acquire_f32(48);
        v.extend(std::iter::repeat_n(1.5f32, 48));
        let ptr = v.as_ptr();
        pool.release_f32(v);
        assert_eq!(pool.free_buffers(), 1);
        let again = pool.acquire_f32(48);
        assert_eq!(again.as_ptr(), ptr);
        // Cleared, not zero-filled: capacity survives, length does not.
        assert!(again.is_empty());
        assert!(again.capacity() >= 48);
        assert_eq!(pool.free_buffers(), 0);
    }

    #[test]
    fn mismatched_length_allocates_fresh() {
        let mut pool = BufferPool::new();
        let v = pool.acquire_u16(16);
        let ptr = v.as_ptr();
        pool.release_u16(v);
        let other = pool.acquire_u16(32);
        assert_ne!(other.as_ptr(), ptr);
        // The 16-length buffer is still pooled for its own size class.
        assert_eq!(pool.free_buffers(), 1);
    }
}
