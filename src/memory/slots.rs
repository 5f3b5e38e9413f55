use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::Result;
use crate::memory::manager::{MemoryManager, PinnedBuffer};

/// Chunked address space: chunk 0 holds `base` units, chunk k > 0 holds
/// `base << (k - 1)` units, so capacity doubles while existing chunks
/// never move. Addressing is O(1).
#[inline]
fn chunk_of(index: usize, base: usize) -> (usize, usize) {
    if index < base {
        (0, index)
    } else {
        let k = (index / base).ilog2() as usize;
        (k + 1, index - (base << k))
    }
}

#[inline]
fn chunk_capacity(chunk: usize, base: usize) -> usize {
    if chunk == 0 { base } else { base << (chunk - 1) }
}

#[inline]
fn chunk_start(chunk: usize, base: usize) -> usize {
    if chunk == 0 { 0 } else { base << (chunk - 1) }
}

/// Append-mostly store of fixed-width slots with stable addresses.
///
/// Backs dictionaries and forward indexes: slot `i` stays at the same
/// memory location for the lifetime of the store, growth allocates new
/// chunks instead of relocating. Writes come from the single ingestion
/// thread; readers are bounded by an external visibility counter.
pub struct FixedSlotStore {
    slot_bytes: usize,
    base_slots: usize,
    chunks: RwLock<Vec<Arc<PinnedBuffer>>>,
    manager: Arc<MemoryManager>,
    context: String,
}

impl FixedSlotStore {
    pub fn new(
        manager: Arc<MemoryManager>,
        context: String,
        slot_bytes: usize,
        initial_slots: usize,
    ) -> Result<Self> {
        let base_slots = initial_slots.max(16);
        let first = manager.allocate(base_slots * slot_bytes, &context)?;
        Ok(FixedSlotStore {
            slot_bytes,
            base_slots,
            chunks: RwLock::new(vec![first]),
            manager,
            context,
        })
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Slots currently addressable without growth
    pub fn capacity(&self) -> usize {
        let chunks = self.chunks.read();
        chunk_start(chunks.len(), self.base_slots)
    }

    /// Grow until `index` is addressable. Writer-side only.
    pub fn ensure_slot(&self, index: usize) -> Result<()> {
        while self.capacity() <= index {
            let mut chunks = self.chunks.write();
            let next = chunks.len();
            if chunk_start(next, self.base_slots) > index {
                break;
            }
            let bytes = chunk_capacity(next, self.base_slots) * self.slot_bytes;
            let buffer = self.manager.allocate(bytes, &self.context)?;
            chunks.push(buffer);
        }
        Ok(())
    }

    #[inline]
    fn slot(&self, index: usize) -> (Arc<PinnedBuffer>, usize) {
        let (chunk, within) = chunk_of(index, self.base_slots);
        let chunks = self.chunks.read();
        (Arc::clone(&chunks[chunk]), within * self.slot_bytes)
    }

    pub fn write_i32(&self, index: usize, value: i32) {
        let (buffer, offset) = self.slot(index);
        buffer.write_i32(offset, value);
    }

    pub fn read_i32(&self, index: usize) -> i32 {
        let (buffer, offset) = self.slot(index);
        buffer.read_i32(offset)
    }

    pub fn write_i64(&self, index: usize, value: i64) {
        let (buffer, offset) = self.slot(index);
        buffer.write_i64(offset, value);
    }

    pub fn read_i64(&self, index: usize) -> i64 {
        let (buffer, offset) = self.slot(index);
        buffer.read_i64(offset)
    }

    pub fn write_u64(&self, index: usize, value: u64) {
        let (buffer, offset) = self.slot(index);
        buffer.write_u64(offset, value);
    }

    pub fn read_u64(&self, index: usize) -> u64 {
        let (buffer, offset) = self.slot(index);
        buffer.read_u64(offset)
    }

    pub fn write_f32(&self, index: usize, value: f32) {
        let (buffer, offset) = self.slot(index);
        buffer.write_f32(offset, value);
    }

    pub fn read_f32(&self, index: usize) -> f32 {
        let (buffer, offset) = self.slot(index);
        buffer.read_f32(offset)
    }

    pub fn write_f64(&self, index: usize, value: f64) {
        let (buffer, offset) = self.slot(index);
        buffer.write_f64(offset, value);
    }

    pub fn read_f64(&self, index: usize) -> f64 {
        let (buffer, offset) = self.slot(index);
        buffer.read_f64(offset)
    }
}

/// Append-only byte region with the same chunked growth scheme.
///
/// Values never span chunks: an append that would cross a chunk boundary
/// skips to the start of the next chunk, leaving a gap. Offsets returned
/// by `append` are global and stable.
pub struct ByteRegion {
    base_bytes: usize,
    chunks: RwLock<Vec<Arc<PinnedBuffer>>>,
    cursor: AtomicUsize,
    manager: Arc<MemoryManager>,
    context: String,
}

impl ByteRegion {
    pub fn new(manager: Arc<MemoryManager>, context: String, initial_bytes: usize) -> Result<Self> {
        let base_bytes = initial_bytes.max(64);
        let first = manager.allocate(base_bytes, &context)?;
        Ok(ByteRegion {
            base_bytes,
            chunks: RwLock::new(vec![first]),
            cursor: AtomicUsize::new(0),
            manager,
            context,
        })
    }

    /// Bytes appended so far, gaps included
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    fn ensure_chunk(&self, chunk: usize) -> Result<()> {
        let mut chunks = self.chunks.write();
        while chunks.len() <= chunk {
            let bytes = chunk_capacity(chunks.len(), self.base_bytes);
            let buffer = self.manager.allocate(bytes, &self.context)?;
            chunks.push(buffer);
        }
        Ok(())
    }

    /// Append `bytes` and return their global offset. Writer-side only.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let len = bytes.len();
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        if len == 0 {
            return Ok(cursor as u64);
        }

        loop {
            let (chunk, within) = chunk_of(cursor, self.base_bytes);
            if within + len <= chunk_capacity(chunk, self.base_bytes) {
                self.ensure_chunk(chunk)?;
                let chunks = self.chunks.read();
                chunks[chunk].write_bytes(within, bytes);
                drop(chunks);
                self.cursor.store(cursor + len, Ordering::Release);
                return Ok(cursor as u64);
            }
            cursor = chunk_start(chunk + 1, self.base_bytes);
        }
    }

    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let (chunk, within) = chunk_of(offset as usize, self.base_bytes);
        let chunks = self.chunks.read();
        chunks[chunk].read_vec(within, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(slot_bytes: usize, initial: usize) -> FixedSlotStore {
        let manager = Arc::new(MemoryManager::heap());
        FixedSlotStore::new(manager, "seg:test".to_string(), slot_bytes, initial).unwrap()
    }

    #[test]
    fn test_chunk_addressing() {
        assert_eq!(chunk_of(0, 16), (0, 0));
        assert_eq!(chunk_of(15, 16), (0, 15));
        assert_eq!(chunk_of(16, 16), (1, 0));
        assert_eq!(chunk_of(31, 16), (1, 15));
        assert_eq!(chunk_of(32, 16), (2, 0));
        assert_eq!(chunk_of(63, 16), (2, 31));
        assert_eq!(chunk_of(64, 16), (3, 0));
        assert_eq!(chunk_capacity(3, 16), 64);
        assert_eq!(chunk_start(3, 16), 64);
    }

    #[test]
    fn test_growth_keeps_old_slots() {
        let store = store(4, 16);
        for i in 0..1000 {
            store.ensure_slot(i).unwrap();
            store.write_i32(i, i as i32 * 3);
        }
        for i in 0..1000 {
            assert_eq!(store.read_i32(i), i as i32 * 3);
        }
        assert!(store.capacity() >= 1000);
    }

    #[test]
    fn test_wide_slots() {
        let store = store(8, 16);
        store.ensure_slot(40).unwrap();
        store.write_f64(40, 2.5);
        store.write_i64(39, -1);
        assert_eq!(store.read_f64(40), 2.5);
        assert_eq!(store.read_i64(39), -1);
    }

    #[test]
    fn test_byte_region_append_and_read() {
        let manager = Arc::new(MemoryManager::heap());
        let region = ByteRegion::new(manager, "seg:bytes".to_string(), 64).unwrap();

        let a = region.append(b"hello").unwrap();
        let b = region.append(b"world!").unwrap();
        assert_eq!(region.read(a, 5), b"hello");
        assert_eq!(region.read(b, 6), b"world!");
    }

    #[test]
    fn test_byte_region_value_never_spans_chunks() {
        let manager = Arc::new(MemoryManager::heap());
        let region = ByteRegion::new(manager, "seg:bytes".to_string(), 64).unwrap();

        // 60 bytes, then 10 bytes: the second value cannot fit in the
        // 4 bytes left in chunk 0 and must land intact in chunk 1.
        let first = vec![7u8; 60];
        let second = vec![9u8; 10];
        let a = region.append(&first).unwrap();
        let b = region.append(&second).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 64);
        assert_eq!(region.read(a, 60), first);
        assert_eq!(region.read(b, 10), second);
    }
}
