use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use crate::core::error::{Error, ErrorKind, Result};
use crate::memory::manager::MemoryManager;
use crate::memory::slots::{ByteRegion, FixedSlotStore};

/// Mutable dictionary for strings and raw byte values.
///
/// Values live in an append-only off-heap byte region; a packed
/// (offset, len) table maps each id to its slice. Ids are assigned in
/// insertion order and never move.
pub struct BytesDictionary {
    map: RwLock<HashMap<Box<[u8]>, u32>>,
    offsets: FixedSlotStore,
    region: ByteRegion,
    len: AtomicU32,
    total_value_bytes: AtomicUsize,
}

impl BytesDictionary {
    pub fn new(
        manager: Arc<MemoryManager>,
        context: String,
        initial_capacity: usize,
        avg_value_size: usize,
    ) -> Result<Self> {
        let offsets = FixedSlotStore::new(
            Arc::clone(&manager),
            format!("{}.offsets", context),
            8,
            initial_capacity,
        )?;
        let region = ByteRegion::new(
            manager,
            format!("{}.bytes", context),
            initial_capacity * avg_value_size.max(1),
        )?;
        Ok(BytesDictionary {
            map: RwLock::new(HashMap::new()),
            offsets,
            region,
            len: AtomicU32::new(0),
            total_value_bytes: AtomicUsize::new(0),
        })
    }

    /// Insert if absent, return the assigned id. Writer-side only.
    pub fn index(&self, value: &[u8]) -> Result<u32> {
        if let Some(&id) = self.map.read().get(value) {
            return Ok(id);
        }

        let offset = self.region.append(value)?;
        if offset > u32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "Dictionary byte region exceeded 4GB".to_string(),
            ));
        }
        if value.len() > u32::MAX as usize {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Dictionary value exceeds 4GB".to_string(),
            ));
        }

        let id = self.len.load(Ordering::Relaxed);
        self.offsets.ensure_slot(id as usize)?;
        self.offsets
            .write_u64(id as usize, offset << 32 | value.len() as u64);
        self.total_value_bytes.fetch_add(value.len(), Ordering::Relaxed);
        // len must cover the id before the map can hand it out
        self.len.store(id + 1, Ordering::Release);
        self.map.write().insert(value.into(), id);
        Ok(id)
    }

    pub fn index_of(&self, value: &[u8]) -> Option<u32> {
        self.map.read().get(value).copied()
    }

    /// Caller guarantees `id < len()`
    pub fn get(&self, id: u32) -> Vec<u8> {
        debug_assert!(id < self.len());
        let packed = self.offsets.read_u64(id as usize);
        self.region.read(packed >> 32, (packed & 0xFFFF_FFFF) as usize)
    }

    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lexicographic byte order
    pub fn compare(&self, a: u32, b: u32) -> CmpOrdering {
        self.get(a).cmp(&self.get(b))
    }

    pub fn avg_value_size(&self) -> u32 {
        let len = self.len();
        if len == 0 {
            return 0;
        }
        (self.total_value_bytes.load(Ordering::Relaxed) / len as usize) as u32
    }
}
