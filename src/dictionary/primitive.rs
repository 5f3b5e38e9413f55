use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use crate::core::error::Result;
use crate::memory::manager::MemoryManager;
use crate::memory::slots::FixedSlotStore;

/// Fixed-width value that can live in a dictionary slot.
///
/// `Key` is the hashable bit representation used by the value→id map
/// (floats hash by bit pattern, compare by total order).
pub trait DictNative: Copy + 'static {
    const WIDTH: usize;
    type Key: Eq + Hash + Copy;

    fn key(self) -> Self::Key;
    fn store(self, slots: &FixedSlotStore, id: usize);
    fn load(slots: &FixedSlotStore, id: usize) -> Self;
    fn total_cmp(a: Self, b: Self) -> CmpOrdering;
}

impl DictNative for i32 {
    const WIDTH: usize = 4;
    type Key = i32;

    fn key(self) -> i32 {
        self
    }

    fn store(self, slots: &FixedSlotStore, id: usize) {
        slots.write_i32(id, self)
    }

    fn load(slots: &FixedSlotStore, id: usize) -> i32 {
        slots.read_i32(id)
    }

    fn total_cmp(a: i32, b: i32) -> CmpOrdering {
        a.cmp(&b)
    }
}

impl DictNative for i64 {
    const WIDTH: usize = 8;
    type Key = i64;

    fn key(self) -> i64 {
        self
    }

    fn store(self, slots: &FixedSlotStore, id: usize) {
        slots.write_i64(id, self)
    }

    fn load(slots: &FixedSlotStore, id: usize) -> i64 {
        slots.read_i64(id)
    }

    fn total_cmp(a: i64, b: i64) -> CmpOrdering {
        a.cmp(&b)
    }
}

impl DictNative for f32 {
    const WIDTH: usize = 4;
    type Key = u32;

    fn key(self) -> u32 {
        self.to_bits()
    }

    fn store(self, slots: &FixedSlotStore, id: usize) {
        slots.write_f32(id, self)
    }

    fn load(slots: &FixedSlotStore, id: usize) -> f32 {
        slots.read_f32(id)
    }

    fn total_cmp(a: f32, b: f32) -> CmpOrdering {
        a.total_cmp(&b)
    }
}

impl DictNative for f64 {
    const WIDTH: usize = 8;
    type Key = u64;

    fn key(self) -> u64 {
        self.to_bits()
    }

    fn store(self, slots: &FixedSlotStore, id: usize) {
        slots.write_f64(id, self)
    }

    fn load(slots: &FixedSlotStore, id: usize) -> f64 {
        slots.read_f64(id)
    }

    fn total_cmp(a: f64, b: f64) -> CmpOrdering {
        a.total_cmp(&b)
    }
}

/// Mutable dictionary over one fixed-width primitive type.
///
/// Ids are assigned in insertion order, are dense in `[0, len)` and never
/// move: the id→value store grows by chunks, the value→id map may rehash
/// freely because ids are stored as map values. A new id becomes visible
/// to readers via the release store of `len`.
pub struct PrimitiveDictionary<T: DictNative> {
    map: RwLock<HashMap<T::Key, u32>>,
    slots: FixedSlotStore,
    len: AtomicU32,
}

impl<T: DictNative> PrimitiveDictionary<T> {
    pub fn new(
        manager: Arc<MemoryManager>,
        context: String,
        initial_capacity: usize,
    ) -> Result<Self> {
        let slots = FixedSlotStore::new(manager, context, T::WIDTH, initial_capacity)?;
        Ok(PrimitiveDictionary {
            map: RwLock::new(HashMap::new()),
            slots,
            len: AtomicU32::new(0),
        })
    }

    /// Insert if absent, return the assigned id. Writer-side only.
    pub fn index(&self, value: T) -> Result<u32> {
        if let Some(&id) = self.map.read().get(&value.key()) {
            return Ok(id);
        }

        let id = self.len.load(Ordering::Relaxed);
        self.slots.ensure_slot(id as usize)?;
        value.store(&self.slots, id as usize);
        // len must cover the id before the map can hand it out
        self.len.store(id + 1, Ordering::Release);
        self.map.write().insert(value.key(), id);
        Ok(id)
    }

    pub fn index_of(&self, value: T) -> Option<u32> {
        self.map.read().get(&value.key()).copied()
    }

    /// Caller guarantees `id < len()`
    pub fn get(&self, id: u32) -> T {
        debug_assert!(id < self.len());
        T::load(&self.slots, id as usize)
    }

    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn compare(&self, a: u32, b: u32) -> CmpOrdering {
        T::total_cmp(self.get(a), self.get(b))
    }

    pub fn avg_value_size(&self) -> u32 {
        T::WIDTH as u32
    }
}
