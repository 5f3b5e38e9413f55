use log::debug;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::memory::manager::{MemoryManager, PinnedBuffer};

/// Probe length after which a key is parked in the overflow table
const MAX_PROBES: usize = 32;

/// Sizing rule for the main table
pub fn estimated_rows_to_index(capacity: usize) -> usize {
    (capacity / 1000).max(1_000_000)
}

/// Sizing rule for the overflow table
pub fn overflow_capacity(estimated_rows: usize) -> usize {
    (estimated_rows / 1000).max(10_000)
}

/// Off-heap hash map from a fixed-length vector of dictionary ids (the
/// dimension key) to the docId that first carried that key. Only present
/// when metric aggregation is enabled; touched exclusively by the
/// ingestion thread.
///
/// Bucket layout: `key_len` i32 key slots followed by one i32 value slot
/// holding `docId + 1` (0 marks an empty bucket). Linear probing, doubling
/// growth; bindings are plain values so growth never changes a docId that
/// was already handed out.
pub struct RecordIdMap {
    key_len: usize,
    bucket_bytes: usize,
    num_buckets: usize,
    table: Arc<PinnedBuffer>,
    size: usize,
    overflow: HashMap<Box<[i32]>, DocId>,
    manager: Arc<MemoryManager>,
    context: String,
}

impl RecordIdMap {
    pub fn new(
        manager: Arc<MemoryManager>,
        context: String,
        key_len: usize,
        estimated_rows: usize,
    ) -> Result<Self> {
        let bucket_bytes = (key_len + 1) * 4;
        let num_buckets = (estimated_rows * 4 / 3 + 1).next_power_of_two();
        let table = manager.allocate(num_buckets * bucket_bytes, &context)?;

        Ok(RecordIdMap {
            key_len,
            bucket_bytes,
            num_buckets,
            table,
            size: 0,
            overflow: HashMap::with_capacity(overflow_capacity(estimated_rows).min(1 << 16)),
            manager,
            context,
        })
    }

    fn hash_key(key: &[i32]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for v in key {
            hasher.write_i32(*v);
        }
        hasher.finish()
    }

    fn key_matches(table: &PinnedBuffer, base: usize, key: &[i32]) -> bool {
        key.iter()
            .enumerate()
            .all(|(i, v)| table.read_i32(base + i * 4) == *v)
    }

    fn write_bucket(table: &PinnedBuffer, base: usize, key: &[i32], doc_id: DocId) {
        for (i, v) in key.iter().enumerate() {
            table.write_i32(base + i * 4, *v);
        }
        table.write_i32(base + key.len() * 4, doc_id as i32 + 1);
    }

    /// Place a key into `table`, returns false when the probe limit is
    /// hit and the key belongs in the overflow table.
    fn insert_raw(
        table: &PinnedBuffer,
        num_buckets: usize,
        bucket_bytes: usize,
        key: &[i32],
        doc_id: DocId,
    ) -> bool {
        let mask = num_buckets - 1;
        let start = Self::hash_key(key) as usize;
        for i in 0..MAX_PROBES {
            let base = ((start + i) & mask) * bucket_bytes;
            if table.read_i32(base + key.len() * 4) == 0 {
                Self::write_bucket(table, base, key, doc_id);
                return true;
            }
        }
        false
    }

    /// Return the docId bound to `key`, binding `new_doc_id` when absent.
    pub fn put(&mut self, key: &[i32], new_doc_id: DocId) -> Result<DocId> {
        debug_assert_eq!(key.len(), self.key_len);

        if self.size * 4 >= self.num_buckets * 3 {
            self.grow()?;
        }

        let mask = self.num_buckets - 1;
        let start = Self::hash_key(key) as usize;
        for i in 0..MAX_PROBES {
            let base = ((start + i) & mask) * self.bucket_bytes;
            let stored = self.table.read_i32(base + self.key_len * 4);
            if stored == 0 {
                // The key may have been parked in the overflow table
                // before a growth pass shortened this probe chain
                if let Some(&doc_id) = self.overflow.get(key) {
                    return Ok(doc_id);
                }
                Self::write_bucket(&self.table, base, key, new_doc_id);
                self.size += 1;
                return Ok(new_doc_id);
            }
            if Self::key_matches(&self.table, base, key) {
                return Ok((stored - 1) as DocId);
            }
        }

        if let Some(&doc_id) = self.overflow.get(key) {
            return Ok(doc_id);
        }
        self.overflow.insert(key.into(), new_doc_id);
        Ok(new_doc_id)
    }

    fn grow(&mut self) -> Result<()> {
        let new_buckets = self.num_buckets * 2;
        debug!(
            "Growing record-id map {} to {} buckets",
            self.context, new_buckets
        );
        let new_table = self
            .manager
            .allocate(new_buckets * self.bucket_bytes, &self.context)?;

        let mut key = vec![0i32; self.key_len];
        for bucket in 0..self.num_buckets {
            let base = bucket * self.bucket_bytes;
            let stored = self.table.read_i32(base + self.key_len * 4);
            if stored == 0 {
                continue;
            }
            for (i, slot) in key.iter_mut().enumerate() {
                *slot = self.table.read_i32(base + i * 4);
            }
            let doc_id = (stored - 1) as DocId;
            if !Self::insert_raw(&new_table, new_buckets, self.bucket_bytes, &key, doc_id) {
                self.overflow.insert(key.clone().into_boxed_slice(), doc_id);
                self.size -= 1;
            }
        }

        self.table = new_table;
        self.num_buckets = new_buckets;
        Ok(())
    }

    /// Distinct keys seen
    pub fn len(&self) -> usize {
        self.size + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.table.zero();
        self.overflow.clear();
        self.size = 0;
    }
}
