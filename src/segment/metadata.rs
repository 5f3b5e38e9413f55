use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use crate::core::config::PartitionConfig;
use crate::core::types::Schema;

/// Live counters shared between the segment and its metadata views.
///
/// Written by the single ingestion thread; `num_docs` is the visibility
/// counter and carries the release/acquire publication contract.
pub struct SegmentCounters {
    pub num_docs: AtomicU32,
    pub rows_consumed: AtomicU64,
    pub min_time: AtomicI64,
    pub max_time: AtomicI64,
    pub last_indexed_time_ms: AtomicI64,
    pub latest_ingestion_time_ms: AtomicI64,
}

impl SegmentCounters {
    pub fn new() -> Self {
        SegmentCounters {
            num_docs: AtomicU32::new(0),
            rows_consumed: AtomicU64::new(0),
            min_time: AtomicI64::new(i64::MAX),
            max_time: AtomicI64::new(i64::MIN),
            last_indexed_time_ms: AtomicI64::new(i64::MIN),
            latest_ingestion_time_ms: AtomicI64::new(i64::MIN),
        }
    }
}

impl Default for SegmentCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata view over a live segment. Getters read the shared counters
/// at call time, so a long-lived view always reports current state.
pub struct SegmentMetadataView {
    segment_name: String,
    stream_name: String,
    schema: Arc<Schema>,
    capacity: u32,
    partition: Option<PartitionConfig>,
    counters: Arc<SegmentCounters>,
}

impl SegmentMetadataView {
    pub(crate) fn new(
        segment_name: String,
        stream_name: String,
        schema: Arc<Schema>,
        capacity: u32,
        partition: Option<PartitionConfig>,
        counters: Arc<SegmentCounters>,
    ) -> Self {
        SegmentMetadataView {
            segment_name,
            stream_name,
            schema,
            capacity,
            partition,
            counters,
        }
    }

    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn partition(&self) -> Option<&PartitionConfig> {
        self.partition.as_ref()
    }

    pub fn total_docs(&self) -> u32 {
        self.counters.num_docs.load(Ordering::Acquire)
    }

    pub fn rows_consumed(&self) -> u64 {
        self.counters.rows_consumed.load(Ordering::Relaxed)
    }

    pub fn min_time(&self) -> Option<i64> {
        let t = self.counters.min_time.load(Ordering::Relaxed);
        if t == i64::MAX { None } else { Some(t) }
    }

    pub fn max_time(&self) -> Option<i64> {
        let t = self.counters.max_time.load(Ordering::Relaxed);
        if t == i64::MIN { None } else { Some(t) }
    }

    pub fn last_indexed_time_ms(&self) -> Option<i64> {
        let t = self.counters.last_indexed_time_ms.load(Ordering::Relaxed);
        if t == i64::MIN { None } else { Some(t) }
    }

    pub fn latest_ingestion_time_ms(&self) -> Option<i64> {
        let t = self.counters.latest_ingestion_time_ms.load(Ordering::Relaxed);
        if t == i64::MIN { None } else { Some(t) }
    }
}
