use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use crate::core::stats::StatsHistory;
use crate::core::types::Schema;
use crate::memory::manager::MemoryManager;
use crate::segment::provider::VirtualColumnProvider;

/// Stream-partition placement of one segment, carried through to its
/// metadata for the benefit of the routing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    pub column: String,
    pub num_partitions: u32,
    pub partition_id: u32,
}

/// Construction contract for a mutable segment
pub struct SegmentConfig {
    pub segment_name: String,
    pub stream_name: String,
    pub schema: Schema,
    pub capacity: usize,
    pub off_heap: bool,
    pub memory_manager: Arc<MemoryManager>,
    pub stats_history: Option<Arc<StatsHistory>>,
    pub avg_num_multi_values: usize,
    pub no_dictionary_columns: HashSet<String>,
    pub inverted_index_columns: HashSet<String>,
    pub bloom_filter_columns: HashSet<String>,
    pub aggregate_metrics: bool,
    pub partition: Option<PartitionConfig>,
    pub virtual_columns: HashMap<String, Arc<dyn VirtualColumnProvider>>,
}

impl SegmentConfig {
    pub fn new(segment_name: &str, stream_name: &str, schema: Schema, capacity: usize) -> Self {
        SegmentConfig {
            segment_name: segment_name.to_string(),
            stream_name: stream_name.to_string(),
            schema,
            capacity,
            off_heap: false,
            memory_manager: Arc::new(MemoryManager::heap()),
            stats_history: None,
            avg_num_multi_values: 2,
            no_dictionary_columns: HashSet::new(),
            inverted_index_columns: HashSet::new(),
            bloom_filter_columns: HashSet::new(),
            aggregate_metrics: false,
            partition: None,
            virtual_columns: HashMap::new(),
        }
    }

    pub fn with_off_heap(mut self, memory_manager: Arc<MemoryManager>) -> Self {
        self.off_heap = true;
        self.memory_manager = memory_manager;
        self
    }

    pub fn with_stats_history(mut self, stats_history: Arc<StatsHistory>) -> Self {
        self.stats_history = Some(stats_history);
        self
    }

    pub fn with_avg_num_multi_values(mut self, avg: usize) -> Self {
        self.avg_num_multi_values = avg;
        self
    }

    pub fn with_no_dictionary_columns(mut self, columns: &[&str]) -> Self {
        self.no_dictionary_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_inverted_index_columns(mut self, columns: &[&str]) -> Self {
        self.inverted_index_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_bloom_filter_columns(mut self, columns: &[&str]) -> Self {
        self.bloom_filter_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_aggregate_metrics(mut self) -> Self {
        self.aggregate_metrics = true;
        self
    }

    pub fn with_partition(mut self, partition: PartitionConfig) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_virtual_column(
        mut self,
        name: &str,
        provider: Arc<dyn VirtualColumnProvider>,
    ) -> Self {
        self.virtual_columns.insert(name.to_string(), provider);
        self
    }
}
