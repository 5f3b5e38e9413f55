use chrono::Utc;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use crate::core::config::{PartitionConfig, SegmentConfig};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{ColumnStats, SegmentStats, StatsHistory};
use crate::core::types::{
    DocId, FieldKind, FieldSpec, FieldValue, MAX_VALUES_PER_MV_ENTRY, Row, RowMetadata, Schema,
    Value,
};
use crate::dictionary::MutableDictionary;
use crate::index::bloom::BloomFilter;
use crate::index::forward::{FixedWidthForwardIndex, MultiValueForwardIndex};
use crate::index::inverted::RealtimeInvertedIndex;
use crate::index::recordid::{RecordIdMap, estimated_rows_to_index};
use crate::memory::manager::MemoryManager;
use crate::segment::datasource::{ColumnDataSource, ForwardIndexReader, InvertedIndexReader};
use crate::segment::metadata::{SegmentCounters, SegmentMetadataView};
use crate::segment::provider::VirtualColumnProvider;

const BLOOM_FPP: f64 = 0.01;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// All index structures for one physical column
struct ColumnIndexes {
    spec: FieldSpec,
    dictionary: Option<Arc<MutableDictionary>>,
    forward_sv: Option<Arc<FixedWidthForwardIndex>>,
    forward_mv: Option<Arc<MultiValueForwardIndex>>,
    inverted: Option<Arc<RealtimeInvertedIndex>>,
    bloom: RwLock<Option<Arc<BloomFilter>>>,
    wants_bloom: bool,
    max_values_per_row: AtomicU32,
}

/// Per-row scratch produced by the dictionary phase
enum Cell<'a> {
    DictId(u32),
    DictIds(Vec<u32>),
    Raw(&'a Value),
}

impl std::fmt::Debug for MutableSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableSegment")
            .field("name", &self.name)
            .field("stream_name", &self.stream_name)
            .finish_non_exhaustive()
    }
}

/// Mutable in-memory columnar segment.
///
/// One ingestion thread appends rows through `index`; any number of
/// readers consume `data_source`, `record` and the metadata view
/// concurrently. A row becomes visible only through the release store of
/// the visibility counter, after its forward and inverted entries are in
/// place; readers sample the counter once per traversal and stay below it.
pub struct MutableSegment {
    name: String,
    stream_name: String,
    schema: Arc<Schema>,
    capacity: u32,
    off_heap: bool,
    aggregate_metrics: bool,
    columns: Vec<ColumnIndexes>,
    column_index: HashMap<String, usize>,
    virtual_columns: HashMap<String, Arc<dyn VirtualColumnProvider>>,
    /// Dimension columns in schema order, then the time column
    dimension_key_columns: Vec<usize>,
    metric_columns: Vec<usize>,
    record_id_map: Option<Mutex<RecordIdMap>>,
    counters: Arc<SegmentCounters>,
    memory_manager: Arc<MemoryManager>,
    stats_history: Option<Arc<StatsHistory>>,
    partition: Option<PartitionConfig>,
    created_at: Instant,
}

impl MutableSegment {
    pub fn new(config: SegmentConfig) -> Result<Self> {
        let SegmentConfig {
            segment_name,
            stream_name,
            schema,
            capacity,
            off_heap,
            memory_manager,
            stats_history,
            avg_num_multi_values,
            no_dictionary_columns,
            inverted_index_columns,
            bloom_filter_columns,
            aggregate_metrics,
            partition,
            virtual_columns,
        } = config;

        if capacity == 0 || capacity > i32::MAX as usize {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Invalid segment capacity {}", capacity),
            ));
        }

        Self::validate_column_sets(
            &schema,
            &no_dictionary_columns,
            &inverted_index_columns,
            &bloom_filter_columns,
            &virtual_columns,
        )?;

        let aggregate = aggregate_metrics
            && Self::aggregation_supported(&segment_name, &schema, &no_dictionary_columns);

        let mut columns = Vec::with_capacity(schema.columns.len());
        let mut column_index = HashMap::new();
        let mut dimension_key_columns = Vec::new();
        let mut metric_columns = Vec::new();
        let mut time_column_idx = None;

        for spec in &schema.columns {
            let idx = columns.len();
            column_index.insert(spec.name.clone(), idx);
            match spec.kind {
                FieldKind::Dimension => dimension_key_columns.push(idx),
                FieldKind::Metric => metric_columns.push(idx),
                FieldKind::Time => time_column_idx = Some(idx),
            }

            columns.push(Self::build_column(
                &segment_name,
                spec,
                capacity,
                avg_num_multi_values,
                &no_dictionary_columns,
                &inverted_index_columns,
                &bloom_filter_columns,
                stats_history.as_deref(),
                &memory_manager,
            )?);
        }

        let record_id_map = if aggregate {
            let time_idx = time_column_idx.ok_or_else(|| {
                Error::new(ErrorKind::Internal, "Aggregation without time column".to_string())
            })?;
            dimension_key_columns.push(time_idx);
            let key_len = dimension_key_columns.len();
            Some(Mutex::new(RecordIdMap::new(
                Arc::clone(&memory_manager),
                format!("{}:__recordId", segment_name),
                key_len,
                estimated_rows_to_index(capacity),
            )?))
        } else {
            None
        };

        info!(
            "Created segment {} (stream {}, capacity {}, off-heap {}, aggregation {})",
            segment_name, stream_name, capacity, off_heap, aggregate
        );

        Ok(MutableSegment {
            name: segment_name,
            stream_name,
            schema: Arc::new(schema),
            capacity: capacity as u32,
            off_heap,
            aggregate_metrics: aggregate,
            columns,
            column_index,
            virtual_columns,
            dimension_key_columns,
            metric_columns,
            record_id_map,
            counters: Arc::new(SegmentCounters::new()),
            memory_manager,
            stats_history,
            partition,
            created_at: Instant::now(),
        })
    }

    fn validate_column_sets(
        schema: &Schema,
        no_dictionary: &HashSet<String>,
        inverted: &HashSet<String>,
        bloom: &HashSet<String>,
        virtual_columns: &HashMap<String, Arc<dyn VirtualColumnProvider>>,
    ) -> Result<()> {
        for name in no_dictionary.iter().chain(inverted).chain(bloom) {
            if schema.column(name).is_none() {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("Unknown column in index config: {}", name),
                ));
            }
        }
        for name in virtual_columns.keys() {
            if schema.column(name).is_some() {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("Virtual column {} shadows a physical column", name),
                ));
            }
        }

        for spec in &schema.columns {
            if no_dictionary.contains(&spec.name) {
                if !spec.single_value {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!("No-dictionary column {} cannot be multi-value", spec.name),
                    ));
                }
                if !spec.data_type.is_fixed_width() {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!(
                            "No-dictionary column {} cannot be {:?}",
                            spec.name, spec.data_type
                        ),
                    ));
                }
                if inverted.contains(&spec.name) {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!("Inverted index requires a dictionary: {}", spec.name),
                    ));
                }
                if bloom.contains(&spec.name) {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!("Bloom filter requires a dictionary: {}", spec.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Decide metric aggregation once, at construction
    fn aggregation_supported(
        segment_name: &str,
        schema: &Schema,
        no_dictionary: &HashSet<String>,
    ) -> bool {
        let reject = |reason: String| {
            warn!("Disabling metric aggregation for {}: {}", segment_name, reason);
            false
        };

        let Some(time_column) = &schema.time_column else {
            return reject("no time column".to_string());
        };
        if no_dictionary.contains(time_column) {
            return reject(format!("time column {} is not dictionary-encoded", time_column));
        }

        for spec in &schema.columns {
            match spec.kind {
                FieldKind::Metric => {
                    if !no_dictionary.contains(&spec.name) {
                        return reject(format!("metric {} is dictionary-encoded", spec.name));
                    }
                    if !spec.single_value {
                        return reject(format!("metric {} is multi-value", spec.name));
                    }
                }
                FieldKind::Dimension => {
                    if no_dictionary.contains(&spec.name) {
                        return reject(format!(
                            "dimension {} is not dictionary-encoded",
                            spec.name
                        ));
                    }
                    if !spec.single_value {
                        return reject(format!("dimension {} is multi-value", spec.name));
                    }
                }
                FieldKind::Time => {}
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn build_column(
        segment_name: &str,
        spec: &FieldSpec,
        capacity: usize,
        avg_num_multi_values: usize,
        no_dictionary: &HashSet<String>,
        inverted: &HashSet<String>,
        bloom: &HashSet<String>,
        stats_history: Option<&StatsHistory>,
        manager: &Arc<MemoryManager>,
    ) -> Result<ColumnIndexes> {
        let dict_encoded = !no_dictionary.contains(&spec.name);

        let dictionary = if dict_encoded {
            let estimated_cardinality = stats_history
                .map(|h| h.estimated_cardinality(&spec.name))
                .unwrap_or(crate::core::stats::DEFAULT_ESTIMATED_CARDINALITY);
            let avg_value_size = stats_history
                .map(|h| h.estimated_avg_value_size(&spec.name))
                .unwrap_or(crate::core::stats::DEFAULT_ESTIMATED_AVG_VALUE_SIZE);
            let initial_capacity =
                ((estimated_cardinality as f64 * 1.10) as usize).min(capacity).max(1);
            Some(Arc::new(MutableDictionary::new(
                spec.data_type,
                Arc::clone(manager),
                format!("{}:{}.dict", segment_name, spec.name),
                initial_capacity,
                avg_value_size as usize,
            )?))
        } else {
            None
        };

        let (forward_sv, forward_mv) = if spec.single_value {
            let forward = if dict_encoded {
                FixedWidthForwardIndex::dict_encoded(
                    Arc::clone(manager),
                    format!("{}:{}.fwd", segment_name, spec.name),
                    capacity,
                )?
            } else {
                FixedWidthForwardIndex::raw(
                    Arc::clone(manager),
                    format!("{}:{}.fwd", segment_name, spec.name),
                    spec.data_type,
                    capacity,
                )?
            };
            (Some(Arc::new(forward)), None)
        } else {
            let forward = MultiValueForwardIndex::new(
                Arc::clone(manager),
                format!("{}:{}.fwd", segment_name, spec.name),
                capacity,
                avg_num_multi_values,
            )?;
            (None, Some(Arc::new(forward)))
        };

        let inverted_index = if inverted.contains(&spec.name) {
            Some(Arc::new(RealtimeInvertedIndex::new()))
        } else {
            None
        };

        Ok(ColumnIndexes {
            spec: spec.clone(),
            dictionary,
            forward_sv,
            forward_mv,
            inverted: inverted_index,
            bloom: RwLock::new(None),
            wants_bloom: bloom.contains(&spec.name),
            max_values_per_row: AtomicU32::new(0),
        })
    }

    /// Index one row. Returns whether the segment can take more rows
    /// after this one; calling again once `false` was returned is a
    /// capacity error.
    ///
    /// Must be driven by a single ingestion thread.
    pub fn index(&self, row: &Row, metadata: Option<&RowMetadata>) -> Result<bool> {
        let num_docs = self.counters.num_docs.load(Ordering::Relaxed);
        if num_docs >= self.capacity {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!("Segment {} is full ({} rows)", self.name, self.capacity),
            ));
        }

        // Reject malformed rows before touching any index structure
        self.validate_row(row)?;

        // Phase 1: dictionaries
        let mut cells: Vec<Cell> = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let field_value = row.get(&col.spec.name).expect("validated");
            let cell = match field_value {
                FieldValue::Single(value) => match &col.dictionary {
                    Some(dict) => Cell::DictId(dict.index(value)?),
                    None => Cell::Raw(value),
                },
                FieldValue::Multi(values) => {
                    let dict = col.dictionary.as_ref().expect("multi-value implies dictionary");
                    let mut ids = Vec::with_capacity(values.len());
                    for value in values {
                        ids.push(dict.index(value)?);
                    }
                    col.max_values_per_row
                        .fetch_max(ids.len() as u32, Ordering::Relaxed);
                    Cell::DictIds(ids)
                }
            };
            cells.push(cell);
        }

        if let Some(time_column) = &self.schema.time_column {
            if let Some(FieldValue::Single(value)) = row.get(time_column) {
                if let Some(t) = value.as_i64() {
                    if t < self.counters.min_time.load(Ordering::Relaxed) {
                        self.counters.min_time.store(t, Ordering::Relaxed);
                    }
                    if t > self.counters.max_time.load(Ordering::Relaxed) {
                        self.counters.max_time.store(t, Ordering::Relaxed);
                    }
                }
            }
        }

        // Phase 2: docId resolution
        let doc_id = match &self.record_id_map {
            Some(map) => {
                let mut key = Vec::with_capacity(self.dimension_key_columns.len());
                for &idx in &self.dimension_key_columns {
                    match &cells[idx] {
                        Cell::DictId(id) => key.push(*id as i32),
                        _ => {
                            return Err(Error::new(
                                ErrorKind::Internal,
                                "Aggregation key column without dictionary id".to_string(),
                            ));
                        }
                    }
                }
                map.lock().put(&key, num_docs)?
            }
            None => num_docs,
        };

        // Phase 3: forward, inverted, publish (or fold into an existing row)
        if doc_id == num_docs {
            for (idx, col) in self.columns.iter().enumerate() {
                match &cells[idx] {
                    Cell::DictId(id) => {
                        col.forward_sv.as_ref().expect("single-value").set_dict_id(doc_id, *id)?
                    }
                    Cell::Raw(value) => {
                        col.forward_sv.as_ref().expect("single-value").set_value(doc_id, value)?
                    }
                    Cell::DictIds(ids) => {
                        col.forward_mv.as_ref().expect("multi-value").set(doc_id, ids)?
                    }
                }
            }
            for (idx, col) in self.columns.iter().enumerate() {
                let Some(inverted) = &col.inverted else { continue };
                match &cells[idx] {
                    Cell::DictId(id) => inverted.add(*id, doc_id),
                    Cell::DictIds(ids) => {
                        for id in ids {
                            inverted.add(*id, doc_id);
                        }
                    }
                    Cell::Raw(_) => {}
                }
            }
            self.counters.num_docs.store(num_docs + 1, Ordering::Release);
        } else if doc_id < num_docs {
            if !self.aggregate_metrics {
                return Err(Error::new(
                    ErrorKind::Aggregation,
                    format!(
                        "Resolved existing docId {} while aggregation is disabled",
                        doc_id
                    ),
                ));
            }
            for &idx in &self.metric_columns {
                let col = &self.columns[idx];
                match &cells[idx] {
                    Cell::Raw(value) => {
                        col.forward_sv.as_ref().expect("single-value").add_value(doc_id, value)?
                    }
                    _ => {
                        return Err(Error::new(
                            ErrorKind::Aggregation,
                            format!("Metric {} is not a raw single value", col.spec.name),
                        ));
                    }
                }
            }
        } else {
            return Err(Error::new(
                ErrorKind::Internal,
                format!("docId {} ahead of visibility counter {}", doc_id, num_docs),
            ));
        }

        // Phase 4: metadata
        self.counters
            .last_indexed_time_ms
            .store(now_ms(), Ordering::Relaxed);
        if let Some(ingestion_time) = metadata.and_then(|m| m.ingestion_time_ms) {
            if ingestion_time > self.counters.latest_ingestion_time_ms.load(Ordering::Relaxed) {
                self.counters
                    .latest_ingestion_time_ms
                    .store(ingestion_time, Ordering::Relaxed);
            }
        }
        self.counters.rows_consumed.fetch_add(1, Ordering::Relaxed);

        Ok(self.counters.num_docs.load(Ordering::Relaxed) < self.capacity)
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        for name in row.values.keys() {
            if !self.column_index.contains_key(name) {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("Unknown column: {}", name),
                ));
            }
        }

        for col in &self.columns {
            let field_value = row.get(&col.spec.name).ok_or_else(|| {
                Error::new(
                    ErrorKind::Schema,
                    format!("Missing value for column {}", col.spec.name),
                )
            })?;
            match field_value {
                FieldValue::Single(value) => {
                    if !col.spec.single_value {
                        return Err(Error::new(
                            ErrorKind::Schema,
                            format!("Column {} is multi-value", col.spec.name),
                        ));
                    }
                    if value.data_type() != col.spec.data_type {
                        return Err(Error::new(
                            ErrorKind::TypeCast,
                            format!(
                                "Column {} expects {:?}, got {:?}",
                                col.spec.name,
                                col.spec.data_type,
                                value.data_type()
                            ),
                        ));
                    }
                }
                FieldValue::Multi(values) => {
                    if col.spec.single_value {
                        return Err(Error::new(
                            ErrorKind::Schema,
                            format!("Column {} is single-value", col.spec.name),
                        ));
                    }
                    if values.len() > MAX_VALUES_PER_MV_ENTRY {
                        return Err(Error::new(
                            ErrorKind::Capacity,
                            format!(
                                "Column {} has {} values, cap is {}",
                                col.spec.name,
                                values.len(),
                                MAX_VALUES_PER_MV_ENTRY
                            ),
                        ));
                    }
                    for value in values {
                        if value.data_type() != col.spec.data_type {
                            return Err(Error::new(
                                ErrorKind::TypeCast,
                                format!(
                                    "Column {} expects {:?}, got {:?}",
                                    col.spec.name,
                                    col.spec.data_type,
                                    value.data_type()
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Visibility counter: rows below this are fully queryable
    pub fn num_docs_indexed(&self) -> u32 {
        self.counters.num_docs.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn aggregate_metrics_enabled(&self) -> bool {
        self.aggregate_metrics
    }

    pub fn num_aggregated_keys(&self) -> Option<usize> {
        self.record_id_map.as_ref().map(|m| m.lock().len())
    }

    pub fn segment_metadata(&self) -> SegmentMetadataView {
        SegmentMetadataView::new(
            self.name.clone(),
            self.stream_name.clone(),
            Arc::clone(&self.schema),
            self.capacity,
            self.partition.clone(),
            Arc::clone(&self.counters),
        )
    }

    /// Column view with readers bound to the current visibility counter
    pub fn data_source(&self, column: &str) -> Result<ColumnDataSource> {
        let num_docs = self.num_docs_indexed();

        if let Some(&idx) = self.column_index.get(column) {
            let col = &self.columns[idx];
            let forward = match (&col.forward_sv, &col.forward_mv) {
                (Some(sv), _) => ForwardIndexReader::SingleValue(Arc::clone(sv)),
                (None, Some(mv)) => ForwardIndexReader::MultiValue(Arc::clone(mv)),
                (None, None) => {
                    return Err(Error::new(
                        ErrorKind::Internal,
                        format!("Column {} has no forward index", column),
                    ));
                }
            };
            return Ok(ColumnDataSource {
                field_spec: col.spec.clone(),
                num_docs,
                max_values_per_row: col.max_values_per_row.load(Ordering::Relaxed),
                forward: Some(forward),
                dictionary: col.dictionary.clone(),
                inverted: col
                    .inverted
                    .as_ref()
                    .map(|i| InvertedIndexReader::new(Arc::clone(i), num_docs)),
                bloom: col.bloom.read().clone(),
                provider: None,
            });
        }

        if let Some(provider) = self.virtual_columns.get(column) {
            return Ok(ColumnDataSource {
                field_spec: provider.field_spec(),
                num_docs,
                max_values_per_row: 1,
                forward: None,
                dictionary: None,
                inverted: None,
                bloom: None,
                provider: Some(Arc::clone(provider)),
            });
        }

        Err(Error::new(
            ErrorKind::Schema,
            format!("Unknown column: {}", column),
        ))
    }

    /// Reconstruct the row at `doc_id` into `reuse`
    pub fn record(&self, doc_id: DocId, reuse: &mut Row) -> Result<()> {
        let num_docs = self.num_docs_indexed();
        if doc_id >= num_docs {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("docId {} out of range ({} visible)", doc_id, num_docs),
            ));
        }

        reuse.clear();
        let mut ids = Vec::new();
        for col in &self.columns {
            if let Some(mv) = &col.forward_mv {
                let dict = col.dictionary.as_ref().expect("multi-value implies dictionary");
                mv.get(doc_id, &mut ids);
                let mut values = Vec::with_capacity(ids.len());
                for id in &ids {
                    values.push(dict.get(*id)?);
                }
                reuse.set_multi(&col.spec.name, values);
            } else {
                let sv = col.forward_sv.as_ref().expect("single-value");
                let value = if sv.is_dict_encoded() {
                    let dict = col.dictionary.as_ref().expect("dict-encoded");
                    dict.get(sv.get_dict_id(doc_id))?
                } else {
                    sv.get_value(doc_id)
                };
                reuse.set(&col.spec.name, value);
            }
        }
        for (name, provider) in &self.virtual_columns {
            reuse.set(name, provider.value(doc_id));
        }
        Ok(())
    }

    /// Permutation of docIds visiting rows in ascending order of `column`.
    /// Insertion order is preserved within equal values.
    pub fn sorted_doc_id_iteration(&self, column: &str) -> Result<Vec<DocId>> {
        let idx = self.column_index.get(column).ok_or_else(|| {
            Error::new(ErrorKind::Schema, format!("Unknown column: {}", column))
        })?;
        let col = &self.columns[*idx];
        if !col.spec.single_value {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Sorted iteration requires a single-value column: {}", column),
            ));
        }
        let dictionary = col.dictionary.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("Sorted iteration requires a dictionary: {}", column),
            )
        })?;
        let inverted = col.inverted.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("Sorted iteration requires an inverted index: {}", column),
            )
        })?;

        let num_docs = self.num_docs_indexed();
        let mut dict_ids: Vec<u32> = (0..dictionary.len()).collect();
        dict_ids.sort_by(|a, b| dictionary.compare(*a, *b));

        let mut out: Vec<DocId> = Vec::with_capacity(num_docs as usize);
        for dict_id in dict_ids {
            out.extend(inverted.doc_ids(dict_id, num_docs).iter());
        }

        if out.len() != num_docs as usize {
            return Err(Error::new(
                ErrorKind::Internal,
                format!(
                    "Sorted iteration over {} covered {} of {} docs",
                    column,
                    out.len(),
                    num_docs
                ),
            ));
        }
        Ok(out)
    }

    /// Populate bloom filters from the dictionaries of the configured
    /// columns. Called by the segment builder at seal time; until then
    /// `data_source` reports no bloom filter.
    pub fn seal_bloom_filters(&self) -> Result<()> {
        for col in &self.columns {
            if !col.wants_bloom {
                continue;
            }
            let dictionary = col.dictionary.as_ref().ok_or_else(|| {
                Error::new(
                    ErrorKind::Internal,
                    format!("Bloom column {} has no dictionary", col.spec.name),
                )
            })?;

            let cardinality = dictionary.len();
            let mut filter =
                BloomFilter::with_expected_insertions(cardinality as usize, BLOOM_FPP);
            for id in 0..cardinality {
                filter.add(&dictionary.get(id)?);
            }
            *col.bloom.write() = Some(Arc::new(filter));
        }
        Ok(())
    }

    /// Release all resources. Appends a stats record first when the
    /// segment ran off-heap and indexed at least one row.
    pub fn destroy(self) {
        let num_docs = self.num_docs_indexed();

        if self.off_heap && num_docs > 0 {
            if let Some(history) = &self.stats_history {
                let mut columns = HashMap::new();
                for col in &self.columns {
                    if let Some(dictionary) = &col.dictionary {
                        columns.insert(
                            col.spec.name.clone(),
                            ColumnStats {
                                cardinality: dictionary.len(),
                                avg_value_size: dictionary.avg_value_size(),
                            },
                        );
                    }
                }
                history.append(SegmentStats {
                    segment_name: self.name.clone(),
                    rows_consumed: self.counters.rows_consumed.load(Ordering::Relaxed),
                    rows_indexed: num_docs as u64,
                    bytes_used: self.memory_manager.total_allocated() as u64,
                    seconds: self.created_at.elapsed().as_secs(),
                    columns,
                    recorded_at: Utc::now(),
                });
            }
        }

        if let Some(map) = &self.record_id_map {
            map.lock().clear();
        }
        self.memory_manager.release_all();
        info!("Destroyed segment {} ({} docs)", self.name, num_docs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;

    fn base_schema() -> Schema {
        Schema::new(vec![
            FieldSpec::dimension("dim", DataType::String),
            FieldSpec::metric("metric", DataType::Long),
            FieldSpec::time("time", DataType::Long),
        ])
        .unwrap()
    }

    fn row(dim: &str, metric: i64, time: i64) -> Row {
        let mut r = Row::new();
        r.set("dim", Value::String(dim.to_string()));
        r.set("metric", Value::Long(metric));
        r.set("time", Value::Long(time));
        r
    }

    fn config(capacity: usize) -> SegmentConfig {
        SegmentConfig::new("seg_0", "events", base_schema(), capacity)
    }

    #[test]
    fn test_simple_append() {
        let segment = MutableSegment::new(
            config(4).with_inverted_index_columns(&["dim"]),
        )
        .unwrap();

        assert!(segment.index(&row("a", 1, 100), None).unwrap());
        assert!(segment.index(&row("b", 2, 200), None).unwrap());
        assert!(segment.index(&row("a", 3, 150), None).unwrap());

        assert_eq!(segment.num_docs_indexed(), 3);

        let dim = segment.data_source("dim").unwrap();
        let dict = dim.dictionary.as_ref().unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.index_of(&Value::String("a".to_string())), Some(0));
        assert_eq!(dict.index_of(&Value::String("b".to_string())), Some(1));

        let inverted = dim.inverted.as_ref().unwrap();
        assert_eq!(inverted.doc_ids(0).iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(inverted.doc_ids(1).iter().collect::<Vec<_>>(), vec![1]);

        let metadata = segment.segment_metadata();
        assert_eq!(metadata.min_time(), Some(100));
        assert_eq!(metadata.max_time(), Some(200));
    }

    #[test]
    fn test_aggregation_collapse() {
        let segment = MutableSegment::new(
            config(1000)
                .with_no_dictionary_columns(&["metric"])
                .with_aggregate_metrics(),
        )
        .unwrap();
        assert!(segment.aggregate_metrics_enabled());

        segment.index(&row("a", 1, 100), None).unwrap();
        segment.index(&row("a", 4, 100), None).unwrap();
        segment.index(&row("b", 5, 200), None).unwrap();

        assert_eq!(segment.num_docs_indexed(), 2);
        assert_eq!(segment.num_aggregated_keys(), Some(2));

        let metric = segment.data_source("metric").unwrap();
        assert_eq!(metric.value(0).unwrap(), FieldValue::Single(Value::Long(5)));
        assert_eq!(metric.value(1).unwrap(), FieldValue::Single(Value::Long(5)));

        let metadata = segment.segment_metadata();
        assert_eq!(metadata.rows_consumed(), 3);
    }

    #[test]
    fn test_aggregation_disabled_by_multi_value_dimension() {
        let schema = Schema::new(vec![
            FieldSpec::dimension("dim", DataType::String).multi_value(),
            FieldSpec::metric("metric", DataType::Long),
            FieldSpec::time("time", DataType::Long),
        ])
        .unwrap();
        let segment = MutableSegment::new(
            SegmentConfig::new("seg_0", "events", schema, 100)
                .with_no_dictionary_columns(&["metric"])
                .with_aggregate_metrics(),
        )
        .unwrap();
        assert!(!segment.aggregate_metrics_enabled());

        let mut r = Row::new();
        r.set_multi("dim", vec![Value::String("a".to_string())]);
        r.set("metric", Value::Long(1));
        r.set("time", Value::Long(100));
        segment.index(&r, None).unwrap();
        segment.index(&r, None).unwrap();

        // No collapse: every row gets its own docId
        assert_eq!(segment.num_docs_indexed(), 2);
    }

    #[test]
    fn test_capacity_bound() {
        let segment = MutableSegment::new(config(3)).unwrap();

        assert!(segment.index(&row("a", 1, 100), None).unwrap());
        assert!(segment.index(&row("b", 2, 200), None).unwrap());
        assert!(!segment.index(&row("c", 3, 300), None).unwrap());

        let err = segment.index(&row("d", 4, 400), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Capacity);
        assert_eq!(segment.num_docs_indexed(), 3);
    }

    #[test]
    fn test_sorted_iteration() {
        let schema = Schema::new(vec![FieldSpec::dimension("x", DataType::Int)]).unwrap();
        let segment = MutableSegment::new(
            SegmentConfig::new("seg_0", "events", schema, 10)
                .with_inverted_index_columns(&["x"]),
        )
        .unwrap();

        for v in [3, 1, 2, 1, 3] {
            let mut r = Row::new();
            r.set("x", Value::Int(v));
            segment.index(&r, None).unwrap();
        }

        assert_eq!(
            segment.sorted_doc_id_iteration("x").unwrap(),
            vec![1, 3, 2, 0, 4]
        );
    }

    #[test]
    fn test_sorted_iteration_requires_inverted_index() {
        let segment = MutableSegment::new(config(10)).unwrap();
        segment.index(&row("a", 1, 100), None).unwrap();
        assert!(segment.sorted_doc_id_iteration("dim").is_err());
    }

    #[test]
    fn test_multi_value_cap_leaves_state_unchanged() {
        let schema = Schema::new(vec![
            FieldSpec::dimension("tags", DataType::String).multi_value(),
            FieldSpec::time("time", DataType::Long),
        ])
        .unwrap();
        let segment =
            MutableSegment::new(SegmentConfig::new("seg_0", "events", schema, 10)).unwrap();

        let mut ok = Row::new();
        ok.set_multi("tags", vec![Value::String("t0".to_string())]);
        ok.set("time", Value::Long(100));
        segment.index(&ok, None).unwrap();

        let mut bad = Row::new();
        bad.set_multi(
            "tags",
            (0..=MAX_VALUES_PER_MV_ENTRY)
                .map(|i| Value::String(format!("t{}", i)))
                .collect(),
        );
        bad.set("time", Value::Long(200));
        let err = segment.index(&bad, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Capacity);

        // Rejected before any state change
        assert_eq!(segment.num_docs_indexed(), 1);
        let tags = segment.data_source("tags").unwrap();
        assert_eq!(tags.dictionary.as_ref().unwrap().len(), 1);
        let metadata = segment.segment_metadata();
        assert_eq!(metadata.max_time(), Some(100));
    }

    #[test]
    fn test_record_round_trip() {
        let segment = MutableSegment::new(config(10)).unwrap();
        let rows = [row("a", 1, 100), row("b", 2, 200), row("a", 3, 150)];
        for r in &rows {
            segment.index(r, None).unwrap();
        }

        let mut reuse = Row::new();
        for (d, expected) in rows.iter().enumerate() {
            segment.record(d as DocId, &mut reuse).unwrap();
            assert_eq!(reuse.values, expected.values);
        }
        assert!(segment.record(3, &mut reuse).is_err());
    }

    #[test]
    fn test_postings_match_forward_index() {
        let schema = Schema::new(vec![FieldSpec::dimension("x", DataType::Int)]).unwrap();
        let segment = MutableSegment::new(
            SegmentConfig::new("seg_0", "events", schema, 100)
                .with_inverted_index_columns(&["x"]),
        )
        .unwrap();

        for i in 0..100 {
            let mut r = Row::new();
            r.set("x", Value::Int(i % 7));
            segment.index(&r, None).unwrap();
        }

        let ds = segment.data_source("x").unwrap();
        let dict = ds.dictionary.as_ref().unwrap();
        let inverted = ds.inverted.as_ref().unwrap();
        let mut covered = 0u64;
        for dict_id in 0..dict.len() {
            let postings = inverted.doc_ids(dict_id);
            covered += postings.len();
            let mut previous = None;
            for doc_id in postings.iter() {
                // Sorted, below the bound, and consistent with the forward index
                assert!(previous.map_or(true, |p| p < doc_id));
                assert!(doc_id < ds.num_docs);
                assert_eq!(
                    ds.value(doc_id).unwrap(),
                    FieldValue::Single(dict.get(dict_id).unwrap())
                );
                previous = Some(doc_id);
            }
        }
        assert_eq!(covered, ds.num_docs as u64);
    }

    #[test]
    fn test_validation_errors() {
        let segment = MutableSegment::new(config(10)).unwrap();

        let mut unknown = row("a", 1, 100);
        unknown.set("mystery", Value::Int(1));
        assert_eq!(
            segment.index(&unknown, None).unwrap_err().kind,
            ErrorKind::Schema
        );

        let mut missing = Row::new();
        missing.set("dim", Value::String("a".to_string()));
        assert_eq!(
            segment.index(&missing, None).unwrap_err().kind,
            ErrorKind::Schema
        );

        let mut wrong_type = row("a", 1, 100);
        wrong_type.set("metric", Value::Int(1));
        assert_eq!(
            segment.index(&wrong_type, None).unwrap_err().kind,
            ErrorKind::TypeCast
        );

        assert_eq!(segment.num_docs_indexed(), 0);
    }

    #[test]
    fn test_no_dictionary_string_rejected() {
        let result = MutableSegment::new(config(10).with_no_dictionary_columns(&["dim"]));
        assert_eq!(result.unwrap_err().kind, ErrorKind::Schema);
    }

    #[test]
    fn test_inverted_index_requires_dictionary() {
        let result = MutableSegment::new(
            config(10)
                .with_no_dictionary_columns(&["metric"])
                .with_inverted_index_columns(&["metric"]),
        );
        assert_eq!(result.unwrap_err().kind, ErrorKind::Schema);
    }

    #[test]
    fn test_ingestion_time_metadata() {
        let segment = MutableSegment::new(config(10)).unwrap();
        let meta = RowMetadata { ingestion_time_ms: Some(5000) };
        segment.index(&row("a", 1, 100), Some(&meta)).unwrap();
        let earlier = RowMetadata { ingestion_time_ms: Some(4000) };
        segment.index(&row("b", 2, 200), Some(&earlier)).unwrap();

        let metadata = segment.segment_metadata();
        assert_eq!(metadata.latest_ingestion_time_ms(), Some(5000));
        assert!(metadata.last_indexed_time_ms().is_some());
        assert_eq!(metadata.total_docs(), 2);
    }

    #[test]
    fn test_bloom_filter_sealed_from_dictionary() {
        let segment = MutableSegment::new(
            config(10).with_bloom_filter_columns(&["dim"]),
        )
        .unwrap();
        segment.index(&row("a", 1, 100), None).unwrap();
        segment.index(&row("b", 2, 200), None).unwrap();

        assert!(segment.data_source("dim").unwrap().bloom.is_none());

        segment.seal_bloom_filters().unwrap();
        let bloom = segment.data_source("dim").unwrap().bloom.unwrap();
        assert!(bloom.might_contain(&Value::String("a".to_string())));
        assert!(bloom.might_contain(&Value::String("b".to_string())));
    }

    struct DocIdProvider;

    impl VirtualColumnProvider for DocIdProvider {
        fn field_spec(&self) -> FieldSpec {
            FieldSpec::dimension("$docId", DataType::Int)
        }

        fn value(&self, doc_id: DocId) -> Value {
            Value::Int(doc_id as i32)
        }
    }

    #[test]
    fn test_virtual_column_delegates_to_provider() {
        let segment = MutableSegment::new(
            config(10).with_virtual_column("$docId", Arc::new(DocIdProvider)),
        )
        .unwrap();
        segment.index(&row("a", 1, 100), None).unwrap();
        segment.index(&row("b", 2, 200), None).unwrap();

        let ds = segment.data_source("$docId").unwrap();
        assert_eq!(ds.value(1).unwrap(), FieldValue::Single(Value::Int(1)));

        let mut reuse = Row::new();
        segment.record(0, &mut reuse).unwrap();
        assert_eq!(reuse.get("$docId"), Some(&FieldValue::Single(Value::Int(0))));
    }

    #[test]
    fn test_destroy_appends_stats() {
        let dir = tempfile::tempdir().unwrap();
        let history =
            Arc::new(StatsHistory::open(dir.path().join("stats.jsonl")).unwrap());
        let manager = Arc::new(MemoryManager::off_heap());

        let segment = MutableSegment::new(
            SegmentConfig::new("seg_0", "events", base_schema(), 10)
                .with_off_heap(manager)
                .with_stats_history(Arc::clone(&history)),
        )
        .unwrap();
        segment.index(&row("a", 1, 100), None).unwrap();
        segment.index(&row("b", 2, 200), None).unwrap();
        segment.destroy();

        assert_eq!(history.len(), 1);
        assert_eq!(history.estimated_cardinality("dim"), 2);
    }

    #[test]
    fn test_reader_sees_fully_published_rows() {
        let segment = Arc::new(
            MutableSegment::new(config(2000).with_inverted_index_columns(&["dim"])).unwrap(),
        );
        let total = 2000u32;

        crossbeam::thread::scope(|scope| {
            let writer = Arc::clone(&segment);
            scope.spawn(move |_| {
                for i in 0..total {
                    let r = row(&format!("k{}", i % 50), i as i64, 100 + i as i64);
                    writer.index(&r, None).unwrap();
                }
            });

            let reader = Arc::clone(&segment);
            scope.spawn(move |_| {
                let mut reuse = Row::new();
                loop {
                    let n = reader.num_docs_indexed();
                    for d in (0..n).step_by(61) {
                        reader.record(d, &mut reuse).unwrap();
                        assert_eq!(
                            reuse.get("metric"),
                            Some(&FieldValue::Single(Value::Long(d as i64)))
                        );
                        assert_eq!(
                            reuse.get("dim"),
                            Some(&FieldValue::Single(Value::String(format!("k{}", d % 50))))
                        );
                    }
                    if n == total {
                        break;
                    }
                }
            });
        })
        .unwrap();

        assert_eq!(segment.num_docs_indexed(), total);
    }
}
