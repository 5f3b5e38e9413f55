pub mod core;
pub mod memory;
pub mod dictionary;
pub mod index;
pub mod segment;

/*
┌─────────────────────────────────────────────────────────────────────────┐
│                       RTSEGMENT STRUCT ARCHITECTURE                      │
└─────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── SEGMENT LAYER ────────────────────────────┐
│                                                                          │
│  ┌────────────────────────────────────────────────────────────────┐    │
│  │                     struct MutableSegment                       │    │
│  │  ┌──────────────────────────────────────────────────────────┐ │    │
│  │  │ schema: Arc<Schema>              // Column specs          │ │    │
│  │  │ columns: Vec<ColumnIndexes>      // Per-column structures │ │    │
│  │  │ record_id_map: Option<Mutex<RecordIdMap>> // Aggregation  │ │    │
│  │  │ counters: Arc<SegmentCounters>   // Visibility counter    │ │    │
│  │  │ memory_manager: Arc<MemoryManager> // Off-heap regions    │ │    │
│  │  │ stats_history: Option<Arc<StatsHistory>> // Sizing input  │ │    │
│  │  └──────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────┘    │
│                                                                          │
│  ┌──────────────────────┐  ┌──────────────────────┐                     │
│  │ struct               │  │ struct               │                     │
│  │ ColumnDataSource     │  │ SegmentMetadataView  │                     │
│  │ • field_spec         │  │ • counters (live)    │                     │
│  │ • num_docs (bound)   │  │ • min/max time       │                     │
│  │ • forward/inverted   │  │ • rows consumed      │                     │
│  │ • dictionary/bloom   │  └──────────────────────┘                     │
│  └──────────────────────┘                                               │
└──────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── INDEXING LAYER ───────────────────────────┐
│                                                                          │
│  ┌──────────────────────┐  ┌──────────────────────┐                     │
│  │ enum                 │  │ struct               │                     │
│  │ MutableDictionary    │  │ RealtimeInvertedIndex│                     │
│  │ • value → stable id  │  │ • dictId → Roaring   │                     │
│  │ • chunked id → value │  │ • bounded snapshots  │                     │
│  └──────────────────────┘  └──────────────────────┘                     │
│                                                                          │
│  ┌──────────────────────┐  ┌──────────────────────┐  ┌───────────────┐ │
│  │ struct               │  │ struct               │  │ struct        │ │
│  │ FixedWidthForward    │  │ MultiValueForward    │  │ RecordIdMap   │ │
│  │ • slot per docId     │  │ • header + payload   │  │ • dim key →   │ │
│  │ • raw or dictId      │  │ • geometric chunks   │  │   docId       │ │
│  └──────────────────────┘  └──────────────────────┘  └───────────────┘ │
└──────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── MEMORY LAYER ─────────────────────────────┐
│                                                                          │
│  ┌──────────────────────┐  ┌──────────────────────┐  ┌───────────────┐ │
│  │ struct MemoryManager │  │ struct PinnedBuffer  │  │ struct        │ │
│  │ • named regions      │  │ • raw ptr, fixed len │  │ FixedSlotStore│ │
│  │ • heap/mmap modes    │  │ • never relocates    │  │ • O(1) chunk  │ │
│  │ • release on destroy │  └──────────────────────┘  │   addressing  │ │
│  └──────────────────────┘                            └───────────────┘ │
└──────────────────────────────────────────────────────────────────────────┘

  Row ──index()──> dictionaries ──dictIds──> RecordIdMap (docId)
      ──> forward index ──> inverted index ──> num_docs release-store
  Readers: acquire-load num_docs, bound every traversal by it.
*/
