use parking_lot::RwLock;
use roaring::RoaringBitmap;
use crate::core::types::DocId;

/// Realtime inverted index: dictionary id → compressed bitmap of docIds.
///
/// The single ingestion thread appends postings; readers take bounded
/// snapshots. A snapshot is truncated to the visibility counter the
/// reader captured, so it never exposes a docId from a row that is still
/// being published.
pub struct RealtimeInvertedIndex {
    postings: RwLock<Vec<RoaringBitmap>>,
}

impl RealtimeInvertedIndex {
    pub fn new() -> Self {
        RealtimeInvertedIndex {
            postings: RwLock::new(Vec::new()),
        }
    }

    /// Record that `doc_id` carries `dict_id`. Writer-side only.
    pub fn add(&self, dict_id: u32, doc_id: DocId) {
        let mut postings = self.postings.write();
        if postings.len() <= dict_id as usize {
            postings.resize_with(dict_id as usize + 1, RoaringBitmap::new);
        }
        postings[dict_id as usize].insert(doc_id);
    }

    /// Snapshot of the posting list for `dict_id`, truncated to docIds
    /// below `bound` (the visibility counter sampled by the reader).
    /// Iteration order of the result is ascending.
    pub fn doc_ids(&self, dict_id: u32, bound: u32) -> RoaringBitmap {
        let postings = self.postings.read();
        match postings.get(dict_id as usize) {
            Some(bitmap) => {
                let mut snapshot = bitmap.clone();
                snapshot.remove_range(bound..);
                snapshot
            }
            None => RoaringBitmap::new(),
        }
    }

    /// Number of dictionary ids with a posting list
    pub fn num_postings(&self) -> usize {
        self.postings.read().len()
    }
}

impl Default for RealtimeInvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}
