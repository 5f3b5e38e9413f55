use roaring::RoaringBitmap;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, FieldSpec, FieldValue};
use crate::dictionary::MutableDictionary;
use crate::index::bloom::BloomFilter;
use crate::index::forward::{FixedWidthForwardIndex, MultiValueForwardIndex};
use crate::index::inverted::RealtimeInvertedIndex;
use crate::segment::provider::VirtualColumnProvider;

/// Inverted-index reader bound to the visibility counter sampled when
/// the view was created. Every snapshot it hands out is truncated to
/// that bound.
pub struct InvertedIndexReader {
    index: Arc<RealtimeInvertedIndex>,
    bound: u32,
}

impl InvertedIndexReader {
    pub(crate) fn new(index: Arc<RealtimeInvertedIndex>, bound: u32) -> Self {
        InvertedIndexReader { index, bound }
    }

    pub fn doc_ids(&self, dict_id: u32) -> RoaringBitmap {
        self.index.doc_ids(dict_id, self.bound)
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }
}

pub enum ForwardIndexReader {
    SingleValue(Arc<FixedWidthForwardIndex>),
    MultiValue(Arc<MultiValueForwardIndex>),
}

/// Read-only view over one column of a live segment: field spec, the
/// visibility counter sampled at creation, and the column's readers.
/// Safe to hold across queries; rows published later stay invisible.
pub struct ColumnDataSource {
    pub field_spec: FieldSpec,
    pub num_docs: u32,
    pub max_values_per_row: u32,
    pub forward: Option<ForwardIndexReader>,
    pub dictionary: Option<Arc<MutableDictionary>>,
    pub inverted: Option<InvertedIndexReader>,
    pub bloom: Option<Arc<BloomFilter>>,
    pub provider: Option<Arc<dyn VirtualColumnProvider>>,
}

impl ColumnDataSource {
    /// Reconstruct the column's value at `doc_id`
    pub fn value(&self, doc_id: DocId) -> Result<FieldValue> {
        if doc_id >= self.num_docs {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("docId {} out of range ({} visible)", doc_id, self.num_docs),
            ));
        }

        if let Some(provider) = &self.provider {
            return Ok(FieldValue::Single(provider.value(doc_id)));
        }

        match self.forward.as_ref() {
            Some(ForwardIndexReader::SingleValue(forward)) => {
                let value = if forward.is_dict_encoded() {
                    let dict = self.dictionary.as_ref().ok_or_else(|| {
                        Error::new(ErrorKind::Internal, "Dictionary missing".to_string())
                    })?;
                    dict.get(forward.get_dict_id(doc_id))?
                } else {
                    forward.get_value(doc_id)
                };
                Ok(FieldValue::Single(value))
            }
            Some(ForwardIndexReader::MultiValue(forward)) => {
                let dict = self.dictionary.as_ref().ok_or_else(|| {
                    Error::new(ErrorKind::Internal, "Dictionary missing".to_string())
                })?;
                let mut ids = Vec::new();
                forward.get(doc_id, &mut ids);
                let mut values = Vec::with_capacity(ids.len());
                for id in ids {
                    values.push(dict.get(id)?);
                }
                Ok(FieldValue::Multi(values))
            }
            None => Err(Error::new(
                ErrorKind::Internal,
                format!("Column {} has no forward index", self.field_spec.name),
            )),
        }
    }
}
