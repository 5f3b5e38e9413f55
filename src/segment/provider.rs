use crate::core::types::{DocId, FieldSpec, Value};

/// Supplier for columns the segment does not physically store.
///
/// Registered per column at construction; `data_source` and `record`
/// delegate reads for those columns here.
pub trait VirtualColumnProvider: Send + Sync {
    fn field_spec(&self) -> FieldSpec;
    fn value(&self, doc_id: DocId) -> Value;
}
