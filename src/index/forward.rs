use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DataType, DocId, MAX_VALUES_PER_MV_ENTRY, Value};
use crate::memory::manager::MemoryManager;
use crate::memory::slots::FixedSlotStore;

/// Single-value forward index: one fixed-width slot per document.
///
/// Dictionary columns store the 4-byte dictionary id; no-dictionary
/// columns store the raw value at its type width. Slot writes happen
/// strictly before the segment publishes the visibility counter, so a
/// reader that bounds itself by the counter never observes a torn slot.
pub struct FixedWidthForwardIndex {
    slots: FixedSlotStore,
    data_type: DataType,
    dict_encoded: bool,
}

impl FixedWidthForwardIndex {
    /// Forward index of dictionary ids
    pub fn dict_encoded(
        manager: Arc<MemoryManager>,
        context: String,
        initial_capacity: usize,
    ) -> Result<Self> {
        Ok(FixedWidthForwardIndex {
            slots: FixedSlotStore::new(manager, context, 4, initial_capacity)?,
            data_type: DataType::Int,
            dict_encoded: true,
        })
    }

    /// Forward index of raw values, for no-dictionary columns
    pub fn raw(
        manager: Arc<MemoryManager>,
        context: String,
        data_type: DataType,
        initial_capacity: usize,
    ) -> Result<Self> {
        let width = data_type.fixed_width().ok_or_else(|| {
            Error::new(
                ErrorKind::Schema,
                format!("No-dictionary column cannot be {:?}", data_type),
            )
        })?;
        Ok(FixedWidthForwardIndex {
            slots: FixedSlotStore::new(manager, context, width, initial_capacity)?,
            data_type,
            dict_encoded: false,
        })
    }

    pub fn is_dict_encoded(&self) -> bool {
        self.dict_encoded
    }

    pub fn set_dict_id(&self, doc_id: DocId, dict_id: u32) -> Result<()> {
        debug_assert!(self.dict_encoded);
        self.slots.ensure_slot(doc_id as usize)?;
        self.slots.write_i32(doc_id as usize, dict_id as i32);
        Ok(())
    }

    pub fn get_dict_id(&self, doc_id: DocId) -> u32 {
        debug_assert!(self.dict_encoded);
        self.slots.read_i32(doc_id as usize) as u32
    }

    pub fn set_value(&self, doc_id: DocId, value: &Value) -> Result<()> {
        self.slots.ensure_slot(doc_id as usize)?;
        let slot = doc_id as usize;
        match (self.data_type, value) {
            (DataType::Int, Value::Int(v)) => self.slots.write_i32(slot, *v),
            (DataType::Long, Value::Long(v)) => self.slots.write_i64(slot, *v),
            (DataType::Float, Value::Float(v)) => self.slots.write_f32(slot, *v),
            (DataType::Double, Value::Double(v)) => self.slots.write_f64(slot, *v),
            _ => {
                return Err(Error::new(
                    ErrorKind::TypeCast,
                    format!("Expected {:?}, got {:?}", self.data_type, value.data_type()),
                ));
            }
        }
        Ok(())
    }

    pub fn get_value(&self, doc_id: DocId) -> Value {
        let slot = doc_id as usize;
        match self.data_type {
            DataType::Int => Value::Int(self.slots.read_i32(slot)),
            DataType::Long => Value::Long(self.slots.read_i64(slot)),
            DataType::Float => Value::Float(self.slots.read_f32(slot)),
            DataType::Double => Value::Double(self.slots.read_f64(slot)),
            // Raw construction rejects variable-width types
            DataType::String | DataType::Bytes => unreachable!(),
        }
    }

    /// Fold `value` into the stored slot with the type's additive
    /// operation. Used by the metric-aggregation path.
    pub fn add_value(&self, doc_id: DocId, value: &Value) -> Result<()> {
        let slot = doc_id as usize;
        match (self.data_type, value) {
            (DataType::Int, Value::Int(v)) => {
                self.slots.write_i32(slot, self.slots.read_i32(slot) + v)
            }
            (DataType::Long, Value::Long(v)) => {
                self.slots.write_i64(slot, self.slots.read_i64(slot) + v)
            }
            (DataType::Float, Value::Float(v)) => {
                self.slots.write_f32(slot, self.slots.read_f32(slot) + v)
            }
            (DataType::Double, Value::Double(v)) => {
                self.slots.write_f64(slot, self.slots.read_f64(slot) + v)
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::TypeCast,
                    format!("Expected {:?}, got {:?}", self.data_type, value.data_type()),
                ));
            }
        }
        Ok(())
    }
}

/// Multi-value forward index: a dense header of (offset, length) per
/// document over a payload of packed dictionary ids. The payload grows in
/// geometric chunks; rows are bounded by `MAX_VALUES_PER_MV_ENTRY`.
pub struct MultiValueForwardIndex {
    headers: FixedSlotStore,
    payload: FixedSlotStore,
    cursor: AtomicUsize,
}

impl MultiValueForwardIndex {
    pub fn new(
        manager: Arc<MemoryManager>,
        context: String,
        capacity: usize,
        avg_values_per_row: usize,
    ) -> Result<Self> {
        let headers = FixedSlotStore::new(
            Arc::clone(&manager),
            format!("{}.headers", context),
            8,
            capacity,
        )?;
        let payload = FixedSlotStore::new(
            manager,
            format!("{}.payload", context),
            4,
            capacity * avg_values_per_row.max(1),
        )?;
        Ok(MultiValueForwardIndex {
            headers,
            payload,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, doc_id: DocId, dict_ids: &[u32]) -> Result<()> {
        if dict_ids.len() > MAX_VALUES_PER_MV_ENTRY {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!(
                    "Multi-value entry has {} values, cap is {}",
                    dict_ids.len(),
                    MAX_VALUES_PER_MV_ENTRY
                ),
            ));
        }

        let offset = self.cursor.load(Ordering::Relaxed);
        if dict_ids.is_empty() {
            self.headers.ensure_slot(doc_id as usize)?;
            self.headers.write_u64(doc_id as usize, (offset as u64) << 32);
            return Ok(());
        }

        self.payload.ensure_slot(offset + dict_ids.len() - 1)?;
        for (i, id) in dict_ids.iter().enumerate() {
            self.payload.write_i32(offset + i, *id as i32);
        }
        self.headers.ensure_slot(doc_id as usize)?;
        self.headers
            .write_u64(doc_id as usize, (offset as u64) << 32 | dict_ids.len() as u64);
        self.cursor.store(offset + dict_ids.len(), Ordering::Release);
        Ok(())
    }

    pub fn get(&self, doc_id: DocId, out: &mut Vec<u32>) {
        out.clear();
        let packed = self.headers.read_u64(doc_id as usize);
        let offset = (packed >> 32) as usize;
        let len = (packed & 0xFFFF_FFFF) as usize;
        for i in 0..len {
            out.push(self.payload.read_i32(offset + i) as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::heap())
    }

    #[test]
    fn test_dict_encoded_slots() {
        let fwd =
            FixedWidthForwardIndex::dict_encoded(manager(), "seg:d.fwd".to_string(), 16).unwrap();
        for doc in 0..100u32 {
            fwd.set_dict_id(doc, doc * 2).unwrap();
        }
        for doc in 0..100u32 {
            assert_eq!(fwd.get_dict_id(doc), doc * 2);
        }
    }

    #[test]
    fn test_raw_values_and_fold() {
        let fwd = FixedWidthForwardIndex::raw(
            manager(),
            "seg:m.fwd".to_string(),
            DataType::Long,
            16,
        )
        .unwrap();
        fwd.set_value(0, &Value::Long(10)).unwrap();
        fwd.add_value(0, &Value::Long(-3)).unwrap();
        assert_eq!(fwd.get_value(0), Value::Long(7));

        let err = fwd.set_value(1, &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeCast);
    }

    #[test]
    fn test_raw_rejects_variable_width() {
        let result = FixedWidthForwardIndex::raw(
            manager(),
            "seg:s.fwd".to_string(),
            DataType::String,
            16,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_multi_value_round_trip() {
        let mv = MultiValueForwardIndex::new(manager(), "seg:mv.fwd".to_string(), 64, 2).unwrap();
        mv.set(0, &[5, 3, 9]).unwrap();
        mv.set(1, &[]).unwrap();
        mv.set(2, &[1]).unwrap();

        let mut out = Vec::new();
        mv.get(0, &mut out);
        assert_eq!(out, vec![5, 3, 9]);
        mv.get(1, &mut out);
        assert!(out.is_empty());
        mv.get(2, &mut out);
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_multi_value_payload_growth() {
        let mv = MultiValueForwardIndex::new(manager(), "seg:mv.fwd".to_string(), 16, 1).unwrap();
        for doc in 0..200u32 {
            let ids: Vec<u32> = (0..(doc % 7 + 1)).map(|i| doc + i).collect();
            mv.set(doc, &ids).unwrap();
        }
        let mut out = Vec::new();
        for doc in 0..200u32 {
            mv.get(doc, &mut out);
            let expected: Vec<u32> = (0..(doc % 7 + 1)).map(|i| doc + i).collect();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_multi_value_cap() {
        let mv = MultiValueForwardIndex::new(manager(), "seg:mv.fwd".to_string(), 16, 1).unwrap();
        let too_many: Vec<u32> = (0..=MAX_VALUES_PER_MV_ENTRY as u32).collect();
        let err = mv.set(0, &too_many).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Capacity);

        let exactly: Vec<u32> = (0..MAX_VALUES_PER_MV_ENTRY as u32).collect();
        mv.set(0, &exactly).unwrap();
    }
}
