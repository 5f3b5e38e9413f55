pub mod primitive;
pub mod bytes;

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DataType, Value};
use crate::memory::manager::MemoryManager;
use self::bytes::BytesDictionary;
use self::primitive::PrimitiveDictionary;

/// Per-column mutable dictionary: value → stable insertion-order id.
///
/// One variant per primitive type plus a byte-backed variant covering
/// String and Bytes columns. The variant is chosen once from the column's
/// declared type; a mismatched runtime value is a type-cast error.
pub enum MutableDictionary {
    Int(PrimitiveDictionary<i32>),
    Long(PrimitiveDictionary<i64>),
    Float(PrimitiveDictionary<f32>),
    Double(PrimitiveDictionary<f64>),
    String(BytesDictionary),
    Bytes(BytesDictionary),
}

impl MutableDictionary {
    pub fn new(
        data_type: DataType,
        manager: Arc<MemoryManager>,
        context: String,
        initial_capacity: usize,
        avg_value_size: usize,
    ) -> Result<Self> {
        let dict = match data_type {
            DataType::Int => {
                MutableDictionary::Int(PrimitiveDictionary::new(manager, context, initial_capacity)?)
            }
            DataType::Long => {
                MutableDictionary::Long(PrimitiveDictionary::new(manager, context, initial_capacity)?)
            }
            DataType::Float => {
                MutableDictionary::Float(PrimitiveDictionary::new(manager, context, initial_capacity)?)
            }
            DataType::Double => {
                MutableDictionary::Double(PrimitiveDictionary::new(manager, context, initial_capacity)?)
            }
            DataType::String => MutableDictionary::String(BytesDictionary::new(
                manager,
                context,
                initial_capacity,
                avg_value_size,
            )?),
            DataType::Bytes => MutableDictionary::Bytes(BytesDictionary::new(
                manager,
                context,
                initial_capacity,
                avg_value_size,
            )?),
        };
        Ok(dict)
    }

    fn type_mismatch(&self, value: &Value) -> Error {
        Error::new(
            ErrorKind::TypeCast,
            format!(
                "Expected {:?} value, got {:?}",
                self.data_type(),
                value.data_type()
            ),
        )
    }

    pub fn data_type(&self) -> DataType {
        match self {
            MutableDictionary::Int(_) => DataType::Int,
            MutableDictionary::Long(_) => DataType::Long,
            MutableDictionary::Float(_) => DataType::Float,
            MutableDictionary::Double(_) => DataType::Double,
            MutableDictionary::String(_) => DataType::String,
            MutableDictionary::Bytes(_) => DataType::Bytes,
        }
    }

    /// Insert if absent and return the assigned id. Writer-side only.
    pub fn index(&self, value: &Value) -> Result<u32> {
        match (self, value) {
            (MutableDictionary::Int(d), Value::Int(v)) => d.index(*v),
            (MutableDictionary::Long(d), Value::Long(v)) => d.index(*v),
            (MutableDictionary::Float(d), Value::Float(v)) => d.index(*v),
            (MutableDictionary::Double(d), Value::Double(v)) => d.index(*v),
            (MutableDictionary::String(d), Value::String(v)) => d.index(v.as_bytes()),
            (MutableDictionary::Bytes(d), Value::Bytes(v)) => d.index(v),
            _ => Err(self.type_mismatch(value)),
        }
    }

    /// Id for a value, `None` until an insertion completes
    pub fn index_of(&self, value: &Value) -> Option<u32> {
        match (self, value) {
            (MutableDictionary::Int(d), Value::Int(v)) => d.index_of(*v),
            (MutableDictionary::Long(d), Value::Long(v)) => d.index_of(*v),
            (MutableDictionary::Float(d), Value::Float(v)) => d.index_of(*v),
            (MutableDictionary::Double(d), Value::Double(v)) => d.index_of(*v),
            (MutableDictionary::String(d), Value::String(v)) => d.index_of(v.as_bytes()),
            (MutableDictionary::Bytes(d), Value::Bytes(v)) => d.index_of(v),
            _ => None,
        }
    }

    pub fn get(&self, id: u32) -> Result<Value> {
        if id >= self.len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Dictionary id {} out of range (len {})", id, self.len()),
            ));
        }
        let value = match self {
            MutableDictionary::Int(d) => Value::Int(d.get(id)),
            MutableDictionary::Long(d) => Value::Long(d.get(id)),
            MutableDictionary::Float(d) => Value::Float(d.get(id)),
            MutableDictionary::Double(d) => Value::Double(d.get(id)),
            MutableDictionary::String(d) => Value::String(
                String::from_utf8(d.get(id)).map_err(|_| {
                    Error::new(ErrorKind::Internal, "Invalid UTF-8 in dictionary".to_string())
                })?,
            ),
            MutableDictionary::Bytes(d) => Value::Bytes(d.get(id)),
        };
        Ok(value)
    }

    /// Live cardinality
    pub fn len(&self) -> u32 {
        match self {
            MutableDictionary::Int(d) => d.len(),
            MutableDictionary::Long(d) => d.len(),
            MutableDictionary::Float(d) => d.len(),
            MutableDictionary::Double(d) => d.len(),
            MutableDictionary::String(d) => d.len(),
            MutableDictionary::Bytes(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total ordering consistent with the value type's natural order
    pub fn compare(&self, a: u32, b: u32) -> CmpOrdering {
        match self {
            MutableDictionary::Int(d) => d.compare(a, b),
            MutableDictionary::Long(d) => d.compare(a, b),
            MutableDictionary::Float(d) => d.compare(a, b),
            MutableDictionary::Double(d) => d.compare(a, b),
            MutableDictionary::String(d) => d.compare(a, b),
            MutableDictionary::Bytes(d) => d.compare(a, b),
        }
    }

    pub fn avg_value_size(&self) -> u32 {
        match self {
            MutableDictionary::Int(d) => d.avg_value_size(),
            MutableDictionary::Long(d) => d.avg_value_size(),
            MutableDictionary::Float(d) => d.avg_value_size(),
            MutableDictionary::Double(d) => d.avg_value_size(),
            MutableDictionary::String(d) => d.avg_value_size(),
            MutableDictionary::Bytes(d) => d.avg_value_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(data_type: DataType) -> MutableDictionary {
        let manager = Arc::new(MemoryManager::heap());
        MutableDictionary::new(data_type, manager, "seg:col.dict".to_string(), 16, 8).unwrap()
    }

    #[test]
    fn test_string_dictionary_round_trip() {
        let d = dict(DataType::String);
        let a = d.index(&Value::String("a".to_string())).unwrap();
        let b = d.index(&Value::String("b".to_string())).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(d.get(0).unwrap(), Value::String("a".to_string()));
        assert_eq!(d.index_of(&Value::String("b".to_string())), Some(1));
        assert_eq!(d.index_of(&Value::String("c".to_string())), None);
    }

    #[test]
    fn test_index_of_equals_id_for_all_ids() {
        let d = dict(DataType::Long);
        for v in [5i64, -3, 0, 100, 7] {
            d.index(&Value::Long(v)).unwrap();
        }
        for id in 0..d.len() {
            let value = d.get(id).unwrap();
            assert_eq!(d.index_of(&value), Some(id));
        }
    }

    #[test]
    fn test_type_mismatch_is_fatal() {
        let d = dict(DataType::Int);
        let err = d.index(&Value::String("oops".to_string())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeCast);
    }

    #[test]
    fn test_get_out_of_range() {
        let d = dict(DataType::Int);
        d.index(&Value::Int(1)).unwrap();
        assert!(d.get(5).is_err());
    }
}
