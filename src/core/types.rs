use serde::{Serialize, Deserialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use crate::core::error::{Error, ErrorKind, Result};

/// Dense per-segment document id, assigned at ingestion and never reused
pub type DocId = u32;

/// Hard cap on entries in a single multi-value cell
pub const MAX_VALUES_PER_MV_ENTRY: usize = 1000;

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
}

impl DataType {
    /// Slot width in bytes for fixed-width types
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            DataType::Int | DataType::Float => Some(4),
            DataType::Long | DataType::Double => Some(8),
            DataType::String | DataType::Bytes => None,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.fixed_width().is_some()
    }
}

/// Role a column plays in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Dimension,
    Metric,
    Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
    pub kind: FieldKind,
    pub single_value: bool,
}

impl FieldSpec {
    pub fn dimension(name: &str, data_type: DataType) -> Self {
        FieldSpec {
            name: name.to_string(),
            data_type,
            kind: FieldKind::Dimension,
            single_value: true,
        }
    }

    pub fn metric(name: &str, data_type: DataType) -> Self {
        FieldSpec {
            name: name.to_string(),
            data_type,
            kind: FieldKind::Metric,
            single_value: true,
        }
    }

    pub fn time(name: &str, data_type: DataType) -> Self {
        FieldSpec {
            name: name.to_string(),
            data_type,
            kind: FieldKind::Time,
            single_value: true,
        }
    }

    pub fn multi_value(mut self) -> Self {
        self.single_value = false;
        self
    }
}

/// Ordered set of columns with an optional distinguished time column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<FieldSpec>,
    pub time_column: Option<String>,
}

impl Schema {
    pub fn new(columns: Vec<FieldSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut time_column = None;

        for spec in &columns {
            if !seen.insert(spec.name.clone()) {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("Duplicate column: {}", spec.name),
                ));
            }
            if spec.kind == FieldKind::Time {
                if time_column.is_some() {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        "More than one time column".to_string(),
                    ));
                }
                if !matches!(spec.data_type, DataType::Int | DataType::Long) {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!("Time column {} must be Int or Long", spec.name),
                    ));
                }
                if !spec.single_value {
                    return Err(Error::new(
                        ErrorKind::Schema,
                        format!("Time column {} cannot be multi-value", spec.name),
                    ));
                }
                time_column = Some(spec.name.clone());
            }
        }

        Ok(Schema { columns, time_column })
    }

    pub fn column(&self, name: &str) -> Option<&FieldSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A single column value, tagged with its runtime type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Bytes(_) => DataType::Bytes,
        }
    }

    /// Widening view for time-column handling
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical byte form, used for bloom filter hashing
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_le_bytes().to_vec(),
            Value::Long(v) => v.to_le_bytes().to_vec(),
            Value::Float(v) => v.to_le_bytes().to_vec(),
            Value::Double(v) => v.to_le_bytes().to_vec(),
            Value::String(v) => v.as_bytes().to_vec(),
            Value::Bytes(v) => v.clone(),
        }
    }

    /// Total ordering consistent with the natural order of the type
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Cell shape: one value for single-value columns, an ordered list otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Single(Value),
    Multi(Vec<Value>),
}

/// One ingested row, keyed by column name
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub values: HashMap<String, FieldValue>,
}

impl Row {
    pub fn new() -> Self {
        Row { values: HashMap::new() }
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), FieldValue::Single(value));
    }

    pub fn set_multi(&mut self, name: &str, values: Vec<Value>) {
        self.values.insert(name.to_string(), FieldValue::Multi(values));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Out-of-band metadata carried with a row by the stream consumer
#[derive(Debug, Clone, Copy, Default)]
pub struct RowMetadata {
    pub ingestion_time_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_rejects_duplicate_columns() {
        let result = Schema::new(vec![
            FieldSpec::dimension("d", DataType::String),
            FieldSpec::dimension("d", DataType::Int),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_time_column_must_be_integral() {
        let result = Schema::new(vec![FieldSpec::time("t", DataType::Double)]);
        assert!(result.is_err());

        let schema = Schema::new(vec![FieldSpec::time("t", DataType::Long)]).unwrap();
        assert_eq!(schema.time_column.as_deref(), Some("t"));
    }

    #[test]
    fn test_value_total_cmp_handles_floats() {
        assert_eq!(
            Value::Double(1.0).total_cmp(&Value::Double(2.0)),
            Ordering::Less
        );
        assert_eq!(
            Value::Float(f32::NAN).total_cmp(&Value::Float(f32::NAN)),
            Ordering::Equal
        );
    }
}
