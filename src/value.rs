//! Typed column values and the schema-driven row encoding.
//!
//! Grounded on the teacher's `storage/schema/types.rs` `Type` enum, but
//! replaces its single-byte-tagged fixed set with a tagged value that
//! carries its own payload (`Value`), per the typed-values redesign:
//! no global truncation cap, strings are bounded by the owning column's
//! declared size at encode time.

use crate::error::{StorageError, StorageResult};
use crate::io::{decode_fixed_str, encode_fixed_str};

/// One of the five column type tags a table schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    Char,
    VarChar,
}

impl ColumnType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INT" => Some(ColumnType::Int),
            "BIGINT" => Some(ColumnType::BigInt),
            "FLOAT" => Some(ColumnType::Float),
            "CHAR" => Some(ColumnType::Char),
            "VARCHAR" => Some(ColumnType::VarChar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Char => "CHAR",
            ColumnType::VarChar => "VARCHAR",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::BigInt => 1,
            ColumnType::Float => 2,
            ColumnType::Char => 3,
            ColumnType::VarChar => 4,
        }
    }

    fn from_tag(tag: u8) -> StorageResult<Self> {
        match tag {
            0 => Ok(ColumnType::Int),
            1 => Ok(ColumnType::BigInt),
            2 => Ok(ColumnType::Float),
            3 => Ok(ColumnType::Char),
            4 => Ok(ColumnType::VarChar),
            other => Err(StorageError::other(format!("invalid column type tag {}", other))),
        }
    }
}

pub const MAX_COLUMN_NAME_LEN: usize = 64;
pub const MAX_COLUMNS: usize = 32;

/// A single column descriptor, part of a table's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    /// Declared size: ignored for INT/BIGINT/FLOAT, the `N` in
    /// `CHAR(N)`/`VARCHAR(N)` otherwise.
    pub declared_size: u8,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType, declared_size: u8, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            declared_size,
            nullable,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Int, 0, true)
    }

    /// On-disk width of this column's value, per §4.3: 4 for INT/FLOAT,
    /// 8 for BIGINT, `declared_size + 1` for CHAR/VARCHAR.
    pub fn width(&self) -> usize {
        match self.col_type {
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::BigInt => 8,
            ColumnType::Char | ColumnType::VarChar => self.declared_size as usize + 1,
        }
    }

    fn encode_descriptor(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_COLUMN_NAME_LEN + 3);
        buf.extend_from_slice(&encode_fixed_str(&self.name, MAX_COLUMN_NAME_LEN));
        buf.push(self.col_type.tag());
        buf.push(self.declared_size);
        buf.push(self.nullable as u8);
        buf
    }

    fn decode_descriptor(bytes: &[u8]) -> StorageResult<Self> {
        let name = decode_fixed_str(&bytes[0..MAX_COLUMN_NAME_LEN]);
        let col_type = ColumnType::from_tag(bytes[MAX_COLUMN_NAME_LEN])?;
        let declared_size = bytes[MAX_COLUMN_NAME_LEN + 1];
        let nullable = bytes[MAX_COLUMN_NAME_LEN + 2] != 0;
        Ok(Self {
            name,
            col_type,
            declared_size,
            nullable,
        })
    }

    pub const DESCRIPTOR_WIDTH: usize = MAX_COLUMN_NAME_LEN + 3;
}

pub fn encode_columns(columns: &[Column]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(columns.len() * Column::DESCRIPTOR_WIDTH);
    for c in columns {
        buf.extend_from_slice(&c.encode_descriptor());
    }
    buf
}

pub fn decode_columns(bytes: &[u8], count: usize) -> StorageResult<Vec<Column>> {
    (0..count)
        .map(|i| {
            let start = i * Column::DESCRIPTOR_WIDTH;
            Column::decode_descriptor(&bytes[start..start + Column::DESCRIPTOR_WIDTH])
        })
        .collect()
}

/// A runtime column value. `Str` covers both CHAR and VARCHAR; the
/// distinction only matters at encode time, where the declared width
/// bounds the byte representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    BigInt(i64),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::BigInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn matches_type(&self, col_type: ColumnType) -> bool {
        matches!(
            (self, col_type),
            (Value::Int(_), ColumnType::Int)
                | (Value::BigInt(_), ColumnType::BigInt)
                | (Value::Float(_), ColumnType::Float)
                | (Value::Str(_), ColumnType::Char)
                | (Value::Str(_), ColumnType::VarChar)
        )
    }
}

/// `1 + Σ column_width(c)`: the leading flag byte plus every field's
/// fixed on-disk width. Constant for a given schema.
pub fn record_size(columns: &[Column]) -> usize {
    1 + columns.iter().map(Column::width).sum::<usize>()
}

/// Flag-byte bit marking a record as a tombstone (logically deleted,
/// not physically reclaimed).
pub const FLAG_DELETED: u8 = 0b0000_0001;

/// Field-by-field serialization of `values` against `columns`, prefixed
/// by a flag byte. `buf` must be exactly `record_size(columns)` bytes.
pub fn serialize(columns: &[Column], values: &[Value], deleted: bool) -> StorageResult<Vec<u8>> {
    if values.len() != columns.len() {
        return Err(StorageError::SchemaMismatch {
            table: String::new(),
            reason: format!(
                "expected {} values, got {}",
                columns.len(),
                values.len()
            ),
        });
    }

    let mut buf = Vec::with_capacity(record_size(columns));
    buf.push(if deleted { FLAG_DELETED } else { 0 });

    for (col, val) in columns.iter().zip(values) {
        if !val.matches_type(col.col_type) {
            return Err(StorageError::SchemaMismatch {
                table: String::new(),
                reason: format!("column '{}' expects {:?}, got {:?}", col.name, col.col_type, val),
            });
        }
        match (col.col_type, val) {
            (ColumnType::Int, Value::Int(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (ColumnType::BigInt, Value::BigInt(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (ColumnType::Float, Value::Float(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (ColumnType::Char, Value::Str(s)) | (ColumnType::VarChar, Value::Str(s)) => {
                buf.extend_from_slice(&encode_fixed_str(s, col.width()));
            }
            _ => unreachable!("matches_type already validated the pairing"),
        }
    }

    debug_assert_eq!(buf.len(), record_size(columns));
    Ok(buf)
}

/// Inverse of [`serialize`]: returns the decoded values and whether the
/// record's tombstone bit was set.
pub fn deserialize(columns: &[Column], bytes: &[u8]) -> StorageResult<(Vec<Value>, bool)> {
    if bytes.len() != record_size(columns) {
        return Err(StorageError::other(format!(
            "record buffer of {} bytes does not match schema width {}",
            bytes.len(),
            record_size(columns)
        )));
    }

    let deleted = bytes[0] & FLAG_DELETED != 0;
    let mut values = Vec::with_capacity(columns.len());
    let mut offset = 1usize;

    for col in columns {
        let width = col.width();
        let field = &bytes[offset..offset + width];
        let value = match col.col_type {
            ColumnType::Int => Value::Int(i32::from_le_bytes(field.try_into().unwrap())),
            ColumnType::BigInt => Value::BigInt(i64::from_le_bytes(field.try_into().unwrap())),
            ColumnType::Float => Value::Float(f32::from_le_bytes(field.try_into().unwrap())),
            ColumnType::Char | ColumnType::VarChar => Value::Str(decode_fixed_str(field)),
        };
        values.push(value);
        offset += width;
    }

    Ok((values, deleted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<Column> {
        vec![
            Column::new("id", ColumnType::Int, 0, false),
            Column::new("name", ColumnType::VarChar, 10, true),
        ]
    }

    #[test]
    fn round_trip_preserves_values() {
        let cols = schema();
        let values = vec![Value::Int(7), Value::Str("hello".to_string())];
        let bytes = serialize(&cols, &values, false).unwrap();
        assert_eq!(bytes.len(), record_size(&cols));

        let (decoded, deleted) = deserialize(&cols, &bytes).unwrap();
        assert!(!deleted);
        assert_eq!(decoded, values);
    }

    #[test]
    fn record_size_is_constant_for_schema() {
        let cols = schema();
        assert_eq!(record_size(&cols), 1 + 4 + 11);
    }

    #[test]
    fn deleted_flag_round_trips() {
        let cols = schema();
        let values = vec![Value::Int(1), Value::Str("a".to_string())];
        let bytes = serialize(&cols, &values, true).unwrap();
        let (_, deleted) = deserialize(&cols, &bytes).unwrap();
        assert!(deleted);
    }

    #[test]
    fn string_longer_than_declared_size_is_truncated_not_rejected() {
        let cols = schema();
        let values = vec![Value::Int(1), Value::Str("way too long for ten".to_string())];
        let bytes = serialize(&cols, &values, false).unwrap();
        let (decoded, _) = deserialize(&cols, &bytes).unwrap();
        assert_eq!(decoded[1], Value::Str("way too la".to_string()));
    }

    #[test]
    fn mismatched_value_count_is_schema_error() {
        let cols = schema();
        let err = serialize(&cols, &[Value::Int(1)], false).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    }
}
