//! Row serialization.
//!
//! One byte per column leads each cell: 1 marks null, 0 marks a value.
//! Non-null cells follow as: integer 4 bytes little-endian signed, double
//! 8 bytes IEEE-754 little-endian, varchar a 2-byte little-endian length
//! prefix plus UTF-8 bytes. Columns appear in schema order; the row's
//! total length is carried by its container.

use bytes::{Buf, BufMut};
use catalog::TableSchema;
use common::{DbError, DbResult, Row};
use types::{SqlType, Value};

const NULL_FLAG: u8 = 1;
const VALUE_FLAG: u8 = 0;

/// Validates `row` against `schema` and encodes it.
pub fn encode_row(schema: &TableSchema, row: &Row) -> DbResult<Vec<u8>> {
    schema.validate_row(row)?;
    let mut out = Vec::new();
    for value in &row.values {
        match value {
            Value::Null => out.put_u8(NULL_FLAG),
            Value::Int(v) => {
                out.put_u8(VALUE_FLAG);
                out.put_i32_le(*v);
            }
            Value::Double(v) => {
                out.put_u8(VALUE_FLAG);
                out.put_f64_le(*v);
            }
            Value::Varchar(s) => {
                out.put_u8(VALUE_FLAG);
                out.put_u16_le(s.len() as u16);
                out.put_slice(s.as_bytes());
            }
        }
    }
    Ok(out)
}

/// Decodes a row previously produced by [`encode_row`] under the same
/// schema.
pub fn decode_row(schema: &TableSchema, bytes: &[u8]) -> DbResult<Row> {
    let mut buf = bytes;
    let mut values = Vec::with_capacity(schema.len());
    for column in schema.columns() {
        if buf.remaining() < 1 {
            return Err(truncated(&column.name));
        }
        if buf.get_u8() == NULL_FLAG {
            values.push(Value::Null);
            continue;
        }
        let value = match column.ty {
            SqlType::Int => {
                if buf.remaining() < 4 {
                    return Err(truncated(&column.name));
                }
                Value::Int(buf.get_i32_le())
            }
            SqlType::Double => {
                if buf.remaining() < 8 {
                    return Err(truncated(&column.name));
                }
                Value::Double(buf.get_f64_le())
            }
            SqlType::Varchar => {
                if buf.remaining() < 2 {
                    return Err(truncated(&column.name));
                }
                let len = buf.get_u16_le() as usize;
                if buf.remaining() < len {
                    return Err(truncated(&column.name));
                }
                let s = String::from_utf8(buf[..len].to_vec()).map_err(|_| {
                    DbError::CorruptPage(format!(
                        "column '{}' holds invalid UTF-8",
                        column.name
                    ))
                })?;
                buf.advance(len);
                Value::Varchar(s)
            }
        };
        values.push(value);
    }
    if buf.has_remaining() {
        return Err(DbError::CorruptPage(format!(
            "{} trailing bytes after the last column",
            buf.remaining()
        )));
    }
    Ok(Row::new(values))
}

/// Encodes one non-null cell, the payload format of secondary indexes
/// (which store the primary-key cell as their value).
pub fn encode_cell(value: &Value) -> DbResult<Vec<u8>> {
    let mut out = Vec::new();
    match value {
        Value::Int(v) => out.put_i32_le(*v),
        Value::Double(v) => out.put_f64_le(*v),
        Value::Varchar(s) => {
            out.put_u16_le(s.len() as u16);
            out.put_slice(s.as_bytes());
        }
        Value::Null => {
            return Err(DbError::InvalidArgument(
                "null cells have no encoding".into(),
            ));
        }
    }
    Ok(out)
}

/// Decodes a cell written by [`encode_cell`]; the type comes from the
/// schema, never from the bytes.
pub fn decode_cell(ty: SqlType, bytes: &[u8]) -> DbResult<Value> {
    let mut buf = bytes;
    let value = match ty {
        SqlType::Int => {
            if buf.remaining() < 4 {
                return Err(truncated("cell"));
            }
            Value::Int(buf.get_i32_le())
        }
        SqlType::Double => {
            if buf.remaining() < 8 {
                return Err(truncated("cell"));
            }
            Value::Double(buf.get_f64_le())
        }
        SqlType::Varchar => {
            if buf.remaining() < 2 {
                return Err(truncated("cell"));
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                return Err(truncated("cell"));
            }
            let s = String::from_utf8(buf[..len].to_vec())
                .map_err(|_| DbError::CorruptPage("cell holds invalid UTF-8".into()))?;
            buf.advance(len);
            Value::Varchar(s)
        }
    };
    if buf.has_remaining() {
        return Err(DbError::CorruptPage(
            "trailing bytes after the cell".into(),
        ));
    }
    Ok(value)
}

fn truncated(what: &str) -> DbError {
    DbError::CorruptPage(format!("row bytes truncated at '{what}'"))
}
