use std::cmp::Ordering;

/// Column type as declared in a table schema.
///
/// `Varchar` columns additionally carry a maximum byte length on the column
/// definition; the type itself is just the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    Double,
    Varchar,
}

impl SqlType {
    /// Numeric code used by the system catalog.
    pub fn code(&self) -> i32 {
        match self {
            SqlType::Int => 1,
            SqlType::Double => 2,
            SqlType::Varchar => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<SqlType> {
        match code {
            1 => Some(SqlType::Int),
            2 => Some(SqlType::Double),
            3 => Some(SqlType::Varchar),
            _ => None,
        }
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i32),
    Double(f64),
    Varchar(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The declared type this value satisfies, or `None` for null.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Int(_) => Some(SqlType::Int),
            Value::Double(_) => Some(SqlType::Double),
            Value::Varchar(_) => Some(SqlType::Varchar),
            Value::Null => None,
        }
    }

    /// Whether this value can serve as an index key. Keys are restricted to
    /// integers and strings; doubles and nulls are never keys.
    pub fn is_key_type(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Varchar(_))
    }

    /// Key ordering: signed numerical for integers, byte-wise lexicographic
    /// for strings. Mixed-type and non-key comparisons return `None`.
    pub fn cmp_key(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}
