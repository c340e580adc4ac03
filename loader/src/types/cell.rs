use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// A single column value of a change record.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns a canonical text encoding used to compare key values.
    ///
    /// Signed and unsigned integers holding the same number encode identically.
    pub(crate) fn key_encoding(&self) -> String {
        match self {
            Cell::Null => "null".to_string(),
            Cell::Bool(value) => format!("b:{}", u8::from(*value)),
            Cell::I64(value) => format!("n:{value}"),
            Cell::U64(value) => format!("n:{value}"),
            Cell::F64(value) => format!("f:{value}"),
            Cell::String(value) => format!("s:{value}"),
            Cell::Bytes(value) => format!("x:{}", hex(value)),
            Cell::Date(value) => format!("d:{value}"),
            Cell::Time(value) => format!("t:{value}"),
            Cell::Timestamp(value) => format!("ts:{value}"),
            Cell::Json(value) => format!("j:{value}"),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::U64(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::String(value) => write!(f, "{value:?}"),
            Cell::Bytes(value) => write!(f, "0x{}", hex(value)),
            Cell::Date(value) => write!(f, "{value}"),
            Cell::Time(value) => write!(f, "{value}"),
            Cell::Timestamp(value) => write!(f, "{value}"),
            Cell::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Cell::U64(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_signedness_does_not_affect_key_encoding() {
        assert_eq!(Cell::I64(7).key_encoding(), Cell::U64(7).key_encoding());
        assert_ne!(Cell::I64(7).key_encoding(), Cell::String("7".into()).key_encoding());
    }

    #[test]
    fn display_quotes_strings_and_hex_encodes_bytes() {
        assert_eq!(Cell::String("a".into()).to_string(), "\"a\"");
        assert_eq!(Cell::Bytes(vec![0x0a, 0xff]).to_string(), "0x0aff");
        assert_eq!(Cell::Null.to_string(), "NULL");
    }
}
