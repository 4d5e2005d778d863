//! Declared types, type-erased values and the neutral cell model shared by
//! handlers, clients and connections.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{DbIoError, Result};

// ---------------------------------------------------------------------------
// Declared types and typed values
// ---------------------------------------------------------------------------

/// The in-memory type a step produces or consumes. Compared by `TypeId`.
#[derive(Debug, Clone, Copy)]
pub struct DeclaredType {
    id: TypeId,
    name: &'static str,
}

impl DeclaredType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for DeclaredType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeclaredType {}

impl Hash for DeclaredType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value travelling through the manager together with its declared type.
pub struct TypedValue {
    declared: DeclaredType,
    value: Box<dyn Any + Send>,
}

impl TypedValue {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            declared: DeclaredType::of::<T>(),
            value: Box::new(value),
        }
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.declared
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Take the value back out as a `T`.
    pub fn downcast<T: Any>(self) -> Result<T> {
        let actual = self.declared.name;
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| DbIoError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                actual: actual.to_string(),
            })
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedValue({})", self.declared.name)
    }
}

// ---------------------------------------------------------------------------
// Cell model
// ---------------------------------------------------------------------------

/// Column types the I/O layer knows how to move. Anything else is carried as
/// `Other` with the engine's own type name, and its values as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Varchar,
    Date,
    Timestamp,
    Other(String),
}

impl SqlType {
    /// Parse an engine type name such as `varchar(10)`, `timestamp(3)`,
    /// `INT8` or `double precision`.
    pub fn parse(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();
        if lower.contains("with time zone") || lower.starts_with("timestamptz") {
            return SqlType::Other(type_name.to_string());
        }
        let base = lower.split('(').next().unwrap_or("").trim();
        match base {
            "boolean" | "bool" => SqlType::Boolean,
            "tinyint" => SqlType::TinyInt,
            "smallint" | "int2" => SqlType::SmallInt,
            "integer" | "int" | "int4" => SqlType::Integer,
            "bigint" | "int8" => SqlType::BigInt,
            "real" | "float4" => SqlType::Real,
            "double" | "double precision" | "float8" => SqlType::Double,
            "varchar" | "char" | "text" | "character varying" | "character" | "bpchar"
            | "name" => SqlType::Varchar,
            "date" => SqlType::Date,
            "timestamp" | "timestamp without time zone" => SqlType::Timestamp,
            _ => SqlType::Other(type_name.to_string()),
        }
    }

    /// ANSI spelling, used by the default `CREATE TABLE` builder.
    pub fn ansi_name(&self) -> &str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE",
            SqlType::Varchar => "VARCHAR",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Other(name) => name,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Varchar(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The column type a value of this kind would naturally be stored in.
    pub fn natural_type(&self) -> Option<SqlType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Boolean(_) => Some(SqlType::Boolean),
            SqlValue::Integer(_) => Some(SqlType::BigInt),
            SqlValue::Double(_) => Some(SqlType::Double),
            SqlValue::Varchar(_) => Some(SqlType::Varchar),
            SqlValue::Date(_) => Some(SqlType::Date),
            SqlValue::Timestamp(_) => Some(SqlType::Timestamp),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Columns and rows returned by a statement. Statements without a result set
/// return an empty result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_type_equality_by_type_id() {
        assert_eq!(DeclaredType::of::<Vec<i64>>(), DeclaredType::of::<Vec<i64>>());
        assert_ne!(DeclaredType::of::<Vec<i64>>(), DeclaredType::of::<Vec<i32>>());
        assert!(DeclaredType::of::<String>().name().contains("String"));
    }

    #[test]
    fn test_typed_value_downcast() {
        let v = TypedValue::new(vec![1i64, 2, 3]);
        assert!(v.is::<Vec<i64>>());
        assert_eq!(v.downcast::<Vec<i64>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_typed_value_downcast_mismatch() {
        let v = TypedValue::new(42u8);
        match v.downcast::<String>() {
            Err(DbIoError::TypeMismatch { expected, actual }) => {
                assert!(expected.contains("String"));
                assert_eq!(actual, "u8");
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_sql_type_parse() {
        assert_eq!(SqlType::parse("varchar(10)"), SqlType::Varchar);
        assert_eq!(SqlType::parse("VARCHAR"), SqlType::Varchar);
        assert_eq!(SqlType::parse("timestamp(3)"), SqlType::Timestamp);
        assert_eq!(SqlType::parse("TIMESTAMP"), SqlType::Timestamp);
        assert_eq!(SqlType::parse("bigint"), SqlType::BigInt);
        assert_eq!(SqlType::parse("INT8"), SqlType::BigInt);
        assert_eq!(SqlType::parse("double precision"), SqlType::Double);
        assert_eq!(SqlType::parse("double"), SqlType::Double);
        assert_eq!(SqlType::parse("BOOL"), SqlType::Boolean);
        assert_eq!(
            SqlType::parse("decimal(10,2)"),
            SqlType::Other("decimal(10,2)".to_string())
        );
        assert_eq!(
            SqlType::parse("timestamp(3) with time zone"),
            SqlType::Other("timestamp(3) with time zone".to_string())
        );
    }

    #[test]
    fn test_natural_type() {
        assert_eq!(SqlValue::Integer(1).natural_type(), Some(SqlType::BigInt));
        assert_eq!(SqlValue::Null.natural_type(), None);
    }
}
