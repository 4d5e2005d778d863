//! List-of-objects handler for `serde_json` rows.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use tracing::debug;

use strata_core::{
    ColumnSpec, DbIoError, DeclaredType, HandlerMetadata, Result, SqlType, SqlValue,
    TableConnection, TableSlice, TypeHandler, TypedValue,
};

pub const JSON_ROWS_HANDLER: &str = "json_rows";

/// One JSON object per row.
pub type JsonRows = Vec<Map<String, Value>>;

/// Stores `Vec<serde_json::Map>` rows.
///
/// Columns are the union of keys in first-seen order. A column's type is the
/// narrowest one that holds all of its non-null values: all integers give
/// BIGINT, any fractional number gives DOUBLE, anything mixed or nested is
/// stored as text. Dates and timestamps come back as strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRowsHandler;

impl JsonRowsHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TypeHandler for JsonRowsHandler {
    fn name(&self) -> &str {
        JSON_ROWS_HANDLER
    }

    fn supported_types(&self) -> Vec<DeclaredType> {
        vec![DeclaredType::of::<JsonRows>()]
    }

    async fn to_table(
        &self,
        value: TypedValue,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<HandlerMetadata> {
        let rows = value.downcast::<JsonRows>()?;
        let columns = infer_columns(&rows);

        let mut metadata = HandlerMetadata::new();
        if columns.is_empty() {
            debug!(
                "{} rows carry no keys, nothing to write into {}",
                rows.len(),
                slice
            );
            metadata.insert("row_count".to_string(), "0".to_string());
            return Ok(metadata);
        }

        let cells = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| to_cell(row.get(&c.name), &c.sql_type))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        conn.create_table(slice, &columns).await?;
        let written = conn.insert_rows(slice, &columns, &cells).await?;
        metadata.insert("row_count".to_string(), written.to_string());
        Ok(metadata)
    }

    async fn from_table(
        &self,
        _ty: &DeclaredType,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<TypedValue> {
        let result = conn.read(slice).await?;
        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                if row.len() != result.columns.len() {
                    return Err(DbIoError::handler(
                        JSON_ROWS_HANDLER,
                        slice,
                        format!("row has {} values for {} columns", row.len(), result.columns.len()),
                    ));
                }
                Ok(result
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), to_json(v)))
                    .collect::<Map<String, Value>>())
            })
            .collect::<Result<JsonRows>>()?;
        Ok(TypedValue::new(rows))
    }

    fn supports_fan_in(&self) -> bool {
        true
    }

    fn combine(
        &self,
        _ty: &DeclaredType,
        _slices: &[TableSlice],
        parts: Vec<TypedValue>,
    ) -> Result<TypedValue> {
        let mut all = JsonRows::new();
        for part in parts {
            all.extend(part.downcast::<JsonRows>()?);
        }
        Ok(TypedValue::new(all))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Unknown,
    Boolean,
    Integer,
    Double,
    Text,
}

impl Kind {
    fn of(value: &Value) -> Option<Kind> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Kind::Boolean),
            Value::Number(n) if n.is_i64() => Some(Kind::Integer),
            Value::Number(_) => Some(Kind::Double),
            _ => Some(Kind::Text),
        }
    }

    fn widen(self, other: Kind) -> Kind {
        match (self, other) {
            (Kind::Unknown, k) => k,
            (a, b) if a == b => a,
            (Kind::Integer, Kind::Double) | (Kind::Double, Kind::Integer) => Kind::Double,
            _ => Kind::Text,
        }
    }

    fn sql_type(self) -> SqlType {
        match self {
            Kind::Boolean => SqlType::Boolean,
            Kind::Integer => SqlType::BigInt,
            Kind::Double => SqlType::Double,
            Kind::Unknown | Kind::Text => SqlType::Varchar,
        }
    }
}

fn infer_columns(rows: &JsonRows) -> Vec<ColumnSpec> {
    let mut order: Vec<String> = Vec::new();
    let mut kinds: Vec<Kind> = Vec::new();
    for row in rows {
        for (key, value) in row {
            let idx = match order.iter().position(|k| k == key) {
                Some(idx) => idx,
                None => {
                    order.push(key.clone());
                    kinds.push(Kind::Unknown);
                    order.len() - 1
                }
            };
            if let Some(kind) = Kind::of(value) {
                kinds[idx] = kinds[idx].widen(kind);
            }
        }
    }
    order
        .into_iter()
        .zip(kinds)
        .map(|(name, kind)| ColumnSpec::new(name, kind.sql_type()))
        .collect()
}

fn to_cell(value: Option<&Value>, sql_type: &SqlType) -> SqlValue {
    match (value, sql_type) {
        (None, _) | (Some(Value::Null), _) => SqlValue::Null,
        (Some(Value::Bool(b)), SqlType::Boolean) => SqlValue::Boolean(*b),
        (Some(Value::Number(n)), SqlType::BigInt) => {
            n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null)
        }
        (Some(Value::Number(n)), SqlType::Double) => {
            n.as_f64().map(SqlValue::Double).unwrap_or(SqlValue::Null)
        }
        (Some(Value::String(s)), _) => SqlValue::Varchar(s.clone()),
        (Some(other), _) => SqlValue::Varchar(other.to_string()),
    }
}

fn to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(b) => Value::Bool(b),
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Double(d) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Varchar(s) => Value::String(s),
        SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        SqlValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
    }
}
