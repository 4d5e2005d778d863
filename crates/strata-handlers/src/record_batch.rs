//! Arrow `RecordBatch` handler.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::debug;

use strata_core::{
    describe_slices, ColumnSpec, DbIoError, DeclaredType, HandlerMetadata, Result, SqlType, SqlValue,
    TableConnection, TableSlice, TypeHandler, TypedValue,
};

pub const RECORD_BATCH_HANDLER: &str = "arrow_record_batch";

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Stores Arrow record batches column by column.
///
/// Supported column types: Boolean, Int8/16/32/64, Float32/64,
/// Utf8/LargeUtf8, Date32 and Timestamp in any unit. Fan-in requires every
/// slice to come back with the same schema.
///
/// Loaded batches take their schema from the table, not from the stored
/// batch: every field is nullable, timestamps come back as
/// `Timestamp(Microsecond, None)` whatever their stored unit or timezone, and
/// LargeUtf8 comes back as Utf8. Values round-trip unchanged otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordBatchHandler;

impl RecordBatchHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TypeHandler for RecordBatchHandler {
    fn name(&self) -> &str {
        RECORD_BATCH_HANDLER
    }

    fn supported_types(&self) -> Vec<DeclaredType> {
        vec![DeclaredType::of::<RecordBatch>()]
    }

    async fn to_table(
        &self,
        value: TypedValue,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<HandlerMetadata> {
        let batch = value.downcast::<RecordBatch>()?;
        let columns = schema_to_columns(&batch.schema())
            .map_err(|msg| DbIoError::handler(RECORD_BATCH_HANDLER, slice, msg))?;
        let rows = batch_to_rows(&batch)
            .map_err(|msg| DbIoError::handler(RECORD_BATCH_HANDLER, slice, msg))?;

        conn.create_table(slice, &columns).await?;
        let written = conn.insert_rows(slice, &columns, &rows).await?;
        debug!("Wrote {} rows into {}", written, slice);

        let mut metadata = HandlerMetadata::new();
        metadata.insert("row_count".to_string(), written.to_string());
        metadata.insert("column_count".to_string(), columns.len().to_string());
        Ok(metadata)
    }

    async fn from_table(
        &self,
        _ty: &DeclaredType,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<TypedValue> {
        let result = conn.read(slice).await?;
        let batch = rows_to_batch(&result.columns, &result.rows)
            .map_err(|msg| DbIoError::handler(RECORD_BATCH_HANDLER, slice, msg))?;
        Ok(TypedValue::new(batch))
    }

    fn supports_fan_in(&self) -> bool {
        true
    }

    fn combine(
        &self,
        _ty: &DeclaredType,
        slices: &[TableSlice],
        parts: Vec<TypedValue>,
    ) -> Result<TypedValue> {
        let batches = parts
            .into_iter()
            .map(|p| p.downcast::<RecordBatch>())
            .collect::<Result<Vec<_>>>()?;
        let Some(first) = batches.first() else {
            return Ok(TypedValue::new(RecordBatch::new_empty(Arc::new(Schema::empty()))));
        };

        let schema = first.schema();
        if let Some((idx, other)) = batches
            .iter()
            .enumerate()
            .find(|(_, b)| b.schema() != schema)
        {
            let message = format!(
                "schema {:?} differs from the first slice's {:?}",
                other.schema().fields(),
                schema.fields()
            );
            return Err(match slices.get(idx) {
                Some(slice) => DbIoError::handler(RECORD_BATCH_HANDLER, slice, message),
                None => fan_in_error(slices, message),
            });
        }

        let combined = concat_batches(&schema, &batches)
            .map_err(|e| fan_in_error(slices, e.to_string()))?;
        Ok(TypedValue::new(combined))
    }
}

fn fan_in_error(slices: &[TableSlice], message: String) -> DbIoError {
    DbIoError::Handler {
        handler: RECORD_BATCH_HANDLER.to_string(),
        slice: describe_slices(slices),
        message,
    }
}

// ---------------------------------------------------------------------------
// Arrow -> rows
// ---------------------------------------------------------------------------

fn sql_type_for(data_type: &DataType) -> Option<SqlType> {
    match data_type {
        DataType::Boolean => Some(SqlType::Boolean),
        DataType::Int8 => Some(SqlType::TinyInt),
        DataType::Int16 => Some(SqlType::SmallInt),
        DataType::Int32 => Some(SqlType::Integer),
        DataType::Int64 => Some(SqlType::BigInt),
        DataType::Float32 => Some(SqlType::Real),
        DataType::Float64 => Some(SqlType::Double),
        DataType::Utf8 | DataType::LargeUtf8 => Some(SqlType::Varchar),
        DataType::Date32 => Some(SqlType::Date),
        DataType::Timestamp(_, _) => Some(SqlType::Timestamp),
        _ => None,
    }
}

fn schema_to_columns(schema: &Schema) -> std::result::Result<Vec<ColumnSpec>, String> {
    schema
        .fields()
        .iter()
        .map(|field| {
            sql_type_for(field.data_type())
                .map(|t| ColumnSpec::new(field.name(), t))
                .ok_or_else(|| {
                    format!(
                        "column '{}' has unsupported Arrow type {}",
                        field.name(),
                        field.data_type()
                    )
                })
        })
        .collect()
}

fn batch_to_rows(batch: &RecordBatch) -> std::result::Result<Vec<Vec<SqlValue>>, String> {
    let columns = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((0..batch.num_rows())
        .map(|row| columns.iter().map(|col| col[row].clone()).collect())
        .collect())
}

macro_rules! collect_values {
    ($array:expr, $ty:ty, $convert:expr) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| format!("array is not a {}", stringify!($ty)))?;
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    SqlValue::Null
                } else {
                    $convert(typed, i)
                }
            })
            .collect::<Vec<SqlValue>>()
    }};
}

fn column_values(array: &ArrayRef) -> std::result::Result<Vec<SqlValue>, String> {
    let values = match array.data_type() {
        DataType::Boolean => {
            collect_values!(array, BooleanArray, |a: &BooleanArray, i| SqlValue::Boolean(a.value(i)))
        }
        DataType::Int8 => collect_values!(array, Int8Array, |a: &Int8Array, i| {
            SqlValue::Integer(i64::from(a.value(i)))
        }),
        DataType::Int16 => collect_values!(array, Int16Array, |a: &Int16Array, i| {
            SqlValue::Integer(i64::from(a.value(i)))
        }),
        DataType::Int32 => collect_values!(array, Int32Array, |a: &Int32Array, i| {
            SqlValue::Integer(i64::from(a.value(i)))
        }),
        DataType::Int64 => {
            collect_values!(array, Int64Array, |a: &Int64Array, i| SqlValue::Integer(a.value(i)))
        }
        DataType::Float32 => collect_values!(array, Float32Array, |a: &Float32Array, i| {
            SqlValue::Double(f64::from(a.value(i)))
        }),
        DataType::Float64 => {
            collect_values!(array, Float64Array, |a: &Float64Array, i| SqlValue::Double(a.value(i)))
        }
        DataType::Utf8 => collect_values!(array, StringArray, |a: &StringArray, i| {
            SqlValue::Varchar(a.value(i).to_string())
        }),
        DataType::LargeUtf8 => collect_values!(array, LargeStringArray, |a: &LargeStringArray, i| {
            SqlValue::Varchar(a.value(i).to_string())
        }),
        DataType::Date32 => collect_values!(array, Date32Array, |a: &Date32Array, i| {
            a.value_as_date(i).map(SqlValue::Date).unwrap_or(SqlValue::Null)
        }),
        DataType::Timestamp(_, _) => {
            let micros = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, None))
                .map_err(|e| e.to_string())?;
            collect_values!(micros, TimestampMicrosecondArray, |a: &TimestampMicrosecondArray, i| {
                a.value_as_datetime(i)
                    .map(SqlValue::Timestamp)
                    .unwrap_or(SqlValue::Null)
            })
        }
        other => return Err(format!("unsupported Arrow type {}", other)),
    };
    Ok(values)
}

// ---------------------------------------------------------------------------
// rows -> Arrow
// ---------------------------------------------------------------------------

fn arrow_type_for(sql_type: &SqlType) -> DataType {
    match sql_type {
        SqlType::Boolean => DataType::Boolean,
        SqlType::TinyInt => DataType::Int8,
        SqlType::SmallInt => DataType::Int16,
        SqlType::Integer => DataType::Int32,
        SqlType::BigInt => DataType::Int64,
        SqlType::Real => DataType::Float32,
        SqlType::Double => DataType::Float64,
        SqlType::Date => DataType::Date32,
        SqlType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        SqlType::Varchar | SqlType::Other(_) => DataType::Utf8,
    }
}

fn rows_to_batch(
    columns: &[ColumnSpec],
    rows: &[Vec<SqlValue>],
) -> std::result::Result<RecordBatch, String> {
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
        return Err(format!(
            "row {} has {} values for {} columns",
            idx,
            row.len(),
            columns.len()
        ));
    }

    let schema: SchemaRef = Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type_for(&c.sql_type), true))
            .collect::<Vec<_>>(),
    ));

    let arrays = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| build_array(column, rows.iter().map(|r| &r[idx])))
        .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;

    RecordBatch::try_new(schema, arrays).map_err(|e| e.to_string())
}

fn mismatch(column: &ColumnSpec, value: &SqlValue) -> String {
    format!(
        "column '{}' ({}) cannot hold {:?}",
        column.name,
        column.sql_type.ansi_name(),
        value
    )
}

fn integers<'a, T: TryFrom<i64>>(
    column: &ColumnSpec,
    values: impl Iterator<Item = &'a SqlValue>,
) -> std::result::Result<Vec<Option<T>>, String> {
    values
        .map(|v| match v {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => T::try_from(*i)
                .map(Some)
                .map_err(|_| format!("value {} overflows column '{}'", i, column.name)),
            other => Err(mismatch(column, other)),
        })
        .collect()
}

fn floats<'a>(
    column: &ColumnSpec,
    values: impl Iterator<Item = &'a SqlValue>,
) -> std::result::Result<Vec<Option<f64>>, String> {
    values
        .map(|v| match v {
            SqlValue::Null => Ok(None),
            SqlValue::Double(d) => Ok(Some(*d)),
            SqlValue::Integer(i) => Ok(Some(*i as f64)),
            other => Err(mismatch(column, other)),
        })
        .collect()
}

fn build_array<'a>(
    column: &ColumnSpec,
    values: impl Iterator<Item = &'a SqlValue>,
) -> std::result::Result<ArrayRef, String> {
    let array: ArrayRef = match &column.sql_type {
        SqlType::Boolean => {
            let v = values
                .map(|v| match v {
                    SqlValue::Null => Ok(None),
                    SqlValue::Boolean(b) => Ok(Some(*b)),
                    other => Err(mismatch(column, other)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Arc::new(BooleanArray::from(v))
        }
        SqlType::TinyInt => Arc::new(Int8Array::from(integers::<i8>(column, values)?)),
        SqlType::SmallInt => Arc::new(Int16Array::from(integers::<i16>(column, values)?)),
        SqlType::Integer => Arc::new(Int32Array::from(integers::<i32>(column, values)?)),
        SqlType::BigInt => Arc::new(Int64Array::from(integers::<i64>(column, values)?)),
        SqlType::Real => {
            let v = floats(column, values)?;
            Arc::new(Float32Array::from(
                v.into_iter().map(|d| d.map(|d| d as f32)).collect::<Vec<_>>(),
            ))
        }
        SqlType::Double => Arc::new(Float64Array::from(floats(column, values)?)),
        SqlType::Date => {
            let v = values
                .map(|v| match v {
                    SqlValue::Null => Ok(None),
                    SqlValue::Date(d) => Ok(Some(days_since_epoch(*d))),
                    other => Err(mismatch(column, other)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Arc::new(Date32Array::from(v))
        }
        SqlType::Timestamp => {
            let v = values
                .map(|v| match v {
                    SqlValue::Null => Ok(None),
                    SqlValue::Timestamp(ts) => Ok(Some(micros_since_epoch(*ts))),
                    other => Err(mismatch(column, other)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Arc::new(TimestampMicrosecondArray::from(v))
        }
        SqlType::Varchar | SqlType::Other(_) => {
            let v = values
                .map(|v| match v {
                    SqlValue::Null => None,
                    SqlValue::Varchar(s) => Some(s.clone()),
                    other => Some(strata_core::statement::render_literal(other)),
                })
                .collect::<Vec<_>>();
            Arc::new(StringArray::from(v))
        }
    };
    Ok(array)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn micros_since_epoch(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}
