//! Table slices: which rows of which table a load or store addresses.

use std::fmt;

use chrono::NaiveDateTime;

use crate::context::{OutputContext, PARTITION_EXPR_KEY, SCHEMA_KEY};
use crate::error::{DbIoError, Result};

/// Schema used when neither the table name, the output metadata nor the
/// resource config names one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Format of partition bounds inside `TIMESTAMP '...'` literals.
pub const PARTITION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A closed time range; both bounds are inclusive (`BETWEEN` semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start > end {
            return Err(DbIoError::config(format!(
                "time window start {} is after its end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// `true` if `ts` falls inside the window, bounds included.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format(PARTITION_TIMESTAMP_FORMAT),
            self.end.format(PARTITION_TIMESTAMP_FORMAT)
        )
    }
}

/// A time-bounded subset of a table's rows.
///
/// `partition_expr` is the column (or expression) tested against the window.
/// It is passed through to the engine as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePartition {
    pub time_window: TimeWindow,
    pub partition_expr: String,
}

impl TablePartition {
    pub fn new(time_window: TimeWindow, partition_expr: impl Into<String>) -> Self {
        Self {
            time_window,
            partition_expr: partition_expr.into(),
        }
    }
}

/// A fully qualified table, an optional column projection and an optional
/// partition. Built fresh for every load/store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSlice {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    /// Projected columns, in order. Empty means all columns.
    pub columns: Vec<String>,
    pub partition: Option<TablePartition>,
}

impl TableSlice {
    /// Create a whole-table slice. All three name parts must be non-empty.
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let (catalog, schema, table) = (catalog.into(), schema.into(), table.into());
        for (part, value) in [("catalog", &catalog), ("schema", &schema), ("table", &table)] {
            if value.trim().is_empty() {
                return Err(DbIoError::config(format!(
                    "table slice {} cannot be empty ({}.{}.{})",
                    part, catalog, schema, table
                )));
            }
        }
        Ok(Self {
            catalog,
            schema,
            table,
            columns: Vec::new(),
            partition: None,
        })
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_partition(mut self, partition: TablePartition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// `catalog.schema.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

impl fmt::Display for TableSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())?;
        if let Some(p) = &self.partition {
            write!(f, " {} on {}", p.time_window, p.partition_expr)?;
        }
        Ok(())
    }
}

/// A table reference with one to three dotted parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    /// Parse `table`, `schema.table` or `catalog.schema.table`.
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_segments(&[name.to_string()])
    }

    /// Parse a path of segments (e.g. an asset key); every segment may itself
    /// be dotted. The flattened arity must be 1, 2 or 3.
    pub fn from_segments(segments: &[String]) -> Result<Self> {
        let parts: Vec<&str> = segments.iter().flat_map(|s| s.split('.')).collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(DbIoError::config(format!(
                "table name '{}' has an empty part",
                segments.join(".")
            )));
        }
        match parts.as_slice() {
            [table] => Ok(Self {
                catalog: None,
                schema: None,
                table: table.to_string(),
            }),
            [schema, table] => Ok(Self {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [catalog, schema, table] => Ok(Self {
                catalog: Some(catalog.to_string()),
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            _ => Err(DbIoError::config(format!(
                "table name '{}' must be 'table', 'schema.table' or 'catalog.schema.table' ({} parts given)",
                segments.join("."),
                parts.len()
            ))),
        }
    }
}

/// Translate an output's metadata into the slice it reads or writes.
///
/// `columns` comes from whichever context asked for the slice: the producing
/// output on store, the consuming input on load.
pub fn resolve_table_slice(output: &OutputContext, columns: &[String]) -> Result<TableSlice> {
    let name = match &output.asset_key {
        Some(path) if !path.is_empty() => TableName::from_segments(path)?,
        _ => TableName::parse(&output.name)?,
    };

    let metadata_schema = output.metadata.get(SCHEMA_KEY);
    let schema = match (&name.schema, metadata_schema) {
        (Some(named), Some(meta)) if named != meta => {
            return Err(DbIoError::config(format!(
                "output '{}' names schema '{}' but its metadata sets schema '{}'",
                output.name, named, meta
            )));
        }
        (Some(named), _) => named.clone(),
        (None, Some(meta)) => meta.clone(),
        (None, None) => output
            .resource_config
            .schema
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
    };

    let catalog = match name.catalog.clone().or_else(|| output.resource_config.catalog.clone()) {
        Some(catalog) => catalog,
        None => {
            return Err(DbIoError::config(format!(
                "no catalog for table '{}': qualify the name or set 'catalog' in the resource config",
                name.table
            )))
        }
    };

    let partition = match (&output.time_window, output.metadata.get(PARTITION_EXPR_KEY)) {
        (Some(window), Some(expr)) => Some(TablePartition::new(*window, expr.clone())),
        (Some(window), None) => {
            return Err(DbIoError::config(format!(
                "output '{}' is partitioned by {} but has no '{}' metadata, so the column to filter on is unknown",
                output.name, window, PARTITION_EXPR_KEY
            )))
        }
        (None, _) => None,
    };

    let mut slice = TableSlice::new(catalog, schema, name.table)?.with_columns(columns.to_vec());
    slice.partition = partition;
    Ok(slice)
}
