//! In-memory engine and handlers shared by the integration tests.
//!
//! The engine understands exactly the statement shapes the core builders
//! emit: `SELECT`, `DELETE` (both with the optional time-window filter),
//! `CREATE TABLE IF NOT EXISTS` and multi-row `INSERT ... VALUES (?, ...)`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use strata_core::{
    statement, ColumnSpec, ConnectionConfig, DbClient, DbConnection, DbIoError, DeclaredType,
    EngineError, HandlerMetadata, QueryResult, ScopedConnection, SqlType, SqlValue,
    TableConnection, TableSlice, TypeHandler, TypedValue,
};

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub tables: HashMap<String, MemTable>,
    pub statements: Vec<String>,
    /// Configs connections were opened with, in order.
    pub opened: Vec<ConnectionConfig>,
    pub closed: usize,
    /// Fail any statement containing this text.
    pub fail_on: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    pub state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<MemTable> {
        self.state.lock().unwrap().tables.get(name).cloned()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn fail_on(&self, fragment: &str) {
        self.state.lock().unwrap().fail_on = Some(fragment.to_string());
    }

    pub fn insert_table(&self, name: &str, table: MemTable) {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), table);
    }
}

// ---------------------------------------------------------------------------
// Client and connection
// ---------------------------------------------------------------------------

pub struct MemoryClient {
    pub engine: MemoryEngine,
}

#[async_trait]
impl DbClient for MemoryClient {
    fn get_select_statement(&self, slice: &TableSlice) -> String {
        statement::select_statement(slice)
    }

    fn get_cleanup_statement(&self, slice: &TableSlice) -> String {
        statement::cleanup_statement(slice)
    }

    fn create_table_statement(&self, slice: &TableSlice, columns: &[ColumnSpec]) -> String {
        statement::create_table_statement(slice, columns, |t| t.ansi_name().to_string())
    }

    async fn get_connection(&self, config: &ConnectionConfig) -> Result<ScopedConnection, EngineError> {
        self.engine.state.lock().unwrap().opened.push(config.clone());
        Ok(ScopedConnection::new(
            Box::new(MemoryConnection {
                engine: self.engine.clone(),
            }),
            "memory",
        ))
    }
}

pub struct MemoryConnection {
    engine: MemoryEngine,
}

#[async_trait]
impl DbConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError> {
        let mut state = self.engine.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if let Some(fragment) = &state.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(EngineError::Query {
                    code: "GENERIC_INTERNAL_ERROR".into(),
                    message: format!("injected failure on '{}'", fragment),
                });
            }
        }

        if let Some(rest) = sql.strip_prefix("SELECT ") {
            select(&state, rest)
        } else if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            delete(&mut state, rest)
        } else if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            create(&mut state, rest)
        } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            insert(&mut state, rest, params)
        } else {
            Err(EngineError::Protocol(format!("unsupported statement: {}", sql)))
        }
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.engine.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

fn not_found(name: &str) -> EngineError {
    EngineError::ObjectNotFound {
        code: "TABLE_NOT_FOUND".into(),
        message: format!("Table '{}' does not exist", name),
    }
}

struct Filter {
    column: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

fn split_filter(rest: &str) -> (&str, Option<Filter>) {
    match rest.split_once("\nWHERE ") {
        None => (rest.trim(), None),
        Some((name, clause)) => {
            let (column, bounds) = clause.split_once(" BETWEEN TIMESTAMP '").unwrap();
            let (start, end) = bounds.split_once("' AND TIMESTAMP '").unwrap();
            let end = end.trim_end_matches('\'');
            let parse = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
            (
                name.trim(),
                Some(Filter {
                    column: column.to_string(),
                    start: parse(start),
                    end: parse(end),
                }),
            )
        }
    }
}

fn matches(table: &MemTable, row: &[SqlValue], filter: &Option<Filter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let idx = table
        .columns
        .iter()
        .position(|c| c.name == filter.column)
        .unwrap();
    match &row[idx] {
        SqlValue::Timestamp(ts) => filter.start <= *ts && *ts <= filter.end,
        _ => false,
    }
}

fn select(state: &EngineState, rest: &str) -> Result<QueryResult, EngineError> {
    let (cols, from) = rest.split_once(" FROM ").unwrap();
    let (name, filter) = split_filter(from);
    let table = state.tables.get(name).ok_or_else(|| not_found(name))?;

    let indices: Vec<usize> = if cols == "*" {
        (0..table.columns.len()).collect()
    } else {
        cols.split(", ")
            .map(|c| {
                table.columns.iter().position(|tc| tc.name == c).ok_or_else(|| {
                    EngineError::Query {
                        code: "COLUMN_NOT_FOUND".into(),
                        message: format!("Column '{}' cannot be resolved", c),
                    }
                })
            })
            .collect::<Result<_, _>>()?
    };

    Ok(QueryResult {
        columns: indices.iter().map(|&i| table.columns[i].clone()).collect(),
        rows: table
            .rows
            .iter()
            .filter(|row| matches(table, row, &filter))
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect(),
    })
}

fn delete(state: &mut EngineState, rest: &str) -> Result<QueryResult, EngineError> {
    let (name, filter) = split_filter(rest);
    let table = state.tables.get_mut(name).ok_or_else(|| not_found(name))?;
    let snapshot = table.clone();
    table.rows.retain(|row| !matches(&snapshot, row, &filter));
    Ok(QueryResult::empty())
}

fn create(state: &mut EngineState, rest: &str) -> Result<QueryResult, EngineError> {
    let (name, cols) = rest.split_once(" (").unwrap();
    let cols = cols.trim_end_matches(')');
    let columns = cols
        .split(", ")
        .map(|c| {
            let (n, t) = c.split_once(' ').unwrap();
            ColumnSpec::new(n, SqlType::parse(t))
        })
        .collect();
    state
        .tables
        .entry(name.to_string())
        .or_insert_with(|| MemTable {
            columns,
            rows: Vec::new(),
        });
    Ok(QueryResult::empty())
}

fn insert(state: &mut EngineState, rest: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError> {
    let (name, rest) = rest.split_once(" (").unwrap();
    let (cols, _) = rest.split_once(") VALUES ").unwrap();
    let names: Vec<&str> = cols.split(", ").collect();
    let table = state.tables.get_mut(name).ok_or_else(|| not_found(name))?;
    for chunk in params.chunks(names.len()) {
        let mut row = vec![SqlValue::Null; table.columns.len()];
        for (col, value) in names.iter().zip(chunk) {
            let idx = table.columns.iter().position(|c| c.name == *col).unwrap();
            row[idx] = value.clone();
        }
        table.rows.push(row);
    }
    Ok(QueryResult::empty())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// One event row: `id BIGINT, ts TIMESTAMP`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub ts: NaiveDateTime,
}

pub type Events = Vec<Event>;

/// Stores `Vec<Event>` and concatenates fan-in slices.
pub struct EventsHandler;

fn event_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("id", SqlType::BigInt),
        ColumnSpec::new("ts", SqlType::Timestamp),
    ]
}

#[async_trait]
impl TypeHandler for EventsHandler {
    fn name(&self) -> &str {
        "events"
    }

    fn supported_types(&self) -> Vec<DeclaredType> {
        vec![DeclaredType::of::<Events>()]
    }

    async fn to_table(
        &self,
        value: TypedValue,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<HandlerMetadata> {
        let events = value.downcast::<Events>()?;
        let columns = event_columns();
        conn.create_table(slice, &columns).await?;
        let rows: Vec<Vec<SqlValue>> = events
            .iter()
            .map(|e| vec![SqlValue::Integer(e.id), SqlValue::Timestamp(e.ts)])
            .collect();
        let written = conn.insert_rows(slice, &columns, &rows).await?;
        let mut metadata = HandlerMetadata::new();
        metadata.insert("row_count".to_string(), written.to_string());
        Ok(metadata)
    }

    async fn from_table(
        &self,
        _ty: &DeclaredType,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<TypedValue> {
        let result = conn.read(slice).await?;
        let events = result
            .rows
            .into_iter()
            .map(|row| match row.as_slice() {
                [SqlValue::Integer(id), SqlValue::Timestamp(ts)] => Ok(Event { id: *id, ts: *ts }),
                other => Err(DbIoError::handler("events", slice, format!("bad row {:?}", other))),
            })
            .collect::<strata_core::Result<Events>>()?;
        Ok(TypedValue::new(events))
    }

    fn supports_fan_in(&self) -> bool {
        true
    }

    fn combine(
        &self,
        _ty: &DeclaredType,
        _slices: &[TableSlice],
        parts: Vec<TypedValue>,
    ) -> strata_core::Result<TypedValue> {
        let mut all = Events::new();
        for part in parts {
            all.extend(part.downcast::<Events>()?);
        }
        Ok(TypedValue::new(all))
    }
}

/// Stores `Vec<String>` as a single `note VARCHAR` column; no fan-in.
pub struct NotesHandler;

#[async_trait]
impl TypeHandler for NotesHandler {
    fn name(&self) -> &str {
        "notes"
    }

    fn supported_types(&self) -> Vec<DeclaredType> {
        vec![DeclaredType::of::<Vec<String>>()]
    }

    async fn to_table(
        &self,
        value: TypedValue,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<HandlerMetadata> {
        let notes = value.downcast::<Vec<String>>()?;
        let columns = vec![ColumnSpec::new("note", SqlType::Varchar)];
        conn.create_table(slice, &columns).await?;
        let rows: Vec<Vec<SqlValue>> = notes.into_iter().map(|n| vec![SqlValue::Varchar(n)]).collect();
        conn.insert_rows(slice, &columns, &rows).await?;
        Ok(HandlerMetadata::new())
    }

    async fn from_table(
        &self,
        _ty: &DeclaredType,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<TypedValue> {
        let result = conn.read(slice).await?;
        let notes = result
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Varchar(s)) => Some(s),
                _ => None,
            })
            .collect::<Vec<String>>();
        Ok(TypedValue::new(notes))
    }
}

/// A second handler that also claims `Vec<String>`.
pub struct ShadowNotesHandler;

#[async_trait]
impl TypeHandler for ShadowNotesHandler {
    fn name(&self) -> &str {
        "shadow_notes"
    }

    fn supported_types(&self) -> Vec<DeclaredType> {
        vec![DeclaredType::of::<Vec<String>>()]
    }

    async fn to_table(
        &self,
        _value: TypedValue,
        _slice: &TableSlice,
        _conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<HandlerMetadata> {
        Ok(HandlerMetadata::new())
    }

    async fn from_table(
        &self,
        _ty: &DeclaredType,
        _slice: &TableSlice,
        _conn: &mut TableConnection<'_>,
    ) -> strata_core::Result<TypedValue> {
        Ok(TypedValue::new(Vec::<String>::new()))
    }
}
