//! Minimal in-memory engine for handler round-trips through the manager.
//!
//! Supports whole-table `SELECT`/`DELETE`, `CREATE TABLE IF NOT EXISTS` and
//! multi-row `INSERT`. Partition filters are not evaluated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::{
    statement, ColumnSpec, ConnectionConfig, DbClient, DbConnection, EngineError, QueryResult,
    ScopedConnection, SqlType, SqlValue, TableSlice,
};

#[derive(Default)]
pub struct Tables {
    pub tables: HashMap<String, (Vec<ColumnSpec>, Vec<Vec<SqlValue>>)>,
    pub statements: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MemoryClient {
    pub tables: Arc<Mutex<Tables>>,
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

    async fn get_connection(&self, _config: &ConnectionConfig) -> Result<ScopedConnection, EngineError> {
        Ok(ScopedConnection::new(
            Box::new(MemoryConnection {
                tables: self.tables.clone(),
            }),
            "memory",
        ))
    }
}

struct MemoryConnection {
    tables: Arc<Mutex<Tables>>,
}

fn not_found(name: &str) -> EngineError {
    EngineError::ObjectNotFound {
        code: "TABLE_NOT_FOUND".into(),
        message: format!("Table '{}' does not exist", name),
    }
}

#[async_trait]
impl DbConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError> {
        let mut state = self.tables.lock().unwrap();
        state.statements.push(sql.to_string());

        if let Some(rest) = sql.strip_prefix("SELECT ") {
            let (cols, name) = rest.split_once(" FROM ").unwrap();
            let (columns, rows) = state.tables.get(name.trim()).ok_or_else(|| not_found(name))?;
            let idx: Vec<usize> = if cols == "*" {
                (0..columns.len()).collect()
            } else {
                cols.split(", ")
                    .map(|c| columns.iter().position(|tc| tc.name == c).unwrap())
                    .collect()
            };
            return Ok(QueryResult {
                columns: idx.iter().map(|&i| columns[i].clone()).collect(),
                rows: rows
                    .iter()
                    .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
                    .collect(),
            });
        }
        if let Some(name) = sql.strip_prefix("DELETE FROM ") {
            let (_, rows) = state
                .tables
                .get_mut(name.trim())
                .ok_or_else(|| not_found(name))?;
            rows.clear();
            return Ok(QueryResult::empty());
        }
        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let (name, cols) = rest.split_once(" (").unwrap();
            let columns = cols
                .trim_end_matches(')')
                .split(", ")
                .map(|c| {
                    let (n, t) = c.split_once(' ').unwrap();
                    ColumnSpec::new(n, SqlType::parse(t))
                })
                .collect();
            state
                .tables
                .entry(name.to_string())
                .or_insert((columns, Vec::new()));
            return Ok(QueryResult::empty());
        }
        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            let (name, rest) = rest.split_once(" (").unwrap();
            let (cols, _) = rest.split_once(") VALUES ").unwrap();
            let width = cols.split(", ").count();
            let (_, rows) = state.tables.get_mut(name).ok_or_else(|| not_found(name))?;
            rows.extend(params.chunks(width).map(|c| c.to_vec()));
            return Ok(QueryResult::empty());
        }
        Err(EngineError::Protocol(format!("unsupported statement: {}", sql)))
    }
}
