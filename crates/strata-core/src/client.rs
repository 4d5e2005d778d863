//! The engine-specific half of the I/O manager.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::{DbConnection, ScopedConnection};
use crate::context::OutputContext;
use crate::error::{DbIoError, EngineError, Result};
use crate::slice::TableSlice;
use crate::statement;
use crate::value::{ColumnSpec, QueryResult, SqlValue};

/// Rows per `INSERT` statement when a handler writes a table.
pub const INSERT_BATCH_ROWS: usize = 1000;

/// Builds statements for one engine and opens connections to it.
#[async_trait]
pub trait DbClient: Send + Sync {
    /// Statement that reads the slice.
    fn get_select_statement(&self, slice: &TableSlice) -> String;

    /// Statement that deletes the slice's rows.
    fn get_cleanup_statement(&self, slice: &TableSlice) -> String;

    /// Statement that creates the slice's table if it is missing.
    fn create_table_statement(&self, slice: &TableSlice, columns: &[ColumnSpec]) -> String;

    /// Multi-row insert with positional placeholders.
    fn insert_statement(&self, slice: &TableSlice, columns: &[ColumnSpec], row_count: usize) -> String {
        statement::insert_statement(slice, columns, row_count)
    }

    async fn get_connection(&self, config: &ConnectionConfig) -> std::result::Result<ScopedConnection, EngineError>;

    /// Delete the slice's rows ahead of a write.
    ///
    /// A missing table or schema means there is nothing to delete and is not
    /// an error. The connection is released on every path.
    async fn delete_table_slice(&self, ctx: &OutputContext, slice: &TableSlice) -> Result<()> {
        let config = slice_connection_config(&ctx.resource_config, slice);
        let mut scope = self
            .get_connection(&config)
            .await
            .map_err(|e| DbIoError::engine(slice, e))?;

        let sql = self.get_cleanup_statement(slice);
        info!("Executing cleanup: {}", sql);
        let outcome = match scope.connection().execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_object_not_found() => {
                debug!("Nothing to delete for {}: {}", slice, e);
                Ok(())
            }
            Err(e) => Err(DbIoError::engine(slice, e)),
        };
        scope.finish(outcome, |e| DbIoError::engine(slice, e)).await
    }
}

/// The resource config with its default schema replaced by the slice's.
pub fn slice_connection_config(config: &ConnectionConfig, slice: &TableSlice) -> ConnectionConfig {
    config.without_schema().with_schema(slice.schema.clone())
}

/// What a handler is allowed to do with the engine: read a slice, create a
/// table and insert rows. The statements come from the client.
pub struct TableConnection<'a> {
    client: &'a dyn DbClient,
    conn: &'a mut dyn DbConnection,
}

impl<'a> TableConnection<'a> {
    pub fn new(client: &'a dyn DbClient, conn: &'a mut dyn DbConnection) -> Self {
        Self { client, conn }
    }

    pub async fn read(&mut self, slice: &TableSlice) -> Result<QueryResult> {
        let sql = self.client.get_select_statement(slice);
        info!("Executing query: {}", sql);
        self.conn
            .execute(&sql, &[])
            .await
            .map_err(|e| DbIoError::engine(slice, e))
    }

    pub async fn create_table(&mut self, slice: &TableSlice, columns: &[ColumnSpec]) -> Result<()> {
        if columns.is_empty() {
            return Err(DbIoError::config(format!(
                "cannot create {} without columns",
                slice.qualified_name()
            )));
        }
        let sql = self.client.create_table_statement(slice, columns);
        info!("Executing statement: {}", sql);
        self.conn
            .execute(&sql, &[])
            .await
            .map_err(|e| DbIoError::engine(slice, e))?;
        Ok(())
    }

    /// Insert `rows` in chunks of [`INSERT_BATCH_ROWS`]. Returns the number
    /// of rows written.
    pub async fn insert_rows(
        &mut self,
        slice: &TableSlice,
        columns: &[ColumnSpec],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize> {
        for row in rows {
            if row.len() != columns.len() {
                return Err(DbIoError::config(format!(
                    "row has {} values but {} has {} columns",
                    row.len(),
                    slice.qualified_name(),
                    columns.len()
                )));
            }
        }

        for chunk in rows.chunks(INSERT_BATCH_ROWS) {
            let sql = self.client.insert_statement(slice, columns, chunk.len());
            let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
            debug!("Inserting {} rows into {}", chunk.len(), slice.qualified_name());
            self.conn
                .execute(&sql, &params)
                .await
                .map_err(|e| DbIoError::engine(slice, e))?;
        }
        Ok(rows.len())
    }
}
