//! `DbClient` for Trino.

use async_trait::async_trait;
use tracing::info;

use strata_core::statement;
use strata_core::{
    ColumnSpec, ConnectionConfig, ConnectorStrategy, DbClient, DbConnection, EngineError,
    ScopedConnection, SqlType, TableSlice,
};

use crate::native::TrinoConnection;
use crate::toolkit::{postgres_type_name, SqlxConnection};

/// Builds Trino statements and opens connections with the strategy named in
/// each connection config.
///
/// `dialect` only affects the column type names in `CREATE TABLE`; pick the
/// strategy the resource config will connect with.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrinoDbClient {
    dialect: ConnectorStrategy,
}

impl TrinoDbClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(dialect: ConnectorStrategy) -> Self {
        Self { dialect }
    }

    pub fn type_name(&self, sql_type: &SqlType) -> String {
        match self.dialect {
            ConnectorStrategy::Native => sql_type.ansi_name().to_string(),
            ConnectorStrategy::Sqlx => postgres_type_name(sql_type),
        }
    }
}

#[async_trait]
impl DbClient for TrinoDbClient {
    fn get_select_statement(&self, slice: &TableSlice) -> String {
        statement::select_statement(slice)
    }

    fn get_cleanup_statement(&self, slice: &TableSlice) -> String {
        statement::cleanup_statement(slice)
    }

    fn create_table_statement(&self, slice: &TableSlice, columns: &[ColumnSpec]) -> String {
        statement::create_table_statement(slice, columns, |t| self.type_name(t))
    }

    async fn get_connection(&self, config: &ConnectionConfig) -> Result<ScopedConnection, EngineError> {
        let label = format!("{}@{}:{}", config.user, config.host, config.port);
        let conn: Box<dyn DbConnection> = match config.connector {
            ConnectorStrategy::Native => Box::new(TrinoConnection::connect(config).await?),
            ConnectorStrategy::Sqlx => Box::new(SqlxConnection::connect(config).await?),
        };
        info!("Opened {} connection {}", config.connector, label);
        Ok(ScopedConnection::new(conn, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use strata_core::{TablePartition, TimeWindow};

    fn slice() -> TableSlice {
        TableSlice::new("database_abc", "schema1", "table1").unwrap()
    }

    fn partitioned(slice: TableSlice) -> TableSlice {
        let start = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 2, 3)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        slice.with_partition(TablePartition::new(
            TimeWindow::new(start, end).unwrap(),
            "my_timestamp_col",
        ))
    }

    #[test]
    fn test_get_select_statement() {
        assert_eq!(
            TrinoDbClient::new().get_select_statement(&slice()),
            "SELECT * FROM database_abc.schema1.table1"
        );
    }

    #[test]
    fn test_get_select_statement_columns() {
        let s = slice().with_columns(vec!["apple".to_string(), "banana".to_string()]);
        assert_eq!(
            TrinoDbClient::new().get_select_statement(&s),
            "SELECT apple, banana FROM database_abc.schema1.table1"
        );
    }

    #[test]
    fn test_get_select_statement_partitioned() {
        assert_eq!(
            TrinoDbClient::new().get_select_statement(&partitioned(slice())),
            "SELECT * FROM database_abc.schema1.table1\n\
             WHERE my_timestamp_col BETWEEN TIMESTAMP '2020-01-02 00:00:00' AND TIMESTAMP '2020-02-03 00:00:00'"
        );
    }

    #[test]
    fn test_get_cleanup_statement() {
        assert_eq!(
            TrinoDbClient::new().get_cleanup_statement(&slice()),
            "DELETE FROM database_abc.schema1.table1"
        );
    }

    #[test]
    fn test_get_cleanup_statement_partitioned() {
        assert_eq!(
            TrinoDbClient::new().get_cleanup_statement(&partitioned(slice())),
            "DELETE FROM database_abc.schema1.table1\n\
             WHERE my_timestamp_col BETWEEN TIMESTAMP '2020-01-02 00:00:00' AND TIMESTAMP '2020-02-03 00:00:00'"
        );
    }

    #[test]
    fn test_create_table_dialects() {
        let cols = vec![
            ColumnSpec::new("score", SqlType::Double),
            ColumnSpec::new("name", SqlType::Varchar),
        ];
        assert_eq!(
            TrinoDbClient::new().create_table_statement(&slice(), &cols),
            "CREATE TABLE IF NOT EXISTS database_abc.schema1.table1 (score DOUBLE, name VARCHAR)"
        );
        assert_eq!(
            TrinoDbClient::with_dialect(ConnectorStrategy::Sqlx).create_table_statement(&slice(), &cols),
            "CREATE TABLE IF NOT EXISTS database_abc.schema1.table1 (score DOUBLE PRECISION, name TEXT)"
        );
    }
}
