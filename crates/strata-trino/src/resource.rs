//! A Trino resource for running ad-hoc SQL from step bodies.

use tracing::info;

use strata_core::{
    ConnectionConfig, DbClient, DbConnection, EngineError, ScopedConnection, SqlValue,
};

use crate::client::TrinoDbClient;

/// Rows of one statement.
pub type Rows = Vec<Vec<SqlValue>>;

/// Connection settings plus helpers that run statements on a fresh
/// connection and release it afterwards.
#[derive(Debug, Clone)]
pub struct TrinoResource {
    config: ConnectionConfig,
    client: TrinoDbClient,
}

impl TrinoResource {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            client: TrinoDbClient::with_dialect(config.connector),
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open a connection with this resource's settings. The caller must
    /// `finish` it.
    pub async fn get_connection(&self) -> Result<ScopedConnection, EngineError> {
        self.client.get_connection(&self.config).await
    }

    /// Run one statement with positional `?` parameters. Returns its rows
    /// when `fetch_results` is set.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlValue],
        fetch_results: bool,
    ) -> Result<Option<Rows>, EngineError> {
        let mut scope = self.get_connection().await?;
        info!("Executing query: {}", sql);
        let outcome = scope
            .connection()
            .execute(sql, params)
            .await
            .map(|result| fetch_results.then_some(result.rows));
        scope.finish(outcome, |e| e).await
    }

    /// Run several statements in order on one connection, each with the same
    /// parameters. Stops at the first failure.
    pub async fn execute_queries<S>(
        &self,
        sqls: &[S],
        params: &[SqlValue],
        fetch_results: bool,
    ) -> Result<Option<Vec<Rows>>, EngineError>
    where
        S: AsRef<str> + Sync,
    {
        let mut scope = self.get_connection().await?;
        let mut results = Vec::with_capacity(sqls.len());
        let mut outcome = Ok(());
        for sql in sqls {
            let sql = sql.as_ref();
            info!("Executing query: {}", sql);
            match scope.connection().execute(sql, params).await {
                Ok(result) => results.push(result.rows),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        scope
            .finish(outcome, |e| e)
            .await
            .map(|()| fetch_results.then_some(results))
    }
}
