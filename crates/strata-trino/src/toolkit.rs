//! Generic SQL-toolkit connection through sqlx over the Postgres wire
//! protocol.
//!
//! Built from the same connection arguments as the native path: `catalog`
//! selects the database and `schema` becomes the session `search_path`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgColumn, PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use tracing::debug;

use strata_core::statement::bind_positional;
use strata_core::{
    ColumnSpec, ConnectionConfig, DbConnection, EngineError, QueryResult, SqlType, SqlValue,
};

/// SQLSTATEs for "relation does not exist" and "schema does not exist".
const NOT_FOUND_STATES: [&str; 2] = ["42P01", "3F000"];

/// Postgres spelling of a column type for `CREATE TABLE`.
pub fn postgres_type_name(sql_type: &SqlType) -> String {
    match sql_type {
        SqlType::TinyInt | SqlType::SmallInt => "SMALLINT".to_string(),
        SqlType::Double => "DOUBLE PRECISION".to_string(),
        SqlType::Varchar => "TEXT".to_string(),
        other => other.ansi_name().to_string(),
    }
}

pub struct SqlxConnection {
    conn: Option<PgConnection>,
    autocommit: bool,
    in_transaction: bool,
}

impl SqlxConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, EngineError> {
        let args = config.connection_args();
        let mut options = PgConnectOptions::new();
        if let Some(host) = args.get("host") {
            options = options.host(host);
        }
        if let Some(port) = args.get("port") {
            let port: u16 = port
                .parse()
                .map_err(|_| EngineError::Connection("port is not a valid number".to_string()))?;
            options = options.port(port);
        }
        if let Some(user) = args.get("user") {
            options = options.username(user);
        }
        if let Some(password) = args.get("password") {
            options = options.password(password);
        }
        if let Some(catalog) = args.get("catalog") {
            options = options.database(catalog);
        }
        if let Some(schema) = args.get("schema") {
            options = options.options([("search_path", schema.as_str())]);
        }

        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(map_sqlx_error)?;

        let mut in_transaction = false;
        if !config.autocommit {
            conn.execute("BEGIN").await.map_err(map_sqlx_error)?;
            in_transaction = true;
        }

        Ok(Self {
            conn: Some(conn),
            autocommit: config.autocommit,
            in_transaction,
        })
    }

    fn live(&mut self) -> Result<&mut PgConnection, EngineError> {
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::Connection("connection is closed".to_string()))
    }

    async fn end_transaction(&mut self, statement: &str) -> Result<(), EngineError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        let conn = self.live()?;
        conn.execute(statement).await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl DbConnection for SqlxConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError> {
        let sql = if params.is_empty() {
            sql.to_string()
        } else {
            bind_positional(sql, params)?
        };
        let conn = self.live()?;

        let rows: Vec<PgRow> = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        let columns: Vec<ColumnSpec> = match rows.first() {
            Some(row) => column_specs(row.columns()),
            None => {
                // No rows to read the shape from; ask the server instead.
                let described = conn.describe(&sql).await.map_err(map_sqlx_error)?;
                column_specs(described.columns())
            }
        };

        let rows = rows
            .iter()
            .map(|row| convert_row(row, &columns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult { columns, rows })
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn commit(&mut self) -> Result<(), EngineError> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), EngineError> {
        self.end_transaction("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        match self.conn.take() {
            Some(conn) => {
                debug!("Closing sqlx connection");
                conn.close().await.map_err(map_sqlx_error)
            }
            None => Ok(()),
        }
    }
}

fn column_specs(columns: &[PgColumn]) -> Vec<ColumnSpec> {
    columns
        .iter()
        .map(|c| ColumnSpec::new(c.name(), SqlType::parse(c.type_info().name())))
        .collect()
}

fn convert_row(row: &PgRow, columns: &[ColumnSpec]) -> Result<Vec<SqlValue>, EngineError> {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| convert_cell(row, i, column))
        .collect()
}

fn convert_cell(row: &PgRow, i: usize, column: &ColumnSpec) -> Result<SqlValue, EngineError> {
    let decode_err = |e: sqlx::Error| {
        EngineError::Protocol(format!(
            "cannot decode column '{}' ({}): {}",
            column.name,
            column.sql_type.ansi_name(),
            e
        ))
    };

    let value = match &column.sql_type {
        SqlType::Boolean => row
            .try_get::<Option<bool>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Boolean),
        SqlType::TinyInt | SqlType::SmallInt => row
            .try_get::<Option<i16>, _>(i)
            .map_err(decode_err)?
            .map(|v| SqlValue::Integer(i64::from(v))),
        SqlType::Integer => row
            .try_get::<Option<i32>, _>(i)
            .map_err(decode_err)?
            .map(|v| SqlValue::Integer(i64::from(v))),
        SqlType::BigInt => row
            .try_get::<Option<i64>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Integer),
        SqlType::Real => row
            .try_get::<Option<f32>, _>(i)
            .map_err(decode_err)?
            .map(|v| SqlValue::Double(f64::from(v))),
        SqlType::Double => row
            .try_get::<Option<f64>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Double),
        SqlType::Date => row
            .try_get::<Option<NaiveDate>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Date),
        SqlType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Timestamp),
        SqlType::Varchar | SqlType::Other(_) => row
            .try_get::<Option<String>, _>(i)
            .map_err(decode_err)?
            .map(SqlValue::Varchar),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn map_sqlx_error(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if NOT_FOUND_STATES.contains(&code.as_str()) {
                EngineError::ObjectNotFound {
                    code,
                    message: db.message().to_string(),
                }
            } else {
                EngineError::Query {
                    code,
                    message: db.message().to_string(),
                }
            }
        }
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut) => EngineError::Connection(e.to_string()),
        other => EngineError::Protocol(other.to_string()),
    }
}
