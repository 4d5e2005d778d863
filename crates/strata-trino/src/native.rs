//! Native Trino connection over the HTTP statement protocol.
//!
//! A statement is `POST`ed to `/v1/statement`; the response carries a page of
//! results and a `nextUri` that is followed with `GET` until it disappears.
//! Session state (user, catalog, schema, transaction) travels in `X-Trino-*`
//! headers on every request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use strata_core::statement::bind_positional;
use strata_core::{
    ColumnSpec, ConnectionConfig, DbConnection, EngineError, QueryResult, SqlType, SqlValue,
};

/// Value of `X-Trino-Source` on every request.
pub const SOURCE_NAME: &str = "strata";

const HEADER_USER: &str = "X-Trino-User";
const HEADER_SOURCE: &str = "X-Trino-Source";
const HEADER_CATALOG: &str = "X-Trino-Catalog";
const HEADER_SCHEMA: &str = "X-Trino-Schema";
const HEADER_TRANSACTION: &str = "X-Trino-Transaction-Id";
const HEADER_STARTED_TRANSACTION: &str = "X-Trino-Started-Transaction-Id";
const HEADER_CLEAR_TRANSACTION: &str = "X-Trino-Clear-Transaction-Id";
const HEADER_SET_CATALOG: &str = "X-Trino-Set-Catalog";
const HEADER_SET_SCHEMA: &str = "X-Trino-Set-Schema";

/// Error names that mean "the table or schema does not exist".
const NOT_FOUND_ERRORS: [&str; 2] = ["TABLE_NOT_FOUND", "SCHEMA_NOT_FOUND"];

/// Attempts per request while the coordinator answers 502/503/504.
const MAX_BUSY_ATTEMPTS: u32 = 5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    #[serde(default)]
    columns: Option<Vec<WireColumn>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireColumn {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    message: String,
    #[serde(default)]
    error_name: String,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One Trino session.
///
/// With autocommit off the session opens a transaction on connect and every
/// statement runs inside it until `commit` or `rollback`.
pub struct TrinoConnection {
    http: reqwest::Client,
    statement_url: Url,
    user: String,
    password: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    autocommit: bool,
    transaction_id: Option<String>,
    transaction_failed: bool,
}

fn required_arg(
    args: &std::collections::BTreeMap<&'static str, String>,
    key: &str,
) -> Result<String, EngineError> {
    args.get(key)
        .cloned()
        .ok_or_else(|| EngineError::Connection(format!("missing connection argument '{}'", key)))
}

impl TrinoConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, EngineError> {
        let args = config.connection_args();
        let host = required_arg(&args, "host")?;
        let port: u16 = required_arg(&args, "port")?
            .parse()
            .map_err(|_| EngineError::Connection("port is not a valid number".to_string()))?;
        let scheme = if port == 443 { "https" } else { "http" };
        let statement_url = Url::parse(&format!("{}://{}:{}/v1/statement", scheme, host, port))
            .map_err(|e| EngineError::Connection(format!("invalid Trino address {}: {}", host, e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let mut conn = Self {
            http,
            statement_url,
            user: required_arg(&args, "user")?,
            password: args.get("password").cloned(),
            catalog: args.get("catalog").cloned(),
            schema: args.get("schema").cloned(),
            autocommit: config.autocommit,
            transaction_id: None,
            transaction_failed: false,
        };

        if !conn.autocommit {
            conn.run("START TRANSACTION").await?;
            if conn.transaction_id.is_none() {
                return Err(EngineError::Protocol(
                    "coordinator did not report a started transaction".to_string(),
                ));
            }
            debug!("Started Trino transaction {:?}", conn.transaction_id);
        }
        Ok(conn)
    }

    /// Current transaction, if one is open.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    async fn run(&mut self, sql: &str) -> Result<QueryResult, EngineError> {
        let first = self.statement_url.clone();
        let mut results = self.request(&first, Some(sql)).await?;
        let mut columns: Option<Vec<WireColumn>> = None;
        let mut data: Vec<Vec<Value>> = Vec::new();

        loop {
            if let Some(err) = results.error {
                if self.transaction_id.is_some() {
                    self.transaction_failed = true;
                }
                return Err(query_error(err));
            }
            if columns.is_none() {
                columns = results.columns;
            }
            if let Some(page) = results.data {
                data.extend(page);
            }
            match results.next_uri {
                Some(next) => {
                    let next = Url::parse(&next)
                        .map_err(|e| EngineError::Protocol(format!("bad nextUri '{}': {}", next, e)))?;
                    debug!("Polling {}", next);
                    results = self.request(&next, None).await?;
                }
                None => break,
            }
        }

        let columns: Vec<ColumnSpec> = columns
            .unwrap_or_default()
            .into_iter()
            .map(|c| ColumnSpec::new(c.name, SqlType::parse(&c.type_name)))
            .collect();
        let rows = data
            .into_iter()
            .map(|row| convert_row(row, &columns))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult { columns, rows })
    }

    /// `POST` the statement when `body` is set, else `GET` the next page.
    /// Retries while the coordinator is busy.
    async fn request(&mut self, url: &Url, body: Option<&str>) -> Result<QueryResults, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = match body {
                Some(sql) => self.http.post(url.clone()).body(sql.to_string()),
                None => self.http.get(url.clone()),
            };
            request = request
                .header(HEADER_USER, &self.user)
                .header(HEADER_SOURCE, SOURCE_NAME);
            if let Some(catalog) = &self.catalog {
                request = request.header(HEADER_CATALOG, catalog);
            }
            if let Some(schema) = &self.schema {
                request = request.header(HEADER_SCHEMA, schema);
            }
            if !self.autocommit {
                request = request.header(
                    HEADER_TRANSACTION,
                    self.transaction_id.as_deref().unwrap_or("NONE"),
                );
            }
            if let Some(password) = &self.password {
                request = request.basic_auth(&self.user, Some(password));
            }

            let response = request
                .send()
                .await
                .map_err(|e| EngineError::Connection(format!("request to {} failed: {}", url, e)))?;
            let status = response.status();

            if matches!(
                status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ) && attempt < MAX_BUSY_ATTEMPTS
            {
                debug!("Trino busy ({}), retrying {}", status, url);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(EngineError::Connection(format!(
                    "Trino answered {} for {}: {}",
                    status, url, text
                )));
            }

            self.apply_session_headers(response.headers());
            return response
                .json::<QueryResults>()
                .await
                .map_err(|e| EngineError::Protocol(format!("invalid response from {}: {}", url, e)));
        }
    }

    fn apply_session_headers(&mut self, headers: &HeaderMap) {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(id) = get(HEADER_STARTED_TRANSACTION) {
            self.transaction_id = Some(id);
            self.transaction_failed = false;
        }
        if headers.contains_key(HEADER_CLEAR_TRANSACTION) {
            self.transaction_id = None;
        }
        if let Some(catalog) = get(HEADER_SET_CATALOG) {
            self.catalog = Some(catalog);
        }
        if let Some(schema) = get(HEADER_SET_SCHEMA) {
            self.schema = Some(schema);
        }
    }
}

#[async_trait]
impl DbConnection for TrinoConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, EngineError> {
        if params.is_empty() {
            self.run(sql).await
        } else {
            let bound = bind_positional(sql, params)?;
            self.run(&bound).await
        }
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    async fn commit(&mut self) -> Result<(), EngineError> {
        if self.transaction_id.is_none() {
            return Ok(());
        }
        if self.transaction_failed {
            // A failed statement aborts the transaction; nothing to commit.
            debug!("Transaction had a failed statement, rolling back instead of committing");
            return self.rollback().await;
        }
        self.run("COMMIT").await?;
        self.transaction_id = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), EngineError> {
        if self.transaction_id.is_none() {
            return Ok(());
        }
        let outcome = self.run("ROLLBACK").await.map(|_| ());
        self.transaction_id = None;
        self.transaction_failed = false;
        outcome
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if self.transaction_id.is_some() {
            warn!("Closing Trino connection with an open transaction, rolling back");
            return self.rollback().await;
        }
        Ok(())
    }
}

fn query_error(err: WireError) -> EngineError {
    if NOT_FOUND_ERRORS.contains(&err.error_name.as_str()) {
        EngineError::ObjectNotFound {
            code: err.error_name,
            message: err.message,
        }
    } else {
        EngineError::Query {
            code: err.error_name,
            message: err.message,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON to cell conversion
// ---------------------------------------------------------------------------

fn convert_row(row: Vec<Value>, columns: &[ColumnSpec]) -> Result<Vec<SqlValue>, EngineError> {
    if row.len() != columns.len() {
        return Err(EngineError::Protocol(format!(
            "row has {} values for {} columns",
            row.len(),
            columns.len()
        )));
    }
    row.into_iter()
        .zip(columns)
        .map(|(value, column)| convert_value(value, column))
        .collect()
}

fn convert_value(value: Value, column: &ColumnSpec) -> Result<SqlValue, EngineError> {
    let mismatch = |v: &Value| {
        EngineError::Protocol(format!(
            "column '{}' of type {} cannot hold {}",
            column.name,
            column.sql_type.ansi_name(),
            v
        ))
    };

    match (&column.sql_type, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (SqlType::Boolean, Value::Bool(b)) => Ok(SqlValue::Boolean(b)),
        (t, Value::Number(n)) if t.is_integral() => n
            .as_i64()
            .map(SqlValue::Integer)
            .ok_or_else(|| mismatch(&Value::Number(n))),
        (SqlType::Real | SqlType::Double, Value::Number(n)) => n
            .as_f64()
            .map(SqlValue::Double)
            .ok_or_else(|| mismatch(&Value::Number(n))),
        (SqlType::Real | SqlType::Double, Value::String(s)) => match s.as_str() {
            "NaN" => Ok(SqlValue::Double(f64::NAN)),
            "Infinity" => Ok(SqlValue::Double(f64::INFINITY)),
            "-Infinity" => Ok(SqlValue::Double(f64::NEG_INFINITY)),
            _ => Err(mismatch(&Value::String(s))),
        },
        (SqlType::Varchar, Value::String(s)) => Ok(SqlValue::Varchar(s)),
        (SqlType::Date, Value::String(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| mismatch(&Value::String(s))),
        (SqlType::Timestamp, Value::String(s)) => NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
            .map(SqlValue::Timestamp)
            .map_err(|_| mismatch(&Value::String(s))),
        (SqlType::Other(_), Value::String(s)) => Ok(SqlValue::Varchar(s)),
        (SqlType::Other(_), v) => Ok(SqlValue::Varchar(v.to_string())),
        (_, v) => Err(mismatch(&v)),
    }
}
