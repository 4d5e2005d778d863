//! Strata CLI - run SQL against a configured engine and preview slice statements

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Number, Value};
use strata_core::{
    ConnectionConfig, ConnectorStrategy, DbClient, SqlValue, TableName, TablePartition,
    TableSlice, TimeWindow,
};
use strata_trino::{TrinoDbClient, TrinoResource};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Database I/O manager - run queries and inspect slice statements")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one SQL statement on a fresh connection
    Query {
        /// Path to the connection config JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// SQL text; `?` placeholders are bound from --param in order
        #[arg(short, long)]
        sql: String,

        /// Positional parameter as JSON (`1`, `"abc"`, `null`,
        /// `{"date": "2024-01-01"}`, `{"timestamp": "2024-01-01 00:00:00"}`)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Print the result rows as JSON lines
        #[arg(short, long)]
        fetch: bool,
    },

    /// Resolve a connection config file and print it with the password hidden
    CheckConfig {
        /// Path to the connection config JSON file
        config: PathBuf,
    },

    /// Print the statement the I/O manager issues for a slice
    Statement {
        kind: StatementKind,

        /// Fully qualified table: catalog.schema.table
        #[arg(short, long)]
        table: String,

        /// Comma-separated column projection
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Column or expression the time window applies to
        #[arg(long, requires_all = ["start", "end"])]
        partition_expr: Option<String>,

        /// Inclusive window start
        #[arg(long, requires = "partition_expr")]
        start: Option<String>,

        /// Inclusive window end
        #[arg(long, requires = "partition_expr")]
        end: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatementKind {
    Select,
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so fetched rows on stdout stay machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Query {
            config,
            sql,
            params,
            fetch,
        } => {
            run_query(&config, &sql, &params, fetch).await?;
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!("{:#?}", config);
        }
        Commands::Statement {
            kind,
            table,
            columns,
            partition_expr,
            start,
            end,
        } => {
            let slice = build_slice(&table, columns, partition_expr, start, end)?;
            println!("{}", render_statement(kind, &slice));
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<ConnectionConfig> {
    info!("Loading connection config from {:?}", path);
    ConnectionConfig::from_file(path)
        .with_context(|| format!("invalid connection config {}", path.display()))
}

async fn run_query(config_path: &PathBuf, sql: &str, raw_params: &[String], fetch: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let params = raw_params
        .iter()
        .map(|p| parse_param(p))
        .collect::<Result<Vec<_>>>()?;

    let resource = TrinoResource::new(config);
    let rows = resource.execute_query(sql, &params, fetch).await?;

    if let Some(rows) = rows {
        for row in &rows {
            let line = Value::Array(row.iter().cloned().map(value_to_json).collect());
            println!("{}", line);
        }
        info!("{} rows", rows.len());
    }
    Ok(())
}

/// Parse one `--param` value.
fn parse_param(raw: &str) -> Result<SqlValue> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("parameter is not JSON: {}", raw))?;
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => match n.as_f64() {
                Some(f) => SqlValue::Double(f),
                None => bail!("parameter {} is out of range", raw),
            },
        },
        Value::String(s) => SqlValue::Varchar(s),
        Value::Object(map) if map.len() == 1 => {
            match map.iter().next() {
                Some((key, Value::String(s))) if key == "date" => SqlValue::Date(
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .with_context(|| format!("invalid date parameter {}", s))?,
                ),
                Some((key, Value::String(s))) if key == "timestamp" => {
                    SqlValue::Timestamp(parse_timestamp(s)?)
                }
                _ => bail!("unsupported parameter object {}", raw),
            }
        }
        other => bail!("unsupported parameter {}", other),
    })
}

/// Accepts `YYYY-MM-DD HH:MM:SS[.f]`, the `T`-separated form, or a bare date
/// meaning midnight.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .with_context(|| format!("invalid timestamp {}", raw))
}

fn build_slice(
    table: &str,
    columns: Vec<String>,
    partition_expr: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Result<TableSlice> {
    let name = TableName::parse(table)?;
    let (Some(catalog), Some(schema)) = (name.catalog, name.schema) else {
        bail!("table '{}' must be fully qualified (catalog.schema.table)", table);
    };
    let mut slice = TableSlice::new(catalog, schema, name.table)?.with_columns(columns);

    if let (Some(expr), Some(start), Some(end)) = (partition_expr, start, end) {
        let window = TimeWindow::new(parse_timestamp(&start)?, parse_timestamp(&end)?)?;
        slice = slice.with_partition(TablePartition::new(window, expr));
    }
    Ok(slice)
}

fn render_statement(kind: StatementKind, slice: &TableSlice) -> String {
    let client = TrinoDbClient::with_dialect(ConnectorStrategy::Native);
    match kind {
        StatementKind::Select => client.get_select_statement(slice),
        StatementKind::Delete => client.get_cleanup_statement(slice),
    }
}

fn value_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(b) => Value::Bool(b),
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Double(d) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Varchar(s) => Value::String(s),
        SqlValue::Date(d) => Value::String(d.to_string()),
        SqlValue::Timestamp(ts) => Value::String(ts.to_string()),
    }
}
