//! Strata Core - engine-agnostic database I/O manager
//!
//! This crate provides:
//! - Table slices: which table, columns and time-window partition a step output maps to
//! - A type handler registry dispatching on the declared in-memory type
//! - The `DbClient` / `DbConnection` seams an engine adapter implements
//! - `DbIoManager`, which overwrites slices on store and reads them back on load
//! - Connection configuration with literal or environment-variable sources

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handler;
pub mod manager;
pub mod slice;
pub mod statement;
pub mod value;

pub use client::{slice_connection_config, DbClient, TableConnection, INSERT_BATCH_ROWS};
pub use config::{ConfigSource, ConnectionConfig, ConnectorStrategy, RawConnectionConfig};
pub use connection::{DbConnection, ScopedConnection};
pub use context::{InputContext, OutputContext, PARTITION_EXPR_KEY, SCHEMA_KEY};
pub use error::{DbIoError, EngineError, Result};
pub use handler::{describe_slices, HandlerMetadata, HandlerRegistry, TypeHandler};
pub use manager::{DbIoManager, OutputMetadata, QUERY_METADATA_KEY};
pub use slice::{resolve_table_slice, TableName, TablePartition, TableSlice, TimeWindow, DEFAULT_SCHEMA};
pub use value::{ColumnSpec, DeclaredType, QueryResult, SqlType, SqlValue, TypedValue};
