//! Strata Trino - Trino adapter for the strata I/O manager
//!
//! This crate provides:
//! - `TrinoDbClient`: slice statements and connections for Trino
//! - A native connection over Trino's HTTP statement protocol
//! - A sqlx connection over the Postgres wire protocol
//! - `TrinoResource` and `QueryOp` for ad-hoc SQL

pub mod client;
pub mod native;
pub mod query_op;
pub mod resource;
pub mod toolkit;

use std::sync::Arc;

use strata_core::{DbIoManager, Result, TypeHandler};

pub use client::TrinoDbClient;
pub use native::TrinoConnection;
pub use query_op::QueryOp;
pub use resource::TrinoResource;
pub use toolkit::SqlxConnection;

/// An I/O manager that reads and writes Trino tables through `handlers`.
///
/// Fails if `handlers` is empty or two handlers claim the same type.
pub fn build_trino_io_manager(handlers: Vec<Arc<dyn TypeHandler>>) -> Result<DbIoManager> {
    DbIoManager::new(Arc::new(TrinoDbClient::new()), handlers)
}
