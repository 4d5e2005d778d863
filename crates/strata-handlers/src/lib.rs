//! Strata Handlers - type handlers for the strata I/O manager
//!
//! This crate provides:
//! - `RecordBatchHandler`: Arrow record batches
//! - `JsonRowsHandler`: lists of `serde_json` objects

pub mod json_rows;
pub mod record_batch;

use std::sync::Arc;

use strata_core::TypeHandler;

pub use json_rows::{JsonRows, JsonRowsHandler};
pub use record_batch::RecordBatchHandler;

/// Every handler in this crate, ready for a handler registry.
pub fn default_handlers() -> Vec<Arc<dyn TypeHandler>> {
    vec![Arc::new(RecordBatchHandler::new()), Arc::new(JsonRowsHandler::new())]
}
