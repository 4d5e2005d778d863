//! Typed errors for the I/O manager and the engine connections it drives.

use thiserror::Error;

use crate::slice::TableSlice;

/// Errors reported by an engine connection while executing SQL.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Could not open (or keep) a connection to the engine.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The statement referenced a table or schema that does not exist.
    #[error("object not found ({code}): {message}")]
    ObjectNotFound { code: String, message: String },
    /// Any other failure reported by the engine for a statement.
    #[error("query failed ({code}): {message}")]
    Query { code: String, message: String },
    /// The engine answered with something the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// `true` for the "table/schema does not exist" class of failures.
    pub fn is_object_not_found(&self) -> bool {
        matches!(self, EngineError::ObjectNotFound { .. })
    }
}

/// Main error type for load/store operations.
#[derive(Debug, Error)]
pub enum DbIoError {
    /// Malformed table name, missing connection field, bad partition setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The manager was built without any type handler.
    #[error("no type handlers were provided")]
    EmptyRegistry,

    /// Two handlers claim the same declared type.
    #[error("handlers '{first}' and '{second}' both claim type '{type_name}'")]
    DuplicateHandler {
        type_name: String,
        first: String,
        second: String,
    },

    /// No registered handler claims the declared type.
    #[error("no handler registered for type '{type_name}' (table {slice})")]
    NoHandler { type_name: String, slice: String },

    /// An input spans several upstream slices and its handler cannot combine them.
    #[error("handler '{handler}' cannot combine {slices} into '{type_name}'")]
    FanInUnsupported {
        type_name: String,
        handler: String,
        slices: String,
    },

    /// SQL execution failed for a reason other than a tolerated missing table.
    #[error("engine error on {slice}: {source}")]
    Engine {
        slice: String,
        #[source]
        source: EngineError,
    },

    /// A value did not have the type the caller asked for.
    #[error("expected a value of type '{expected}', got '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    /// A handler could not convert between its type and table rows.
    #[error("handler '{handler}' failed on {slice}: {message}")]
    Handler {
        handler: String,
        slice: String,
        message: String,
    },
}

impl DbIoError {
    /// Create a Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        DbIoError::Configuration(message.into())
    }

    /// Wrap an engine failure with the identity of the slice it concerned.
    pub fn engine(slice: &TableSlice, source: EngineError) -> Self {
        DbIoError::Engine {
            slice: slice.to_string(),
            source,
        }
    }

    /// Create a Handler error for the given slice.
    pub fn handler(handler: &str, slice: &TableSlice, message: impl Into<String>) -> Self {
        DbIoError::Handler {
            handler: handler.to_string(),
            slice: slice.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for load/store operations.
pub type Result<T> = std::result::Result<T, DbIoError>;
