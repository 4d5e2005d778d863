//! Type handlers and the registry that dispatches on declared type.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::TableConnection;
use crate::error::{DbIoError, Result};
use crate::slice::TableSlice;
use crate::value::{DeclaredType, TypedValue};

/// Key/value pairs a handler reports about what it stored.
pub type HandlerMetadata = BTreeMap<String, String>;

/// Converts between one or more in-memory types and table rows.
#[async_trait]
pub trait TypeHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supported_types(&self) -> Vec<DeclaredType>;

    fn handles(&self, ty: &DeclaredType) -> bool {
        self.supported_types().contains(ty)
    }

    /// Write `value` into the slice's table.
    async fn to_table(
        &self,
        value: TypedValue,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<HandlerMetadata>;

    /// Read the slice back as a value of type `ty`.
    async fn from_table(
        &self,
        ty: &DeclaredType,
        slice: &TableSlice,
        conn: &mut TableConnection<'_>,
    ) -> Result<TypedValue>;

    /// Whether [`combine`](Self::combine) can merge several slices.
    fn supports_fan_in(&self) -> bool {
        false
    }

    /// Merge per-slice values, in upstream order, into one value of type `ty`.
    /// `slices[i]` is the slice `parts[i]` was read from.
    fn combine(
        &self,
        ty: &DeclaredType,
        slices: &[TableSlice],
        _parts: Vec<TypedValue>,
    ) -> Result<TypedValue> {
        Err(DbIoError::FanInUnsupported {
            type_name: ty.name().to_string(),
            handler: self.name().to_string(),
            slices: describe_slices(slices),
        })
    }
}

/// Comma-separated slice identities, for errors and logs.
pub fn describe_slices(slices: &[TableSlice]) -> String {
    slices
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Declared type to handler table, fixed at construction.
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn TypeHandler>>,
    by_type: HashMap<DeclaredType, usize>,
}

impl HandlerRegistry {
    /// Fails on an empty handler list and on two handlers claiming one type.
    pub fn new(handlers: Vec<Arc<dyn TypeHandler>>) -> Result<Self> {
        if handlers.is_empty() {
            return Err(DbIoError::EmptyRegistry);
        }

        let mut by_type: HashMap<DeclaredType, usize> = HashMap::new();
        for (idx, handler) in handlers.iter().enumerate() {
            for ty in handler.supported_types() {
                if let Some(&existing) = by_type.get(&ty) {
                    return Err(DbIoError::DuplicateHandler {
                        type_name: ty.name().to_string(),
                        first: handlers[existing].name().to_string(),
                        second: handler.name().to_string(),
                    });
                }
                by_type.insert(ty, idx);
            }
        }

        Ok(Self { handlers, by_type })
    }

    pub fn get(&self, ty: &DeclaredType) -> Option<&dyn TypeHandler> {
        self.by_type.get(ty).map(|&idx| self.handlers[idx].as_ref())
    }

    /// The handler for `ty`; `slice` only labels the error.
    pub fn resolve(&self, ty: &DeclaredType, slice: &TableSlice) -> Result<&dyn TypeHandler> {
        self.get(ty).ok_or_else(|| DbIoError::NoHandler {
            type_name: ty.name().to_string(),
            slice: slice.to_string(),
        })
    }

    pub fn declared_types(&self) -> Vec<DeclaredType> {
        self.handlers
            .iter()
            .flat_map(|h| h.supported_types())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}
