//! Step contexts handed to the I/O manager by the orchestrator.

use std::any::Any;
use std::collections::BTreeMap;

use crate::config::ConnectionConfig;
use crate::slice::TimeWindow;
use crate::value::DeclaredType;

/// Output metadata key naming the table's schema.
pub const SCHEMA_KEY: &str = "schema";

/// Output metadata key naming the column (or expression) a time window is
/// applied to.
pub const PARTITION_EXPR_KEY: &str = "partition_expr";

/// Everything known about one step output while it is being stored, and
/// about an upstream output while it is being loaded.
#[derive(Debug, Clone)]
pub struct OutputContext {
    pub step_name: String,
    /// Output name; used as the table name when there is no asset key.
    pub name: String,
    /// Asset key path. Its segments, joined, give the table name.
    pub asset_key: Option<Vec<String>>,
    pub metadata: BTreeMap<String, String>,
    /// Columns the output declares.
    pub columns: Vec<String>,
    /// Set when the step runs for a time-window partition.
    pub time_window: Option<TimeWindow>,
    pub resource_config: ConnectionConfig,
}

impl OutputContext {
    pub fn new(
        step_name: impl Into<String>,
        name: impl Into<String>,
        resource_config: ConnectionConfig,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            name: name.into(),
            asset_key: None,
            metadata: BTreeMap::new(),
            columns: Vec::new(),
            time_window: None,
            resource_config,
        }
    }

    pub fn with_asset_key<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.asset_key = Some(path.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    /// Shorthand for the `partition_expr` metadata entry.
    pub fn with_partition_expr(self, expr: impl Into<String>) -> Self {
        self.with_metadata(PARTITION_EXPR_KEY, expr)
    }

    /// Name used in log lines: the asset key when set, else `step.output`.
    pub fn display_name(&self) -> String {
        match &self.asset_key {
            Some(path) if !path.is_empty() => path.join("."),
            _ => format!("{}.{}", self.step_name, self.name),
        }
    }
}

/// A step input being loaded.
///
/// `upstreams` holds one output context per upstream output feeding this
/// input. More than one means fan-in.
#[derive(Debug, Clone)]
pub struct InputContext {
    pub step_name: String,
    pub name: String,
    pub declared_type: DeclaredType,
    /// Columns the input asks for. Empty means all columns.
    pub columns: Vec<String>,
    pub resource_config: ConnectionConfig,
    pub upstreams: Vec<OutputContext>,
}

impl InputContext {
    /// An input expecting values of type `T`.
    pub fn new<T: Any>(
        step_name: impl Into<String>,
        name: impl Into<String>,
        resource_config: ConnectionConfig,
    ) -> Self {
        Self::with_declared_type(step_name, name, DeclaredType::of::<T>(), resource_config)
    }

    pub fn with_declared_type(
        step_name: impl Into<String>,
        name: impl Into<String>,
        declared_type: DeclaredType,
        resource_config: ConnectionConfig,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            name: name.into(),
            declared_type,
            columns: Vec::new(),
            resource_config,
            upstreams: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_upstream(mut self, upstream: OutputContext) -> Self {
        self.upstreams.push(upstream);
        self
    }

    pub fn is_fan_in(&self) -> bool {
        self.upstreams.len() > 1
    }
}
