//! The database I/O manager: stores step outputs into table slices and loads
//! table slices back into step inputs.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::client::{slice_connection_config, DbClient, TableConnection};
use crate::config::ConnectionConfig;
use crate::context::{InputContext, OutputContext};
use crate::error::{DbIoError, Result};
use crate::handler::{describe_slices, HandlerRegistry, TypeHandler};
use crate::slice::{resolve_table_slice, TableSlice};
use crate::value::{DeclaredType, TypedValue};

/// Output metadata key holding the statement that reads the stored slice.
pub const QUERY_METADATA_KEY: &str = "query";

/// Metadata recorded for a stored output.
pub type OutputMetadata = BTreeMap<String, String>;

/// Routes values through the handler registered for their type and the
/// engine behind `client`. Immutable once built, so it can be shared freely.
#[derive(Clone)]
pub struct DbIoManager {
    registry: Arc<HandlerRegistry>,
    client: Arc<dyn DbClient>,
}

impl DbIoManager {
    pub fn new(client: Arc<dyn DbClient>, handlers: Vec<Arc<dyn TypeHandler>>) -> Result<Self> {
        Ok(Self::from_parts(client, HandlerRegistry::new(handlers)?))
    }

    pub fn from_parts(client: Arc<dyn DbClient>, registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            client,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn client(&self) -> &dyn DbClient {
        self.client.as_ref()
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    pub async fn store<T: Any + Send>(&self, value: T, ctx: &OutputContext) -> Result<OutputMetadata> {
        self.store_value(TypedValue::new(value), ctx).await
    }

    /// Overwrite the output's slice with `value`.
    ///
    /// The handler is resolved before anything touches the engine. The
    /// slice's existing rows are deleted, then the handler writes on a fresh
    /// connection.
    pub async fn store_value(&self, value: TypedValue, ctx: &OutputContext) -> Result<OutputMetadata> {
        let slice = resolve_table_slice(ctx, &ctx.columns)?;
        let handler = self.registry.resolve(&value.declared_type(), &slice)?;

        info!(
            "Storing {} into {} with handler {}",
            ctx.display_name(),
            slice,
            handler.name()
        );

        self.client.delete_table_slice(ctx, &slice).await?;

        let config = slice_connection_config(&ctx.resource_config, &slice);
        let mut scope = self
            .client
            .get_connection(&config)
            .await
            .map_err(|e| DbIoError::engine(&slice, e))?;
        let outcome = {
            let mut conn = TableConnection::new(self.client.as_ref(), scope.connection());
            handler.to_table(value, &slice, &mut conn).await
        };
        let mut metadata = scope
            .finish(outcome, |e| DbIoError::engine(&slice, e))
            .await?;

        metadata.insert(
            QUERY_METADATA_KEY.to_string(),
            self.client.get_select_statement(&slice),
        );
        info!("Stored {}", slice);
        Ok(metadata)
    }

    /// Record metadata for an output whose step already wrote the table.
    pub fn store_nothing(&self, ctx: &OutputContext) -> Result<OutputMetadata> {
        let slice = resolve_table_slice(ctx, &ctx.columns)?;
        info!("Output {} was written by its step, recording {}", ctx.display_name(), slice);
        let mut metadata = OutputMetadata::new();
        metadata.insert(
            QUERY_METADATA_KEY.to_string(),
            self.client.get_select_statement(&slice),
        );
        Ok(metadata)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    pub async fn load<T: Any>(&self, ctx: &InputContext) -> Result<T> {
        self.load_value(ctx).await?.downcast::<T>()
    }

    /// Read the input's upstream slices as its declared type.
    ///
    /// Several upstreams are read one after another, in order, and merged by
    /// the handler. Handlers that cannot merge reject fan-in before any read.
    pub async fn load_value(&self, ctx: &InputContext) -> Result<TypedValue> {
        let ty = ctx.declared_type;
        match ctx.upstreams.as_slice() {
            [] => Err(DbIoError::config(format!(
                "input '{}' of step '{}' has no upstream output to load",
                ctx.name, ctx.step_name
            ))),
            [upstream] => {
                let slice = resolve_table_slice(upstream, &ctx.columns)?;
                let handler = self.registry.resolve(&ty, &slice)?;
                info!("Loading {} from {}", ctx.name, slice);
                self.read_slice(handler, &ty, &slice, &ctx.resource_config).await
            }
            upstreams => {
                let slices = upstreams
                    .iter()
                    .map(|u| resolve_table_slice(u, &ctx.columns))
                    .collect::<Result<Vec<_>>>()?;
                let handler = self.registry.resolve(&ty, &slices[0])?;
                if !handler.supports_fan_in() {
                    return Err(DbIoError::FanInUnsupported {
                        type_name: ty.name().to_string(),
                        handler: handler.name().to_string(),
                        slices: describe_slices(&slices),
                    });
                }

                info!("Loading {} from {}", ctx.name, describe_slices(&slices));
                let mut parts = Vec::with_capacity(slices.len());
                for slice in &slices {
                    parts.push(self.read_slice(handler, &ty, slice, &ctx.resource_config).await?);
                }
                handler.combine(&ty, &slices, parts)
            }
        }
    }

    async fn read_slice(
        &self,
        handler: &dyn TypeHandler,
        ty: &DeclaredType,
        slice: &TableSlice,
        resource_config: &ConnectionConfig,
    ) -> Result<TypedValue> {
        let config = slice_connection_config(resource_config, slice);
        let mut scope = self
            .client
            .get_connection(&config)
            .await
            .map_err(|e| DbIoError::engine(slice, e))?;
        let outcome = {
            let mut conn = TableConnection::new(self.client.as_ref(), scope.connection());
            handler.from_table(ty, slice, &mut conn).await
        };
        scope.finish(outcome, |e| DbIoError::engine(slice, e)).await
    }
}

impl std::fmt::Debug for DbIoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIoManager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
