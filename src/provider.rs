//! The provider surface the framework talks to.
//!
//! [`ProviderService`] is the narrow interface the framework consumes: JSON
//! configuration and state go in, JSON state and diagnostics come out. Diffing,
//! state persistence and the plugin handshake stay on the framework's side.
//! [`MssqlProvider`] implements it for SQL Server.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::resources::schema::{self as schema_resource, RESOURCE_TYPE as SCHEMA_RESOURCE};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::sql::{ConnectorFactory, MssqlConnectorFactory, SchemaConnector};
use crate::state::ResourceData;
use crate::types::{ImportedResource, ProviderMetadata};
use crate::validation::validate;

/// Operations a provider offers to the framework.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// The provider's schema, covering its own configuration and every
    /// resource type.
    fn schema(&self) -> ProviderSchema;

    /// Resource type names, derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.schema().resources.keys().cloned().collect(),
        }
    }

    /// Check the provider configuration without applying it.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&self.schema().provider, &config))
    }

    /// Apply the provider configuration.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource configuration before it is planned.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.schema();
        let resource = schema
            .resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))?;
        Ok(validate(resource, &config))
    }

    /// Create a resource and return its new state.
    ///
    /// When the object was created but its state could not be completed, the
    /// error is [`ProviderError::Incomplete`] and carries the state to record.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh a resource's state. A state with an empty `id` means the
    /// object is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update a resource in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (prior_state, planned_state);
        Err(ProviderError::Unimplemented(format!(
            "{} cannot be updated in place",
            resource_type
        )))
    }

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Bring an existing object under management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError>;
}

/// SQL Server provider.
///
/// Connectors are built per operation from the resource's `server` block by
/// the injected [`ConnectorFactory`].
pub struct MssqlProvider {
    config: RwLock<ProviderConfig>,
    connectors: Arc<dyn ConnectorFactory>,
}

impl Default for MssqlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MssqlProvider {
    /// A provider connecting to real SQL Server instances.
    pub fn new() -> Self {
        Self::with_connector_factory(MssqlConnectorFactory)
    }

    /// A provider obtaining its connectors from `factory`.
    pub fn with_connector_factory(factory: impl ConnectorFactory + 'static) -> Self {
        Self {
            config: RwLock::new(ProviderConfig::default()),
            connectors: Arc::new(factory),
        }
    }

    /// The configuration currently in effect.
    pub async fn config(&self) -> ProviderConfig {
        self.config.read().await.clone()
    }

    async fn schema_connector(
        &self,
        data: &ResourceData,
    ) -> Result<Box<dyn SchemaConnector>, ProviderError> {
        let server = data.server()?;
        let options = self.config.read().await.connect_options();
        self.connectors
            .schema_connector(&server, options)
            .map_err(|e| {
                ProviderError::connector(
                    format!("unable to connect to server [{}]", server.address()),
                    e,
                )
            })
    }

    async fn with_timeout<T>(
        &self,
        action: &str,
        operation: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let timeout = self.config.read().await.timeout();
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::DeadlineExceeded(format!(
                "{} did not finish within {}s",
                action,
                timeout.as_secs()
            ))),
        }
    }

    /// Apply defaults and validate a schema configuration.
    fn prepare_schema(config: Value) -> Result<(ResourceData, Vec<Diagnostic>), ProviderError> {
        let mut data = ResourceData::from_value(config)?;
        data.apply_defaults(&schema_resource::resource_schema().block);
        let diagnostics = schema_resource::validate_config(&data);
        Ok((data, diagnostics))
    }
}

fn unknown_resource(resource_type: &str) -> ProviderError {
    ProviderError::UnknownResource(resource_type.to_string())
}

fn validation_failure(diagnostics: &[Diagnostic]) -> ProviderError {
    let summaries: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect();
    ProviderError::Validation(summaries.join("; "))
}

#[async_trait::async_trait]
impl ProviderService for MssqlProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(SCHEMA_RESOURCE, schema_resource::resource_schema())
    }

    #[instrument(skip_all)]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(diagnostics = diagnostics.len(), "configure rejected");
            return Ok(diagnostics);
        }

        match ProviderConfig::from_value(config) {
            Ok(parsed) => {
                info!(
                    timeout_seconds = parsed.timeout_seconds,
                    trust_server_certificate = parsed.trust_server_certificate,
                    "provider configured"
                );
                *self.config.write().await = parsed;
                Ok(diagnostics)
            },
            Err(e) => {
                warn!(error = %e, "configure rejected");
                Ok(vec![e.to_diagnostic()])
            },
        }
    }

    #[instrument(skip(self, config))]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            SCHEMA_RESOURCE => {
                let (_, diagnostics) = Self::prepare_schema(config)?;
                debug!(diagnostics = diagnostics.len(), "validated configuration");
                Ok(diagnostics)
            },
            other => Err(unknown_resource(other)),
        }
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        if resource_type != SCHEMA_RESOURCE {
            return Err(unknown_resource(resource_type));
        }

        let (mut data, diagnostics) = Self::prepare_schema(planned_state)?;
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(validation_failure(&diagnostics));
        }

        let connector = self.schema_connector(&data).await?;
        let outcome = self
            .with_timeout("create", schema_resource::create(connector.as_ref(), &mut data))
            .await;
        match outcome {
            Ok(()) => Ok(data.into_value()),
            // An ID means the schema exists; hand its state back with the error.
            Err(e) if !data.id().is_empty() => {
                warn!(error = %e, id = data.id(), "created, but state is incomplete");
                Err(ProviderError::incomplete(data.into_value(), e))
            },
            Err(e) => {
                error!(error = %e, "create failed");
                Err(e)
            },
        }
    }

    #[instrument(skip(self, current_state))]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        if resource_type != SCHEMA_RESOURCE {
            return Err(unknown_resource(resource_type));
        }

        let mut data = ResourceData::from_value(current_state)?;
        data.apply_defaults(&schema_resource::resource_schema().block);

        let connector = self.schema_connector(&data).await?;
        self.with_timeout("read", schema_resource::read(connector.as_ref(), &mut data))
            .await
            .inspect_err(|e| error!(error = %e, "read failed"))?;
        Ok(data.into_value())
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        if resource_type != SCHEMA_RESOURCE {
            return Err(unknown_resource(resource_type));
        }

        let mut data = ResourceData::from_value(current_state)?;
        data.apply_defaults(&schema_resource::resource_schema().block);

        let connector = self.schema_connector(&data).await?;
        self.with_timeout("delete", schema_resource::delete(connector.as_ref(), &mut data))
            .await
            .inspect_err(|e| error!(error = %e, "delete failed"))
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        if resource_type != SCHEMA_RESOURCE {
            return Err(unknown_resource(resource_type));
        }

        let mut data = schema_resource::parse_import_id(id)?;
        data.apply_defaults(&schema_resource::resource_schema().block);

        let connector = self.schema_connector(&data).await?;
        self.with_timeout("import", schema_resource::import(connector.as_ref(), &mut data))
            .await
            .inspect_err(|e| error!(error = %e, "import failed"))?;
        Ok(vec![ImportedResource::new(SCHEMA_RESOURCE, data.into_value())])
    }
}
