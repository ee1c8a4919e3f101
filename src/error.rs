//! Error types for the SQL Server provider.

use serde_json::Value;
use thiserror::Error;

use crate::schema::Diagnostic;
use crate::sql::ConnectorError;

/// Errors that can occur while managing SQL Server resources.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The resource configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is not served by this provider.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// An import identifier could not be parsed.
    #[error("Invalid import ID: {0}")]
    InvalidImportId(String),

    /// A state or configuration document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database operation failed.
    ///
    /// `context` names the operation and its target, e.g.
    /// `unable to create schema [sales] in database [master]`.
    #[error("{context}: {source}")]
    Connector {
        /// What was being attempted.
        context: String,
        /// The underlying connector failure.
        #[source]
        source: ConnectorError,
    },

    /// The object was created, but its state could not be completed.
    ///
    /// `state` carries the new ID so the framework keeps tracking the object
    /// instead of creating it again.
    #[error("{source}")]
    Incomplete {
        /// State as far as it is known, ID included.
        state: Box<Value>,
        /// Why the state is incomplete.
        source: Box<ProviderError>,
    },

    /// The operation did not finish within the configured timeout.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The operation is not supported by this resource.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Wrap a connector failure with a description of the operation.
    pub fn connector(context: impl Into<String>, source: ConnectorError) -> Self {
        Self::Connector {
            context: context.into(),
            source,
        }
    }

    /// Attach the partial state of a created object to the error that cut
    /// its creation short.
    pub fn incomplete(state: Value, source: ProviderError) -> Self {
        Self::Incomplete {
            state: Box::new(state),
            source: Box::new(source),
        }
    }

    /// State the framework should record despite the failure, if any.
    pub fn partial_state(&self) -> Option<&Value> {
        match self {
            Self::Incomplete { state, .. } => Some(state.as_ref()),
            _ => None,
        }
    }

    /// Get the error message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::InvalidImportId(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Connector { context, .. } => context,
            Self::Incomplete { source, .. } => source.message(),
            Self::DeadlineExceeded(msg) => msg,
            Self::Unimplemented(msg) => msg,
        }
    }

    /// Render the error as a single error diagnostic for the framework.
    pub fn to_diagnostic(&self) -> Diagnostic {
        if let Self::Incomplete { source, .. } = self {
            return source.to_diagnostic();
        }
        let diagnostic = Diagnostic::error(self.to_string());
        match self {
            Self::Connector { source, .. } => diagnostic.with_detail(source.to_string()),
            _ => diagnostic,
        }
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        err.to_diagnostic()
    }
}
