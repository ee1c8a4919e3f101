//! Database access for the resources.
//!
//! The lifecycle handlers talk to SQL Server only through the narrow
//! connector traits defined here, which keeps them testable against the
//! in-memory double in [`crate::testing`].

mod mssql;

pub use mssql::{MssqlConnector, MssqlConnectorFactory};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Schema, Server};

/// Catalog lookup for a schema by name; `@schema` is bound by the connector.
pub const SELECT_SCHEMA_SQL: &str = "SELECT * FROM sys.schemas where name = @schema";

/// Statement creating `name`, owned by `dbo`.
pub fn create_schema_sql(name: &str) -> String {
    format!("CREATE SCHEMA {} AUTHORIZATION [dbo]", name)
}

/// Statement dropping `name`.
pub fn drop_schema_sql(name: &str) -> String {
    format!("DROP SCHEMA {}", name)
}

/// Errors raised while talking to the database.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The server could not be reached or refused the login.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server block carries a port that is not a valid TCP port.
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// The server rejected a statement.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A catalog row did not have the expected shape.
    #[error("Unexpected row: {0}")]
    UnexpectedRow(String),

    /// Error reported by the TDS driver.
    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    /// Socket-level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Knobs applied to every connection, taken from provider configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    /// Accept the server certificate without validating it.
    pub trust_server_certificate: bool,
}

/// Schema operations against one server.
///
/// Every call is scoped to `database`; an empty name means `master`.
#[async_trait]
pub trait SchemaConnector: Send + Sync {
    /// Look a schema up in the catalog. A missing schema is `Ok(None)`.
    async fn get_schema(&self, database: &str, name: &str) -> Result<Option<Schema>, ConnectorError>;

    /// Create a schema owned by `dbo`. Fails if it already exists.
    async fn create_schema(&self, database: &str, schema: &Schema) -> Result<(), ConnectorError>;

    /// Drop a schema. Fails if it is absent or still holds objects.
    async fn delete_schema(&self, database: &str, name: &str) -> Result<(), ConnectorError>;
}

/// Builds connectors for the server block of a resource.
pub trait ConnectorFactory: Send + Sync {
    /// A schema connector for `server`.
    fn schema_connector(
        &self,
        server: &Server,
        options: ConnectOptions,
    ) -> Result<Box<dyn SchemaConnector>, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements() {
        assert_eq!(
            SELECT_SCHEMA_SQL,
            "SELECT * FROM sys.schemas where name = @schema"
        );
        assert_eq!(
            create_schema_sql("testschema"),
            "CREATE SCHEMA testschema AUTHORIZATION [dbo]"
        );
        assert_eq!(drop_schema_sql("testschema"), "DROP SCHEMA testschema");
    }

    #[test]
    fn test_error_display() {
        let err = ConnectorError::InvalidPort("abc".to_string());
        assert_eq!(err.to_string(), "Invalid port: abc");

        let err: ConnectorError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err.to_string(), "IO error: refused");
    }
}
