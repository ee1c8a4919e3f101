//! SQL Server connector built on tiberius.

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, instrument};

use super::{
    create_schema_sql, drop_schema_sql, ConnectOptions, ConnectorError, ConnectorFactory,
    SchemaConnector, SELECT_SCHEMA_SQL,
};
use crate::model::{Schema, Server, DEFAULT_DATABASE};

type MssqlClient = Client<Compat<TcpStream>>;

/// Opens a fresh connection per operation, logged into the target database.
///
/// Nothing is cached between calls, so a connector can be shared by
/// concurrent handlers.
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    server: Server,
    options: ConnectOptions,
}

impl MssqlConnector {
    /// Connector for `server`.
    pub fn new(server: Server, options: ConnectOptions) -> Self {
        Self { server, options }
    }

    fn config(&self, database: &str) -> Result<Config, ConnectorError> {
        let port = self
            .server
            .port_number()
            .map_err(|_| ConnectorError::InvalidPort(self.server.port.clone()))?;
        let login = self.server.login.as_ref().ok_or_else(|| {
            ConnectorError::ConnectionFailed(format!(
                "no login configured for server {}",
                self.server.address()
            ))
        })?;

        let mut config = Config::new();
        config.host(&self.server.host);
        config.port(port);
        config.database(target_database(database));
        config.authentication(AuthMethod::sql_server(&login.username, &login.password));
        if self.options.trust_server_certificate {
            config.trust_cert();
        }
        Ok(config)
    }

    async fn connect(&self, database: &str) -> Result<MssqlClient, ConnectorError> {
        let config = self.config(database)?;
        debug!(address = %self.server.address(), database = target_database(database), "connecting");

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        tcp.set_nodelay(true)?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))
    }
}

fn target_database(database: &str) -> &str {
    if database.is_empty() {
        DEFAULT_DATABASE
    } else {
        database
    }
}

/// The catalog lookup with `@schema` declared from the first positional
/// parameter, since the driver only binds `@P1`-style placeholders.
fn bound_select_schema_sql() -> String {
    format!("DECLARE @schema sysname = @P1; {}", SELECT_SCHEMA_SQL)
}

fn schema_from_row(row: &Row) -> Result<Schema, ConnectorError> {
    let schema_name = row
        .try_get::<&str, _>("name")?
        .ok_or_else(|| ConnectorError::UnexpectedRow("schema name is null".to_string()))?;
    let schema_id = row
        .try_get::<i32, _>("schema_id")?
        .ok_or_else(|| ConnectorError::UnexpectedRow("schema_id is null".to_string()))?;
    let principal_id = row.try_get::<i32, _>("principal_id")?.unwrap_or_default();

    Ok(Schema {
        schema_name: schema_name.to_string(),
        schema_id,
        principal_id,
    })
}

#[async_trait]
impl SchemaConnector for MssqlConnector {
    #[instrument(skip(self))]
    async fn get_schema(&self, database: &str, name: &str) -> Result<Option<Schema>, ConnectorError> {
        let mut client = self.connect(database).await?;
        let row = client
            .query(bound_select_schema_sql(), &[&name])
            .await?
            .into_row()
            .await?;
        let schema = row.as_ref().map(schema_from_row).transpose()?;
        client.close().await?;
        Ok(schema)
    }

    #[instrument(skip(self, schema), fields(schema = %schema.schema_name))]
    async fn create_schema(&self, database: &str, schema: &Schema) -> Result<(), ConnectorError> {
        let mut client = self.connect(database).await?;
        client
            .execute(create_schema_sql(&schema.schema_name), &[])
            .await?;
        client.close().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_schema(&self, database: &str, name: &str) -> Result<(), ConnectorError> {
        let mut client = self.connect(database).await?;
        client.execute(drop_schema_sql(name), &[]).await?;
        client.close().await?;
        Ok(())
    }
}

/// Produces [`MssqlConnector`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlConnectorFactory;

impl ConnectorFactory for MssqlConnectorFactory {
    fn schema_connector(
        &self,
        server: &Server,
        options: ConnectOptions,
    ) -> Result<Box<dyn SchemaConnector>, ConnectorError> {
        Ok(Box::new(MssqlConnector::new(server.clone(), options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Login;

    fn server(port: &str, login: Option<Login>) -> Server {
        Server {
            host: "localhost".to_string(),
            port: port.to_string(),
            login,
        }
    }

    fn sa() -> Option<Login> {
        Some(Login {
            username: "sa".to_string(),
            password: "secret".to_string(),
        })
    }

    #[test]
    fn test_bound_select_keeps_catalog_query() {
        assert_eq!(
            bound_select_schema_sql(),
            "DECLARE @schema sysname = @P1; SELECT * FROM sys.schemas where name = @schema"
        );
    }

    #[test]
    fn test_target_database_defaults_to_master() {
        assert_eq!(target_database(""), "master");
        assert_eq!(target_database("sales"), "sales");
    }

    #[test]
    fn test_config_targets_server() {
        let connector = MssqlConnector::new(server("14330", sa()), ConnectOptions::default());
        let config = connector.config("sales").unwrap();
        assert_eq!(config.get_addr(), "localhost:14330");
    }

    #[test]
    fn test_config_rejects_bad_port() {
        let connector = MssqlConnector::new(server("sql", sa()), ConnectOptions::default());
        assert!(matches!(
            connector.config("master"),
            Err(ConnectorError::InvalidPort(port)) if port == "sql"
        ));
    }

    #[test]
    fn test_config_requires_login() {
        let connector = MssqlConnector::new(server("1433", None), ConnectOptions::default());
        assert!(matches!(
            connector.config("master"),
            Err(ConnectorError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        // Port 1 on localhost is never a SQL Server.
        let connector = MssqlConnector::new(server("1", sa()), ConnectOptions::default());
        let result = connector.get_schema("master", "sales").await;
        assert!(matches!(result, Err(ConnectorError::ConnectionFailed(_))));
    }
}
