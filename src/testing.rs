//! Testing utilities for the provider.
//!
//! [`InMemoryConnector`] stands in for a SQL Server instance: it keeps a
//! catalog per database, hands out catalog IDs the way the server does, and
//! fails with the server's own messages for duplicate or non-empty schemas.
//! [`ProviderTester`] drives a [`ProviderService`] the way the framework
//! would, without a real server.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_mssql::testing::{InMemoryConnectorFactory, ProviderTester};
//! use hemmer_provider_mssql::MssqlProvider;
//!
//! #[tokio::test]
//! async fn test_create_schema() {
//!     let factory = InMemoryConnectorFactory::new();
//!     let tester = ProviderTester::new(MssqlProvider::with_connector_factory(factory.clone()));
//!
//!     let state = tester
//!         .lifecycle_create("mssql_schema", json!({
//!             "server": [{"host": "localhost", "login": [{"username": "sa", "password": "pw"}]}],
//!             "schema_name": "sales"
//!         }))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["database"], "master");
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::model::{Schema, Server, DEFAULT_DATABASE};
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::sql::{
    create_schema_sql, drop_schema_sql, ConnectOptions, ConnectorError, ConnectorFactory,
    SchemaConnector, SELECT_SCHEMA_SQL,
};
use crate::types::ImportedResource;

/// Schemas every database starts with: (name, schema_id, principal_id).
const BUILTIN_SCHEMAS: [(&str, i32, i32); 4] = [
    ("dbo", 1, 1),
    ("guest", 2, 2),
    ("INFORMATION_SCHEMA", 3, 3),
    ("sys", 4, 4),
];

/// First ID handed out to user schemas, as on a fresh server.
const FIRST_USER_SCHEMA_ID: i32 = 5;

/// Principal ID of `dbo`, the owner of every schema created by the provider.
const DBO_PRINCIPAL_ID: i32 = 1;

#[derive(Debug, Default)]
struct Catalog {
    databases: BTreeMap<String, Database>,
    statements: Vec<String>,
    unreachable: bool,
    failing_reads: bool,
    delay: Option<Duration>,
}

#[derive(Debug)]
struct Database {
    schemas: BTreeMap<String, Schema>,
    objects: BTreeMap<String, BTreeSet<String>>,
    next_id: i32,
}

impl Default for Database {
    fn default() -> Self {
        let schemas = BUILTIN_SCHEMAS
            .iter()
            .map(|&(name, schema_id, principal_id)| {
                (
                    name.to_string(),
                    Schema {
                        schema_name: name.to_string(),
                        schema_id,
                        principal_id,
                    },
                )
            })
            .collect();
        Self {
            schemas,
            objects: BTreeMap::new(),
            next_id: FIRST_USER_SCHEMA_ID,
        }
    }
}

impl Catalog {
    fn database(&mut self, name: &str) -> &mut Database {
        let name = if name.is_empty() { DEFAULT_DATABASE } else { name };
        self.databases.entry(name.to_string()).or_default()
    }

    fn begin(&mut self, statement: String) -> Result<(), ConnectorError> {
        if self.unreachable {
            return Err(ConnectorError::ConnectionFailed(
                "unable to open tcp connection with host".to_string(),
            ));
        }
        self.statements.push(statement);
        Ok(())
    }
}

/// An in-memory SQL Server double.
///
/// Clones share the same catalog, so a test can keep one handle for
/// inspection while the provider uses another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    catalog: Arc<Mutex<Catalog>>,
}

impl InMemoryConnector {
    /// An empty server.
    pub fn new() -> Self {
        Self::default()
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a schema directly, bypassing the statement log.
    pub fn insert_schema(&self, database: &str, name: &str) {
        let mut catalog = self.catalog();
        let db = catalog.database(database);
        let schema = Schema {
            schema_name: name.to_string(),
            schema_id: db.next_id,
            principal_id: DBO_PRINCIPAL_ID,
        };
        db.next_id += 1;
        db.schemas.insert(name.to_string(), schema);
    }

    /// Place an object (table, view, ...) in a schema so it cannot be dropped.
    pub fn add_object(&self, database: &str, schema: &str, object: &str) {
        self.catalog()
            .database(database)
            .objects
            .entry(schema.to_string())
            .or_default()
            .insert(object.to_string());
    }

    /// Make every subsequent call fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.catalog().unreachable = unreachable;
    }

    /// Make every subsequent catalog lookup fail while other statements
    /// still succeed.
    pub fn set_failing_reads(&self, failing: bool) {
        self.catalog().failing_reads = failing;
    }

    /// Delay every subsequent call, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.catalog().delay = delay;
    }

    /// Statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.catalog().statements.clone()
    }

    async fn pause(&self) {
        let delay = self.catalog().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SchemaConnector for InMemoryConnector {
    async fn get_schema(&self, database: &str, name: &str) -> Result<Option<Schema>, ConnectorError> {
        self.pause().await;
        let mut catalog = self.catalog();
        catalog.begin(SELECT_SCHEMA_SQL.to_string())?;
        if catalog.failing_reads {
            return Err(ConnectorError::QueryFailed(
                "Transaction (Process ID 61) was deadlocked on lock resources".to_string(),
            ));
        }
        Ok(catalog.database(database).schemas.get(name).cloned())
    }

    async fn create_schema(&self, database: &str, schema: &Schema) -> Result<(), ConnectorError> {
        self.pause().await;
        let mut catalog = self.catalog();
        catalog.begin(create_schema_sql(&schema.schema_name))?;

        let db = catalog.database(database);
        if db.schemas.contains_key(&schema.schema_name) {
            return Err(ConnectorError::QueryFailed(format!(
                "There is already an object named '{}' in the database.",
                schema.schema_name
            )));
        }
        let created = Schema {
            schema_name: schema.schema_name.clone(),
            schema_id: db.next_id,
            principal_id: DBO_PRINCIPAL_ID,
        };
        db.next_id += 1;
        db.schemas.insert(created.schema_name.clone(), created);
        Ok(())
    }

    async fn delete_schema(&self, database: &str, name: &str) -> Result<(), ConnectorError> {
        self.pause().await;
        let mut catalog = self.catalog();
        catalog.begin(drop_schema_sql(name))?;

        let db = catalog.database(database);
        let builtin = BUILTIN_SCHEMAS.iter().any(|&(builtin, _, _)| builtin == name);
        if builtin || !db.schemas.contains_key(name) {
            return Err(ConnectorError::QueryFailed(format!(
                "Cannot drop the schema '{}', because it does not exist or you do not have permission.",
                name
            )));
        }
        if let Some(object) = db.objects.get(name).and_then(|objects| objects.iter().next()) {
            return Err(ConnectorError::QueryFailed(format!(
                "Cannot drop schema '{}' because it is being referenced by object '{}'.",
                name, object
            )));
        }
        db.schemas.remove(name);
        Ok(())
    }
}

/// Hands out [`InMemoryConnector`]s sharing one catalog, whatever the server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectorFactory {
    connector: InMemoryConnector,
}

impl InMemoryConnectorFactory {
    /// A factory over an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared connector, for seeding and inspection.
    pub fn connector(&self) -> &InMemoryConnector {
        &self.connector
    }
}

impl ConnectorFactory for InMemoryConnectorFactory {
    fn schema_connector(
        &self,
        _server: &Server,
        _options: ConnectOptions,
    ) -> Result<Box<dyn SchemaConnector>, ConnectorError> {
        Ok(Box::new(self.connector.clone()))
    }
}

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap a provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names served by the provider.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Create a resource.
    pub async fn create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, config).await
    }

    /// Read a resource.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, state).await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// Import a resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate, create, then read back. Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let created = self.create(resource_type, config).await?;
        Ok(self.read(resource_type, created).await?)
    }

    /// Delete, then read back. Returns the state after read, which should
    /// carry an empty ID.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.delete(resource_type, state.clone()).await?;
        self.read(resource_type, state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation reported error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed outright.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a state document marks its object as gone.
///
/// # Panics
///
/// Panics if the state carries a non-empty ID.
pub fn assert_resource_gone(state: &Value) {
    let id = state.get("id").and_then(Value::as_str).unwrap_or_default();
    assert!(id.is_empty(), "Expected resource to be gone, but it has ID '{}'", id);
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error whose summary contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let found = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));
    assert!(
        found,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_starts_with_builtin_schemas() {
        let connector = InMemoryConnector::new();
        let dbo = connector.get_schema("master", "dbo").await.unwrap().unwrap();
        assert_eq!((dbo.schema_id, dbo.principal_id), (1, 1));
        assert!(connector.get_schema("", "sys").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ids_are_per_database() {
        let connector = InMemoryConnector::new();
        connector.create_schema("a", &Schema::named("one")).await.unwrap();
        connector.create_schema("a", &Schema::named("two")).await.unwrap();
        connector.create_schema("b", &Schema::named("one")).await.unwrap();

        let two = connector.get_schema("a", "two").await.unwrap().unwrap();
        let other = connector.get_schema("b", "one").await.unwrap().unwrap();
        assert_eq!(two.schema_id, FIRST_USER_SCHEMA_ID + 1);
        assert_eq!(other.schema_id, FIRST_USER_SCHEMA_ID);
        assert_eq!(two.principal_id, DBO_PRINCIPAL_ID);
    }

    #[tokio::test]
    async fn test_builtin_schema_cannot_be_dropped() {
        let connector = InMemoryConnector::new();
        let err = connector.delete_schema("master", "dbo").await.unwrap_err();
        assert!(err.to_string().contains("Cannot drop the schema 'dbo'"));
    }

    #[tokio::test]
    async fn test_unreachable_skips_statement_log() {
        let connector = InMemoryConnector::new();
        connector.set_unreachable(true);
        assert!(matches!(
            connector.get_schema("master", "dbo").await,
            Err(ConnectorError::ConnectionFailed(_))
        ));
        assert!(connector.statements().is_empty());
    }

    #[test]
    fn test_factory_shares_catalog() {
        let factory = InMemoryConnectorFactory::new();
        factory.connector().insert_schema("master", "sales");

        let server = Server {
            host: "elsewhere".to_string(),
            port: "1433".to_string(),
            login: None,
        };
        let connector = factory
            .schema_connector(&server, ConnectOptions::default())
            .unwrap();
        let found = tokio_test::block_on(connector.get_schema("master", "sales")).unwrap();
        assert_eq!(found.unwrap().schema_id, FIRST_USER_SCHEMA_ID);
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains() {
        assert_error_contains(&[Diagnostic::error("Invalid schema name 'a b'")], "schema name");
    }

    #[test]
    fn test_assert_resource_gone() {
        assert_resource_gone(&serde_json::json!({"id": ""}));
        assert_resource_gone(&serde_json::json!({}));
    }

    #[test]
    #[should_panic(expected = "Expected resource to be gone")]
    fn test_assert_resource_gone_fails() {
        assert_resource_gone(&serde_json::json!({"id": "sqlserver://localhost:1433/master/sales"}));
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("Missing required attribute 'schema_name'").with_attribute("schema_name"),
            Diagnostic::error("Block 'server' requires at least 1 item(s)").with_detail("add a server block"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("schema_name"));
        assert!(display.contains("Block 'server'"));
        assert!(display.contains("add a server block"));
    }
}
