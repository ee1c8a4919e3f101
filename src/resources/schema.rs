//! The `mssql_schema` resource: a schema inside one database.
//!
//! A schema is created with `CREATE SCHEMA ... AUTHORIZATION [dbo]`, looked
//! up in `sys.schemas` and removed with `DROP SCHEMA`. It is never altered in
//! place; renaming would mean moving every contained object to a new schema,
//! so all user attributes force replacement instead.

use serde_json::json;
use tracing::{debug, info, instrument};

use super::server_block;
use crate::error::ProviderError;
use crate::id::{path_segments, resource_id, server_from_id};
use crate::model::{Schema as SchemaModel, DEFAULT_DATABASE};
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::sql::SchemaConnector;
use crate::state::{ResourceData, SERVER_KEY};
use crate::validation::validate;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "mssql_schema";

/// Database holding the schema.
pub const DATABASE_PROP: &str = "database";
/// Schema name.
pub const SCHEMA_NAME_PROP: &str = "schema_name";
/// Catalog ID, computed.
pub const SCHEMA_ID_PROP: &str = "schema_id";
/// Owning principal ID, computed.
pub const PRINCIPAL_ID_PROP: &str = "principal_id";

/// Longest identifier SQL Server accepts (`sysname`).
const MAX_IDENTIFIER_LEN: usize = 128;

/// Schema of the `mssql_schema` resource.
pub fn resource_schema() -> Schema {
    Schema::v0()
        .with_block(SERVER_KEY, server_block())
        .with_attribute(
            DATABASE_PROP,
            Attribute::optional_string()
                .with_description("Database in which to create the schema")
                .with_default(json!(DEFAULT_DATABASE))
                .with_force_new(),
        )
        .with_attribute(
            SCHEMA_NAME_PROP,
            Attribute::required_string()
                .with_description("Name of the schema")
                .with_force_new(),
        )
        .with_attribute(
            SCHEMA_ID_PROP,
            Attribute::computed_string().with_description("Catalog ID of the schema"),
        )
        .with_attribute(
            PRINCIPAL_ID_PROP,
            Attribute::computed_string().with_description("ID of the principal owning the schema"),
        )
}

/// Validate a configuration that already had its defaults applied.
///
/// On top of the structural checks, the schema name must be a regular
/// identifier because it is spliced into DDL unquoted.
pub fn validate_config(data: &ResourceData) -> Vec<Diagnostic> {
    let mut diagnostics = validate(&resource_schema(), &data.clone().into_value());
    if let Some(name) = data.get_str(SCHEMA_NAME_PROP) {
        if let Some(problem) = identifier_problem(name) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid schema name '{}'", name))
                    .with_detail(problem)
                    .with_attribute(SCHEMA_NAME_PROP),
            );
        }
    }
    diagnostics
}

fn identifier_problem(name: &str) -> Option<&'static str> {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return Some("must not be empty"),
    };
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Some("must be at most 128 characters long");
    }
    if !(first.is_alphabetic() || matches!(first, '_' | '@' | '#')) {
        return Some("must start with a letter, '_', '@' or '#'");
    }
    if !chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '$')) {
        return Some("may only contain letters, digits, '_', '@', '#' or '$'");
    }
    None
}

/// Database and schema name the state points at.
fn target(data: &ResourceData) -> Result<(String, String), ProviderError> {
    let database = data
        .get_str(DATABASE_PROP)
        .filter(|database| !database.is_empty())
        .unwrap_or(DEFAULT_DATABASE)
        .to_string();
    let schema_name = data.require_str(SCHEMA_NAME_PROP)?.to_string();
    Ok((database, schema_name))
}

fn set_observed(data: &mut ResourceData, schema: &SchemaModel) {
    data.set(SCHEMA_NAME_PROP, schema.schema_name.clone());
    data.set(SCHEMA_ID_PROP, schema.schema_id.to_string());
    data.set(PRINCIPAL_ID_PROP, schema.principal_id.to_string());
}

/// Create the configured schema, then read it back to fill in the computed
/// attributes.
#[instrument(skip_all, fields(resource = RESOURCE_TYPE, action = "create"))]
pub async fn create(
    connector: &dyn SchemaConnector,
    data: &mut ResourceData,
) -> Result<(), ProviderError> {
    let (database, schema_name) = target(data)?;
    let server = data.server()?;

    connector
        .create_schema(&database, &SchemaModel::named(schema_name.as_str()))
        .await
        .map_err(|e| {
            ProviderError::connector(
                format!(
                    "unable to create schema [{}] in database [{}]",
                    schema_name, database
                ),
                e,
            )
        })?;

    data.set_id(resource_id(&server, &database, &schema_name));
    info!(schema = %schema_name, database = %database, "created schema");

    read(connector, data).await
}

/// Refresh the state from the catalog. A schema that no longer exists clears
/// the ID rather than failing.
#[instrument(skip_all, fields(resource = RESOURCE_TYPE, action = "read"))]
pub async fn read(
    connector: &dyn SchemaConnector,
    data: &mut ResourceData,
) -> Result<(), ProviderError> {
    debug!(id = data.id(), "reading schema");
    let (database, schema_name) = target(data)?;

    let schema = connector
        .get_schema(&database, &schema_name)
        .await
        .map_err(|e| {
            ProviderError::connector(
                format!(
                    "unable to read schema [{}] in database [{}]",
                    schema_name, database
                ),
                e,
            )
        })?;

    match schema {
        Some(schema) => set_observed(data, &schema),
        None => {
            info!(schema = %schema_name, database = %database, "no schema found");
            data.set_id("");
        },
    }
    Ok(())
}

/// Drop the schema and stop tracking it.
#[instrument(skip_all, fields(resource = RESOURCE_TYPE, action = "delete"))]
pub async fn delete(
    connector: &dyn SchemaConnector,
    data: &mut ResourceData,
) -> Result<(), ProviderError> {
    debug!(id = data.id(), "deleting schema");
    let (database, schema_name) = target(data)?;

    connector
        .delete_schema(&database, &schema_name)
        .await
        .map_err(|e| {
            ProviderError::connector(
                format!("unable to delete schema [{}].[{}]", database, schema_name),
                e,
            )
        })?;

    info!(schema = %schema_name, database = %database, "deleted schema");
    data.set_id("");
    Ok(())
}

/// Turn an import ID (`sqlserver://host:port/<database>/<schema_name>`) into
/// the configuration it stands for, ID included.
pub fn parse_import_id(id: &str) -> Result<ResourceData, ProviderError> {
    let (server, url) = server_from_id(id)?;

    let segments = path_segments(&url)?;
    let (database, schema_name) = match segments.as_slice() {
        [database, schema_name] if !database.is_empty() && !schema_name.is_empty() => {
            (database.as_str(), schema_name.as_str())
        },
        _ => {
            return Err(ProviderError::InvalidImportId(format!(
                "invalid ID: expected /<database>/<schema_name>, got {}",
                url.path()
            )))
        },
    };

    let mut data = ResourceData::new();
    data.set_server(&server)?;
    data.set(DATABASE_PROP, database);
    data.set(SCHEMA_NAME_PROP, schema_name);
    data.set_id(resource_id(&server, database, schema_name));
    Ok(data)
}

/// Complete an import started by [`parse_import_id`]: the schema must exist.
#[instrument(skip_all, fields(resource = RESOURCE_TYPE, action = "import"))]
pub async fn import(
    connector: &dyn SchemaConnector,
    data: &mut ResourceData,
) -> Result<(), ProviderError> {
    debug!(id = data.id(), "importing schema");
    let (database, schema_name) = target(data)?;

    let schema = connector
        .get_schema(&database, &schema_name)
        .await
        .map_err(|e| {
            ProviderError::connector(
                format!(
                    "unable to read schema [{}].[{}] for import",
                    database, schema_name
                ),
                e,
            )
        })?
        .ok_or_else(|| {
            ProviderError::NotFound(format!(
                "no schema [{}].[{}] found for import",
                database, schema_name
            ))
        })?;

    set_observed(data, &schema);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Login, Server};
    use crate::testing::InMemoryConnector;
    use serde_json::json;

    fn configured(schema_name: &str) -> ResourceData {
        ResourceData::from_value(json!({
            "server": [{
                "host": "localhost",
                "port": "1433",
                "login": [{"username": "sa", "password": "secret"}]
            }],
            "database": "master",
            "schema_name": schema_name
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let connector = InMemoryConnector::new();
        let mut data = configured("testschema");

        create(&connector, &mut data).await.unwrap();

        assert_eq!(data.id(), "sqlserver://localhost:1433/master/testschema");
        assert_eq!(data.get_str(SCHEMA_NAME_PROP), Some("testschema"));
        let schema_id: i32 = data.get_str(SCHEMA_ID_PROP).unwrap().parse().unwrap();
        let principal_id: i32 = data.get_str(PRINCIPAL_ID_PROP).unwrap().parse().unwrap();
        assert!(schema_id > 0);
        assert!(principal_id > 0);

        assert_eq!(
            connector.statements(),
            vec![
                "CREATE SCHEMA testschema AUTHORIZATION [dbo]".to_string(),
                "SELECT * FROM sys.schemas where name = @schema".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_duplicate_surfaces_server_error() {
        let connector = InMemoryConnector::new();
        create(&connector, &mut configured("sales")).await.unwrap();

        let mut again = configured("sales");
        let err = create(&connector, &mut again).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("unable to create schema [sales] in database [master]"));
        assert!(message.contains("There is already an object named 'sales'"));
        assert_eq!(again.id(), "");
    }

    #[tokio::test]
    async fn test_create_keeps_id_when_read_back_fails() {
        let connector = InMemoryConnector::new();
        connector.set_failing_reads(true);
        let mut data = configured("sales");

        let err = create(&connector, &mut data).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to read schema [sales] in database [master]"));
        assert_eq!(data.id(), "sqlserver://localhost:1433/master/sales");
    }

    #[tokio::test]
    async fn test_read_missing_clears_id() {
        let connector = InMemoryConnector::new();
        let mut data = configured("ghost");
        data.set_id("sqlserver://localhost:1433/master/ghost");

        read(&connector, &mut data).await.unwrap();
        assert_eq!(data.id(), "");
    }

    #[tokio::test]
    async fn test_read_defaults_database_to_master() {
        let connector = InMemoryConnector::new();
        connector.insert_schema("master", "audit");

        let mut data = ResourceData::from_value(json!({"schema_name": "audit"})).unwrap();
        data.set_id("existing");
        read(&connector, &mut data).await.unwrap();
        assert_eq!(data.id(), "existing");
        assert!(data.get_str(SCHEMA_ID_PROP).is_some());
    }

    #[tokio::test]
    async fn test_delete_then_read() {
        let connector = InMemoryConnector::new();
        let mut data = configured("testschema");
        create(&connector, &mut data).await.unwrap();

        delete(&connector, &mut data).await.unwrap();
        assert_eq!(data.id(), "");

        read(&connector, &mut data).await.unwrap();
        assert_eq!(data.id(), "");
        assert!(connector
            .statements()
            .contains(&"DROP SCHEMA testschema".to_string()));
    }

    #[tokio::test]
    async fn test_delete_non_empty_schema_fails() {
        let connector = InMemoryConnector::new();
        let mut data = configured("sales");
        create(&connector, &mut data).await.unwrap();
        connector.add_object("master", "sales", "orders");

        let err = delete(&connector, &mut data).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to delete schema [master].[sales]"));
        assert!(!data.id().is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_wrapped() {
        let connector = InMemoryConnector::new();
        connector.set_unreachable(true);

        let err = read(&connector, &mut configured("sales")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Connector { .. }));
        assert!(err
            .to_string()
            .starts_with("unable to read schema [sales] in database [master]"));
    }

    #[test]
    fn test_parse_import_id() {
        let data = parse_import_id("sqlserver://db.internal:14330/sales_db/staging").unwrap();
        assert_eq!(data.get_str(DATABASE_PROP), Some("sales_db"));
        assert_eq!(data.get_str(SCHEMA_NAME_PROP), Some("staging"));
        assert_eq!(data.id(), "sqlserver://db.internal:14330/sales_db/staging");

        let server = data.server().unwrap();
        assert_eq!(server.host, "db.internal");
        assert_eq!(server.port, "14330");
    }

    #[test]
    fn test_parse_import_id_rejects_wrong_segment_count() {
        for id in [
            "sqlserver://localhost:1433/master",
            "sqlserver://localhost:1433/master/sales/extra",
            "sqlserver://localhost:1433/master/",
            "sqlserver://localhost:1433",
        ] {
            assert!(
                matches!(parse_import_id(id), Err(ProviderError::InvalidImportId(_))),
                "{} should be rejected",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_import_matches_direct_read() {
        let connector = InMemoryConnector::new();
        let mut created = configured("testschema");
        create(&connector, &mut created).await.unwrap();

        let mut imported = parse_import_id(created.id()).unwrap();
        import(&connector, &mut imported).await.unwrap();

        for prop in [SCHEMA_NAME_PROP, SCHEMA_ID_PROP, PRINCIPAL_ID_PROP, DATABASE_PROP] {
            assert_eq!(imported.get_str(prop), created.get_str(prop), "{}", prop);
        }
        assert_eq!(imported.id(), created.id());
    }

    #[tokio::test]
    async fn test_import_round_trips_escaped_names() {
        let connector = InMemoryConnector::new();
        connector.insert_schema("master", "a");

        for (database, schema_name) in [("My DB", "café"), ("master", "a#b")] {
            let mut created = configured(schema_name);
            created.set(DATABASE_PROP, database);
            create(&connector, &mut created).await.unwrap();

            let mut imported = parse_import_id(created.id()).unwrap();
            assert_eq!(imported.get_str(DATABASE_PROP), Some(database));
            assert_eq!(imported.get_str(SCHEMA_NAME_PROP), Some(schema_name));

            import(&connector, &mut imported).await.unwrap();
            assert_eq!(imported.id(), created.id());
            assert_eq!(
                imported.get_str(SCHEMA_ID_PROP),
                created.get_str(SCHEMA_ID_PROP)
            );
        }
    }

    #[test]
    fn test_parse_import_id_rejects_unescaped_fragment() {
        assert!(matches!(
            parse_import_id("sqlserver://localhost:1433/master/a#b"),
            Err(ProviderError::InvalidImportId(_))
        ));
    }

    #[tokio::test]
    async fn test_import_missing_schema_fails() {
        let connector = InMemoryConnector::new();
        let mut data = parse_import_id("sqlserver://localhost:1433/master/ghost").unwrap();

        let err = import(&connector, &mut data).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(err.message(), "no schema [master].[ghost] found for import");
    }

    #[test]
    fn test_identifier_rules() {
        assert!(identifier_problem("testschema").is_none());
        assert!(identifier_problem("_staging$2").is_none());
        assert!(identifier_problem("").is_some());
        assert!(identifier_problem("1sales").is_some());
        assert!(identifier_problem("sales; DROP DATABASE master").is_some());
        assert!(identifier_problem(&"s".repeat(129)).is_some());
    }

    #[test]
    fn test_validate_config() {
        let mut data = configured("bad name");
        data.apply_defaults(&resource_schema().block);
        let diagnostics = validate_config(&data);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some(SCHEMA_NAME_PROP.to_string()));

        let mut data = configured("good_name");
        data.apply_defaults(&resource_schema().block);
        assert!(validate_config(&data).is_empty());
    }

    #[test]
    fn test_resource_schema_shape() {
        let schema = resource_schema();
        let attrs = &schema.block.attributes;
        assert_eq!(attrs[DATABASE_PROP].default, Some(json!("master")));
        assert!(attrs[DATABASE_PROP].force_new);
        assert!(attrs[SCHEMA_NAME_PROP].flags.required);
        assert!(attrs[SCHEMA_ID_PROP].flags.computed);
        assert!(attrs[PRINCIPAL_ID_PROP].flags.computed);

        let server = &schema.block.blocks[SERVER_KEY];
        assert_eq!((server.min_items, server.max_items), (1, 1));
        let login = &server.block.blocks["login"].block.attributes;
        assert!(login["password"].flags.sensitive);
        for (name, env) in [("username", "MSSQL_USERNAME"), ("password", "MSSQL_PASSWORD")] {
            assert!(login[name].flags.optional, "{}", name);
            assert!(!login[name].flags.required, "{}", name);
            assert_eq!(login[name].env_default.as_deref(), Some(env));
        }
    }

    #[test]
    fn test_empty_login_block_is_valid() {
        let mut data = ResourceData::from_value(json!({
            "server": [{"host": "localhost", "login": [{}]}],
            "schema_name": "sales"
        }))
        .unwrap();
        data.apply_defaults(&resource_schema().block);
        assert!(validate_config(&data).is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_server_block() {
        let connector = InMemoryConnector::new();
        let mut data = ResourceData::from_value(json!({"schema_name": "sales"})).unwrap();

        assert!(matches!(
            create(&connector, &mut data).await,
            Err(ProviderError::Validation(_))
        ));
        assert!(connector.statements().is_empty());
    }

    #[test]
    fn test_server_round_trip_through_state() {
        let mut data = configured("sales");
        let server = Server {
            host: "db.internal".to_string(),
            port: "1433".to_string(),
            login: Some(Login {
                username: "sa".to_string(),
                password: "secret".to_string(),
            }),
        };
        data.set_server(&server).unwrap();
        assert_eq!(data.server().unwrap(), server);
    }
}
