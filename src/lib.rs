//! Hemmer provider for Microsoft SQL Server
//!
//! This crate manages SQL Server objects declaratively. Its one resource,
//! `mssql_schema`, keeps a schema with a given name present in a database:
//!
//! - **create** runs `CREATE SCHEMA <name> AUTHORIZATION [dbo]` and reads the
//!   catalog entry back
//! - **read** looks the schema up in `sys.schemas`; a missing schema clears
//!   the resource ID instead of failing
//! - **delete** runs `DROP SCHEMA <name>`
//! - **import** accepts `sqlserver://<host>[:<port>]/<database>/<schema_name>`
//!
//! Every user-facing attribute forces replacement; schemas are never renamed
//! in place.
//!
//! # Configuration
//!
//! ```text
//! resource "mssql_schema" "sales" {
//!   server {
//!     host = "localhost"
//!     login {}            # username/password default to MSSQL_USERNAME/MSSQL_PASSWORD
//!   }
//!   database    = "master" # optional
//!   schema_name = "sales"
//! }
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hemmer_provider_mssql::{init_logging, MssqlProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = MssqlProvider::new();
//!     provider.configure(json!({"trust_server_certificate": true})).await?;
//!
//!     let state = provider
//!         .create("mssql_schema", json!({
//!             "server": [{"host": "localhost", "login": [{"username": "sa", "password": "..."}]}],
//!             "schema_name": "sales"
//!         }))
//!         .await?;
//!     println!("{}", state["schema_id"]);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;
pub mod logging;
pub mod model;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod sql;
pub mod state;
pub mod testing;
pub mod types;
pub mod validation;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{MssqlProvider, ProviderService};
pub use schema::ProviderSchema;
pub use sql::{ConnectorError, ConnectorFactory, MssqlConnector, SchemaConnector};
pub use state::ResourceData;
pub use types::{ImportedResource, ProviderMetadata};
pub use validation::{validate, validate_result};

pub use async_trait::async_trait;
pub use serde_json;
pub use tracing;
