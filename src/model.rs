//! Plain records exchanged between the lifecycle handlers and the connector.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port SQL Server listens on unless told otherwise.
pub const DEFAULT_PORT: &str = "1433";

/// Database used when the configuration does not name one.
pub const DEFAULT_DATABASE: &str = "master";

/// A database schema as recorded in `sys.schemas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name, unique within its database.
    pub schema_name: String,
    /// Catalog ID assigned by the server. Zero until the schema is read back.
    pub schema_id: i32,
    /// ID of the principal owning the schema.
    pub principal_id: i32,
}

impl Schema {
    /// A schema that is about to be created; the IDs are not known yet.
    pub fn named(schema_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema_id: 0,
            principal_id: 0,
        }
    }
}

/// SQL login credentials.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Login {
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The server block of a resource: where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Host name or address.
    pub host: String,
    /// TCP port, kept as a string the way the configuration carries it.
    #[serde(default = "default_port")]
    pub port: String,
    /// SQL login; the framework stores it as a list of at most one block.
    #[serde(default, with = "single_block")]
    pub login: Option<Login>,
}

impl Server {
    /// `host:port`, as used in resource IDs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The port as a number.
    pub fn port_number(&self) -> Result<u16, std::num::ParseIntError> {
        self.port.parse()
    }
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

/// (De)serializes an optional nested block as a zero- or one-element list.
pub(crate) mod single_block {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        let items: Vec<&T> = value.iter().collect();
        items.serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let items: Option<Vec<T>> = Option::deserialize(deserializer)?;
        Ok(items.and_then(|items| items.into_iter().next()))
    }
}
