//! Tracked resource state.
//!
//! The framework hands resource state to the provider as a JSON object and
//! expects one back. [`ResourceData`] wraps that object with typed accessors
//! and the `id` convention: an empty `id` tells the framework the object no
//! longer exists and should be dropped from state.

use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::model::Server;
use crate::schema::Block;

const ID_KEY: &str = "id";

/// Name of the nested block describing the target server.
pub const SERVER_KEY: &str = "server";

/// A resource's tracked attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceData {
    attrs: Map<String, Value>,
}

impl ResourceData {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a state document. `null` is treated as empty state.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        match value {
            Value::Object(attrs) => Ok(Self { attrs }),
            Value::Null => Ok(Self::new()),
            other => Err(ProviderError::Validation(format!(
                "expected resource state to be an object, got {}",
                other
            ))),
        }
    }

    /// Unwrap back into a state document.
    pub fn into_value(self) -> Value {
        Value::Object(self.attrs)
    }

    /// The tracked ID, empty when the object is not (or no longer) managed.
    pub fn id(&self) -> &str {
        self.get_str(ID_KEY).unwrap_or_default()
    }

    /// Set the tracked ID. Passing `""` marks the object as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.attrs.insert(ID_KEY.to_string(), Value::String(id.into()));
    }

    /// A string attribute, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// A string attribute that must be present and non-empty.
    pub fn require_str(&self, key: &str) -> Result<&str, ProviderError> {
        match self.get_str(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ProviderError::Validation(format!(
                "attribute '{}' must be set",
                key
            ))),
        }
    }

    /// Set an attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// The single `server` block.
    pub fn server(&self) -> Result<Server, ProviderError> {
        let block = self
            .attrs
            .get(SERVER_KEY)
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .ok_or_else(|| {
                ProviderError::Validation(format!("block '{}' must be set", SERVER_KEY))
            })?;
        Ok(serde_json::from_value(block.clone())?)
    }

    /// Replace the `server` block.
    pub fn set_server(&mut self, server: &Server) -> Result<(), ProviderError> {
        let block = serde_json::to_value(server)?;
        self.set(SERVER_KEY, Value::Array(vec![block]));
        Ok(())
    }

    /// Fill in schema defaults for attributes that are absent or null,
    /// descending into nested blocks that are present.
    pub fn apply_defaults(&mut self, block: &Block) {
        apply_block_defaults(block, &mut self.attrs);
    }
}

fn apply_block_defaults(block: &Block, attrs: &mut Map<String, Value>) {
    for (name, attr) in &block.attributes {
        let missing = matches!(attrs.get(name), None | Some(Value::Null));
        if missing {
            if let Some(default) = attr.default_value() {
                attrs.insert(name.clone(), default);
            }
        }
    }

    for (name, nested) in &block.blocks {
        if let Some(Value::Array(items)) = attrs.get_mut(name) {
            for item in items.iter_mut() {
                if let Value::Object(item_attrs) = item {
                    apply_block_defaults(&nested.block, item_attrs);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Login;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    #[test]
    fn test_id_round_trip_and_clear() {
        let mut data = ResourceData::new();
        assert_eq!(data.id(), "");

        data.set_id("sqlserver://localhost:1433/master/sales");
        assert_eq!(data.id(), "sqlserver://localhost:1433/master/sales");

        data.set_id("");
        assert_eq!(data.id(), "");
        assert_eq!(data.into_value()["id"], "");
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(ResourceData::from_value(Value::Null).is_ok());
        assert!(matches!(
            ResourceData::from_value(json!([1, 2])),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_require_str() {
        let data = ResourceData::from_value(json!({"schema_name": "", "database": "master"})).unwrap();
        assert_eq!(data.require_str("database").unwrap(), "master");
        assert!(data.require_str("schema_name").is_err());
        assert!(data.require_str("missing").is_err());
    }

    #[test]
    fn test_server_block() {
        let mut data = ResourceData::new();
        assert!(data.server().is_err());

        let server = Server {
            host: "localhost".to_string(),
            port: "1433".to_string(),
            login: Some(Login {
                username: "sa".to_string(),
                password: "secret".to_string(),
            }),
        };
        data.set_server(&server).unwrap();

        let value = data.clone().into_value();
        assert_eq!(value["server"][0]["host"], "localhost");
        assert_eq!(value["server"][0]["login"][0]["username"], "sa");
        assert_eq!(data.server().unwrap(), server);
    }

    #[test]
    fn test_apply_defaults() {
        let block = Block::new()
            .with_attribute("database", Attribute::optional_string().with_default(json!("master")))
            .with_attribute("schema_name", Attribute::required_string())
            .with_block(
                "server",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("host", Attribute::required_string())
                        .with_attribute("port", Attribute::optional_string().with_default(json!("1433"))),
                ),
            );

        let mut data = ResourceData::from_value(json!({
            "database": null,
            "schema_name": "sales",
            "server": [{"host": "localhost"}]
        }))
        .unwrap();
        data.apply_defaults(&block);

        let value = data.into_value();
        assert_eq!(value["database"], "master");
        assert_eq!(value["server"][0]["port"], "1433");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_apply_defaults_keeps_configured_values() {
        let block = Block::new()
            .with_attribute("database", Attribute::optional_string().with_default(json!("master")));
        let mut data = ResourceData::from_value(json!({"database": "sales_db"})).unwrap();
        data.apply_defaults(&block);
        assert_eq!(data.get_str("database"), Some("sales_db"));
    }
}
