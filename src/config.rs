//! Provider-level configuration.
//!
//! Passed to [`ProviderService::configure`](crate::ProviderService::configure)
//! as JSON. Every field is optional:
//!
//! ```json
//! { "timeout_seconds": 30, "trust_server_certificate": false }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::sql::ConnectOptions;

/// Default time allowed for a single lifecycle operation.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Settings shared by every resource the provider manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Upper bound on one create, read, delete or import, in seconds.
    pub timeout_seconds: u64,
    /// Accept the server certificate without validating it.
    pub trust_server_certificate: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            trust_server_certificate: false,
        }
    }
}

impl ProviderConfig {
    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "timeout_seconds",
                Attribute::optional_int64()
                    .with_description("Time allowed for each operation, in seconds"),
            )
            .with_attribute(
                "trust_server_certificate",
                Attribute::optional_bool()
                    .with_description("Skip validation of the server's TLS certificate"),
            )
    }

    /// Parse the configuration document. `null` yields the defaults.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        let config: Self = match value {
            Value::Null => Self::default(),
            value => serde_json::from_value(value)
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
        };
        if config.timeout_seconds == 0 {
            return Err(ProviderError::Configuration(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    /// [`ProviderConfig::timeout_seconds`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Options applied to every database connection.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            trust_server_certificate: self.trust_server_certificate,
        }
    }
}
