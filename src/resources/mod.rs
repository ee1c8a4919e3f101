//! Resources served by the provider.

pub mod schema;

use serde_json::json;

use crate::id::{PASSWORD_ENV, USERNAME_ENV};
use crate::model::DEFAULT_PORT;
use crate::schema::{Attribute, Block, NestedBlock};

/// The `server` block shared by every resource: which instance to manage and
/// how to log in. Changing any of it points the resource at a different
/// object, so the whole block forces replacement.
pub fn server_block() -> NestedBlock {
    let login = Block::new()
        .with_description("SQL login used to connect")
        .with_attribute(
            "username",
            Attribute::optional_string()
                .with_description("Login name")
                .with_env_default(USERNAME_ENV),
        )
        .with_attribute(
            "password",
            Attribute::optional_string()
                .with_description("Login password")
                .with_env_default(PASSWORD_ENV)
                .sensitive(),
        );

    NestedBlock::list(
        Block::new()
            .with_description("SQL Server instance hosting the object")
            .with_attribute(
                "host",
                Attribute::required_string()
                    .with_description("Host name or IP address")
                    .with_force_new(),
            )
            .with_attribute(
                "port",
                Attribute::optional_string()
                    .with_description("TCP port")
                    .with_default(json!(DEFAULT_PORT))
                    .with_force_new(),
            )
            .with_block("login", NestedBlock::list(login).with_max_items(1)),
    )
    .with_min_items(1)
    .with_max_items(1)
    .with_force_new()
}
