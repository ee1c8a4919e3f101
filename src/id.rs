//! Resource and import identifiers.
//!
//! Resources are identified by a URL naming the server, the database and the
//! object: `sqlserver://<host>:<port>/<database>/<schema_name>`. The same shape
//! (with `mssql` accepted as an alternative scheme and the port optional) is
//! what users pass to import an existing schema.
//!
//! Path segments are percent-encoded, so database and schema names containing
//! spaces, `#`, `?` or non-ASCII letters survive the round trip.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::error::ProviderError;
use crate::model::{Login, Server, DEFAULT_PORT};

/// Scheme used when encoding resource IDs.
pub const ID_SCHEME: &str = "sqlserver";

const ACCEPTED_SCHEMES: [&str; 2] = [ID_SCHEME, "mssql"];

/// Bytes escaped inside a path segment: the URL path set plus `/` and `%`.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

/// Environment variable supplying the login name for imported resources.
pub const USERNAME_ENV: &str = "MSSQL_USERNAME";

/// Environment variable supplying the login password for imported resources.
pub const PASSWORD_ENV: &str = "MSSQL_PASSWORD";

/// Encode the ID of an object living in `database` on `server`.
pub fn resource_id(server: &Server, database: &str, object_name: &str) -> String {
    format!(
        "{}://{}/{}/{}",
        ID_SCHEME,
        server.address(),
        utf8_percent_encode(database, SEGMENT),
        utf8_percent_encode(object_name, SEGMENT)
    )
}

/// The decoded path segments of a parsed ID, e.g. `["master", "sales"]` for
/// `sqlserver://localhost/master/sales`.
pub fn path_segments(url: &Url) -> Result<Vec<String>, ProviderError> {
    let segments = url.path_segments().ok_or_else(|| {
        ProviderError::InvalidImportId(format!("missing path in ID: {}", url))
    })?;
    segments
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|e| ProviderError::InvalidImportId(format!("{}: {}", segment, e)))
        })
        .collect()
}

/// Parse an import ID into the server it names plus the parsed URL, whose
/// path is left for the resource to interpret.
///
/// The login is taken from `MSSQL_USERNAME` / `MSSQL_PASSWORD`, since IDs
/// never carry credentials.
pub fn server_from_id(id: &str) -> Result<(Server, Url), ProviderError> {
    server_from_id_with_login(id, login_from_env())
}

pub(crate) fn server_from_id_with_login(
    id: &str,
    login: Option<Login>,
) -> Result<(Server, Url), ProviderError> {
    let url = Url::parse(id)
        .map_err(|e| ProviderError::InvalidImportId(format!("{}: {}", id, e)))?;

    if !ACCEPTED_SCHEMES.contains(&url.scheme()) {
        return Err(ProviderError::InvalidImportId(format!(
            "invalid scheme in ID: {}",
            url.scheme()
        )));
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(ProviderError::InvalidImportId(format!(
            "unexpected query or fragment in ID: {}",
            id
        )));
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => {
            return Err(ProviderError::InvalidImportId(format!(
                "missing host in ID: {}",
                id
            )))
        },
    };
    let port = url
        .port()
        .map(|port| port.to_string())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());

    Ok((Server { host, port, login }, url))
}

fn login_from_env() -> Option<Login> {
    let username = std::env::var(USERNAME_ENV).ok()?;
    let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
    Some(Login { username, password })
}
