use std::fmt;
use std::str::FromStr;

use crate::error::EndpointError;

pub const DEFAULT_URI: &str = "http://localhost:1978";
pub const DEFAULT_PORT: u16 = 1978;

/// Server address plus the optional database selector.
///
/// Parsed from a single connection URI such as
/// `http://kt.local:1979/user.kch`, where the path names the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    database: Option<String>,
}

impl Endpoint {
    pub fn parse(uri: &str) -> Result<Self, EndpointError> {
        let uri = uri.trim();
        let (scheme, rest) = match uri.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), uri),
        };
        if scheme != "http" && scheme != "https" {
            return Err(EndpointError::UnsupportedScheme(scheme));
        }

        // Query and fragment carry nothing for us.
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, ""),
        };
        let authority = authority.rsplit('@').next().unwrap_or(authority);

        let (host, port) = split_host_port(authority);
        if host.is_empty() {
            return Err(EndpointError::MissingHost(uri.to_string()));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| EndpointError::InvalidPort {
                uri: uri.to_string(),
                port: port.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let selector = path.trim_matches('/');
        let database = if selector.is_empty() {
            None
        } else {
            Some(selector.to_string())
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            database,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Database selector sent as `DB`, if one was configured. This is the
    /// trimmed URI path exactly as written, without percent-decoding.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// `host:port`, used to identify the server in errors
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `scheme://host:port` without trailing slash
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    if authority.starts_with('[') {
        if let Some(close) = authority.find(']') {
            let host = &authority[..=close];
            let port = authority[close + 1..].strip_prefix(':');
            return (host, port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())?;
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
        }
        Ok(())
    }
}
