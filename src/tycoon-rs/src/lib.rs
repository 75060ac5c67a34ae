//! Tycoon Client Library
//!
//! HTTP RPC client for Kyoto Tycoon style key/value servers, with lazy
//! prefix, regex and cursor scans over the key space.

mod client;
pub mod rpc;
pub mod scan;
pub mod transport;

pub use client::{Client, DirectRecord};
pub use rpc::Invoker;
pub use scan::{RecordIter, Scan, ScanItem};
pub use transport::{Exchange, HttpTransport, Reply, Transport, TransportError, TransportOptions};
pub use tycoon_core::{
    Command, CursorRegistry, Direction, EncodingMode, Endpoint, EndpointError, Expiry,
    MatchResult, ParameterMap, Record, RecordInfo, ServerStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("couldn't connect to server {uri}: {source}")]
    Connection {
        uri: String,
        #[source]
        source: TransportError,
    },

    #[error("bad protocol communication with server {uri}: {detail}")]
    Protocol { uri: String, detail: String },

    #[error("procedure not implemented for the database storage type on server {uri}")]
    Implementation { uri: String },

    #[error("(un)existing record was detected on server {uri}: {message}")]
    Inconsistency { uri: String, message: String },
}

impl ClientError {
    /// A record precondition failed; an expected outcome such as "not found"
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, ClientError::Inconsistency { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }
}

/// Errors raised while building a client, before any exchange happens
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid connection URI: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
