use thiserror::Error;

/// Failure while encoding or decoding a wire body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("row {row} has no field separator")]
    MissingSeparator { row: usize },

    #[error("row {row} has a malformed field: {reason}")]
    InvalidField { row: usize, reason: String },

    #[error("row {row} is not valid UTF-8")]
    InvalidUtf8 { row: usize },
}

/// Malformed connection URI
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("unsupported scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),

    #[error("connection URI `{0}` has no host")]
    MissingHost(String),

    #[error("invalid port `{port}` in connection URI `{uri}`")]
    InvalidPort { uri: String, port: String },
}

/// Raised by a result projection when the response lacks what it needs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("response is missing field `{0}`")]
    MissingField(String),

    #[error("response field `{field}` has unexpected value `{value}`")]
    InvalidField { field: String, value: String },
}

/// Name that is not part of the RPC command set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown RPC command `{0}`")]
pub struct UnknownCommand(pub String);
