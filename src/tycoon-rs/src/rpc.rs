//! RPC invocation: encode, exchange, decode, map the status

use reqwest::Method;
use std::sync::Arc;
use std::time::Instant;

use tycoon_core::codec;
use tycoon_core::{Command, EncodingMode, Endpoint, ParameterMap, ProjectionError};

use crate::transport::{Exchange, Reply, Transport};
use crate::{ClientError, Result};

/// Issues RPC commands over a [`Transport`].
///
/// Holds no state between calls besides the endpoint and the active
/// encoding mode.
pub struct Invoker {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    encoding: EncodingMode,
}

impl Invoker {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint, encoding: EncodingMode) -> Self {
        Self {
            transport,
            endpoint,
            encoding,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    pub fn encoding(&self) -> EncodingMode {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: EncodingMode) {
        self.encoding = encoding;
    }

    /// Fresh parameter map for `command`, carrying `DB` when it applies
    pub fn params(&self, command: Command) -> ParameterMap {
        let mut params = ParameterMap::new();
        if command.targets_database() {
            params.insert_opt("DB", self.endpoint.database());
        }
        params
    }

    /// Call a command whose only meaningful outcome is success
    pub async fn call_unit(&self, command: Command, params: Option<ParameterMap>) -> Result<()> {
        self.call(command, params, |_| Ok(())).await
    }

    /// Call a command and project the decoded response on `200`.
    ///
    /// A projection error means the server answered without a field the
    /// caller needs and surfaces as [`ClientError::Protocol`].
    pub async fn call<T, F>(
        &self,
        command: Command,
        params: Option<ParameterMap>,
        projection: F,
    ) -> Result<T>
    where
        F: FnOnce(ParameterMap) -> std::result::Result<T, ProjectionError>,
    {
        let body = match &params {
            Some(params) => codec::encode(self.encoding, params),
            None => Vec::new(),
        };
        let exchange = Exchange::rpc(&self.endpoint, command, self.encoding.content_type(), body);

        let started = Instant::now();
        let reply = self
            .transport
            .execute(exchange)
            .await
            .map_err(|source| ClientError::Connection {
                uri: self.endpoint.authority(),
                source,
            })?;
        tracing::debug!(
            command = %command,
            status = reply.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rpc exchange"
        );

        let fields = self.decode_reply(command, &reply)?;
        match reply.status {
            200 => projection(fields).map_err(|e| self.protocol(format!("{}: {}", command, e))),
            450 => Err(ClientError::Inconsistency {
                uri: self.endpoint.authority(),
                message: fields.get("ERROR").unwrap_or_default().to_string(),
            }),
            501 => Err(ClientError::Implementation {
                uri: self.endpoint.authority(),
            }),
            400 => Err(self.protocol(format!(
                "{}: malformed request{}",
                command,
                fields
                    .get("ERROR")
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            ))),
            other => Err(self.protocol(format!("{}: unexpected status {}", command, other))),
        }
    }

    /// Direct record access on `<endpoint>/<urlencoded-key>`, bypassing RPC
    pub async fn direct(&self, exchange: Exchange) -> Result<Reply> {
        let method = exchange.method.clone();
        let reply = self
            .transport
            .execute(exchange)
            .await
            .map_err(|source| ClientError::Connection {
                uri: self.endpoint.authority(),
                source,
            })?;
        tracing::debug!(method = %method, status = reply.status, "direct exchange");

        match reply.status {
            200..=299 => Ok(reply),
            404 => Err(ClientError::Inconsistency {
                uri: self.endpoint.authority(),
                message: "No record was found".to_string(),
            }),
            501 => Err(ClientError::Implementation {
                uri: self.endpoint.authority(),
            }),
            400 => Err(self.protocol(format!("{}: malformed request", method))),
            other => Err(self.protocol(format!("{}: unexpected status {}", method, other))),
        }
    }

    pub fn direct_exchange(&self, method: Method, key: &str) -> Exchange {
        Exchange::direct(&self.endpoint, method, key)
    }

    fn decode_reply(&self, command: Command, reply: &Reply) -> Result<ParameterMap> {
        if reply.body.is_empty() {
            return Ok(ParameterMap::new());
        }

        let content_type = reply.content_type.as_deref().unwrap_or_default();
        let mode = EncodingMode::from_content_type(content_type)
            .filter(|mode| mode.is_tab_separated())
            .ok_or_else(|| {
                self.protocol(format!(
                    "{}: unexpected content type `{}`",
                    command, content_type
                ))
            })?;

        codec::decode_with(mode, &reply.body)
            .map_err(|e| self.protocol(format!("{}: {}", command, e)))
    }

    fn protocol(&self, detail: String) -> ClientError {
        ClientError::Protocol {
            uri: self.endpoint.authority(),
            detail,
        }
    }
}
