use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;

use tycoon_core::codec::url_encode;
use tycoon_core::{Command, Endpoint};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// One outgoing HTTP request
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub url: String,
    pub content_type: Option<&'static str>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Exchange {
    /// `POST <endpoint>/rpc/<command>`
    pub fn rpc(
        endpoint: &Endpoint,
        command: Command,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method: Method::POST,
            url: format!("{}/rpc/{}", endpoint.base_url(), command.name()),
            content_type: Some(content_type),
            headers: Vec::new(),
            body,
        }
    }

    /// `<METHOD> <endpoint>/<urlencoded-key>`
    pub fn direct(endpoint: &Endpoint, method: Method, key: &str) -> Self {
        Self {
            method,
            url: format!("{}/{}", endpoint.base_url(), url_encode(key)),
            content_type: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// A completed HTTP exchange, whatever its status
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Executes one request/response exchange.
///
/// Implementations must yield a [`Reply`] for every status code and fail
/// only when the exchange itself could not complete.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, exchange: Exchange) -> Result<Reply, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub keepalive: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Keep-alive HTTP transport backed by a pooled `reqwest` client
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.keepalive)
            .pool_idle_timeout(options.keepalive)
            .tcp_keepalive(options.keepalive)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, exchange: Exchange) -> Result<Reply, TransportError> {
        let mut request = self.client.request(exchange.method, &exchange.url);
        if let Some(content_type) = exchange.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        for (name, value) in exchange.headers {
            request = request.header(name, value);
        }
        if !exchange.body.is_empty() {
            request = request.body(exchange.body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.bytes().await?.to_vec();

        Ok(Reply {
            status,
            content_type,
            headers,
            body,
        })
    }
}
