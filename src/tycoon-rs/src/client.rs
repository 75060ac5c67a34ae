use chrono::{DateTime, Utc};
use reqwest::Method;
use std::sync::Arc;

use tycoon_core::{
    Command, Config, CursorId, CursorRegistry, EncodingMode, Endpoint, EndpointError, Expiry,
    MatchResult, ParameterMap, Record, RecordInfo, ServerStatus,
};

use crate::rpc::Invoker;
use crate::scan::Scan;
use crate::transport::{HttpTransport, Transport, TransportOptions};
use crate::{BuildError, Result};

/// Tycoon RPC API Client
pub struct Client {
    invoker: Invoker,
    registry: CursorRegistry,
}

/// Record read through the direct (non-RPC) path, with header metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectRecord {
    pub value: String,
    /// Parsed `X-Kt-Xt` header
    pub expires: Option<DateTime<Utc>>,
    /// `X-Kt-Xt` as sent, kept even when it does not parse
    pub expires_raw: Option<String>,
    /// Parsed `Date` header
    pub date: Option<DateTime<Utc>>,
    /// `Date` as sent, kept even when it does not parse
    pub date_raw: Option<String>,
}

impl Client {
    /// Create a new client for the given connection URI
    pub fn new(uri: &str) -> std::result::Result<Self, BuildError> {
        let endpoint = Endpoint::parse(uri)?;
        let transport = HttpTransport::new(TransportOptions::default())?;
        Ok(Self::with_transport(endpoint, Arc::new(transport)))
    }

    /// Create a client from loaded configuration
    pub fn from_config(config: &Config) -> std::result::Result<Self, BuildError> {
        let endpoint = config.endpoint()?;
        let transport = HttpTransport::new(TransportOptions {
            connect_timeout: config.connect_timeout(),
            keepalive: config.keepalive(),
        })?;
        let mut client = Self::with_transport(endpoint, Arc::new(transport));
        client.set_encoding(config.encoding);
        Ok(client)
    }

    /// Create a client over any transport, with its own cursor registry
    pub fn with_transport(endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            invoker: Invoker::new(transport, endpoint, EncodingMode::default()),
            registry: CursorRegistry::new(),
        }
    }

    /// Share a cursor registry with other clients of the same server session
    pub fn with_registry(mut self, registry: CursorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Point subsequent calls at another server or database
    pub fn connect_to(&mut self, uri: &str) -> std::result::Result<(), EndpointError> {
        let endpoint = Endpoint::parse(uri)?;
        tracing::info!(endpoint = %endpoint, "switching endpoint");
        self.invoker.set_endpoint(endpoint);
        Ok(())
    }

    /// Change the request encoding for subsequent calls
    pub fn set_encoding(&mut self, encoding: EncodingMode) {
        self.invoker.set_encoding(encoding);
    }

    pub fn encoding(&self) -> EncodingMode {
        self.invoker.encoding()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.invoker.endpoint()
    }

    pub fn registry(&self) -> &CursorRegistry {
        &self.registry
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Start building a scan over this client's records
    pub fn scan(&self) -> Scan<'_> {
        Scan::new(self)
    }

    // =========================================================================
    // Record operations
    // =========================================================================

    /// Add a record; fails with an inconsistency if it already exists
    pub async fn add(&self, key: &str, value: &str, xt: Option<Expiry>) -> Result<()> {
        self.store(Command::Add, key, value, xt).await
    }

    /// Append to a record, creating it if absent
    pub async fn append(&self, key: &str, value: &str, xt: Option<Expiry>) -> Result<()> {
        self.store(Command::Append, key, value, xt).await
    }

    /// Replace a record; fails with an inconsistency if it does not exist
    pub async fn replace(&self, key: &str, value: &str, xt: Option<Expiry>) -> Result<()> {
        self.store(Command::Replace, key, value, xt).await
    }

    /// Set the value of a record
    pub async fn set(&self, key: &str, value: &str, xt: Option<Expiry>) -> Result<()> {
        self.store(Command::Set, key, value, xt).await
    }

    /// Compare-and-swap.
    ///
    /// `oval` of `None` asserts the record is absent; `nval` of `None`
    /// removes it. An empty string is a real value, not absence.
    pub async fn cas(
        &self,
        key: &str,
        oval: Option<&str>,
        nval: Option<&str>,
        xt: Option<Expiry>,
    ) -> Result<()> {
        let mut params = self.invoker.params(Command::Cas);
        params.insert("key", key);
        params.insert_opt("oval", oval);
        params.insert_opt("nval", nval);
        params.insert_opt("xt", xt.map(Expiry::to_param));
        self.invoker.call_unit(Command::Cas, Some(params)).await
    }

    /// Retrieve a record; a missing key is an inconsistency
    pub async fn get(&self, key: &str) -> Result<Record> {
        let mut params = self.invoker.params(Command::Get);
        params.insert("key", key);
        self.invoker
            .call(Command::Get, Some(params), |fields| {
                Ok(Record {
                    key: key.to_string(),
                    value: fields.require("value")?.to_string(),
                    expires: fields.parsed("xt")?,
                })
            })
            .await
    }

    /// Retrieve only the value of a record
    pub async fn get_value(&self, key: &str) -> Result<String> {
        self.get(key).await.map(|record| record.value)
    }

    /// Size and expiration of a record without transferring its value
    pub async fn check(&self, key: &str) -> Result<RecordInfo> {
        let mut params = self.invoker.params(Command::Check);
        params.insert("key", key);
        self.invoker
            .call(Command::Check, Some(params), |fields| {
                Ok(RecordInfo {
                    vsiz: fields.require_parsed("vsiz")?,
                    expires: fields.parsed("xt")?,
                })
            })
            .await
    }

    /// Remove a record; a missing key is an inconsistency
    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut params = self.invoker.params(Command::Remove);
        params.insert("key", key);
        self.invoker.call_unit(Command::Remove, Some(params)).await
    }

    /// Add to the integer value of a record, returning the result
    pub async fn increment(&self, key: &str, num: i64, xt: Option<Expiry>) -> Result<i64> {
        let mut params = self.invoker.params(Command::Increment);
        params.insert("key", key);
        params.insert("num", num.to_string());
        params.insert_opt("xt", xt.map(Expiry::to_param));
        self.invoker
            .call(Command::Increment, Some(params), |fields| {
                fields.require_parsed("num")
            })
            .await
    }

    /// Add to the decimal value of a record, returning the result
    pub async fn increment_double(&self, key: &str, num: f64, xt: Option<Expiry>) -> Result<f64> {
        let mut params = self.invoker.params(Command::IncrementDouble);
        params.insert("key", key);
        params.insert("num", num.to_string());
        params.insert_opt("xt", xt.map(Expiry::to_param));
        self.invoker
            .call(Command::IncrementDouble, Some(params), |fields| {
                fields.require_parsed("num")
            })
            .await
    }

    /// Remove every record of the database
    pub async fn clear(&self) -> Result<()> {
        let params = self.invoker.params(Command::Clear);
        self.invoker.call_unit(Command::Clear, Some(params)).await
    }

    // =========================================================================
    // Matching
    // =========================================================================

    /// Keys starting with `prefix`; `max` of `None` or `0` is unbounded
    pub async fn match_prefix(&self, prefix: &str, max: Option<u64>) -> Result<MatchResult> {
        let mut params = self.invoker.params(Command::MatchPrefix);
        params.insert("prefix", prefix);
        self.match_keys(Command::MatchPrefix, params, max).await
    }

    /// Keys matching the regular expression `regex`
    pub async fn match_regex(&self, regex: &str, max: Option<u64>) -> Result<MatchResult> {
        let mut params = self.invoker.params(Command::MatchRegex);
        params.insert("regex", regex);
        self.match_keys(Command::MatchRegex, params, max).await
    }

    async fn match_keys(
        &self,
        command: Command,
        mut params: ParameterMap,
        max: Option<u64>,
    ) -> Result<MatchResult> {
        params.insert_opt("max", max.filter(|&max| max > 0).map(|max| max.to_string()));
        self.invoker
            .call(command, Some(params), |fields| MatchResult::from_fields(&fields))
            .await
    }

    // =========================================================================
    // Bulk operations
    // =========================================================================

    /// Store several records at once, returning how many were stored
    pub async fn set_bulk<I, K, V>(
        &self,
        records: I,
        xt: Option<Expiry>,
        atomic: bool,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = self.invoker.params(Command::SetBulk);
        params.insert_opt("xt", xt.map(Expiry::to_param));
        if atomic {
            params.insert("atomic", "");
        }
        for (key, value) in records {
            params.insert(format!("_{}", key.as_ref()), value);
        }
        self.invoker
            .call(Command::SetBulk, Some(params), |fields| {
                fields.require_parsed("num")
            })
            .await
    }

    /// Retrieve several records at once; absent keys are left out
    pub async fn get_bulk<I, K>(&self, keys: I, atomic: bool) -> Result<ParameterMap>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let params = self.bulk_keys(Command::GetBulk, keys, atomic);
        self.invoker
            .call(Command::GetBulk, Some(params), |fields| {
                Ok(fields.underscored().collect())
            })
            .await
    }

    /// Remove several records at once, returning how many were removed
    pub async fn remove_bulk<I, K>(&self, keys: I, atomic: bool) -> Result<u64>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let params = self.bulk_keys(Command::RemoveBulk, keys, atomic);
        self.invoker
            .call(Command::RemoveBulk, Some(params), |fields| {
                fields.require_parsed("num")
            })
            .await
    }

    fn bulk_keys<I, K>(&self, command: Command, keys: I, atomic: bool) -> ParameterMap
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut params = self.invoker.params(command);
        if atomic {
            params.insert("atomic", "");
        }
        for key in keys {
            params.insert(format!("_{}", key.as_ref()), "");
        }
        params
    }

    // =========================================================================
    // Server operations
    // =========================================================================

    /// Run a server-side script; arguments and results travel `_`-prefixed
    pub async fn play_script(&self, name: &str, args: &ParameterMap) -> Result<ParameterMap> {
        let mut params = self.invoker.params(Command::PlayScript);
        params.insert("name", name);
        for (key, value) in args.iter() {
            params.insert(format!("_{}", key), value);
        }
        self.invoker
            .call(Command::PlayScript, Some(params), |fields| {
                Ok(fields.underscored().collect())
            })
            .await
    }

    /// Database status: record count, size and storage details
    pub async fn status(&self) -> Result<ServerStatus> {
        let params = self.invoker.params(Command::Status);
        self.invoker
            .call(Command::Status, Some(params), |fields| Ok(ServerStatus::new(fields)))
            .await
    }

    /// Server-wide report
    pub async fn report(&self) -> Result<ParameterMap> {
        self.invoker.call(Command::Report, None, Ok).await
    }

    /// Echo the parameters back, for connectivity checks
    pub async fn echo(&self, params: &ParameterMap) -> Result<ParameterMap> {
        self.invoker
            .call(Command::Echo, Some(params.clone()), Ok)
            .await
    }

    /// Rebuild the database; `step` bounds incremental work when set
    pub async fn vacuum(&self, step: Option<u64>) -> Result<()> {
        let mut params = self.invoker.params(Command::Vacuum);
        params.insert_opt("step", step.map(|s| s.to_string()));
        self.invoker.call_unit(Command::Vacuum, Some(params)).await
    }

    /// Flush the database to the device, optionally running `command` after
    pub async fn synchronize(&self, hard: bool, command: Option<&str>) -> Result<()> {
        let mut params = self.invoker.params(Command::Synchronize);
        if hard {
            params.insert("hard", "");
        }
        params.insert_opt("command", command);
        self.invoker.call_unit(Command::Synchronize, Some(params)).await
    }

    /// Change the replication master of the server
    pub async fn tune_replication(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        ts: Option<u64>,
        iv: Option<f64>,
    ) -> Result<()> {
        let mut params = self.invoker.params(Command::TuneReplication);
        params.insert_opt("host", host);
        params.insert_opt("port", port.map(|p| p.to_string()));
        params.insert_opt("ts", ts.map(|t| t.to_string()));
        params.insert_opt("iv", iv.map(|i| i.to_string()));
        self.invoker
            .call_unit(Command::TuneReplication, Some(params))
            .await
    }

    // =========================================================================
    // Cursor operations
    // =========================================================================

    /// Jump the cursor to `key`, or to the first record, for a forward scan
    pub async fn cur_jump(&self, cursor: CursorId, key: Option<&str>) -> Result<()> {
        self.jump(Command::CurJump, cursor, key).await
    }

    /// Jump the cursor to `key`, or to the last record, for a backward scan
    pub async fn cur_jump_back(&self, cursor: CursorId, key: Option<&str>) -> Result<()> {
        self.jump(Command::CurJumpBack, cursor, key).await
    }

    async fn jump(&self, command: Command, cursor: CursorId, key: Option<&str>) -> Result<()> {
        let mut params = self.invoker.params(command);
        params.insert("CUR", cursor.to_string());
        params.insert_opt("key", key);
        self.invoker.call_unit(command, Some(params)).await
    }

    pub async fn cur_step(&self, cursor: CursorId) -> Result<()> {
        self.invoker
            .call_unit(Command::CurStep, Some(cursor_params(cursor, false)))
            .await
    }

    pub async fn cur_step_back(&self, cursor: CursorId) -> Result<()> {
        self.invoker
            .call_unit(Command::CurStepBack, Some(cursor_params(cursor, false)))
            .await
    }

    /// Key of the current record, moving to the next one when `step` is set
    pub async fn cur_get_key(&self, cursor: CursorId, step: bool) -> Result<String> {
        self.invoker
            .call(Command::CurGetKey, Some(cursor_params(cursor, step)), |fields| {
                Ok(fields.require("key")?.to_string())
            })
            .await
    }

    /// Value of the current record, moving to the next one when `step` is set
    pub async fn cur_get_value(&self, cursor: CursorId, step: bool) -> Result<String> {
        self.invoker
            .call(Command::CurGetValue, Some(cursor_params(cursor, step)), |fields| {
                Ok(fields.require("value")?.to_string())
            })
            .await
    }

    /// Current record, moving to the next one when `step` is set
    pub async fn cur_get(&self, cursor: CursorId, step: bool) -> Result<Record> {
        self.invoker
            .call(Command::CurGet, Some(cursor_params(cursor, step)), |fields| {
                Ok(Record {
                    key: fields.require("key")?.to_string(),
                    value: fields.require("value")?.to_string(),
                    expires: fields.parsed("xt")?,
                })
            })
            .await
    }

    /// Set the value of the current record
    pub async fn cur_set_value(
        &self,
        cursor: CursorId,
        value: &str,
        step: bool,
        xt: Option<Expiry>,
    ) -> Result<()> {
        let mut params = cursor_params(cursor, step);
        params.insert("value", value);
        params.insert_opt("xt", xt.map(Expiry::to_param));
        self.invoker.call_unit(Command::CurSetValue, Some(params)).await
    }

    /// Remove the current record
    pub async fn cur_remove(&self, cursor: CursorId) -> Result<()> {
        self.invoker
            .call_unit(Command::CurRemove, Some(cursor_params(cursor, false)))
            .await
    }

    /// Delete the server-side cursor
    pub async fn cur_delete(&self, cursor: CursorId) -> Result<()> {
        self.invoker
            .call_unit(Command::CurDelete, Some(cursor_params(cursor, false)))
            .await
    }

    // =========================================================================
    // Direct record access
    // =========================================================================

    /// Read a record through the direct path, with expiration headers
    pub async fn fetch(&self, key: &str) -> Result<DirectRecord> {
        let exchange = self.invoker.direct_exchange(Method::GET, key);
        let reply = self.invoker.direct(exchange).await?;
        let value = String::from_utf8(reply.body.clone()).map_err(|_| {
            crate::ClientError::Protocol {
                uri: self.endpoint().authority(),
                detail: format!("GET {}: value is not valid UTF-8", key),
            }
        })?;
        Ok(direct_record(value, &reply))
    }

    /// Read only the metadata of a record through the direct path
    pub async fn probe(&self, key: &str) -> Result<DirectRecord> {
        let exchange = self.invoker.direct_exchange(Method::HEAD, key);
        let reply = self.invoker.direct(exchange).await?;
        Ok(direct_record(String::new(), &reply))
    }

    /// Store a record through the direct path
    pub async fn put(&self, key: &str, value: &str, xt: Option<Expiry>) -> Result<()> {
        let mut exchange = self
            .invoker
            .direct_exchange(Method::PUT, key)
            .with_body(value.as_bytes().to_vec());
        if let Some(xt) = xt {
            exchange = exchange.with_header("X-Kt-Xt", xt.to_param());
        }
        self.invoker.direct(exchange).await?;
        Ok(())
    }

    /// Remove a record through the direct path
    pub async fn delete(&self, key: &str) -> Result<()> {
        let exchange = self.invoker.direct_exchange(Method::DELETE, key);
        self.invoker.direct(exchange).await?;
        Ok(())
    }

    async fn store(
        &self,
        command: Command,
        key: &str,
        value: &str,
        xt: Option<Expiry>,
    ) -> Result<()> {
        let mut params = self.invoker.params(command);
        params.insert("key", key);
        params.insert("value", value);
        params.insert_opt("xt", xt.map(Expiry::to_param));
        self.invoker.call_unit(command, Some(params)).await
    }
}

fn cursor_params(cursor: CursorId, step: bool) -> ParameterMap {
    let mut params = ParameterMap::new();
    params.insert("CUR", cursor.to_string());
    if step {
        params.insert("step", "1");
    }
    params
}

fn direct_record(value: String, reply: &crate::transport::Reply) -> DirectRecord {
    let expires_raw = reply.header("X-Kt-Xt").map(ToOwned::to_owned);
    let date_raw = reply.header("Date").map(ToOwned::to_owned);
    DirectRecord {
        value,
        expires: expires_raw.as_deref().and_then(parse_http_date),
        expires_raw,
        date: date_raw.as_deref().and_then(parse_http_date),
        date_raw,
    }
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
