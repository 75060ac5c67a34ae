//! In-memory server speaking the RPC and direct record protocols.
//!
//! Records live in an ordered map so cursor scans see keys in order.
//! Every RPC request is logged with its decoded parameters.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use tycoon_core::codec;
use tycoon_rs::{
    Client, Command, EncodingMode, Endpoint, Exchange, ParameterMap, Reply, Transport,
    TransportError,
};

/// Clock used to resolve relative expiration times
pub const NOW: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub struct Logged {
    pub command: Command,
    pub content_type: Option<String>,
    pub params: ParameterMap,
}

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    xt: Option<i64>,
}

#[derive(Default)]
struct ServerState {
    records: BTreeMap<String, Stored>,
    cursors: HashMap<String, Option<String>>,
    offline: bool,
}

pub struct FakeServer {
    state: Mutex<ServerState>,
    log: Mutex<Vec<Logged>>,
    reply_encoding: EncodingMode,
}

type Outcome = (u16, ParameterMap);

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Self::replying_with(EncodingMode::TabUrl)
    }

    /// Server answering in a specific tab-separated column encoding
    pub fn replying_with(reply_encoding: EncodingMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            log: Mutex::new(Vec::new()),
            reply_encoding,
        })
    }

    pub fn seed(&self, records: &[(&str, &str)]) {
        let mut state = self.state.lock();
        for (key, value) in records {
            state.records.insert(
                key.to_string(),
                Stored {
                    value: value.to_string(),
                    xt: None,
                },
            );
        }
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.lock().records.get(key).map(|s| s.value.clone())
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn open_cursors(&self) -> usize {
        self.state.lock().cursors.len()
    }

    pub fn requests(&self) -> Vec<Logged> {
        self.log.lock().clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().iter().map(|l| l.command).collect()
    }

    pub fn last(&self, command: Command) -> Option<Logged> {
        self.log
            .lock()
            .iter()
            .rev()
            .find(|l| l.command == command)
            .cloned()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    fn rpc(&self, name: &str, exchange: &Exchange) -> Reply {
        let command = match name.parse::<Command>() {
            Ok(command) => command,
            Err(_) => return self.reply((404, ParameterMap::new())),
        };
        let params = if exchange.body.is_empty() {
            ParameterMap::new()
        } else {
            match codec::decode(exchange.content_type.unwrap_or_default(), &exchange.body) {
                Ok(params) => params,
                Err(e) => return self.reply(error(400, &e.to_string())),
            }
        };
        self.log.lock().push(Logged {
            command,
            content_type: exchange.content_type.map(ToOwned::to_owned),
            params: params.clone(),
        });
        let outcome = self.dispatch(command, &params);
        self.reply(outcome)
    }

    fn reply(&self, (status, fields): Outcome) -> Reply {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(self.reply_encoding.content_type()),
        );
        Reply {
            status,
            content_type: Some(self.reply_encoding.content_type().to_string()),
            headers,
            body: codec::encode(self.reply_encoding, &fields),
        }
    }

    fn dispatch(&self, command: Command, params: &ParameterMap) -> Outcome {
        let mut state = self.state.lock();
        let ServerState {
            records, cursors, ..
        } = &mut *state;
        let key = params.get("key").unwrap_or_default().to_string();

        match command {
            Command::Set => {
                records.insert(key, stored(params, params.get("value").unwrap_or_default()));
                ok()
            }
            Command::Add => {
                if records.contains_key(&key) {
                    return error(450, "DB: 6: record duplication: record duplication");
                }
                records.insert(key, stored(params, params.get("value").unwrap_or_default()));
                ok()
            }
            Command::Replace => {
                if !records.contains_key(&key) {
                    return error(450, "DB: 7: no record: no record");
                }
                records.insert(key, stored(params, params.get("value").unwrap_or_default()));
                ok()
            }
            Command::Append => {
                let mut value = records.get(&key).map(|s| s.value.clone()).unwrap_or_default();
                value.push_str(params.get("value").unwrap_or_default());
                records.insert(key, stored(params, &value));
                ok()
            }
            Command::Cas => {
                let current = records.get(&key).map(|s| s.value.as_str());
                if current != params.get("oval") {
                    return error(450, "DB: 8: logical inconsistency: status conflict");
                }
                match params.get("nval") {
                    Some(nval) => {
                        records.insert(key, stored(params, nval));
                    }
                    None => {
                        records.remove(&key);
                    }
                }
                ok()
            }
            Command::Get => match records.get(&key) {
                Some(record) => {
                    let mut fields = ParameterMap::new();
                    fields.insert("value", record.value.clone());
                    fields.insert_opt("xt", record.xt.map(|xt| xt.to_string()));
                    (200, fields)
                }
                None => error(450, "DB: 7: no record: no record"),
            },
            Command::Check => match records.get(&key) {
                Some(record) => {
                    let mut fields = ParameterMap::new();
                    fields.insert("vsiz", record.value.len().to_string());
                    fields.insert_opt("xt", record.xt.map(|xt| xt.to_string()));
                    (200, fields)
                }
                None => error(450, "DB: 7: no record: no record"),
            },
            Command::Remove => match records.remove(&key) {
                Some(_) => ok(),
                None => error(450, "DB: 7: no record: no record"),
            },
            Command::Clear => {
                records.clear();
                ok()
            }
            Command::Increment => {
                let current = records
                    .get(&key)
                    .map(|s| s.value.clone())
                    .unwrap_or_else(|| "0".into());
                let (Ok(current), Ok(num)) = (
                    current.parse::<i64>(),
                    params.get("num").unwrap_or_default().parse::<i64>(),
                ) else {
                    return error(450, "DB: 8: logical inconsistency: incompatible record");
                };
                let result = (current + num).to_string();
                records.insert(key, stored(params, &result));
                (200, fields(&[("num", &result)]))
            }
            Command::IncrementDouble => {
                let current = records
                    .get(&key)
                    .map(|s| s.value.clone())
                    .unwrap_or_else(|| "0".into());
                let (Ok(current), Ok(num)) = (
                    current.parse::<f64>(),
                    params.get("num").unwrap_or_default().parse::<f64>(),
                ) else {
                    return error(450, "DB: 8: logical inconsistency: incompatible record");
                };
                let result = (current + num).to_string();
                records.insert(key, stored(params, &result));
                (200, fields(&[("num", &result)]))
            }
            Command::MatchPrefix | Command::MatchRegex => {
                let matcher = if command == Command::MatchPrefix {
                    Pattern::Prefix(params.get("prefix").unwrap_or_default())
                } else {
                    match Pattern::literal_regex(params.get("regex").unwrap_or_default()) {
                        Some(pattern) => pattern,
                        None => return (501, ParameterMap::new()),
                    }
                };
                let max = params
                    .get("max")
                    .and_then(|m| m.parse::<usize>().ok())
                    .unwrap_or(usize::MAX);
                let keys: Vec<&String> = records
                    .keys()
                    .filter(|k| matcher.matches(k))
                    .take(max)
                    .collect();
                let mut fields = ParameterMap::new();
                for (ordinal, key) in keys.iter().enumerate() {
                    fields.insert(format!("_{}", key), ordinal.to_string());
                }
                fields.insert("num", keys.len().to_string());
                (200, fields)
            }
            Command::SetBulk => {
                let mut stored_count = 0;
                for (key, value) in params.underscored() {
                    records.insert(key.to_string(), stored(params, value));
                    stored_count += 1;
                }
                (200, fields(&[("num", &stored_count.to_string())]))
            }
            Command::GetBulk => {
                let mut fields = ParameterMap::new();
                let mut found = 0;
                for (key, _) in params.underscored() {
                    if let Some(record) = records.get(key) {
                        fields.insert(format!("_{}", key), record.value.clone());
                        found += 1;
                    }
                }
                fields.insert("num", found.to_string());
                (200, fields)
            }
            Command::RemoveBulk => {
                let removed = params
                    .underscored()
                    .filter(|(key, _)| records.remove(*key).is_some())
                    .count();
                (200, fields(&[("num", &removed.to_string())]))
            }
            Command::Status => {
                let size: usize = records.iter().map(|(k, v)| k.len() + v.value.len()).sum();
                (
                    200,
                    fields(&[
                        ("count", &records.len().to_string()),
                        ("size", &size.to_string()),
                        ("type", "TreeDB"),
                    ]),
                )
            }
            Command::Report => (200, fields(&[("conf_kc_version", "1.2.76"), ("db_0", "count=0")])),
            Command::Echo => (200, params.clone()),
            Command::PlayScript => match params.get("name") {
                Some("echo") => (
                    200,
                    params
                        .iter()
                        .filter(|(k, _)| k.starts_with('_'))
                        .collect(),
                ),
                _ => (501, ParameterMap::new()),
            },
            Command::Vacuum | Command::Synchronize => ok(),
            Command::CurJump | Command::CurJumpBack => {
                let cur = params.get("CUR").unwrap_or_default().to_string();
                let target = params.get("key");
                let landed = match (command == Command::CurJump, target) {
                    (true, Some(key)) => records
                        .range::<str, _>((Bound::Included(key), Bound::Unbounded))
                        .next(),
                    (true, None) => records.iter().next(),
                    (false, Some(key)) => records
                        .range::<str, _>((Bound::Unbounded, Bound::Included(key)))
                        .next_back(),
                    (false, None) => records.iter().next_back(),
                };
                let position = landed.map(|(k, _)| k.clone());
                let found = position.is_some();
                cursors.insert(cur, position);
                if found {
                    ok()
                } else {
                    error(450, "DB: 7: no record: no record")
                }
            }
            Command::CurStep | Command::CurStepBack => {
                let cur = params.get("CUR").unwrap_or_default().to_string();
                let Some(Some(current)) = cursors.get(&cur).cloned() else {
                    return error(450, "DB: 7: no record: cursor is not positioned");
                };
                let next = step(records, &current, command == Command::CurStep);
                let found = next.is_some();
                cursors.insert(cur, next);
                if found {
                    ok()
                } else {
                    error(450, "DB: 7: no record: no record")
                }
            }
            Command::CurGet | Command::CurGetKey | Command::CurGetValue => {
                let cur = params.get("CUR").unwrap_or_default().to_string();
                let Some(Some(current)) = cursors.get(&cur).cloned() else {
                    return error(450, "DB: 7: no record: cursor is not positioned");
                };
                let Some(record) = records.get(&current).cloned() else {
                    return error(450, "DB: 7: no record: no record");
                };
                let mut fields = ParameterMap::new();
                if command != Command::CurGetValue {
                    fields.insert("key", current.clone());
                }
                if command != Command::CurGetKey {
                    fields.insert("value", record.value);
                    fields.insert_opt("xt", record.xt.map(|xt| xt.to_string()));
                }
                if params.contains_key("step") {
                    let next = step(records, &current, true);
                    cursors.insert(cur, next);
                }
                (200, fields)
            }
            Command::CurSetValue => {
                let cur = params.get("CUR").unwrap_or_default().to_string();
                let Some(Some(current)) = cursors.get(&cur).cloned() else {
                    return error(450, "DB: 7: no record: cursor is not positioned");
                };
                let value = params.get("value").unwrap_or_default().to_string();
                records.insert(current.clone(), stored(params, &value));
                if params.contains_key("step") {
                    let next = step(records, &current, true);
                    cursors.insert(cur, next);
                }
                ok()
            }
            Command::CurRemove => {
                let cur = params.get("CUR").unwrap_or_default().to_string();
                let Some(Some(current)) = cursors.get(&cur).cloned() else {
                    return error(450, "DB: 7: no record: cursor is not positioned");
                };
                let next = step(records, &current, true);
                records.remove(&current);
                cursors.insert(cur, next);
                ok()
            }
            Command::CurDelete => {
                let cur = params.get("CUR").unwrap_or_default();
                match cursors.remove(cur) {
                    Some(_) => ok(),
                    None => error(450, "DB: 7: no record: no such cursor"),
                }
            }
            Command::TuneReplication => (501, ParameterMap::new()),
        }
    }

    fn direct(&self, method: &Method, path: &str, exchange: &Exchange) -> Reply {
        let key = codec::decode_with(EncodingMode::FormUrl, format!("k={}", path).as_bytes())
            .ok()
            .and_then(|fields| fields.get("k").map(ToOwned::to_owned))
            .unwrap_or_default();
        let mut state = self.state.lock();
        let mut reply = Reply::default();

        reply.status = match method.as_str() {
            "GET" | "HEAD" => match state.records.get(&key) {
                Some(record) => {
                    if let Some(xt) = record.xt {
                        let date = chrono::DateTime::<chrono::Utc>::from_timestamp(xt, 0)
                            .map(|d| d.to_rfc2822())
                            .unwrap_or_default();
                        reply.headers.insert("x-kt-xt", HeaderValue::from_str(&date).unwrap());
                    }
                    reply
                        .headers
                        .insert("date", HeaderValue::from_static("Tue, 14 Nov 2023 22:13:20 GMT"));
                    if *method == Method::GET {
                        reply.body = record.value.as_bytes().to_vec();
                    }
                    200
                }
                None => 404,
            },
            "PUT" => {
                let xt = exchange
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("x-kt-xt"))
                    .and_then(|(_, value)| value.parse::<i64>().ok())
                    .map(resolve_xt);
                let value = String::from_utf8(exchange.body.clone()).unwrap_or_default();
                state.records.insert(key, Stored { value, xt });
                201
            }
            "DELETE" => match state.records.remove(&key) {
                Some(_) => 204,
                None => 404,
            },
            _ => 400,
        };
        reply
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn execute(&self, exchange: Exchange) -> Result<Reply, TransportError> {
        if self.state.lock().offline {
            return Err(TransportError::Unavailable("connection refused".to_string()));
        }

        // scheme://authority/path
        let path = exchange.url.splitn(4, '/').nth(3).unwrap_or_default().to_string();
        match path.strip_prefix("rpc/") {
            Some(name) => Ok(self.rpc(name, &exchange)),
            None => Ok(self.direct(&exchange.method, &path, &exchange)),
        }
    }
}

/// Transport that answers every request with the same reply
pub struct StaticTransport {
    pub reply: Reply,
}

impl StaticTransport {
    pub fn new(status: u16, content_type: Option<&str>, body: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply {
                status,
                content_type: content_type.map(ToOwned::to_owned),
                headers: HeaderMap::new(),
                body: body.to_vec(),
            },
        })
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn execute(&self, _exchange: Exchange) -> Result<Reply, TransportError> {
        Ok(self.reply.clone())
    }
}

pub fn client_for(server: &Arc<FakeServer>) -> Client {
    Client::with_transport(Endpoint::default(), server.clone())
}

pub fn client_with_database(server: &Arc<FakeServer>, uri: &str) -> Client {
    Client::with_transport(Endpoint::parse(uri).unwrap(), server.clone())
}

/// Key matcher for the match commands. Regexes are limited to literals
/// with optional `^`/`$` anchors; anything else is reported as unsupported.
enum Pattern<'a> {
    Prefix(&'a str),
    Literal {
        text: &'a str,
        start: bool,
        end: bool,
    },
}

impl<'a> Pattern<'a> {
    fn literal_regex(regex: &'a str) -> Option<Self> {
        let (start, rest) = match regex.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, regex),
        };
        let (end, text) = match rest.strip_suffix('$') {
            Some(text) => (true, text),
            None => (false, rest),
        };
        if text.contains(|c: char| ".*+?()[]{}|\\^$".contains(c)) {
            return None;
        }
        Some(Pattern::Literal { text, start, end })
    }

    fn matches(&self, key: &str) -> bool {
        match *self {
            Pattern::Prefix(prefix) => key.starts_with(prefix),
            Pattern::Literal { text, start, end } => match (start, end) {
                (true, true) => key == text,
                (true, false) => key.starts_with(text),
                (false, true) => key.ends_with(text),
                (false, false) => key.contains(text),
            },
        }
    }
}

fn step(records: &BTreeMap<String, Stored>, current: &str, forward: bool) -> Option<String> {
    let next = if forward {
        records
            .range::<str, _>((Bound::Excluded(current), Bound::Unbounded))
            .next()
    } else {
        records
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(current)))
            .next_back()
    };
    next.map(|(k, _)| k.clone())
}

fn resolve_xt(xt: i64) -> i64 {
    if xt < 0 {
        -xt
    } else {
        NOW + xt
    }
}

fn stored(params: &ParameterMap, value: &str) -> Stored {
    Stored {
        value: value.to_string(),
        xt: params
            .get("xt")
            .and_then(|xt| xt.parse::<i64>().ok())
            .map(resolve_xt),
    }
}

fn ok() -> Outcome {
    (200, ParameterMap::new())
}

fn error(status: u16, message: &str) -> Outcome {
    (status, fields(&[("ERROR", message)]))
}

fn fields(pairs: &[(&str, &str)]) -> ParameterMap {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}
