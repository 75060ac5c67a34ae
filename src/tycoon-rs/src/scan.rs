//! Lazy scans over the key space
//!
//! A [`Scan`] describes what to walk; building it yields a [`RecordIter`]
//! that talks to the server only when stepped. Two strategies exist and a
//! single iterator never mixes them:
//!
//! - *match list*: a `match_prefix`/`match_regex` snapshot taken at start
//!   and walked locally, with a fresh `get` per key in record mode;
//! - *cursor*: a server-side cursor leased from the client's registry,
//!   positioned by a jump and advanced one step at a time.
//!
//! An inconsistency reported by the server mid-scan (cursor invalidated,
//! record deleted since the match) ends the sequence instead of failing it.

use futures::stream::{self, Stream};
use std::marker::PhantomData;

use tycoon_core::{CursorId, CursorLease, Direction, MatchResult, Record};

use crate::client::Client;
use crate::{ClientError, Result};

/// Element produced by a scan: a bare key or a full record
pub trait ScanItem: Sized {
    /// Whether values are fetched at all
    const KEYS_ONLY: bool;

    fn from_key(key: String) -> Self;

    fn from_record(record: Record) -> Self;
}

impl ScanItem for String {
    const KEYS_ONLY: bool = true;

    fn from_key(key: String) -> Self {
        key
    }

    fn from_record(record: Record) -> Self {
        record.key
    }
}

impl ScanItem for Record {
    const KEYS_ONLY: bool = false;

    fn from_key(key: String) -> Self {
        Record::new(key, String::new())
    }

    fn from_record(record: Record) -> Self {
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Prefix(String),
    Regex(String),
    Cursor { start: Option<String> },
}

/// Scan configuration. Cloning forks an independent configuration; no
/// state is shared between iterators built from it.
#[derive(Clone)]
pub struct Scan<'a> {
    client: &'a Client,
    source: Source,
    direction: Direction,
    max: Option<u64>,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            source: Source::Cursor { start: None },
            direction: Direction::Forward,
            max: None,
        }
    }

    /// Walk the keys starting with `prefix`
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source = Source::Prefix(prefix.into());
        self
    }

    /// Walk the keys matching `regex`
    pub fn regex(mut self, regex: impl Into<String>) -> Self {
        self.source = Source::Regex(regex.into());
        self
    }

    /// Walk the whole key space with a cursor, starting at `key`
    pub fn start(mut self, key: impl Into<String>) -> Self {
        self.source = Source::Cursor {
            start: Some(key.into()),
        };
        self
    }

    /// Walk the whole key space with a cursor from its first or last record
    pub fn all(mut self) -> Self {
        self.source = Source::Cursor { start: None };
        self
    }

    pub fn forward(mut self) -> Self {
        self.direction = Direction::Forward;
        self
    }

    pub fn backward(mut self) -> Self {
        self.direction = Direction::Backward;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Upper bound on matched keys; `0` means unbounded. Ignored by cursor scans.
    pub fn max(mut self, max: u64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn keys(self) -> RecordIter<'a, String> {
        self.build()
    }

    pub fn records(self) -> RecordIter<'a, Record> {
        self.build()
    }

    pub fn build<T: ScanItem>(self) -> RecordIter<'a, T> {
        RecordIter {
            client: self.client,
            source: self.source,
            direction: self.direction,
            max: self.max,
            state: State::Idle,
            lease: None,
            match_count: None,
            _item: PhantomData,
        }
    }
}

enum State {
    Idle,
    Listed { keys: Vec<String>, position: usize },
    Cursor { cursor: CursorId, primed: bool },
    Done,
}

/// Lazy, restartable sequence of keys or records
pub struct RecordIter<'a, T> {
    client: &'a Client,
    source: Source,
    direction: Direction,
    max: Option<u64>,
    state: State,
    lease: Option<CursorLease>,
    match_count: Option<u64>,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T: ScanItem> RecordIter<'a, T> {
    /// Next element, or `None` once the sequence has ended.
    ///
    /// Starts the scan on first use. Failures other than inconsistencies
    /// propagate and leave the position unchanged.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if matches!(self.state, State::Idle) {
            self.start().await?;
        }

        match self.state {
            State::Listed { .. } => self.next_listed().await,
            State::Cursor { cursor, primed } => self.next_cursor(cursor, primed).await,
            State::Idle | State::Done => Ok(None),
        }
    }

    /// Restart from scratch against the current server state: re-run the
    /// match query, or re-jump the cursor keeping the same ID.
    pub async fn rewind(&mut self) -> Result<()> {
        self.state = State::Idle;
        self.match_count = None;
        self.start().await
    }

    /// Server reported match count, once a match-list scan has started
    pub fn match_count(&self) -> Option<u64> {
        self.match_count
    }

    /// Cursor ID held by this iterator, if it leased one
    pub fn cursor(&self) -> Option<CursorId> {
        self.lease.as_ref().map(CursorLease::id)
    }

    /// Drain the remaining elements
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        self.close().await?;
        Ok(items)
    }

    /// Adapt into a `Stream` of results
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + 'a
    where
        T: 'a,
    {
        stream::try_unfold(self, |mut iter| async move {
            let item = iter.next().await?;
            Ok::<_, ClientError>(item.map(|item| (item, iter)))
        })
    }

    /// Dispose of the iterator, deleting its server-side cursor first.
    ///
    /// The cursor ID returns to the registry whether or not the deletion
    /// succeeds. Dropping the iterator releases the ID without the call.
    pub async fn close(mut self) -> Result<()> {
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        let outcome = self.client.cur_delete(lease.id()).await;
        drop(lease);
        match outcome {
            Err(e) if e.is_inconsistency() => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to delete cursor");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn start(&mut self) -> Result<()> {
        let query = match &self.source {
            Source::Prefix(prefix) => Some(self.client.match_prefix(prefix, self.max).await),
            Source::Regex(regex) => Some(self.client.match_regex(regex, self.max).await),
            Source::Cursor { .. } => None,
        };

        match query {
            Some(result) => self.begin_listing(result),
            None => self.begin_cursor().await,
        }
    }

    fn begin_listing(&mut self, result: Result<MatchResult>) -> Result<()> {
        let MatchResult { mut keys, num } = match absorb_inconsistency(result)? {
            Some(result) => result,
            None => {
                self.state = State::Done;
                return Ok(());
            }
        };
        if self.direction == Direction::Backward {
            keys.reverse();
        }
        tracing::debug!(keys = keys.len(), num, "match list fetched");
        self.match_count = Some(num);
        self.state = State::Listed { keys, position: 0 };
        Ok(())
    }

    async fn begin_cursor(&mut self) -> Result<()> {
        let client = self.client;
        let registry = client.registry();
        let cursor = self.lease.get_or_insert_with(|| registry.lease()).id();
        let start = match &self.source {
            Source::Cursor { start } => start.as_deref(),
            _ => None,
        };

        let jumped = match self.direction {
            Direction::Forward => self.client.cur_jump(cursor, start).await,
            Direction::Backward => self.client.cur_jump_back(cursor, start).await,
        };

        self.state = match absorb_inconsistency(jumped)? {
            Some(()) => State::Cursor {
                cursor,
                primed: false,
            },
            None => State::Done,
        };
        tracing::debug!(cursor, direction = ?self.direction, "cursor positioned");
        Ok(())
    }

    async fn next_listed(&mut self) -> Result<Option<T>> {
        let next_key = match &self.state {
            State::Listed { keys, position } => keys.get(*position).cloned(),
            _ => return Ok(None),
        };
        let Some(key) = next_key else {
            self.state = State::Done;
            return Ok(None);
        };

        let item = if T::KEYS_ONLY {
            Some(T::from_key(key))
        } else {
            absorb_inconsistency(self.client.get(&key).await)?.map(T::from_record)
        };

        match item {
            Some(item) => {
                if let State::Listed { position, .. } = &mut self.state {
                    *position += 1;
                }
                Ok(Some(item))
            }
            None => {
                self.state = State::Done;
                Ok(None)
            }
        }
    }

    async fn next_cursor(&mut self, cursor: CursorId, primed: bool) -> Result<Option<T>> {
        if primed {
            let stepped = match self.direction {
                Direction::Forward => self.client.cur_step(cursor).await,
                Direction::Backward => self.client.cur_step_back(cursor).await,
            };
            if absorb_inconsistency(stepped)?.is_none() {
                self.state = State::Done;
                return Ok(None);
            }
            // Stepped: the next read must not step again even if it fails.
            self.state = State::Cursor {
                cursor,
                primed: false,
            };
        }

        let item = if T::KEYS_ONLY {
            absorb_inconsistency(self.client.cur_get_key(cursor, false).await)?.map(T::from_key)
        } else {
            absorb_inconsistency(self.client.cur_get(cursor, false).await)?.map(T::from_record)
        };

        self.state = match item {
            Some(_) => State::Cursor {
                cursor,
                primed: true,
            },
            None => State::Done,
        };
        Ok(item)
    }
}

/// Treat an inconsistency as "nothing there"
fn absorb_inconsistency<V>(result: Result<V>) -> Result<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ClientError::Inconsistency { message, .. }) => {
            tracing::debug!(%message, "scan ended by inconsistency");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
