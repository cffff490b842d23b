/*!
 * Storage capability used by devices to persist committed state.
 *
 * [`Storage`] abstracts a key/value store with lists and a time-series sink.
 * Drivers only see the trait; [`MemoryStorage`] is an in-process backend for
 * tests and single-node setups.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use thiserror::Error;
use tokio::time::Instant;

/// Error type for storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The key does not exist
    #[error("nil")]
    Nil,

    /// The backend failed
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create a new backend error
    pub fn backend<S: AsRef<str>>(msg: S) -> Self {
        StorageError::Backend(msg.as_ref().to_string())
    }

    /// Whether this is the missing-key sentinel
    pub fn is_nil(&self) -> bool {
        matches!(self, StorageError::Nil)
    }
}

/// A time-series point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub measurement: String,
    /// Point labels
    pub tags: HashMap<String, String>,
    /// Point values
    pub fields: Map<String, Json>,
    /// Point time
    pub timestamp: DateTime<Utc>,
}

/// Key/value store with lists plus a time-series sink
///
/// List indices follow Redis: `0` is the head, negative indices count from
/// the tail, `end` is inclusive.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    /// Elements of the list at `key` between `start` and `end`
    async fn lrange(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, StorageError>;

    /// Push values onto the head of the list, returning the new length
    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StorageError>;

    /// Pop up to `count` values from the tail of the list
    async fn rpop(&self, key: &str, count: usize) -> Result<Vec<String>, StorageError>;

    /// Read a scalar; [`StorageError::Nil`] when the key is absent
    async fn get(&self, key: &str) -> Result<String, StorageError>;

    /// Write a scalar; a zero `expiration` keeps it forever
    async fn set(&self, key: &str, value: &str, expiration: Duration) -> Result<(), StorageError>;

    /// Write one time-series point
    async fn write_point(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &Map<String, Json>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

#[derive(Debug)]
enum Entry {
    Scalar { value: String, expires_at: Option<Instant> },
    List(Vec<String>),
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self, Entry::Scalar { expires_at: Some(at), .. } if *at <= now)
    }
}

/// In-memory [`Storage`] backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Entry>>,
    points: Mutex<Vec<Point>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point written so far, oldest first
    pub fn points(&self) -> Result<Vec<Point>, StorageError> {
        Ok(self.points.lock().map_err(|_| poisoned())?.clone())
    }

    /// Number of live keys
    pub fn len(&self) -> Result<usize, StorageError> {
        let now = Instant::now();
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn with_list<T>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut Vec<String>) -> T,
    ) -> Result<Option<T>, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        if entries.get(key).map_or(false, |e| e.is_expired(now)) {
            entries.remove(key);
        }

        if create && !entries.contains_key(key) {
            entries.insert(key.to_string(), Entry::List(Vec::new()));
        }
        match entries.get_mut(key) {
            None => Ok(None),
            Some(Entry::List(list)) => {
                let out = f(list);
                if list.is_empty() {
                    entries.remove(key);
                }
                Ok(Some(out))
            }
            Some(Entry::Scalar { .. }) => Err(wrong_type(key)),
        }
    }
}

fn poisoned() -> StorageError {
    StorageError::backend("memory storage lock poisoned")
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::Backend(format!("key '{}' holds the wrong kind of value", key))
}

/// Resolve Redis-style inclusive bounds against a list of `len` elements
fn bounds(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn lrange(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, StorageError> {
        let range = self.with_list(key, false, |list| match bounds(list.len(), start, end) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })?;
        Ok(range.unwrap_or_default())
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StorageError> {
        let len = self.with_list(key, true, |list| {
            for value in values {
                list.insert(0, value.clone());
            }
            list.len()
        })?;
        Ok(len.unwrap_or_default())
    }

    async fn rpop(&self, key: &str, count: usize) -> Result<Vec<String>, StorageError> {
        let popped = self.with_list(key, false, |list| {
            let keep = list.len().saturating_sub(count);
            let mut tail = list.split_off(keep);
            tail.reverse();
            tail
        })?;
        Ok(popped.unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let now = Instant::now();
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => Err(StorageError::Nil),
            Some(Entry::Scalar { value, .. }) => Ok(value.clone()),
            Some(Entry::List(_)) => Err(wrong_type(key)),
            None => Err(StorageError::Nil),
        }
    }

    async fn set(&self, key: &str, value: &str, expiration: Duration) -> Result<(), StorageError> {
        let expires_at = (!expiration.is_zero()).then(|| Instant::now() + expiration);
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(
            key.to_string(),
            Entry::Scalar {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn write_point(
        &self,
        measurement: &str,
        tags: &HashMap<String, String>,
        fields: &Map<String, Json>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.points.lock().map_err(|_| poisoned())?.push(Point {
            measurement: measurement.to_string(),
            tags: tags.clone(),
            fields: fields.clone(),
            timestamp,
        });
        Ok(())
    }
}
