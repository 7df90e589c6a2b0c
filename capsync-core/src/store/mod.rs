//! Shared state store
//!
//! The store is the only medium every execution context can reach and the
//! only state that survives a context reload. It offers four operations:
//!
//! ```text
//!   get(keys) -> Record        set(Record)        remove(keys)
//!                     subscribe() -> StoreSubscription
//!
//!   ┌──────────┐  set   ┌────────────────┐  StoreChange  ┌──────────┐
//!   │ context A│ ─────► │ kv (SQLite)    │ ────────────► │ context B│
//!   └──────────┘        │ + broadcast tx │               └──────────┘
//!                       └────────────────┘
//! ```
//!
//! Semantics are last-write-wins per key with no transactions and no
//! compare-and-swap. Every write notifies every live subscriber, including
//! writes that store an identical value. Notifications are informational:
//! consumers re-read the store before acting on anything that matters.

pub mod keys;
pub mod schema;

pub use keys::StoreKey;

use crate::error::{Error, Result};
use crate::types::{CaptionSet, ChatMode, Message, VideoContext};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A partial view of the store: key → JSON value
pub type Record = BTreeMap<String, Value>;

/// Buffered notifications per subscriber before it starts lagging
const CHANGE_CAPACITY: usize = 256;

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A single key transition delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    /// `None` when the key was removed
    pub new_value: Option<Value>,
}

impl StoreChange {
    pub fn is(&self, key: StoreKey) -> bool {
        self.key == key.as_str()
    }

    /// Decode the new value, if present and well-formed
    pub fn new_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.new_value
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

struct Inner {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
}

/// Handle to the shared state store.
///
/// Cheap to clone; every clone sees the same data and the same change feed.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("subscribers", &self.inner.changes.receiver_count())
            .finish()
    }
}

impl StateStore {
    /// Open or create a persistent store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened state store");
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::run_migrations(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                changes,
            }),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .conn
            .lock()
            .map_err(|_| Error::Storage("state store lock poisoned".to_string()))
    }

    // ============================================
    // Core contract
    // ============================================

    /// Read the given keys. Missing keys are absent from the result.
    pub fn get<K: AsRef<str>>(&self, keys: &[K]) -> Result<Record> {
        let conn = self.conn()?;
        let mut record = Record::new();
        for key in keys {
            if let Some(value) = read_value(&conn, key.as_ref())? {
                record.insert(key.as_ref().to_string(), value);
            }
        }
        Ok(record)
    }

    /// Read a single key
    pub fn get_one(&self, key: impl AsRef<str>) -> Result<Option<Value>> {
        let conn = self.conn()?;
        read_value(&conn, key.as_ref())
    }

    /// Write every entry of `record`, then notify subscribers.
    ///
    /// Keys are not written atomically: if one fails, the keys already
    /// written stay written and are still notified before the error returns.
    pub fn set(&self, record: Record) -> Result<()> {
        let mut changes = Vec::with_capacity(record.len());
        let outcome = self.conn().and_then(|conn| {
            let now = Utc::now().to_rfc3339();
            for (key, value) in record {
                changes.push(write_value(&conn, key, value, &now)?);
            }
            Ok(())
        });

        self.notify(changes);
        outcome
    }

    /// Delete the given keys, then notify subscribers of the ones that existed.
    pub fn remove<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        let mut changes = Vec::new();
        {
            let conn = self.conn()?;
            for key in keys {
                let key = key.as_ref();
                if let Some(old_value) = read_value(&conn, key)? {
                    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                    changes.push(StoreChange {
                        key: key.to_string(),
                        old_value: Some(old_value),
                        new_value: None,
                    });
                }
            }
        }

        self.notify(changes);
        Ok(())
    }

    /// Subscribe to every subsequent write
    pub fn subscribe(&self) -> StoreSubscription {
        StoreSubscription {
            rx: self.inner.changes.subscribe(),
        }
    }

    fn notify(&self, changes: Vec<StoreChange>) {
        for change in changes {
            tracing::trace!(key = %change.key, removed = change.new_value.is_none(), "Store change");
            // No receivers is not an error: nobody is listening yet.
            let _ = self.inner.changes.send(change);
        }
    }

    // ============================================
    // Typed helpers
    // ============================================

    /// Read and decode a well-known key
    pub fn get_as<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>> {
        match self.get_one(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a well-known key
    pub fn set_value<T: Serialize>(&self, key: StoreKey, value: &T) -> Result<()> {
        let mut record = Record::new();
        record.insert(key.as_str().to_string(), serde_json::to_value(value)?);
        self.set(record)
    }

    pub fn current_video(&self) -> Result<Option<VideoContext>> {
        self.get_as(StoreKey::CurrentVideoInfo)
    }

    /// The published captions, but only if they belong to `video_id`
    pub fn captions_for(&self, video_id: &str) -> Result<Option<CaptionSet>> {
        let set: Option<CaptionSet> = self.get_as(StoreKey::CurrentSubtitles)?;
        Ok(set.filter(|s| s.matches(video_id)))
    }

    pub fn chat_mode(&self) -> Result<ChatMode> {
        Ok(self.get_as(StoreKey::ChatMode)?.unwrap_or_default())
    }

    pub fn chat_history(&self) -> Result<Vec<Message>> {
        Ok(self.get_as(StoreKey::ChatHistory)?.unwrap_or_default())
    }

    /// Read a string-valued key, treating empty strings as missing
    pub fn get_string(&self, key: StoreKey) -> Result<Option<String>> {
        let value: Option<String> = self.get_as(key)?;
        Ok(value.filter(|s| !s.trim().is_empty()))
    }

    // ============================================
    // Negative cache
    // ============================================

    /// Video ids known to have no captions
    pub fn negative_cache(&self) -> Result<BTreeSet<String>> {
        Ok(self.get_as(StoreKey::NoSubtitleVideos)?.unwrap_or_default())
    }

    pub fn is_negatively_cached(&self, video_id: &str) -> Result<bool> {
        Ok(self.negative_cache()?.contains(video_id))
    }

    /// Record `video_id` as having no captions. Entries are never evicted.
    ///
    /// Returns `false` if it was already present.
    pub fn add_to_negative_cache(&self, video_id: &str) -> Result<bool> {
        let key = StoreKey::NoSubtitleVideos.as_str();
        // Read-modify-write under one guard so concurrent adds never drop an id.
        let change = {
            let conn = self.conn()?;
            let mut cache: BTreeSet<String> = match read_value(&conn, key)? {
                Some(value) => serde_json::from_value(value)?,
                None => BTreeSet::new(),
            };
            if !cache.insert(video_id.to_string()) {
                return Ok(false);
            }
            let now = Utc::now().to_rfc3339();
            write_value(&conn, key.to_string(), serde_json::to_value(&cache)?, &now)?
        };

        self.notify(vec![change]);
        tracing::info!(video_id, "Added to negative cache");
        Ok(true)
    }
}

fn write_value(conn: &Connection, key: String, value: Value, now: &str) -> Result<StoreChange> {
    let old_value = read_value(conn, &key)?;
    conn.execute(
        r#"
        INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
        params![key, serde_json::to_string(&value)?, now],
    )?;
    Ok(StoreChange {
        key,
        old_value,
        new_value: Some(value),
    })
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Receiving end of the store change feed
pub struct StoreSubscription {
    rx: broadcast::Receiver<StoreChange>,
}

impl StoreSubscription {
    /// Wait for the next change. Returns `None` once the store is gone.
    ///
    /// A subscriber that falls behind skips the missed notifications.
    pub async fn recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store subscriber lagged, notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<StoreChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store subscriber lagged, notifications dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
