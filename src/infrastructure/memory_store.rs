//! # In-Memory Progress Store & Document Sink
//!
//! Store-backend stand-ins for tests and single-process runs. The progress
//! store mirrors the semantics the orchestration layer relies on: atomic
//! increments (one lock, no read-modify-write visible to callers), hash
//! fields, and per-key TTL with lazy expiry on read.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::crawl::ports::{DocumentSink, ProgressStore, SinkError, StoreError};
use crate::domain::types::{DocumentKind, PartitionKey};

#[derive(Debug, Clone)]
enum StoredValue {
    Plain(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.retain(|_, entry| !entry.expired());
        f(&mut entries)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Hash(HashMap::new()),
                expires_at: None,
            });
            let StoredValue::Hash(hash) = &mut entry.value else {
                return Err(StoreError::Backend(format!("{key} is not a hash")));
            };
            for (field, value) in fields {
                hash.insert((*field).to_string(), value.clone());
            }
            Ok(())
        })
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: StoredValue::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(StoreError::Backend(format!("{key} is not a hash"))),
            None => Ok(HashMap::new()),
        })
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Hash(HashMap::new()),
                expires_at: None,
            });
            let StoredValue::Hash(hash) = &mut entry.value else {
                return Err(StoreError::Backend(format!("{key} is not a hash")));
            };
            let current: i64 = match hash.get(field) {
                Some(raw) => raw.parse().map_err(|_| StoreError::NotANumber {
                    key: format!("{key}.{field}"),
                })?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: StoredValue::Plain("0".to_string()),
                expires_at: None,
            });
            let StoredValue::Plain(raw) = &mut entry.value else {
                return Err(StoreError::Backend(format!("{key} is not a counter")));
            };
            let current: i64 = raw.parse().map_err(|_| StoreError::NotANumber {
                key: key.to_string(),
            })?;
            let next = current + delta;
            *raw = next.to_string();
            Ok(next)
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: StoredValue::Plain(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(_) => Err(StoreError::Backend(format!("{key} is not a plain value"))),
            None => Ok(None),
        })
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Plain(value),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }
}

/// In-memory [`DocumentSink`] with the same idempotent-overwrite semantics
/// as the real store.
#[derive(Default)]
pub struct InMemoryDocumentSink {
    documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryDocumentSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.lock().expect("sink lock poisoned").len()
    }

    #[must_use]
    pub fn document(&self, key: &PartitionKey, kind: DocumentKind) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .expect("sink lock poisoned")
            .get(&format!("{}/{}", kind.as_str(), key))
            .cloned()
    }
}

#[async_trait]
impl DocumentSink for InMemoryDocumentSink {
    async fn put(
        &self,
        key: &PartitionKey,
        kind: DocumentKind,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        self.documents
            .lock()
            .map_err(|_| SinkError::Backend("sink lock poisoned".to_string()))?
            .insert(format!("{}/{}", kind.as_str(), key), payload.clone());
        Ok(())
    }
}
