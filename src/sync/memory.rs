//! In-process document store, used offline and in tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicBool, AtomicUsize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::{Document, RemoteStore, SyncError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
    offline: AtomicBool,
    writes: AtomicUsize,
    next_write_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`SyncError::RemoteUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, atomic::Ordering::SeqCst);
    }

    /// Hold the next write for `delay` before applying it.
    pub fn delay_next_write(&self, delay: Duration) {
        *self.next_write_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(atomic::Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(atomic::Ordering::SeqCst) {
            Err(SyncError::RemoteUnavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Document>>>, SyncError> {
        self.collections
            .lock()
            .map_err(|_| SyncError::RemoteUnavailable("store lock poisoned".to_string()))
    }
}

impl RemoteStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, SyncError> {
        self.check_online()?;
        let collections = self.lock()?;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, doc: Document, merge: bool) -> Result<(), SyncError> {
        let delay = self
            .next_write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        let mut collections = self.lock()?;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.get_mut(id) {
            Some(existing) if merge => existing.extend(doc),
            _ => {
                docs.insert(id.to_string(), doc);
            }
        }
        self.writes.fetch_add(1, atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn query_top(&self, collection: &str, order_by: &str, limit: usize) -> Result<Vec<Document>, SyncError> {
        self.check_online()?;
        let collections = self.lock()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        // Documents without the field are left out, as in an ordered query.
        let mut ranked: Vec<(f64, &Document)> = docs
            .values()
            .filter_map(|d| d.get(order_by).and_then(Value::as_f64).map(|v| (v, d)))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        Ok(ranked.into_iter().take(limit).map(|(_, d)| d.clone()).collect())
    }
}
