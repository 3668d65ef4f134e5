//! Remote progress sync and leaderboard.
//!
//! Progress is loaded once when a sign-in is detected and saved, fire and
//! forget, after every change while signed in. Load failures fall back to
//! empty progress; save failures are logged and dropped.
//!
//! Each save carries the revision of the progress it holds. Saves for one
//! user are written one at a time, and a save whose revision is not newer
//! than the last one written is dropped, so the remote copy never goes back.

pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::UserSession;
use crate::revealed::{RevealedArea, RevealedAreaSet};

pub use http::{HttpStore, HttpStoreConfig};
pub use memory::MemoryStore;

/// A remote document: a JSON object
pub type Document = Map<String, Value>;

const FIELD_AREAS: &str = "revealedAreas";
const FIELD_SCORE: &str = "score";
const FIELD_NAME: &str = "name";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("user is not signed in")]
    NotSignedIn,
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("invalid progress data: {0}")]
    InvalidData(String),
}

/// Remote document database, keyed by collection and document id.
pub trait RemoteStore: Send + Sync + 'static {
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, SyncError>> + Send;

    /// Write a document. With `merge`, fields not present in `doc` are kept.
    fn set(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
        merge: bool,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Documents with the highest `order_by` values, descending.
    fn query_top(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Document>, SyncError>> + Send;
}

/// Progress as stored remotely for one user
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PersistedProgress {
    pub revealed_areas: RevealedAreaSet,
    pub score: u64,
}

impl PersistedProgress {
    pub fn new(revealed_areas: RevealedAreaSet, score: u64) -> Self {
        Self { revealed_areas, score }
    }

    pub fn empty(epsilon: f64) -> Self {
        Self::new(RevealedAreaSet::new(epsilon), 0)
    }

    /// Read a stored document. Missing or malformed fields use defaults.
    fn from_document(doc: &Document, epsilon: f64) -> Self {
        let revealed_areas = match doc.get(FIELD_AREAS) {
            None | Some(Value::Null) => RevealedAreaSet::new(epsilon),
            Some(value) => match serde_json::from_value::<Vec<RevealedArea>>(value.clone()) {
                Ok(areas) => RevealedAreaSet::from_areas(areas, epsilon),
                Err(e) => {
                    warn!("ignoring stored revealed areas: {}", e);
                    RevealedAreaSet::new(epsilon)
                }
            },
        };
        let score = doc.get(FIELD_SCORE).and_then(Value::as_u64).unwrap_or(0);
        Self { revealed_areas, score }
    }

    fn to_document(&self, display_name: Option<&str>) -> Result<Document, SyncError> {
        if self.revealed_areas.iter().any(|a| !a.point().is_finite()) {
            return Err(SyncError::InvalidData("non-finite coordinate".to_string()));
        }
        let areas = serde_json::to_value(self.revealed_areas.as_slice())
            .map_err(|e| SyncError::InvalidData(e.to_string()))?;
        let mut doc = Document::new();
        doc.insert(FIELD_AREAS.to_string(), areas);
        doc.insert(FIELD_SCORE.to_string(), Value::from(self.score));
        if let Some(name) = display_name {
            doc.insert(FIELD_NAME.to_string(), Value::from(name));
        }
        Ok(doc)
    }
}

/// One leaderboard row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub name: Option<String>,
    pub score: u64,
}

/// Loads and saves progress through a [`RemoteStore`].
pub struct ProgressSync<R> {
    store: Arc<R>,
    collection: String,
    epsilon: f64,
    /// Last revision written per uid. Held across the remote write.
    written: Arc<AsyncMutex<HashMap<String, u64>>>,
}

impl<R> Clone for ProgressSync<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
            epsilon: self.epsilon,
            written: Arc::clone(&self.written),
        }
    }
}

impl<R: RemoteStore> ProgressSync<R> {
    pub fn new(store: Arc<R>, collection: impl Into<String>, epsilon: f64) -> Self {
        Self {
            store,
            collection: collection.into(),
            epsilon,
            written: Arc::default(),
        }
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    /// Stored progress for `uid`, `None` if the user has no document yet.
    pub async fn fetch(&self, uid: &str) -> Result<Option<PersistedProgress>, SyncError> {
        let doc = self.store.get(&self.collection, uid).await?;
        Ok(doc.map(|d| PersistedProgress::from_document(&d, self.epsilon)))
    }

    /// Progress to resume from after sign-in. Never fails: a missing document
    /// or an unreachable store both give empty progress.
    pub async fn load_on_sign_in(&self, uid: &str) -> PersistedProgress {
        match self.fetch(uid).await {
            Ok(Some(progress)) => {
                info!(
                    "loaded progress for {}: {} areas, {} points",
                    uid,
                    progress.revealed_areas.len(),
                    progress.score
                );
                progress
            }
            Ok(None) => {
                warn!("no stored progress for {}, starting fresh", uid);
                PersistedProgress::empty(self.epsilon)
            }
            Err(e) => {
                error!("failed to load progress for {}: {}", uid, e);
                PersistedProgress::empty(self.epsilon)
            }
        }
    }

    /// Merge `progress` into the signed-in user's document.
    pub async fn save(
        &self,
        session: &UserSession,
        progress: &PersistedProgress,
    ) -> Result<(), SyncError> {
        let uid = session.uid.as_deref().ok_or(SyncError::NotSignedIn)?;
        let doc = progress.to_document(session.display_name.as_deref())?;
        self.store.set(&self.collection, uid, doc, true).await
    }

    /// Save `progress` at `revision`, after any earlier save for the same user
    /// has finished. Returns `false` without writing when a revision at least
    /// as new was already written.
    pub async fn save_revision(
        &self,
        session: &UserSession,
        revision: u64,
        progress: &PersistedProgress,
    ) -> Result<bool, SyncError> {
        let uid = session.uid.as_deref().ok_or(SyncError::NotSignedIn)?;
        let mut written = self.written.lock().await;
        if written.get(uid).is_some_and(|&last| last >= revision) {
            debug!("dropping stale save of revision {} for {}", revision, uid);
            return Ok(false);
        }
        self.save(session, progress).await?;
        written.insert(uid.to_string(), revision);
        Ok(true)
    }

    /// Fire-and-forget [`ProgressSync::save_revision`]. Does nothing while
    /// signed out; errors are logged.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn save_on_change(
        &self,
        session: &UserSession,
        revision: u64,
        progress: PersistedProgress,
    ) -> Option<JoinHandle<()>> {
        if !session.is_signed_in() {
            debug!("signed out, skipping remote save");
            return None;
        }
        let sync = self.clone();
        let session = session.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = sync.save_revision(&session, revision, &progress).await {
                error!("failed to save progress: {}", e);
            }
        }))
    }

    /// Top players by score.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, SyncError> {
        let docs = self.store.query_top(&self.collection, FIELD_SCORE, limit).await?;
        Ok(docs
            .iter()
            .map(|doc| LeaderboardEntry {
                name: doc.get(FIELD_NAME).and_then(Value::as_str).map(str::to_string),
                score: doc.get(FIELD_SCORE).and_then(Value::as_u64).unwrap_or(0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::geo::GeoPoint;
    use crate::revealed::DEFAULT_EPSILON;

    fn sync() -> ProgressSync<MemoryStore> {
        ProgressSync::new(Arc::new(MemoryStore::new()), "users", DEFAULT_EPSILON)
    }

    fn signed_in(uid: &str, name: &str) -> UserSession {
        UserSession {
            uid: Some(uid.to_string()),
            display_name: Some(name.to_string()),
        }
    }

    fn progress(points: &[(f64, f64)], score: u64) -> PersistedProgress {
        let mut set = RevealedAreaSet::default();
        for &(lat, lng) in points {
            set.try_insert(GeoPoint::new(lat, lng), Some(50.0));
        }
        PersistedProgress::new(set, score)
    }

    #[tokio::test]
    async fn test_load_without_document_is_empty() {
        let loaded = sync().load_on_sign_in("ghost").await;
        assert!(loaded.revealed_areas.is_empty());
        assert_eq!(loaded.score, 0);
    }

    #[tokio::test]
    async fn test_load_when_offline_is_empty() {
        let sync = sync();
        sync.save(&signed_in("u1", "Ann"), &progress(&[(1.0, 1.0)], 10)).await.unwrap();
        sync.store().set_offline(true);
        assert_eq!(sync.load_on_sign_in("u1").await, PersistedProgress::empty(DEFAULT_EPSILON));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let sync = sync();
        let saved = progress(&[(50.4501, 30.5234), (50.4601, 30.5334)], 20);
        sync.save(&signed_in("u1", "Ann"), &saved).await.unwrap();
        assert_eq!(sync.load_on_sign_in("u1").await, saved);
    }

    #[tokio::test]
    async fn test_save_merges_existing_fields() {
        let sync = sync();
        let mut extra = Document::new();
        extra.insert("createdAt".to_string(), Value::from("2024-09-01"));
        sync.store().set("users", "u1", extra, false).await.unwrap();

        sync.save(&signed_in("u1", "Ann"), &progress(&[(1.0, 1.0)], 10)).await.unwrap();
        let doc = sync.store().get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.get("createdAt"), Some(&Value::from("2024-09-01")));
        assert_eq!(doc.get("score"), Some(&Value::from(10u64)));
        assert_eq!(doc.get("name"), Some(&Value::from("Ann")));
    }

    #[tokio::test]
    async fn test_save_on_change_skips_when_signed_out() {
        let sync = sync();
        let handle = sync.save_on_change(&UserSession::default(), 1, progress(&[(1.0, 1.0)], 10));
        assert!(handle.is_none());
        assert_eq!(sync.store().write_count(), 0);
        assert_eq!(
            sync.save(&UserSession::default(), &PersistedProgress::default()).await,
            Err(SyncError::NotSignedIn)
        );
    }

    #[tokio::test]
    async fn test_save_on_change_swallows_errors() {
        let sync = sync();
        sync.store().set_offline(true);
        let handle = sync
            .save_on_change(&signed_in("u1", "Ann"), 1, progress(&[(1.0, 1.0)], 10))
            .unwrap();
        handle.await.unwrap();
        sync.store().set_offline(false);
        assert!(sync.fetch("u1").await.unwrap().is_none());

        // The failed revision was never recorded, so it can be retried.
        assert!(sync.save_revision(&signed_in("u1", "Ann"), 1, &progress(&[(1.0, 1.0)], 10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_older_revision_is_dropped() {
        let sync = sync();
        let ann = signed_in("u1", "Ann");
        let newer = progress(&[(1.0, 1.0), (2.0, 2.0)], 20);
        assert!(sync.save_revision(&ann, 2, &newer).await.unwrap());
        assert!(!sync.save_revision(&ann, 1, &progress(&[(1.0, 1.0)], 10)).await.unwrap());
        assert!(!sync.save_revision(&ann, 2, &newer).await.unwrap());
        assert_eq!(sync.fetch("u1").await.unwrap().unwrap(), newer);
        assert_eq!(sync.store().write_count(), 1);

        // Revisions are tracked per user.
        assert!(sync.save_revision(&signed_in("u2", "Bo"), 1, &newer).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_save_is_not_overtaken() {
        let sync = sync();
        let ann = signed_in("u1", "Ann");
        sync.store().delay_next_write(Duration::from_secs(3));
        let first = sync.save_on_change(&ann, 1, progress(&[(1.0, 1.0)], 10)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = sync
            .save_on_change(&ann, 2, progress(&[(1.0, 1.0), (2.0, 2.0)], 20))
            .unwrap();
        first.await.unwrap();
        second.await.unwrap();

        let stored = sync.fetch("u1").await.unwrap().unwrap();
        assert_eq!(stored.score, 20);
        assert_eq!(stored.revealed_areas.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_fields_fall_back() {
        let sync = sync();
        let mut doc = Document::new();
        doc.insert("revealedAreas".to_string(), Value::from("garbage"));
        doc.insert("score".to_string(), Value::from(40u64));
        sync.store().set("users", "u1", doc, false).await.unwrap();
        let loaded = sync.load_on_sign_in("u1").await;
        assert!(loaded.revealed_areas.is_empty());
        assert_eq!(loaded.score, 40);
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_score() {
        let sync = sync();
        for (uid, score) in [("a", 30), ("b", 90), ("c", 10), ("d", 60), ("e", 50), ("f", 70)] {
            sync.save(&signed_in(uid, &uid.to_uppercase()), &progress(&[], score)).await.unwrap();
        }
        let board = sync.leaderboard(5).await.unwrap();
        let scores: Vec<u64> = board.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![90, 70, 60, 50, 30]);
        assert_eq!(board[0].name.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_leaderboard_surfaces_errors() {
        let sync = sync();
        sync.store().set_offline(true);
        assert!(matches!(sync.leaderboard(5).await, Err(SyncError::RemoteUnavailable(_))));
    }
}
