//! Local progress snapshot.
//!
//! A small string key-value store persisted as a JSON object. Progress lives
//! under two keys: `revealedAreas` (a JSON array) and `points` (a decimal
//! string). The file is read once at startup and rewritten on every change.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::revealed::RevealedAreaSet;

pub const REVEALED_AREAS_KEY: &str = "revealedAreas";
pub const POINTS_KEY: &str = "points";

/// String key-value snapshot, optionally backed by a file.
#[derive(Debug, Default)]
pub struct LocalSnapshot {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl LocalSnapshot {
    /// Snapshot kept only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed snapshot. A missing or unreadable file starts empty.
    pub fn open(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("discarding malformed snapshot {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("could not read snapshot {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    /// Revealed areas and score stored in this snapshot.
    ///
    /// Missing or malformed values come back as an empty set and zero points.
    pub fn load_progress(&self, epsilon: f64) -> (RevealedAreaSet, u64) {
        let areas = RevealedAreaSet::restore(self.get(REVEALED_AREAS_KEY), epsilon);
        let points = self
            .get(POINTS_KEY)
            .and_then(|p| p.trim().parse::<u64>().ok())
            .unwrap_or(0);
        (areas, points)
    }

    /// Record progress and flush to disk.
    pub fn store_progress(&mut self, areas: &RevealedAreaSet, points: u64) -> io::Result<()> {
        self.set(REVEALED_AREAS_KEY, areas.to_snapshot());
        self.set(POINTS_KEY, points.to_string());
        self.flush()
    }

    fn flush(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.entries).map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("Serialization failed: {}", e))
        })?;
        fs::write(path, text)
    }
}
