//! The set of areas the player has uncovered.
//!
//! Two samples count as the same area when their latitude and longitude each
//! differ by less than `epsilon` degrees (1e-4, roughly 11m at the equator).
//! This is a per-axis box test on raw degrees, not a great-circle distance;
//! east-west boxes get narrower towards the poles.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::geo::GeoPoint;

/// Default dedup tolerance in degrees
pub const DEFAULT_EPSILON: f64 = 1e-4;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

/// One uncovered spot. Wire form is `{"lat": .., "lng": .., "radius": ..}`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevealedArea {
    pub lat: f64,
    pub lng: f64,
    /// Reveal radius in meters; `None` means "use the configured default"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl RevealedArea {
    pub fn new(point: GeoPoint, radius: Option<f64>) -> Self {
        Self {
            lat: point.latitude,
            lng: point.longitude,
            radius,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    fn is_valid(&self) -> bool {
        self.point().is_finite() && self.radius.map_or(true, |r| r.is_finite() && r >= 0.0)
    }
}

/// Result of [`RevealedAreaSet::try_insert`]
#[derive(Debug)]
pub struct Insertion<'a> {
    /// Whether the set grew
    pub inserted: bool,
    pub set: &'a RevealedAreaSet,
}

/// Insertion-ordered areas with no two members within `epsilon` of each other.
#[derive(Clone, Debug, PartialEq)]
pub struct RevealedAreaSet {
    areas: Vec<RevealedArea>,
    epsilon: f64,
}

impl Default for RevealedAreaSet {
    fn default() -> Self {
        Self::new(DEFAULT_EPSILON)
    }
}

impl RevealedAreaSet {
    pub fn new(epsilon: f64) -> Self {
        Self {
            areas: Vec::new(),
            epsilon,
        }
    }

    /// Build a set from stored records, keeping the first of any near-duplicates
    /// and dropping records with non-finite values.
    pub fn from_areas(areas: impl IntoIterator<Item = RevealedArea>, epsilon: f64) -> Self {
        let mut set = Self::new(epsilon);
        for area in areas {
            set.try_insert_area(area);
        }
        set
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        self.areas
            .iter()
            .any(|a| a.point().approx_eq(&point, self.epsilon))
    }

    /// Insert `point` unless an existing member lies within epsilon on both axes.
    /// Non-finite coordinates or radii are never inserted.
    pub fn try_insert(&mut self, point: GeoPoint, radius: Option<f64>) -> Insertion<'_> {
        let inserted = self.try_insert_area(RevealedArea::new(point, radius));
        Insertion { inserted, set: self }
    }

    fn try_insert_area(&mut self, area: RevealedArea) -> bool {
        if !area.is_valid() || self.contains(area.point()) {
            return false;
        }
        self.areas.push(area);
        true
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn iter(&self) -> impl Iterator<Item = &RevealedArea> {
        self.areas.iter()
    }

    pub fn as_slice(&self) -> &[RevealedArea] {
        &self.areas
    }

    /// Serialize to the JSON array stored under the `revealedAreas` key.
    pub fn to_snapshot(&self) -> String {
        // A Vec of plain f64 structs cannot fail to serialize.
        serde_json::to_string(&self.areas).unwrap_or_else(|_| "[]".to_string())
    }

    /// Strict parse of a `revealedAreas` snapshot.
    pub fn parse_snapshot(snapshot: &str, epsilon: f64) -> Result<Self, DataError> {
        let areas: Vec<RevealedArea> = serde_json::from_str(snapshot)
            .map_err(|e| DataError::MalformedSnapshot(e.to_string()))?;
        Ok(Self::from_areas(areas, epsilon))
    }

    /// Lenient restore: a missing or malformed snapshot yields an empty set.
    pub fn restore(snapshot: Option<&str>, epsilon: f64) -> Self {
        match snapshot {
            None => Self::new(epsilon),
            Some(text) => Self::parse_snapshot(text, epsilon).unwrap_or_else(|e| {
                warn!("ignoring revealed areas snapshot: {}", e);
                Self::new(epsilon)
            }),
        }
    }
}

impl<'a> IntoIterator for &'a RevealedAreaSet {
    type Item = &'a RevealedArea;
    type IntoIter = std::slice::Iter<'a, RevealedArea>;

    fn into_iter(self) -> Self::IntoIter {
        self.areas.iter()
    }
}
