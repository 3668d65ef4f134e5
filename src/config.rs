//! Configuration for the exploration game.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::GeoPoint;

/// Errors raised while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunable parameters for sampling, scoring, rendering and sync.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Per-axis tolerance (degrees) under which two points count as the same place.
    pub epsilon_degrees: f64,

    /// Points awarded for each newly revealed area.
    pub points_per_area: u64,

    /// Reveal radius (meters) used when an area has none of its own.
    pub base_radius_m: f64,

    /// Lower bound for the reveal radius slider.
    pub min_radius_m: f64,

    /// Upper bound for the reveal radius slider.
    pub max_radius_m: f64,

    /// Alpha of the fog where nothing has been revealed (0.0 - 1.0).
    pub fog_opacity: f32,

    /// Zoom level at which `radius` maps 1:1 onto pixels.
    pub reference_zoom: i32,

    /// Zoom level the map opens at.
    pub default_zoom: i32,

    /// Map centre used before the first position fix.
    pub default_center: GeoPoint,

    /// Seconds between automatic position samples.
    pub update_interval_secs: f64,

    /// Also run the background timer worker while auto-updating.
    pub background_timer: bool,

    /// Number of entries shown on the leaderboard.
    pub leaderboard_limit: usize,

    /// Remote collection holding per-user progress documents.
    pub users_collection: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            epsilon_degrees: 1e-4,
            points_per_area: 10,
            base_radius_m: 50.0,
            min_radius_m: 10.0,
            max_radius_m: 100.0,
            fog_opacity: 0.7,
            reference_zoom: 15,
            default_zoom: 15,
            // Kyiv
            default_center: GeoPoint::new(50.4501, 30.5234),
            update_interval_secs: 1.0,
            background_timer: false,
            leaderboard_limit: 5,
            users_collection: "users".to_string(),
        }
    }
}

impl GameConfig {
    /// Load a config from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the radius range or the intervals meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.min_radius_m, self.max_radius_m);
        if !(min.is_finite() && max.is_finite() && 0.0 <= min && min <= max) {
            return Err(ConfigError::Invalid(format!(
                "radius range {}..{} must be finite, non-negative and ordered",
                min, max
            )));
        }
        if !(self.epsilon_degrees.is_finite() && self.epsilon_degrees >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "epsilon_degrees must be finite and non-negative, got {}",
                self.epsilon_degrees
            )));
        }
        if !(self.update_interval_secs.is_finite() && self.update_interval_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "update_interval_secs must be positive, got {}",
                self.update_interval_secs
            )));
        }
        Ok(())
    }

    /// Clamp a requested reveal radius into the slider range. NaN maps to the
    /// lower bound.
    pub fn clamp_radius(&self, radius_m: f64) -> f64 {
        radius_m.max(self.min_radius_m).min(self.max_radius_m)
    }
}
