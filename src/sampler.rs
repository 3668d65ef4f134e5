//! Position sources.
//!
//! A sampler answers one position request at a time. It never retries on its
//! own; the scheduler decides when to ask again.

use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::geo::GeoPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("user denied geolocation permission")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("geolocation request timed out")]
    Timeout,
}

/// Something that can report the device position.
pub trait GeoSampler: Send + Sync {
    fn sample(&self) -> impl Future<Output = Result<GeoPoint, GeoError>> + Send;
}

/// Request options passed to the positioning backend
#[derive(Clone, Copy, Debug)]
pub struct SamplerOptions {
    pub high_accuracy: bool,
    pub timeout: Option<Duration>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: None,
        }
    }
}

/// Wraps a sampler so that slow requests fail with [`GeoError::Timeout`].
pub struct TimeoutSampler<S> {
    inner: S,
    timeout: Duration,
}

impl<S: GeoSampler> TimeoutSampler<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<S: GeoSampler> GeoSampler for TimeoutSampler<S> {
    async fn sample(&self) -> Result<GeoPoint, GeoError> {
        match tokio::time::timeout(self.timeout, self.inner.sample()).await {
            Ok(result) => result,
            Err(_) => Err(GeoError::Timeout),
        }
    }
}

/// Always reports the same position.
#[derive(Clone, Copy, Debug)]
pub struct FixedSampler(pub GeoPoint);

impl GeoSampler for FixedSampler {
    async fn sample(&self) -> Result<GeoPoint, GeoError> {
        Ok(self.0)
    }
}

#[derive(Deserialize)]
struct TrackPoint {
    lat: f64,
    lng: f64,
}

/// Replays a recorded sequence of fixes and errors, then reports
/// [`GeoError::PositionUnavailable`].
#[derive(Debug, Default)]
pub struct TrackSampler {
    remaining: Mutex<VecDeque<Result<GeoPoint, GeoError>>>,
}

impl TrackSampler {
    pub fn new(points: impl IntoIterator<Item = GeoPoint>) -> Self {
        Self::from_results(points.into_iter().map(Ok))
    }

    pub fn from_results(results: impl IntoIterator<Item = Result<GeoPoint, GeoError>>) -> Self {
        Self {
            remaining: Mutex::new(results.into_iter().collect()),
        }
    }

    /// Load a JSON track: `[{"lat": .., "lng": ..}, ...]`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let points: Vec<TrackPoint> = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(points.into_iter().map(|p| GeoPoint::new(p.lat, p.lng))))
    }

    pub fn remaining(&self) -> usize {
        self.remaining.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl GeoSampler for TrackSampler {
    async fn sample(&self) -> Result<GeoPoint, GeoError> {
        let next = self
            .remaining
            .lock()
            .map_err(|_| GeoError::PositionUnavailable)?
            .pop_front();
        next.unwrap_or(Err(GeoError::PositionUnavailable))
    }
}

/// Seeded random walk, for demos and profiling.
pub struct RandomWalkSampler {
    state: Mutex<(ChaCha8Rng, GeoPoint)>,
    step_degrees: f64,
}

impl RandomWalkSampler {
    pub fn new(start: GeoPoint, step_degrees: f64, seed: u64) -> Self {
        Self {
            state: Mutex::new((ChaCha8Rng::seed_from_u64(seed), start)),
            step_degrees,
        }
    }
}

impl GeoSampler for RandomWalkSampler {
    async fn sample(&self) -> Result<GeoPoint, GeoError> {
        let mut guard = self.state.lock().map_err(|_| GeoError::PositionUnavailable)?;
        let (rng, pos) = &mut *guard;
        let dlat = rng.gen_range(-1.0..=1.0) * self.step_degrees;
        let dlng = rng.gen_range(-1.0..=1.0) * self.step_degrees;
        *pos = GeoPoint::new(
            (pos.latitude + dlat).clamp(-85.0, 85.0),
            pos.longitude + dlng,
        );
        Ok(*pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverSampler;

    impl GeoSampler for NeverSampler {
        async fn sample(&self) -> Result<GeoPoint, GeoError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_track_replays_then_fails() {
        let sampler = TrackSampler::from_results([
            Ok(GeoPoint::new(1.0, 2.0)),
            Err(GeoError::PermissionDenied),
        ]);
        assert_eq!(sampler.sample().await, Ok(GeoPoint::new(1.0, 2.0)));
        assert_eq!(sampler.sample().await, Err(GeoError::PermissionDenied));
        assert_eq!(sampler.sample().await, Err(GeoError::PositionUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_sampler() {
        let sampler = TimeoutSampler::new(NeverSampler, Duration::from_secs(5));
        assert_eq!(sampler.sample().await, Err(GeoError::Timeout));

        let fixed = TimeoutSampler::new(FixedSampler(GeoPoint::new(3.0, 4.0)), Duration::from_secs(5));
        assert_eq!(fixed.sample().await, Ok(GeoPoint::new(3.0, 4.0)));
    }

    #[tokio::test]
    async fn test_random_walk_is_seeded() {
        let a = RandomWalkSampler::new(GeoPoint::new(50.0, 30.0), 0.001, 7);
        let b = RandomWalkSampler::new(GeoPoint::new(50.0, 30.0), 0.001, 7);
        for _ in 0..10 {
            let pa = a.sample().await.unwrap();
            let pb = b.sample().await.unwrap();
            assert_eq!(pa, pb);
            assert!((pa.latitude - 50.0).abs() <= 0.0101);
        }
    }

    #[test]
    fn test_load_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.json");
        fs::write(&path, r#"[{"lat": 50.45, "lng": 30.52}, {"lat": 50.46, "lng": 30.53}]"#).unwrap();
        let sampler = TrackSampler::load(&path).unwrap();
        assert_eq!(sampler.remaining(), 2);
    }
}
