//! Game state and the sample-and-update pipeline.
//!
//! The explorer is the single writer of the revealed areas and the score.
//! Every accepted sample is written to the local snapshot straight away and
//! pushed to the remote store in the background while signed in.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthError, AuthProvider, DeviceClass, UserIdentity, UserSession};
use crate::config::GameConfig;
use crate::geo::GeoPoint;
use crate::revealed::RevealedAreaSet;
use crate::sampler::{GeoError, GeoSampler};
use crate::scheduler::UpdatePipeline;
use crate::scoring::ScoringPolicy;
use crate::snapshot::LocalSnapshot;
use crate::sync::{PersistedProgress, ProgressSync, RemoteStore, SyncError};

/// Everything the player has accumulated in this session
#[derive(Clone, Debug, PartialEq)]
pub struct GameState {
    pub areas: RevealedAreaSet,
    pub score: u64,
    pub last_position: Option<GeoPoint>,
    /// Whether the last sample moved away from the one before it
    pub walking: bool,
    /// Reveal radius (meters) recorded with new areas
    pub radius_m: f64,
    pub session: UserSession,
    /// Bumped whenever the areas or the score change
    pub revision: u64,
}

/// What one update did
#[derive(Debug)]
pub struct StepOutcome {
    pub point: GeoPoint,
    pub inserted: bool,
    pub score: u64,
    pub areas: usize,
    /// Background remote save, present when a new area was saved while signed in
    pub pending_save: Option<JoinHandle<()>>,
}

pub struct Explorer<S, R> {
    config: GameConfig,
    sampler: S,
    scoring: ScoringPolicy,
    sync: ProgressSync<R>,
    state: Mutex<GameState>,
    local: Mutex<LocalSnapshot>,
}

impl<S: GeoSampler, R: RemoteStore> Explorer<S, R> {
    /// Build the explorer, resuming from whatever the local snapshot holds.
    pub fn new(config: GameConfig, sampler: S, sync: ProgressSync<R>, local: LocalSnapshot) -> Self {
        let (areas, score) = local.load_progress(config.epsilon_degrees);
        if !areas.is_empty() {
            info!("resumed {} revealed areas, {} points", areas.len(), score);
        }
        let state = GameState {
            areas,
            score,
            last_position: None,
            walking: false,
            radius_m: config.clamp_radius(config.base_radius_m),
            session: UserSession::default(),
            revision: 0,
        };
        Self {
            scoring: ScoringPolicy::new(config.points_per_area),
            config,
            sampler,
            sync,
            state: Mutex::new(state),
            local: Mutex::new(local),
        }
    }

    fn state(&self) -> MutexGuard<'_, GameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn sync(&self) -> &ProgressSync<R> {
        &self.sync
    }

    /// Copy of the current state, for rendering and display.
    pub fn snapshot(&self) -> GameState {
        self.state().clone()
    }

    pub fn progress(&self) -> PersistedProgress {
        let state = self.state();
        PersistedProgress::new(state.areas.clone(), state.score)
    }

    /// Change the reveal radius for future areas, clamped to the slider range.
    pub fn set_radius(&self, radius_m: f64) -> f64 {
        let radius = self.config.clamp_radius(radius_m);
        self.state().radius_m = radius;
        radius
    }

    /// Sample the position once and fold it into the game state.
    pub async fn update_position(&self) -> Result<StepOutcome, GeoError> {
        let point = self.sampler.sample().await?;
        Ok(self.apply_sample(point))
    }

    /// Record a position fix: dedup, score, persist.
    ///
    /// Non-finite fixes are ignored. The local snapshot is written before the
    /// state lock is released, so snapshots land in revision order.
    pub fn apply_sample(&self, point: GeoPoint) -> StepOutcome {
        let mut state = self.state();
        let unchanged = |state: &GameState| StepOutcome {
            point,
            inserted: false,
            score: state.score,
            areas: state.areas.len(),
            pending_save: None,
        };

        if !point.is_finite() {
            warn!("ignoring non-finite position ({}, {})", point.latitude, point.longitude);
            return unchanged(&*state);
        }

        let moved = state
            .last_position
            .is_some_and(|prev| !prev.approx_eq(&point, self.config.epsilon_degrees));
        state.walking = moved;
        state.last_position = Some(point);

        let radius = state.radius_m;
        if !state.areas.try_insert(point, Some(radius)).inserted {
            return unchanged(&*state);
        }
        state.score = self.scoring.on_area_inserted(state.score);
        state.revision += 1;

        let progress = PersistedProgress::new(state.areas.clone(), state.score);
        self.store_local(&progress);
        info!(
            "revealed new area at ({:.5}, {:.5}), score {}",
            point.latitude, point.longitude, progress.score
        );
        let pending_save = self.sync.save_on_change(&state.session, state.revision, progress);

        StepOutcome {
            point,
            inserted: true,
            score: state.score,
            areas: state.areas.len(),
            pending_save,
        }
    }

    fn store_local(&self, progress: &PersistedProgress) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = local.store_progress(&progress.revealed_areas, progress.score) {
            warn!("failed to write local snapshot: {}", e);
        }
    }

    /// Sign in with the flow suited to `device`.
    ///
    /// Returns the new session for a popup sign-in, `None` when a redirect was
    /// started; call [`Explorer::resume_redirect`] after it completes.
    pub async fn sign_in<A: AuthProvider>(
        &self,
        provider: &A,
        device: DeviceClass,
    ) -> Result<Option<UserSession>, AuthError> {
        match auth::sign_in(provider, device).await? {
            Some(identity) => Ok(Some(self.on_signed_in(&identity).await)),
            None => Ok(None),
        }
    }

    /// Finish a redirect sign-in, if one is pending.
    pub async fn resume_redirect<A: AuthProvider>(
        &self,
        provider: &A,
    ) -> Result<Option<UserSession>, AuthError> {
        match provider.redirect_result().await? {
            Some(identity) => Ok(Some(self.on_signed_in(&identity).await)),
            None => Ok(None),
        }
    }

    /// Adopt a signed-in identity and reconcile progress with the remote copy.
    ///
    /// The side with the higher score wins. When the local side wins it is
    /// pushed back so the remote copy catches up.
    pub async fn on_signed_in(&self, identity: &UserIdentity) -> UserSession {
        let session = UserSession::from_identity(identity);
        let remote = self.sync.load_on_sign_in(&identity.uid).await;

        let push = {
            let mut state = self.state();
            state.session = session.clone();
            if remote.score > state.score {
                state.areas = remote.revealed_areas;
                state.score = remote.score;
                state.revision += 1;
                info!("adopted remote progress ({} points)", state.score);
                self.store_local(&PersistedProgress::new(state.areas.clone(), state.score));
                None
            } else if state.score > remote.score || state.areas.len() > remote.revealed_areas.len() {
                Some((state.revision, PersistedProgress::new(state.areas.clone(), state.score)))
            } else {
                None
            }
        };

        if let Some((revision, progress)) = push {
            info!("local progress ahead of remote, pushing {} points", progress.score);
            if let Err(e) = self.sync.save_revision(&session, revision, &progress).await {
                warn!("could not push local progress: {}", e);
            }
        }
        session
    }

    /// Write the current progress remotely once earlier saves have landed.
    /// Returns `false` when that revision was already written.
    pub async fn flush_remote(&self) -> Result<bool, SyncError> {
        let (session, revision, progress) = {
            let state = self.state();
            (
                state.session.clone(),
                state.revision,
                PersistedProgress::new(state.areas.clone(), state.score),
            )
        };
        self.sync.save_revision(&session, revision, &progress).await
    }

    pub fn sign_out(&self) {
        self.state().session.clear();
    }
}

impl<S, R> UpdatePipeline for Explorer<S, R>
where
    S: GeoSampler + 'static,
    R: RemoteStore,
{
    async fn run_update(&self) {
        match self.update_position().await {
            Ok(outcome) if outcome.inserted => {}
            Ok(outcome) => {
                debug!(
                    "position ({:.5}, {:.5}) already revealed",
                    outcome.point.latitude,
                    outcome.point.longitude
                );
            }
            Err(e) => warn!("position update failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth::StaticAuth;
    use crate::sampler::{FixedSampler, TrackSampler};
    use crate::scheduler::UpdateScheduler;
    use crate::snapshot::POINTS_KEY;
    use crate::sync::MemoryStore;

    fn explorer<S: GeoSampler>(sampler: S) -> Explorer<S, MemoryStore> {
        let config = GameConfig::default();
        let sync = ProgressSync::new(Arc::new(MemoryStore::new()), "users", config.epsilon_degrees);
        Explorer::new(config, sampler, sync, LocalSnapshot::in_memory())
    }

    fn ann() -> UserIdentity {
        UserIdentity {
            uid: "u-ann".to_string(),
            display_name: Some("Ann".to_string()),
        }
    }

    #[tokio::test]
    async fn test_duplicate_sample_does_not_score() {
        let game = explorer(TrackSampler::new([
            GeoPoint::new(50.4501, 30.5234),
            GeoPoint::new(50.45011, 30.52341),
            GeoPoint::new(50.4601, 30.5234),
        ]));
        let first = game.update_position().await.unwrap();
        assert!(first.inserted);
        assert_eq!(first.score, 10);

        let second = game.update_position().await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.areas, 1);
        assert_eq!(second.score, 10);
        assert!(!game.snapshot().walking);

        let third = game.update_position().await.unwrap();
        assert_eq!(third.score, 20);
        assert!(game.snapshot().walking);
    }

    #[tokio::test]
    async fn test_non_finite_sample_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let config = GameConfig::default();
        let sync = ProgressSync::new(Arc::new(MemoryStore::new()), "users", config.epsilon_degrees);
        let game = Explorer::new(config.clone(), FixedSampler(GeoPoint::new(1.0, 1.0)), sync.clone(), LocalSnapshot::open(&path));

        assert!(game.apply_sample(GeoPoint::new(1.0, 1.0)).inserted);
        for _ in 0..2 {
            let outcome = game.apply_sample(GeoPoint::new(f64::NAN, f64::NAN));
            assert!(!outcome.inserted);
            assert_eq!(outcome.score, 10);
            assert_eq!(outcome.areas, 1);
        }
        assert_eq!(game.snapshot().last_position, Some(GeoPoint::new(1.0, 1.0)));

        let resumed = Explorer::new(config, FixedSampler(GeoPoint::new(1.0, 1.0)), sync, LocalSnapshot::open(&path));
        assert_eq!(resumed.snapshot().areas.len(), 1);
        assert_eq!(resumed.snapshot().score, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_keeps_newest_progress() {
        let game = explorer(TrackSampler::new([GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)]));
        game.on_signed_in(&ann()).await;
        game.sync().store().delay_next_write(Duration::from_secs(3));

        let first = game.update_position().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = game.update_position().await.unwrap();
        first.pending_save.unwrap().await.unwrap();
        second.pending_save.unwrap().await.unwrap();

        let stored = game.sync().fetch("u-ann").await.unwrap().unwrap();
        assert_eq!(stored.score, 20);
        assert_eq!(stored.revealed_areas.len(), 2);
        assert!(!game.flush_remote().await.unwrap());
    }

    #[tokio::test]
    async fn test_sampler_error_leaves_state() {
        let game = explorer(TrackSampler::from_results([Err(GeoError::PermissionDenied)]));
        assert_eq!(game.update_position().await.unwrap_err(), GeoError::PermissionDenied);
        assert_eq!(game.snapshot().score, 0);
    }

    #[tokio::test]
    async fn test_radius_is_clamped_and_recorded() {
        let game = explorer(FixedSampler(GeoPoint::new(1.0, 1.0)));
        assert_eq!(game.set_radius(500.0), 100.0);
        game.update_position().await.unwrap();
        assert_eq!(game.snapshot().areas.as_slice()[0].radius, Some(100.0));
    }

    #[tokio::test]
    async fn test_local_snapshot_written_on_insert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let config = GameConfig::default();
        let sync = ProgressSync::new(Arc::new(MemoryStore::new()), "users", config.epsilon_degrees);
        let game = Explorer::new(config.clone(), FixedSampler(GeoPoint::new(2.0, 2.0)), sync.clone(), LocalSnapshot::open(&path));
        game.update_position().await.unwrap();

        let reopened = LocalSnapshot::open(&path);
        assert_eq!(reopened.get(POINTS_KEY), Some("10"));

        // A fresh explorer resumes from the same file.
        let resumed = Explorer::new(config, FixedSampler(GeoPoint::new(2.0, 2.0)), sync, reopened);
        assert_eq!(resumed.snapshot().score, 10);
        assert!(!resumed.update_position().await.unwrap().inserted);
    }

    #[tokio::test]
    async fn test_saves_remotely_only_when_signed_in() {
        let game = explorer(TrackSampler::new([GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)]));
        let outcome = game.update_position().await.unwrap();
        assert!(outcome.pending_save.is_none());

        let auth = StaticAuth::succeeding(ann());
        game.sign_in(&auth, DeviceClass::Desktop).await.unwrap();
        let outcome = game.update_position().await.unwrap();
        outcome.pending_save.unwrap().await.unwrap();

        let stored = game.sync().fetch("u-ann").await.unwrap().unwrap();
        assert_eq!(stored.score, 20);
        assert_eq!(stored.revealed_areas.len(), 2);
    }

    #[tokio::test]
    async fn test_sign_in_adopts_richer_remote_progress() {
        let game = explorer(FixedSampler(GeoPoint::new(5.0, 5.0)));
        let mut remote_areas = RevealedAreaSet::default();
        for i in 0..4 {
            remote_areas.try_insert(GeoPoint::new(10.0 + i as f64, 10.0), Some(50.0));
        }
        let session = UserSession::from_identity(&ann());
        game.sync()
            .save(&session, &PersistedProgress::new(remote_areas, 40))
            .await
            .unwrap();

        game.update_position().await.unwrap();
        game.on_signed_in(&ann()).await;
        let state = game.snapshot();
        assert_eq!(state.score, 40);
        assert_eq!(state.areas.len(), 4);
        assert!(state.session.is_signed_in());
    }

    #[tokio::test]
    async fn test_sign_in_pushes_local_progress_when_ahead() {
        let game = explorer(TrackSampler::new([GeoPoint::new(1.0, 1.0), GeoPoint::new(2.0, 2.0)]));
        game.update_position().await.unwrap();
        game.update_position().await.unwrap();
        game.on_signed_in(&ann()).await;
        let stored = game.sync().fetch("u-ann").await.unwrap().unwrap();
        assert_eq!(stored.score, 20);
    }

    #[tokio::test]
    async fn test_redirect_sign_in_completes_later() {
        let game = explorer(FixedSampler(GeoPoint::new(1.0, 1.0)));
        let auth = StaticAuth::succeeding(ann());
        assert_eq!(game.sign_in(&auth, DeviceClass::Mobile).await.unwrap(), None);
        assert!(!game.snapshot().session.is_signed_in());
        let session = game.resume_redirect(&auth).await.unwrap().unwrap();
        assert_eq!(session.display_name.as_deref(), Some("Ann"));
        game.sign_out();
        assert!(!game.snapshot().session.is_signed_in());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_drives_explorer() {
        let track: Vec<GeoPoint> = (0..10).map(|i| GeoPoint::new(50.0 + i as f64 * 0.001, 30.0)).collect();
        let game = Arc::new(explorer(TrackSampler::new(track)));
        let mut scheduler = UpdateScheduler::new(Arc::clone(&game));
        scheduler.start(Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.stop();
        scheduler.manual_trigger().unwrap().await.unwrap();
        assert_eq!(game.snapshot().score, 40);
        assert_eq!(game.snapshot().areas.len(), 4);
    }
}
