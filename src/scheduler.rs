//! Periodic and manual position updates.
//!
//! The scheduler owns a foreground timer and, optionally, a background timer
//! worker that keeps ticking when the foreground is throttled. Both feed the
//! same pipeline through a single-flight guard: a tick that arrives while an
//! update is still running is dropped. Stopping cancels future ticks only; an
//! update already in flight finishes and applies its result.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Depth of the worker channels
const WORKER_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum SchedulerError {
    #[error("update interval must be positive and within the timer range, got {0:?}")]
    InvalidInterval(Duration),
}

/// One sample-and-update pass.
pub trait UpdatePipeline: Send + Sync + 'static {
    fn run_update(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    AutoRunning,
}

/// Messages into the background timer worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerCommand {
    Start { update_interval: Duration },
    Stop,
}

/// Messages out of the background timer worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerMessage {
    UpdatePosition,
}

/// Interval whose first tick is one period from now. `None` for a zero
/// period or one that overflows the clock.
fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let first = Instant::now().checked_add(period)?;
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(ticker)
}

/// Independent timer task speaking the start/stop protocol.
pub struct BackgroundWorker {
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl BackgroundWorker {
    /// Spawn the worker. Ticks arrive on the returned receiver.
    pub fn spawn() -> (Self, mpsc::Receiver<WorkerMessage>) {
        let (command_tx, command_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let task = tokio::spawn(run_worker(command_rx, event_tx));
        (
            Self {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }

    pub async fn send(&self, command: WorkerCommand) {
        // A closed channel means the worker already exited.
        let _ = self.commands.send(command).await;
    }

    /// Queue a command without waiting; false if the queue is full or closed.
    pub fn try_send(&self, command: WorkerCommand) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Stop ticking and end the worker task.
    pub fn terminate(self) {
        let _ = self.commands.try_send(WorkerCommand::Stop);
        self.task.abort();
    }
}

async fn run_worker(
    mut commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerMessage>,
) {
    let mut timer: Option<Interval> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WorkerCommand::Start { update_interval }) => {
                    timer = ticker(update_interval);
                    if timer.is_none() {
                        warn!("background timer ignoring interval {:?}", update_interval);
                    }
                }
                Some(WorkerCommand::Stop) => timer = None,
                None => break,
            },
            _ = next_tick(&mut timer) => {
                if events.send(WorkerMessage::UpdatePosition).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Counters for started and dropped updates
#[derive(Debug, Default)]
pub struct SchedulerStats {
    started: AtomicU64,
    suppressed: AtomicU64,
}

impl SchedulerStats {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::SeqCst)
    }
}

/// State shared between the scheduler and its timer tasks
struct Shared<P> {
    pipeline: Arc<P>,
    in_flight: AtomicBool,
    stats: SchedulerStats,
}

/// Clears the in-flight flag when an update ends, panics and aborts included.
struct InFlight<P>(Arc<Shared<P>>);

impl<P> Drop for InFlight<P> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl<P: UpdatePipeline> Shared<P> {
    /// Start an update unless one is already running.
    fn fire(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.stats.suppressed.fetch_add(1, Ordering::SeqCst);
            debug!("update already in flight, dropping tick");
            return None;
        }
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(self));
        Some(tokio::spawn(async move {
            let guard = guard;
            guard.0.pipeline.run_update().await;
        }))
    }
}

/// Timer tasks that exist only while auto-updating
struct AutoRun {
    foreground: JoinHandle<()>,
    worker: Option<BackgroundWorker>,
    relay: Option<JoinHandle<()>>,
}

impl AutoRun {
    fn cancel(self) {
        self.foreground.abort();
        if let Some(worker) = self.worker {
            worker.terminate();
        }
        if let Some(relay) = self.relay {
            relay.abort();
        }
    }
}

/// Drives the update pipeline on a timer or on demand.
///
/// `start`, `stop` and `manual_trigger` spawn tasks and must be called from
/// within a tokio runtime.
pub struct UpdateScheduler<P> {
    shared: Arc<Shared<P>>,
    background_timer: bool,
    auto: Option<AutoRun>,
}

impl<P: UpdatePipeline> UpdateScheduler<P> {
    pub fn new(pipeline: Arc<P>) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                in_flight: AtomicBool::new(false),
                stats: SchedulerStats::default(),
            }),
            background_timer: false,
            auto: None,
        }
    }

    /// Also run the background timer worker while auto-updating.
    pub fn with_background_timer(mut self, enabled: bool) -> Self {
        self.background_timer = enabled;
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.auto.is_some() {
            SchedulerState::AutoRunning
        } else {
            SchedulerState::Idle
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    pub fn is_update_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Begin updating every `interval`, first tick one interval from now.
    /// Restarts the timers if already running.
    pub fn start(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        let Some(mut timer) = ticker(interval) else {
            return Err(SchedulerError::InvalidInterval(interval));
        };
        self.stop();

        let shared = Arc::clone(&self.shared);
        let foreground = tokio::spawn(async move {
            loop {
                timer.tick().await;
                shared.fire();
            }
        });

        let (worker, relay) = if self.background_timer {
            let (worker, mut ticks) = BackgroundWorker::spawn();
            worker.try_send(WorkerCommand::Start {
                update_interval: interval,
            });
            let shared = Arc::clone(&self.shared);
            let relay = tokio::spawn(async move {
                while let Some(WorkerMessage::UpdatePosition) = ticks.recv().await {
                    shared.fire();
                }
            });
            (Some(worker), Some(relay))
        } else {
            (None, None)
        };

        info!(
            "auto update started every {:?}{}",
            interval,
            if self.background_timer { " (with background timer)" } else { "" }
        );
        self.auto = Some(AutoRun {
            foreground,
            worker,
            relay,
        });
        Ok(())
    }

    /// Stop auto-updating. An update already running is left to finish.
    pub fn stop(&mut self) {
        if let Some(auto) = self.auto.take() {
            auto.cancel();
            info!("auto update stopped");
        }
    }

    /// Run one update now, unless one is already in flight.
    pub fn manual_trigger(&self) -> Option<JoinHandle<()>> {
        self.shared.fire()
    }
}

impl<P> Drop for UpdateScheduler<P> {
    fn drop(&mut self) {
        if let Some(auto) = self.auto.take() {
            auto.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingPipeline {
        runs: AtomicU64,
        busy_for: Duration,
    }

    impl CountingPipeline {
        fn slow(busy_for: Duration) -> Self {
            Self {
                runs: AtomicU64::new(0),
                busy_for,
            }
        }

        fn runs(&self) -> u64 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl UpdatePipeline for CountingPipeline {
        async fn run_update(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.busy_for.is_zero() {
                tokio::time::sleep(self.busy_for).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_and_stop() {
        let pipeline = Arc::new(CountingPipeline::default());
        let mut scheduler = UpdateScheduler::new(Arc::clone(&pipeline));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.start(Duration::from_secs(1)).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::AutoRunning);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(pipeline.runs(), 3);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pipeline.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_zero_interval() {
        let mut scheduler = UpdateScheduler::new(Arc::new(CountingPipeline::default()));
        assert_eq!(
            scheduler.start(Duration::ZERO),
            Err(SchedulerError::InvalidInterval(Duration::ZERO))
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_overflowing_interval() {
        let mut scheduler = UpdateScheduler::new(Arc::new(CountingPipeline::default()));
        assert_eq!(
            scheduler.start(Duration::MAX),
            Err(SchedulerError::InvalidInterval(Duration::MAX))
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[derive(Default)]
    struct PanicsOncePipeline {
        calls: AtomicU64,
    }

    impl UpdatePipeline for PanicsOncePipeline {
        async fn run_update(&self) {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("sampler crashed");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_update_clears_in_flight() {
        let pipeline = Arc::new(PanicsOncePipeline::default());
        let scheduler = UpdateScheduler::new(Arc::clone(&pipeline));
        let crashed = scheduler.manual_trigger().unwrap().await;
        assert!(crashed.unwrap_err().is_panic());
        assert!(!scheduler.is_update_in_flight());

        scheduler.manual_trigger().unwrap().await.unwrap();
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().suppressed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_keeps_state() {
        let pipeline = Arc::new(CountingPipeline::default());
        let scheduler = UpdateScheduler::new(Arc::clone(&pipeline));
        scheduler.manual_trigger().unwrap().await.unwrap();
        assert_eq!(pipeline.runs(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_suppressed_while_in_flight() {
        let pipeline = Arc::new(CountingPipeline::slow(Duration::from_millis(2500)));
        let mut scheduler = UpdateScheduler::new(Arc::clone(&pipeline));
        scheduler.start(Duration::from_secs(1)).unwrap();

        // Updates start at 1s and 4s; ticks at 2s, 3s and 5s are dropped.
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(pipeline.runs(), 2);
        assert_eq!(scheduler.stats().started(), 2);
        assert_eq!(scheduler.stats().suppressed(), 3);
        assert!(scheduler.is_update_in_flight());
        assert!(scheduler.manual_trigger().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_update_finish() {
        let pipeline = Arc::new(CountingPipeline::slow(Duration::from_secs(2)));
        let mut scheduler = UpdateScheduler::new(Arc::clone(&pipeline));
        scheduler.start(Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop();
        assert!(scheduler.is_update_in_flight());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!scheduler.is_update_in_flight());
        assert_eq!(pipeline.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_timer_ticks_are_deduplicated() {
        let pipeline = Arc::new(CountingPipeline::slow(Duration::from_millis(500)));
        let mut scheduler =
            UpdateScheduler::new(Arc::clone(&pipeline)).with_background_timer(true);
        scheduler.start(Duration::from_secs(1)).unwrap();

        // Both timers tick at 1s, 2s and 3s; only one update runs per instant.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(pipeline.runs(), 3);
        assert_eq!(scheduler.stats().suppressed(), 3);

        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(pipeline.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_protocol() {
        let (worker, mut ticks) = BackgroundWorker::spawn();
        worker
            .send(WorkerCommand::Start {
                update_interval: Duration::ZERO,
            })
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ticks.try_recv().is_err());

        worker
            .send(WorkerCommand::Start {
                update_interval: Duration::from_secs(1),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let mut received = 0;
        while let Ok(WorkerMessage::UpdatePosition) = ticks.try_recv() {
            received += 1;
        }
        assert_eq!(received, 3);

        worker.send(WorkerCommand::Stop).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(ticks.try_recv().is_err());

        worker.terminate();
    }
}
