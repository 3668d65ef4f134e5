use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use fog_explorer::auth::UserIdentity;
use fog_explorer::config::GameConfig;
use fog_explorer::fog::FogMaskRenderer;
use fog_explorer::game::Explorer;
use fog_explorer::geo::{GeoPoint, PixelSize, Viewport};
use fog_explorer::sampler::{GeoSampler, RandomWalkSampler, TrackSampler};
use fog_explorer::scheduler::UpdateScheduler;
use fog_explorer::snapshot::LocalSnapshot;
use fog_explorer::sync::{HttpStore, HttpStoreConfig, MemoryStore, ProgressSync, RemoteStore};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "fog_explorer")]
#[command(about = "Reveal the map by walking around it")]
struct Args {
    /// JSON config file (missing keys use defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a track (or a random walk) through the auto-update loop
    Simulate {
        /// JSON track of `{lat, lng}` fixes; random walk if omitted
        #[arg(long)]
        track: Option<PathBuf>,

        /// Number of position updates for the random walk
        #[arg(long, default_value = "60")]
        steps: u32,

        /// Random walk step size in degrees
        #[arg(long, default_value = "0.0003")]
        step_degrees: f64,

        /// Random seed (uses random seed if not specified)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Milliseconds between updates (overrides the config interval)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Also run the background timer worker
        #[arg(long)]
        background_timer: bool,

        /// Reveal radius in meters (clamped to the slider range)
        #[arg(long)]
        radius: Option<f64>,

        /// Local progress snapshot
        #[arg(long, default_value = "progress.json")]
        snapshot: PathBuf,

        /// Where to write the final fog mask
        #[arg(short, long, default_value = "fog.png")]
        output: PathBuf,

        /// Document service URL; progress stays in memory if omitted
        #[arg(long)]
        store_url: Option<String>,

        /// Sign in as this user id before walking
        #[arg(long)]
        user: Option<String>,

        /// Display name shown on the leaderboard
        #[arg(long)]
        name: Option<String>,
    },

    /// Render the fog mask stored in a snapshot
    Render {
        #[arg(long, default_value = "progress.json")]
        snapshot: PathBuf,

        #[arg(short, long, default_value = "fog.png")]
        output: PathBuf,

        /// Viewport centre latitude (default: config centre)
        #[arg(long)]
        lat: Option<f64>,

        /// Viewport centre longitude (default: config centre)
        #[arg(long)]
        lng: Option<f64>,

        #[arg(short, long)]
        zoom: Option<i32>,

        #[arg(short = 'W', long, default_value = "800")]
        width: u32,

        #[arg(short = 'H', long, default_value = "600")]
        height: u32,

        /// Fog alpha (overrides the config)
        #[arg(long)]
        opacity: Option<f32>,

        /// Default reveal radius in meters (overrides the config)
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Show the top players
    Leaderboard {
        #[arg(long)]
        store_url: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Summarize a snapshot
    Stats {
        #[arg(long, default_value = "progress.json")]
        snapshot: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match GameConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => GameConfig::default(),
    };

    let result = match args.command {
        Command::Simulate {
            track,
            steps,
            step_degrees,
            seed,
            interval_ms,
            background_timer,
            radius,
            snapshot,
            output,
            store_url,
            user,
            name,
        } => {
            let mut config = config;
            if let Some(ms) = interval_ms {
                config.update_interval_secs = ms as f64 / 1000.0;
            }
            config.background_timer |= background_timer;
            if let Some(radius) = radius {
                config.base_radius_m = radius;
            }
            let identity = user.map(|uid| UserIdentity { uid, display_name: name });
            let run = SimulateRun {
                config,
                snapshot,
                output,
                identity,
            };

            let store = store_url.map(|base_url| {
                HttpStore::new(HttpStoreConfig {
                    base_url,
                    ..Default::default()
                })
            });

            match (track, store) {
                (Some(path), None) => match TrackSampler::load(&path) {
                    Ok(sampler) => {
                        let n = sampler.remaining() as u32;
                        run.execute(sampler, MemoryStore::new(), n).await
                    }
                    Err(e) => Err(e.into()),
                },
                (Some(path), Some(store)) => match (TrackSampler::load(&path), store) {
                    (Ok(sampler), Ok(store)) => {
                        let n = sampler.remaining() as u32;
                        run.execute(sampler, store, n).await
                    }
                    (Err(e), _) => Err(e.into()),
                    (_, Err(e)) => Err(e.into()),
                },
                (None, store) => {
                    let seed = seed.unwrap_or_else(rand::random);
                    println!("Random walk with seed: {}", seed);
                    let sampler = RandomWalkSampler::new(run.config.default_center, step_degrees, seed);
                    match store {
                        None => run.execute(sampler, MemoryStore::new(), steps).await,
                        Some(Ok(store)) => run.execute(sampler, store, steps).await,
                        Some(Err(e)) => Err(e.into()),
                    }
                }
            }
        }
        Command::Render {
            snapshot,
            output,
            lat,
            lng,
            zoom,
            width,
            height,
            opacity,
            radius,
        } => {
            let center = GeoPoint::new(
                lat.unwrap_or(config.default_center.latitude),
                lng.unwrap_or(config.default_center.longitude),
            );
            let viewport = Viewport::new(
                center,
                zoom.unwrap_or(config.default_zoom),
                PixelSize::new(width, height),
            );
            render_snapshot(&config, &snapshot, &output, &viewport, opacity, radius)
        }
        Command::Leaderboard { store_url, limit } => {
            show_leaderboard(&config, store_url, limit.unwrap_or(config.leaderboard_limit)).await
        }
        Command::Stats { snapshot } => show_stats(&config, &snapshot),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct SimulateRun {
    config: GameConfig,
    snapshot: PathBuf,
    output: PathBuf,
    identity: Option<UserIdentity>,
}

impl SimulateRun {
    async fn execute<S, R>(self, sampler: S, store: R, steps: u32) -> CliResult
    where
        S: GeoSampler + 'static,
        R: RemoteStore,
    {
        let interval = Duration::try_from_secs_f64(self.config.update_interval_secs)
            .map_err(|e| format!("bad update interval {}: {}", self.config.update_interval_secs, e))?;

        let sync = ProgressSync::new(
            Arc::new(store),
            self.config.users_collection.clone(),
            self.config.epsilon_degrees,
        );
        let local = LocalSnapshot::open(&self.snapshot);
        let game = Arc::new(Explorer::new(self.config.clone(), sampler, sync, local));

        if let Some(identity) = &self.identity {
            let session = game.on_signed_in(identity).await;
            println!(
                "Signed in as {}",
                session.display_name.as_deref().unwrap_or(identity.uid.as_str())
            );
        }

        let start = game.snapshot();
        println!("Starting with {} areas, {} points", start.areas.len(), start.score);
        println!("Updating every {:?} for {} steps", interval, steps);

        let mut scheduler =
            UpdateScheduler::new(Arc::clone(&game)).with_background_timer(self.config.background_timer);
        scheduler.start(interval)?;
        tokio::time::sleep(interval * steps + interval / 2).await;
        scheduler.stop();
        while scheduler.is_update_in_flight() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let end = game.snapshot();
        println!(
            "Revealed {} new areas ({} total), score {} (+{})",
            end.areas.len().saturating_sub(start.areas.len()),
            end.areas.len(),
            end.score,
            end.score.saturating_sub(start.score)
        );
        println!(
            "Updates: {} started, {} dropped while busy",
            scheduler.stats().started(),
            scheduler.stats().suppressed()
        );

        if let Some(uid) = &end.session.uid {
            if let Err(e) = game.flush_remote().await {
                eprintln!("Warning: final save for {} failed: {}", uid, e);
            }
        }

        let center = end.last_position.unwrap_or(self.config.default_center);
        let viewport = Viewport::new(center, self.config.default_zoom, PixelSize::new(800, 600));
        let mask = FogMaskRenderer::new(self.config.reference_zoom).render(
            &viewport,
            &end.areas,
            self.config.fog_opacity,
            self.config.base_radius_m,
        );
        mask.save_png(&self.output)?;
        println!("Fog mask written to {}", self.output.display());
        Ok(())
    }
}

fn render_snapshot(
    config: &GameConfig,
    snapshot: &Path,
    output: &Path,
    viewport: &Viewport,
    opacity: Option<f32>,
    radius: Option<f64>,
) -> CliResult {
    let (areas, points) = LocalSnapshot::open(snapshot).load_progress(config.epsilon_degrees);
    let renderer = FogMaskRenderer::new(config.reference_zoom);
    let mask = renderer.render(
        viewport,
        &areas,
        opacity.unwrap_or(config.fog_opacity),
        radius.unwrap_or(config.base_radius_m),
    );
    mask.save_png(output)?;
    println!(
        "Rendered {} areas ({} points) at zoom {}: {:.1}% of the view cleared",
        areas.len(),
        points,
        viewport.zoom,
        100.0 * mask.revealed_fraction(config.fog_opacity * 0.5)
    );
    println!("Fog mask written to {}", output.display());
    Ok(())
}

async fn show_leaderboard(config: &GameConfig, store_url: String, limit: usize) -> CliResult {
    let store = HttpStore::new(HttpStoreConfig {
        base_url: store_url,
        ..Default::default()
    })?;
    let sync = ProgressSync::new(Arc::new(store), config.users_collection.clone(), config.epsilon_degrees);
    match sync.leaderboard(limit).await {
        Ok(entries) => {
            println!("Leaderboard");
            for (rank, entry) in entries.iter().enumerate() {
                println!(
                    "{:>2}. {}: {} points",
                    rank + 1,
                    entry.name.as_deref().unwrap_or("anonymous"),
                    entry.score
                );
            }
            Ok(())
        }
        Err(e) => Err(format!("could not load the leaderboard: {}", e).into()),
    }
}

fn show_stats(config: &GameConfig, snapshot: &Path) -> CliResult {
    let (areas, points) = LocalSnapshot::open(snapshot).load_progress(config.epsilon_degrees);
    println!("=== FOG EXPLORER PROGRESS ===");
    println!("Snapshot: {}", snapshot.display());
    println!("Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Areas revealed: {}", areas.len());
    println!("Points: {}", points);

    if let Some(first) = areas.iter().next() {
        let (mut min_lat, mut max_lat) = (first.lat, first.lat);
        let (mut min_lng, mut max_lng) = (first.lng, first.lng);
        for area in &areas {
            min_lat = min_lat.min(area.lat);
            max_lat = max_lat.max(area.lat);
            min_lng = min_lng.min(area.lng);
            max_lng = max_lng.max(area.lng);
        }
        println!(
            "Bounds: ({:.5}, {:.5}) to ({:.5}, {:.5})",
            min_lat, min_lng, max_lat, max_lng
        );
    }
    Ok(())
}
