//! Profiling tool for the fog renderer

use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use fog_explorer::{
    fog::{FogLayer, FogMaskRenderer},
    geo::{GeoPoint, PixelSize, Viewport},
    revealed::RevealedAreaSet,
};

fn main() {
    let seed = 1337u64;
    let center = GeoPoint::new(50.4501, 30.5234);
    let size = PixelSize::new(1920, 1080);

    println!("=== Fog Render Profiling ===");
    println!("Viewport: {}x{} ({} pixels)", size.width, size.height, size.width * size.height);
    println!();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // Profile insertion into the revealed set
    let start = Instant::now();
    let mut set = RevealedAreaSet::default();
    let mut pos = center;
    for _ in 0..5_000 {
        pos = GeoPoint::new(
            pos.latitude + rng.gen_range(-0.0004..=0.0004),
            pos.longitude + rng.gen_range(-0.0004..=0.0004),
        );
        set.try_insert(pos, Some(rng.gen_range(10.0..=100.0)));
    }
    let insert_time = start.elapsed();
    println!("Insertion: {:?} ({} distinct areas of 5000 samples)", insert_time, set.len());

    let renderer = FogMaskRenderer::default();
    let mut render_times = Vec::new();
    for zoom in [12, 15, 18] {
        let viewport = Viewport::new(center, zoom, size);
        let start = Instant::now();
        let mask = renderer.render(&viewport, &set, 0.7, 50.0);
        let elapsed = start.elapsed();
        println!(
            "Render zoom {:>2}: {:?} ({:.1}% cleared)",
            zoom,
            elapsed,
            100.0 * mask.revealed_fraction(0.35)
        );
        render_times.push(elapsed);
    }

    // Profile the cached layer: one miss, then hits
    let viewport = Viewport::new(center, 15, size);
    let mut layer = FogLayer::new(renderer);
    let start = Instant::now();
    for _ in 0..100 {
        layer.mask(&viewport, set.as_slice(), 0.7, 50.0);
    }
    let cached_time = start.elapsed();
    println!("Layer x100 (1 render): {:?} ({} renders)", cached_time, layer.render_count());

    // Summary
    let total = insert_time + render_times.iter().sum::<std::time::Duration>() + cached_time;
    println!("\n=== Summary ===");
    println!("Insertion:   {:>8.2}% ({:?})", 100.0 * insert_time.as_secs_f64() / total.as_secs_f64(), insert_time);
    for (zoom, t) in [12, 15, 18].iter().zip(&render_times) {
        println!("Render z{:<3} {:>8.2}% ({:?})", zoom, 100.0 * t.as_secs_f64() / total.as_secs_f64(), t);
    }
    println!("Layer cache: {:>8.2}% ({:?})", 100.0 * cached_time.as_secs_f64() / total.as_secs_f64(), cached_time);
    println!("─────────────────────────────────");
    println!("TOTAL:       {:>8}  {:?}", "100%", total);
}
