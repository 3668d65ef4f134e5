use rayon::prelude::*;

use super::MaskSurface;
use crate::geo::Viewport;
use crate::revealed::RevealedArea;

/// Zoom level at which a reveal radius is drawn at its nominal size
pub const REFERENCE_ZOOM: i32 = 15;

/// On-screen radius of a reveal circle at `zoom`.
///
/// Halves for every zoom level below `reference_zoom` and doubles for every
/// level above it, so the circle keeps its ground size as the map zooms.
pub fn effective_radius(radius: f64, reference_zoom: i32, zoom: i32) -> f64 {
    radius / 2f64.powi(reference_zoom - zoom)
}

/// A reveal circle in viewport pixels
#[derive(Clone, Copy, Debug)]
struct Disc {
    x: f64,
    y: f64,
    r: f64,
}

impl Disc {
    fn visible(&self, width: f64, height: f64) -> bool {
        self.r > 0.0
            && self.x + self.r > 0.0
            && self.x - self.r < width
            && self.y + self.r > 0.0
            && self.y - self.r < height
    }
}

/// Draws the fog overlay for a viewport.
#[derive(Clone, Copy, Debug)]
pub struct FogMaskRenderer {
    pub reference_zoom: i32,
}

impl Default for FogMaskRenderer {
    fn default() -> Self {
        Self { reference_zoom: REFERENCE_ZOOM }
    }
}

impl FogMaskRenderer {
    pub fn new(reference_zoom: i32) -> Self {
        Self { reference_zoom }
    }

    /// Render the fog mask from scratch.
    ///
    /// The surface starts at `fog_opacity` everywhere. Each area then erases a
    /// radial gradient: alpha is multiplied by `d / r`, which is 0 at the
    /// centre and 1 at the rim. Overlapping circles multiply, so alpha never
    /// drops below zero. Areas without their own radius use `base_radius`.
    pub fn render<'a>(
        &self,
        viewport: &Viewport,
        areas: impl IntoIterator<Item = &'a RevealedArea>,
        fog_opacity: f32,
        base_radius: f64,
    ) -> MaskSurface {
        let fog_opacity = fog_opacity.clamp(0.0, 1.0);
        let width = viewport.size.width;
        let height = viewport.size.height;
        let mut mask = MaskSurface::filled(width, height, fog_opacity);
        if width == 0 || height == 0 {
            return mask;
        }

        let discs: Vec<Disc> = areas
            .into_iter()
            .map(|area| {
                let center = viewport.geo_to_pixel(area.point());
                let radius = area.radius.unwrap_or(base_radius);
                Disc {
                    x: center.x,
                    y: center.y,
                    r: effective_radius(radius, self.reference_zoom, viewport.zoom),
                }
            })
            .filter(|d| d.visible(width as f64, height as f64))
            .collect();

        if discs.is_empty() {
            return mask;
        }

        let row_len = width as usize;
        mask.data_mut()
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| erase_row(row, y, &discs));

        mask
    }
}

/// Apply every disc crossing row `y`, in insertion order.
fn erase_row(row: &mut [f32], y: usize, discs: &[Disc]) {
    let py = y as f64 + 0.5;
    let last = row.len() as f64;
    for disc in discs {
        let dy = py - disc.y;
        if dy.abs() >= disc.r {
            continue;
        }
        let half = (disc.r * disc.r - dy * dy).sqrt();
        let x0 = (disc.x - half - 0.5).floor().clamp(0.0, last) as usize;
        let x1 = (disc.x + half + 0.5).ceil().clamp(0.0, last) as usize;
        for (x, alpha) in row.iter_mut().enumerate().take(x1).skip(x0) {
            let dx = x as f64 + 0.5 - disc.x;
            let d = dx.hypot(dy);
            if d < disc.r {
                *alpha *= (d / disc.r) as f32;
            }
        }
    }
}
