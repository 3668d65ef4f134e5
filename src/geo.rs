//! Geographic points and the map viewport.
//!
//! The viewport uses the Web Mercator tiling scheme (256px tiles) so that
//! projected coordinates line up with what a slippy map widget draws.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Edge length of one map tile in pixels
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the Web Mercator projection
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// Zoom range supported by common tile servers
pub const MIN_ZOOM: i32 = 0;
pub const MAX_ZOOM: i32 = 22;

/// A sampled position in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both axes differ by less than `epsilon` degrees.
    ///
    /// This is a per-axis comparison in degrees, not a ground distance, so the
    /// east-west tolerance shrinks in meters as latitude grows.
    pub fn approx_eq(&self, other: &GeoPoint, epsilon: f64) -> bool {
        (self.latitude - other.latitude).abs() < epsilon
            && (self.longitude - other.longitude).abs() < epsilon
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Viewport dimensions in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Screen-space position in pixels, origin at the top-left corner
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

/// Project a point to global Web Mercator pixel coordinates at `zoom`.
pub fn world_pixel(point: GeoPoint, zoom: i32) -> PixelPoint {
    let scale = TILE_SIZE * 2f64.powi(zoom);
    let lat = point.latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (point.longitude + 180.0) / 360.0 * scale;
    let y = (1.0 - lat.tan().asinh() / PI) / 2.0 * scale;
    PixelPoint { x, y }
}

/// Inverse of [`world_pixel`].
pub fn world_pixel_to_geo(pixel: PixelPoint, zoom: i32) -> GeoPoint {
    let scale = TILE_SIZE * 2f64.powi(zoom);
    let longitude = pixel.x / scale * 360.0 - 180.0;
    let n = PI * (1.0 - 2.0 * pixel.y / scale);
    let latitude = n.sinh().atan().to_degrees();
    GeoPoint::new(latitude, longitude)
}

/// What the map widget is currently showing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: GeoPoint,
    pub zoom: i32,
    pub size: PixelSize,
}

impl Viewport {
    pub fn new(center: GeoPoint, zoom: i32, size: PixelSize) -> Self {
        Self {
            center,
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            size,
        }
    }

    /// Project a geographic point into this viewport's pixel space.
    ///
    /// Points outside the visible area yield coordinates outside
    /// `0..width` / `0..height`.
    pub fn geo_to_pixel(&self, point: GeoPoint) -> PixelPoint {
        let p = world_pixel(point, self.zoom);
        let c = world_pixel(self.center, self.zoom);
        PixelPoint {
            x: p.x - c.x + self.size.width as f64 / 2.0,
            y: p.y - c.y + self.size.height as f64 / 2.0,
        }
    }

    /// Inverse of [`Viewport::geo_to_pixel`].
    pub fn pixel_to_geo(&self, pixel: PixelPoint) -> GeoPoint {
        let c = world_pixel(self.center, self.zoom);
        world_pixel_to_geo(
            PixelPoint {
                x: pixel.x + c.x - self.size.width as f64 / 2.0,
                y: pixel.y + c.y - self.size.height as f64 / 2.0,
            },
            self.zoom,
        )
    }

    /// Move the centre by a pixel offset (drag).
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let half_w = self.size.width as f64 / 2.0;
        let half_h = self.size.height as f64 / 2.0;
        self.center = self.pixel_to_geo(PixelPoint { x: half_w + dx, y: half_h + dy });
    }

    pub fn pan_to(&mut self, center: GeoPoint) {
        self.center = center;
    }

    pub fn zoom_by(&mut self, delta: i32) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn resize(&mut self, size: PixelSize) {
        self.size = size;
    }
}
