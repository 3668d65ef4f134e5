use std::path::Path;

use image::{ImageBuffer, Rgba, RgbaImage};

/// Per-pixel fog alpha for one viewport, row-major, no wrapping.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSurface {
    pub width: u32,
    pub height: u32,
    alpha: Vec<f32>,
}

impl MaskSurface {
    /// A mask covered uniformly with `alpha`.
    pub fn filled(width: u32, height: u32, alpha: f32) -> Self {
        Self {
            width,
            height,
            alpha: vec![alpha; width as usize * height as usize],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Alpha at `(x, y)`, `None` outside the surface.
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.alpha.get(self.index(x, y)).copied()
    }

    pub fn fill(&mut self, alpha: f32) {
        self.alpha.fill(alpha);
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.alpha
    }

    pub fn pixels(&self) -> &[f32] {
        &self.alpha
    }

    /// Share of pixels whose alpha dropped below `threshold`.
    pub fn revealed_fraction(&self, threshold: f32) -> f64 {
        if self.alpha.is_empty() {
            return 0.0;
        }
        let clear = self.alpha.iter().filter(|&&a| a < threshold).count();
        clear as f64 / self.alpha.len() as f64
    }

    /// Black fog with the mask as its alpha channel.
    pub fn to_image(&self) -> RgbaImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            let a = (self.alpha[self.index(x, y)].clamp(0.0, 1.0) * 255.0).round() as u8;
            Rgba([0, 0, 0, a])
        })
    }

    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.to_image().save(path)
    }
}
