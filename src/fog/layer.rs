//! Render cache for the fog overlay.
//!
//! Keeps the last mask together with the inputs that produced it. Any change
//! to the viewport, the revealed areas, the opacity or the radius triggers a
//! full clear-and-redraw; identical inputs reuse the cached mask.

use tracing::debug;

use super::{FogMaskRenderer, MaskSurface};
use crate::geo::Viewport;
use crate::revealed::RevealedArea;

/// Everything a mask depends on
#[derive(Clone, Debug, PartialEq)]
struct RenderKey {
    viewport: Viewport,
    areas: Vec<RevealedArea>,
    fog_opacity: f32,
    base_radius: f64,
}

impl RenderKey {
    fn matches(&self, viewport: &Viewport, areas: &[RevealedArea], fog_opacity: f32, base_radius: f64) -> bool {
        self.viewport == *viewport
            && self.fog_opacity == fog_opacity
            && self.base_radius == base_radius
            && self.areas.as_slice() == areas
    }
}

/// The fog overlay attached to a map view
#[derive(Debug, Default)]
pub struct FogLayer {
    renderer: FogMaskRenderer,
    cached: Option<(RenderKey, MaskSurface)>,
    renders: u64,
}

impl FogLayer {
    pub fn new(renderer: FogMaskRenderer) -> Self {
        Self {
            renderer,
            cached: None,
            renders: 0,
        }
    }

    /// Return the mask for these inputs, re-rendering only when they changed.
    pub fn mask(
        &mut self,
        viewport: &Viewport,
        areas: &[RevealedArea],
        fog_opacity: f32,
        base_radius: f64,
    ) -> &MaskSurface {
        let fresh = match self.cached.take() {
            Some((key, mask)) if key.matches(viewport, areas, fog_opacity, base_radius) => (key, mask),
            _ => {
                let mask = self.renderer.render(viewport, areas, fog_opacity, base_radius);
                self.renders += 1;
                debug!(
                    "fog re-rendered ({} areas, zoom {}, {}x{})",
                    areas.len(),
                    viewport.zoom,
                    viewport.size.width,
                    viewport.size.height
                );
                let key = RenderKey {
                    viewport: *viewport,
                    areas: areas.to_vec(),
                    fog_opacity,
                    base_radius,
                };
                (key, mask)
            }
        };

        &self.cached.insert(fresh).1
    }

    /// Drop the cached mask so the next call redraws.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Number of full renders performed so far.
    pub fn render_count(&self) -> u64 {
        self.renders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPoint, PixelSize};
    use crate::revealed::RevealedAreaSet;

    fn setup() -> (Viewport, RevealedAreaSet) {
        let vp = Viewport::new(GeoPoint::new(50.4501, 30.5234), 15, PixelSize::new(64, 64));
        let mut set = RevealedAreaSet::default();
        set.try_insert(vp.center, None);
        (vp, set)
    }

    #[test]
    fn test_identical_inputs_reuse_mask() {
        let (vp, set) = setup();
        let mut layer = FogLayer::default();
        let first = layer.mask(&vp, set.as_slice(), 0.7, 50.0).clone();
        let second = layer.mask(&vp, set.as_slice(), 0.7, 50.0).clone();
        assert_eq!(first, second);
        assert_eq!(layer.render_count(), 1);
    }

    #[test]
    fn test_each_input_change_rerenders() {
        let (mut vp, mut set) = setup();
        let mut layer = FogLayer::default();
        layer.mask(&vp, set.as_slice(), 0.7, 50.0);

        layer.mask(&vp, set.as_slice(), 0.5, 50.0);
        assert_eq!(layer.render_count(), 2);

        layer.mask(&vp, set.as_slice(), 0.5, 80.0);
        assert_eq!(layer.render_count(), 3);

        vp.pan_by(10.0, 0.0);
        layer.mask(&vp, set.as_slice(), 0.5, 80.0);
        assert_eq!(layer.render_count(), 4);

        vp.zoom_by(-1);
        layer.mask(&vp, set.as_slice(), 0.5, 80.0);
        assert_eq!(layer.render_count(), 5);

        vp.resize(PixelSize::new(32, 32));
        layer.mask(&vp, set.as_slice(), 0.5, 80.0);
        assert_eq!(layer.render_count(), 6);

        set.try_insert(GeoPoint::new(50.4511, 30.5244), None);
        let mask = layer.mask(&vp, set.as_slice(), 0.5, 80.0);
        assert_eq!(mask.width, 32);
        assert_eq!(layer.render_count(), 7);
    }

    #[test]
    fn test_rerender_matches_fresh_render() {
        let (vp, mut set) = setup();
        let mut layer = FogLayer::default();
        layer.mask(&vp, set.as_slice(), 0.7, 50.0);
        set.try_insert(GeoPoint::new(50.4502, 30.5236), None);
        let cached = layer.mask(&vp, set.as_slice(), 0.7, 50.0).clone();
        let fresh = FogMaskRenderer::default().render(&vp, &set, 0.7, 50.0);
        assert_eq!(cached, fresh);
    }
}
