//! Fog of war overlay
//!
//! Turns the revealed areas into an alpha mask for the current viewport.

pub mod layer;
pub mod mask;
pub mod render;

pub use layer::FogLayer;
pub use mask::MaskSurface;
pub use render::{effective_radius, FogMaskRenderer, REFERENCE_ZOOM};
