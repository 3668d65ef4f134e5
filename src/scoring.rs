//! Points awarded for uncovering new areas.
//!
//! Every distinct insertion into the revealed set is worth a fixed number of
//! points, so `score == insertions * points_per_area`.

/// Fixed reward per newly revealed area
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub points_per_area: u64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self { points_per_area: 10 }
    }
}

impl ScoringPolicy {
    pub fn new(points_per_area: u64) -> Self {
        Self { points_per_area }
    }

    pub fn on_area_inserted(&self, current_score: u64) -> u64 {
        current_score.saturating_add(self.points_per_area)
    }

    /// Score expected after `areas` distinct insertions.
    pub fn score_for(&self, areas: usize) -> u64 {
        (areas as u64).saturating_mul(self.points_per_area)
    }
}
