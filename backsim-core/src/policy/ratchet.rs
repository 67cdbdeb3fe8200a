//! Ratchet invariant enforcement
//!
//! **Core Rule:** Stops may tighten, never loosen.
//!
//! Break-even and trailing proposals both pass through here, so neither can
//! hand back room the position has already locked in.

use crate::domain::Side;

/// Current stop level plus the side that decides which way is "tighter".
///
/// - Long positions: stop can only rise
/// - Short positions: stop can only fall
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopRatchet {
    side: Side,
    level: f64,
}

impl StopRatchet {
    pub fn new(side: Side, level: f64) -> Self {
        Self { side, level }
    }

    /// Move to `proposed` if it tightens the stop.
    ///
    /// Returns the new level when it moved, `None` when the proposal was equal
    /// or looser.
    ///
    /// # Example
    /// ```
    /// use backsim_core::domain::Side;
    /// use backsim_core::policy::StopRatchet;
    ///
    /// let mut ratchet = StopRatchet::new(Side::Long, 95.0);
    /// assert_eq!(ratchet.tighten(100.0), Some(100.0));
    /// assert_eq!(ratchet.tighten(90.0), None);
    /// assert_eq!(ratchet.level(), 100.0);
    /// ```
    pub fn tighten(&mut self, proposed: f64) -> Option<f64> {
        if self.side.is_adverse(self.level, proposed) {
            self.level = proposed;
            Some(proposed)
        } else {
            None
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }
}
