//! Scalar joint coordinates with range, lock and limit state.

use sim_types::{CoordinateRange, MotionType};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Whether a coordinate is currently held at a range bound by a one-sided
/// limit constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LimitEngagement {
    /// Inside the range; no limit row.
    #[default]
    Free,
    /// Pinned at the lower bound.
    Lower,
    /// Pinned at the upper bound.
    Upper,
}

impl LimitEngagement {
    /// Signed engagement: `+1` at the lower bound, `-1` at the upper, else 0.
    #[must_use]
    pub fn sign(self) -> i32 {
        match self {
            Self::Free => 0,
            Self::Lower => 1,
            Self::Upper => -1,
        }
    }

    /// Check if a limit is engaged.
    #[must_use]
    pub fn is_engaged(self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// One scalar degree of freedom of a joint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    value: f64,
    range: CoordinateRange,
    motion: MotionType,
    locked: bool,
    locked_value: f64,
    engagement: LimitEngagement,
    /// Number of consecutive updates the current limit has been engaged.
    engaged_count: u32,
    /// Set when the value was assigned directly rather than solved for.
    reset: bool,
}

impl Coordinate {
    /// Create a coordinate at zero with an unbounded range.
    #[must_use]
    pub fn new(motion: MotionType) -> Self {
        Self {
            value: 0.0,
            range: CoordinateRange::unbounded(),
            motion,
            locked: false,
            locked_value: 0.0,
            engagement: LimitEngagement::Free,
            engaged_count: 0,
            reset: false,
        }
    }

    /// Current value (radians for rotary coordinates).
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Value range.
    #[must_use]
    pub fn range(&self) -> &CoordinateRange {
        &self.range
    }

    /// Motion type.
    #[must_use]
    pub fn motion_type(&self) -> MotionType {
        self.motion
    }

    /// Whether the coordinate is locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Value the coordinate is held at while locked.
    #[must_use]
    pub fn locked_value(&self) -> f64 {
        self.locked_value
    }

    /// Current limit engagement.
    #[must_use]
    pub fn limit_engagement(&self) -> LimitEngagement {
        self.engagement
    }

    /// Set the range; the value is not clipped until the next assignment.
    pub fn set_range(&mut self, range: CoordinateRange) {
        self.range = range;
    }

    /// Lock or unlock. Locking without a prior value holds the current one.
    pub fn set_locked(&mut self, locked: bool) {
        if locked && !self.locked {
            self.locked_value = self.value;
        }
        self.locked = locked;
    }

    /// Set the value held while locked.
    pub fn set_locked_value(&mut self, value: f64) {
        self.locked_value = value;
    }

    /// Store a value computed from body poses. No clipping.
    pub(crate) fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Assign a value directly: clipped to the range, and the limit is
    /// released on the next update if the value lies inside.
    pub(crate) fn assign(&mut self, value: f64) {
        self.value = self.range.clamp(value);
        self.reset = true;
    }

    /// Signed distance from the engaged bound, positive inside the range.
    #[must_use]
    pub fn limit_distance(&self) -> f64 {
        match self.engagement {
            LimitEngagement::Free => self.range.distance_to_limit(self.value),
            LimitEngagement::Lower => self.value - self.range.lower(),
            LimitEngagement::Upper => self.range.upper() - self.value,
        }
    }

    /// Update limit engagement from the current value.
    ///
    /// A limit engages once the value reaches a bound. It releases when the
    /// value is strictly back inside and either the value was assigned
    /// directly or the limit has already survived one update.
    pub fn update_engagement(&mut self) {
        match self.engagement {
            LimitEngagement::Free => {
                if self.value <= self.range.lower() {
                    self.engagement = LimitEngagement::Lower;
                    self.engaged_count = 1;
                } else if self.value >= self.range.upper() {
                    self.engagement = LimitEngagement::Upper;
                    self.engaged_count = 1;
                }
            }
            LimitEngagement::Lower | LimitEngagement::Upper => {
                if self.limit_distance() > 0.0 && (self.reset || self.engaged_count > 1) {
                    self.engagement = LimitEngagement::Free;
                    self.engaged_count = 0;
                } else {
                    self.engaged_count = self.engaged_count.saturating_add(1);
                }
            }
        }
        self.reset = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn limited() -> Coordinate {
        let mut c = Coordinate::new(MotionType::Linear);
        c.set_range(CoordinateRange::new(-1.0, 1.0));
        c
    }

    #[test]
    fn test_assign_clips() {
        let mut c = limited();
        c.assign(3.0);
        assert_eq!(c.value(), 1.0);
        c.assign(-0.25);
        assert_eq!(c.value(), -0.25);
    }

    #[test]
    fn test_lock_captures_value() {
        let mut c = limited();
        c.set_value(0.4);
        c.set_locked(true);
        assert!(c.is_locked());
        assert_relative_eq!(c.locked_value(), 0.4, epsilon = 1e-15);
        c.set_locked_value(0.1);
        c.set_locked(true);
        assert_relative_eq!(c.locked_value(), 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_engagement_cycle() {
        let mut c = limited();
        c.set_value(-1.2);
        c.update_engagement();
        assert_eq!(c.limit_engagement(), LimitEngagement::Lower);
        assert_eq!(c.limit_engagement().sign(), 1);
        assert_relative_eq!(c.limit_distance(), -0.2, epsilon = 1e-12);

        // back inside on the very next update: held once
        c.set_value(-0.9);
        c.update_engagement();
        assert!(c.limit_engagement().is_engaged());

        // still inside: released
        c.update_engagement();
        assert_eq!(c.limit_engagement(), LimitEngagement::Free);
    }

    #[test]
    fn test_assignment_releases_immediately() {
        let mut c = limited();
        c.set_value(1.0);
        c.update_engagement();
        assert_eq!(c.limit_engagement(), LimitEngagement::Upper);
        assert_eq!(c.limit_engagement().sign(), -1);

        c.assign(0.5);
        c.update_engagement();
        assert_eq!(c.limit_engagement(), LimitEngagement::Free);
    }

    #[test]
    fn test_unbounded_never_engages() {
        let mut c = Coordinate::new(MotionType::Rotary);
        c.set_value(1e6);
        c.update_engagement();
        assert_eq!(c.limit_engagement(), LimitEngagement::Free);
    }
}
