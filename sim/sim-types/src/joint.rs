//! Joint and coordinate identifiers, motion types and value ranges.
//!
//! A joint exposes zero or more scalar *coordinates*. A coordinate is
//! addressed across calls by a [`JointCoordinateHandle`], the pair
//! (joint, index).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a joint.
///
/// The raw value is the joint number used for deterministic ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointId(pub u64);

impl JointId {
    /// Create a new joint ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for JointId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Joint({})", self.0)
    }
}

/// Unique identifier for an extra (non-joint) constrainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintId(pub u64);

impl ConstraintId {
    /// Create a new constraint ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Constraint({})", self.0)
    }
}

/// Immutable reference to one coordinate of one joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointCoordinateHandle {
    /// Joint owning the coordinate.
    pub joint: JointId,
    /// Coordinate index within the joint.
    pub index: usize,
}

impl JointCoordinateHandle {
    /// Create a handle for coordinate `index` of `joint`.
    #[must_use]
    pub const fn new(joint: JointId, index: usize) -> Self {
        Self { joint, index }
    }
}

impl std::fmt::Display for JointCoordinateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.joint, self.index)
    }
}

/// How a coordinate moves: by rotation (radians, wraps) or translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MotionType {
    /// Angular coordinate, in radians.
    Rotary,
    /// Translational coordinate, in model length units.
    Linear,
}

impl MotionType {
    /// Convert a user value in degrees to internal units.
    ///
    /// Only rotary values are converted; linear values pass through.
    #[must_use]
    pub fn value_from_degrees(self, value: f64) -> f64 {
        match self {
            Self::Rotary => value.to_radians(),
            Self::Linear => value,
        }
    }

    /// Convert an internal value to degrees (rotary only).
    #[must_use]
    pub fn to_degrees(self, value: f64) -> f64 {
        match self {
            Self::Rotary => value.to_degrees(),
            Self::Linear => value,
        }
    }
}

impl std::fmt::Display for MotionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rotary => write!(f, "rotary"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

/// Inclusive value range of a coordinate. Either side may be unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoordinateRange {
    lower: f64,
    upper: f64,
}

impl Default for CoordinateRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl CoordinateRange {
    /// Create a range. The bounds are swapped if given out of order.
    #[must_use]
    pub fn new(lower: f64, upper: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self { lower, upper }
    }

    /// Create a symmetric range around zero.
    #[must_use]
    pub fn symmetric(bound: f64) -> Self {
        Self::new(-bound.abs(), bound.abs())
    }

    /// Create a range given in degrees (for rotary coordinates).
    #[must_use]
    pub fn degrees(lower: f64, upper: f64) -> Self {
        Self::new(lower.to_radians(), upper.to_radians())
    }

    /// The range (-inf, inf).
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Get the lower bound.
    #[must_use]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Get the upper bound.
    #[must_use]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Width of the range; infinite if either side is unbounded.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Whether both bounds are finite.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.width().is_finite()
    }

    /// Whether at least one bound is finite.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.lower != f64::NEG_INFINITY || self.upper != f64::INFINITY
    }

    /// Check if a value is within the range.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Clamp a value to the range.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    /// Signed distance to the nearer bound; negative when outside.
    #[must_use]
    pub fn distance_to_limit(&self, value: f64) -> f64 {
        if (value - self.lower).abs() < (value - self.upper).abs() {
            value - self.lower
        } else {
            self.upper - value
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_handle_ordering_and_display() {
        let a = JointCoordinateHandle::new(JointId::new(1), 0);
        let b = JointCoordinateHandle::new(JointId::new(1), 2);
        let c = JointCoordinateHandle::new(JointId::new(0), 5);
        assert!(c < a && a < b);
        assert_eq!(b.to_string(), "Joint(1)[2]");
    }

    #[test]
    fn test_motion_type_degrees() {
        assert_relative_eq!(
            MotionType::Rotary.value_from_degrees(180.0),
            std::f64::consts::PI,
            epsilon = 1e-12
        );
        assert_eq!(MotionType::Linear.value_from_degrees(2.5), 2.5);
        assert_relative_eq!(MotionType::Rotary.to_degrees(1.0), 57.295_779_513, epsilon = 1e-8);
    }

    #[test]
    fn test_range_basics() {
        let r = CoordinateRange::new(1.0, -1.0);
        assert_eq!(r.lower(), -1.0);
        assert_eq!(r.upper(), 1.0);
        assert_eq!(r.width(), 2.0);
        assert!(r.is_bounded());
        assert!(r.contains(0.5));
        assert!(!r.contains(1.5));
        assert_eq!(r.clamp(3.0), 1.0);

        let u = CoordinateRange::unbounded();
        assert!(!u.is_bounded());
        assert!(!u.is_restricted());
        assert_eq!(u.width(), f64::INFINITY);

        let half = CoordinateRange::new(0.0, f64::INFINITY);
        assert!(!half.is_bounded());
        assert!(half.is_restricted());
    }

    #[test]
    fn test_distance_to_limit() {
        let r = CoordinateRange::new(0.0, 10.0);
        assert_eq!(r.distance_to_limit(2.0), 2.0);
        assert_eq!(r.distance_to_limit(9.0), 1.0);
        assert_eq!(r.distance_to_limit(-1.0), -1.0);
        assert_eq!(r.distance_to_limit(12.0), -2.0);
    }
}
