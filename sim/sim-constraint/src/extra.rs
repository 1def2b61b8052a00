//! Constrainers that are not joints.
//!
//! Extra constraints have no coordinates of their own. They add bilateral
//! rows that couple other joints' coordinates or pin bodies in place, and
//! they may touch more than two bodies.

use nalgebra::Point3;
use sim_types::{BodyId, JointCoordinateHandle};

/// Identifies either kind of constrainer.
///
/// Ordering puts every joint before every extra constraint, then orders by
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstrainerId {
    /// A joint.
    Joint(sim_types::JointId),
    /// An extra constraint.
    Constraint(sim_types::ConstraintId),
}

impl ConstrainerId {
    /// Check if this is a joint.
    #[must_use]
    pub fn is_joint(self) -> bool {
        matches!(self, Self::Joint(_))
    }

    /// Constrainer number, independent of kind.
    #[must_use]
    pub fn number(self) -> u64 {
        match self {
            Self::Joint(j) => j.raw(),
            Self::Constraint(c) => c.raw(),
        }
    }
}

impl std::fmt::Display for ConstrainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Joint(j) => write!(f, "{j}"),
            Self::Constraint(c) => write!(f, "{c}"),
        }
    }
}

/// An extra (non-joint) constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraConstraint {
    /// Enforce `q_a - ratio * q_b = offset` between two coordinates.
    CoordinateCoupling {
        /// Driven coordinate.
        a: JointCoordinateHandle,
        /// Driving coordinate.
        b: JointCoordinateHandle,
        /// Gear ratio.
        ratio: f64,
        /// Constant offset.
        offset: f64,
    },
    /// Pin a point of a body to a fixed world point.
    FixedPoint {
        /// The body.
        body: BodyId,
        /// Point in body coordinates.
        local: Point3<f64>,
        /// Target in world coordinates.
        target: Point3<f64>,
    },
}

impl ExtraConstraint {
    /// Couple two coordinates with unit ratio and zero offset.
    #[must_use]
    pub fn coupling(a: JointCoordinateHandle, b: JointCoordinateHandle) -> Self {
        Self::CoordinateCoupling {
            a,
            b,
            ratio: 1.0,
            offset: 0.0,
        }
    }

    /// Number of bilateral rows contributed.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self {
            Self::CoordinateCoupling { .. } => 1,
            Self::FixedPoint { .. } => 3,
        }
    }
}
