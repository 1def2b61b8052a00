//! Body identifiers and rigid poses.
//!
//! Bodies are referenced by [`BodyId`]. The fixed inertial frame is not a
//! stored body: it is the sentinel [`BodyId::GROUND`], and "is this ground"
//! is an id comparison.

use nalgebra::{Isometry3, Matrix3, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unique identifier for a body in a mechanism.
///
/// The raw value doubles as the body *number* used for deterministic
/// ordering. Ground is numbered `-1`, so it sorts before every real body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyId(pub i64);

impl BodyId {
    /// The fixed inertial frame.
    pub const GROUND: Self = Self(-1);

    /// Create a new body ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw ID value (the body number).
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Check whether this id denotes ground.
    #[must_use]
    pub const fn is_ground(self) -> bool {
        self.0 == Self::GROUND.0
    }

    /// Map an absent body (`None`) to ground.
    #[must_use]
    pub fn or_ground(body: Option<Self>) -> Self {
        body.unwrap_or(Self::GROUND)
    }
}

impl From<i64> for BodyId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ground() {
            write!(f, "Ground")
        } else {
            write!(f, "Body({})", self.0)
        }
    }
}

/// Position and orientation of a rigid frame.
///
/// A pose `TBW` maps coordinates in frame B to world coordinates. Poses
/// compose left to right: `TCW = TBW.compose(&TCB)`.
///
/// # Example
///
/// ```
/// use sim_types::Pose;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
/// let local = Point3::new(1.0, 0.0, 0.0);
/// assert_eq!(pose.transform_point(&local), Point3::new(2.0, 2.0, 3.0));
///
/// let roundtrip = pose.compose(&pose.inverse());
/// assert!(roundtrip.position.coords.norm() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Create a pose from a translation and a rotation of `angle` radians
    /// about the z axis.
    #[must_use]
    pub fn from_xyz_rot_z(x: f64, y: f64, z: f64, angle: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
        }
    }

    /// Create a pose from an isometry.
    #[must_use]
    pub fn from_isometry(iso: Isometry3<f64>) -> Self {
        Self {
            position: Point3::from(iso.translation.vector),
            rotation: iso.rotation,
        }
    }

    /// Convert to an isometry.
    #[must_use]
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(self.position.coords.into(), self.rotation)
    }

    /// Rotation as a 3x3 matrix.
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    /// Transform a point from local to world coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Transform a vector from local to world coordinates (rotation only).
    #[must_use]
    pub fn transform_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Transform a point from world to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (world - self.position))
    }

    /// Compute the inverse pose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            position: Point3::from(-(inv_rotation * self.position.coords)),
            rotation: inv_rotation,
        }
    }

    /// Compose two poses: self * other.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            position: self.transform_point(&other.position),
            rotation: self.rotation * other.rotation,
        }
    }

    /// Compose with the inverse of another pose: self * inv(other).
    #[must_use]
    pub fn compose_inverse(&self, other: &Self) -> Self {
        self.compose(&other.inverse())
    }

    /// Apply a world-frame transform to this pose: `T * self`.
    #[must_use]
    pub fn transformed_by(&self, t: &Self) -> Self {
        t.compose(self)
    }

    /// Advance the pose by a world-frame spatial displacement.
    ///
    /// The origin moves by `linear * scale`; the orientation is rotated by
    /// `exp(angular * scale)` applied on the world side.
    #[must_use]
    pub fn integrate(&self, linear: &Vector3<f64>, angular: &Vector3<f64>, scale: f64) -> Self {
        let delta = UnitQuaternion::from_scaled_axis(angular * scale);
        Self {
            position: self.position + linear * scale,
            rotation: UnitQuaternion::new_normalize((delta * self.rotation).into_inner()),
        }
    }

    /// Translational and rotational distance to another pose.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> (f64, f64) {
        (
            (self.position - other.position).norm(),
            self.rotation.angle_to(&other.rotation),
        )
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_ground_sentinel() {
        assert!(BodyId::GROUND.is_ground());
        assert!(!BodyId::new(0).is_ground());
        assert!(BodyId::GROUND < BodyId::new(0));
        assert_eq!(BodyId::or_ground(None), BodyId::GROUND);
        assert_eq!(BodyId::or_ground(Some(BodyId::new(3))), BodyId::new(3));
        assert_eq!(BodyId::GROUND.to_string(), "Ground");
        assert_eq!(BodyId::new(4).to_string(), "Body(4)");
    }

    #[test]
    fn test_pose_inverse_compose() {
        let pose = Pose::from_xyz_rot_z(1.0, -2.0, 0.5, 0.7);
        let ident = pose.compose(&pose.inverse());
        assert_relative_eq!(ident.position.coords.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ident.rotation.angle(), 0.0, epsilon = 1e-12);

        let other = Pose::from_xyz_rot_z(0.0, 1.0, 0.0, -0.3);
        let t = pose.compose_inverse(&other);
        let back = t.compose(&other);
        let (dp, da) = back.distance_to(&pose);
        assert_relative_eq!(dp, 0.0, epsilon = 1e-12);
        assert_relative_eq!(da, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_transform_point() {
        let pose = Pose::from_xyz_rot_z(1.0, 0.0, 0.0, FRAC_PI_2);
        let world = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(world.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(world.y, 1.0, epsilon = 1e-12);
        let local = pose.inverse_transform_point(&world);
        assert_relative_eq!(local.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pose_integrate() {
        let pose = Pose::identity();
        let moved = pose.integrate(
            &Vector3::new(0.5, 0.0, 0.0),
            &Vector3::new(0.0, 0.0, FRAC_PI_2),
            2.0,
        );
        assert_relative_eq!(moved.position.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(moved.rotation.angle(), std::f64::consts::PI, epsilon = 1e-12);
        assert!(moved.is_finite());
    }

    #[test]
    fn test_transformed_by_is_world_premultiply() {
        let body = Pose::from_xyz_rot_z(1.0, 0.0, 0.0, 0.0);
        let t = Pose::from_xyz_rot_z(0.0, 0.0, 0.0, FRAC_PI_2);
        let moved = body.transformed_by(&t);
        assert_relative_eq!(moved.position.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(moved.position.y, 1.0, epsilon = 1e-12);
    }
}
