//! Joint couplings: how coordinates map to the relative pose of two frames.
//!
//! Every joint relates a frame C attached to body A and a frame D attached to
//! body B (or the world). The coupling maps its coordinates to the relative
//! transform `TCD`, and projects an arbitrary `TCD` back onto the set of
//! transforms it can represent. The projected transform is called `TGD`; the
//! residual `inv(TGD) * TCD` drives the joint's constraint rows.
//!
//! Wrenches returned here are expressed in frame G. Pairing a wrench with the
//! relative twist of C with respect to D (taken at the origin of C) yields the
//! rate of the associated coordinate or constraint error.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use sim_types::{MotionType, Pose};
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A force/moment pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wrench {
    /// Force component.
    pub force: Vector3<f64>,
    /// Moment component.
    pub moment: Vector3<f64>,
}

impl Wrench {
    /// Create a wrench from force and moment.
    #[must_use]
    pub fn new(force: Vector3<f64>, moment: Vector3<f64>) -> Self {
        Self { force, moment }
    }

    /// A pure force.
    #[must_use]
    pub fn force(force: Vector3<f64>) -> Self {
        Self::new(force, Vector3::zeros())
    }

    /// A pure moment.
    #[must_use]
    pub fn moment(moment: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), moment)
    }

    /// Rotate both components.
    #[must_use]
    pub fn rotated(&self, rotation: &UnitQuaternion<f64>) -> Self {
        Self::new(rotation * self.force, rotation * self.moment)
    }

    /// Scale both components.
    #[must_use]
    pub fn scaled(&self, s: f64) -> Self {
        Self::new(self.force * s, self.moment * s)
    }

    /// Power pairing with a twist `(v, w)`.
    #[must_use]
    pub fn dot_twist(&self, linear: &Vector3<f64>, angular: &Vector3<f64>) -> f64 {
        self.force.dot(linear) + self.moment.dot(angular)
    }
}

/// Reduce an angle to `[-pi, pi]`.
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    angle - 2.0 * PI * (angle / (2.0 * PI)).round()
}

/// Return the angle equivalent to `raw` that is nearest to `previous`.
#[must_use]
pub fn unwrap_angle(raw: f64, previous: f64) -> f64 {
    if previous.is_finite() {
        previous + wrap_angle(raw - previous)
    } else {
        raw
    }
}

/// Extract the rotation angle about z from a rotation, ignoring any tilt.
fn angle_about_z(rotation: &UnitQuaternion<f64>) -> f64 {
    let r = rotation.to_rotation_matrix();
    let m = r.matrix();
    (m[(1, 0)] - m[(0, 1)]).atan2(m[(0, 0)] + m[(1, 1)])
}

/// Kind of relative motion a joint permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointType {
    /// Rotation about the z axis of D (coordinate: theta).
    Revolute,
    /// Translation along the z axis of D (coordinate: d).
    Prismatic,
    /// Translation along and rotation about z (coordinates: z, theta).
    Cylindrical,
    /// Motion in the xy plane of D (coordinates: x, y, theta).
    Planar,
    /// Ball and socket; no coordinates, origins coincide.
    Spherical,
    /// Rigid connection.
    Fixed,
}

impl JointType {
    /// Number of coordinates the coupling exposes.
    #[must_use]
    pub fn num_coordinates(self) -> usize {
        self.motion_types().len()
    }

    /// Number of bilateral constraint rows.
    #[must_use]
    pub fn num_constraints(self) -> usize {
        self.constraint_wrenches().len()
    }

    /// Motion type of every coordinate, in index order.
    #[must_use]
    pub fn motion_types(self) -> &'static [MotionType] {
        match self {
            Self::Revolute => &[MotionType::Rotary],
            Self::Prismatic => &[MotionType::Linear],
            Self::Cylindrical => &[MotionType::Linear, MotionType::Rotary],
            Self::Planar => &[MotionType::Linear, MotionType::Linear, MotionType::Rotary],
            Self::Spherical | Self::Fixed => &[],
        }
    }

    /// Relative transform `TCD` implied by the given coordinates.
    ///
    /// Missing trailing coordinates are taken as zero.
    #[must_use]
    pub fn coordinates_to_tcd(self, coords: &[f64]) -> Pose {
        let c = |i: usize| coords.get(i).copied().unwrap_or(0.0);
        match self {
            Self::Revolute => Pose::from_xyz_rot_z(0.0, 0.0, 0.0, c(0)),
            Self::Prismatic => Pose::from_xyz_rot_z(0.0, 0.0, c(0), 0.0),
            Self::Cylindrical => Pose::from_xyz_rot_z(0.0, 0.0, c(0), c(1)),
            Self::Planar => Pose::from_xyz_rot_z(c(0), c(1), 0.0, c(2)),
            Self::Spherical | Self::Fixed => Pose::identity(),
        }
    }

    /// Project `tcd` onto the transforms this coupling can represent.
    ///
    /// Returns the coordinates and the projected transform `TGD`. Rotary
    /// coordinates are unwrapped toward the matching entry of `previous`.
    #[must_use]
    pub fn project_tcd(self, tcd: &Pose, previous: &[f64]) -> (Vec<f64>, Pose) {
        let prev = |i: usize| previous.get(i).copied().unwrap_or(f64::NAN);
        let p = tcd.position;
        match self {
            Self::Revolute => {
                let theta = unwrap_angle(angle_about_z(&tcd.rotation), prev(0));
                (vec![theta], Pose::from_xyz_rot_z(0.0, 0.0, 0.0, theta))
            }
            Self::Prismatic => (vec![p.z], Pose::from_xyz_rot_z(0.0, 0.0, p.z, 0.0)),
            Self::Cylindrical => {
                let theta = unwrap_angle(angle_about_z(&tcd.rotation), prev(1));
                (vec![p.z, theta], Pose::from_xyz_rot_z(0.0, 0.0, p.z, theta))
            }
            Self::Planar => {
                let theta = unwrap_angle(angle_about_z(&tcd.rotation), prev(2));
                (vec![p.x, p.y, theta], Pose::from_xyz_rot_z(p.x, p.y, 0.0, theta))
            }
            Self::Spherical => (
                Vec::new(),
                Pose::from_position_rotation(Point3::origin(), tcd.rotation),
            ),
            Self::Fixed => (Vec::new(), Pose::identity()),
        }
    }

    /// Coordinate wrenches in frame G for the given coordinate values.
    #[must_use]
    pub fn coordinate_wrenches(self, coords: &[f64]) -> Vec<Wrench> {
        match self {
            Self::Revolute => vec![Wrench::moment(Vector3::z())],
            Self::Prismatic => vec![Wrench::force(Vector3::z())],
            Self::Cylindrical => vec![Wrench::force(Vector3::z()), Wrench::moment(Vector3::z())],
            Self::Planar => {
                // G is rotated by theta relative to D; x and y are D-frame directions
                let theta = coords.get(2).copied().unwrap_or(0.0);
                let (s, c) = theta.sin_cos();
                vec![
                    Wrench::force(Vector3::new(c, -s, 0.0)),
                    Wrench::force(Vector3::new(s, c, 0.0)),
                    Wrench::moment(Vector3::z()),
                ]
            }
            Self::Spherical | Self::Fixed => Vec::new(),
        }
    }

    /// Bilateral constraint wrenches in frame G.
    #[must_use]
    pub fn constraint_wrenches(self) -> Vec<Wrench> {
        let fx = Wrench::force(Vector3::x());
        let fy = Wrench::force(Vector3::y());
        let fz = Wrench::force(Vector3::z());
        let mx = Wrench::moment(Vector3::x());
        let my = Wrench::moment(Vector3::y());
        let mz = Wrench::moment(Vector3::z());
        match self {
            Self::Revolute => vec![fx, fy, fz, mx, my],
            Self::Prismatic => vec![fx, fy, mx, my, mz],
            Self::Cylindrical => vec![fx, fy, mx, my],
            Self::Planar => vec![fz, mx, my],
            Self::Spherical => vec![fx, fy, fz],
            Self::Fixed => vec![fx, fy, fz, mx, my, mz],
        }
    }
}

impl std::fmt::Display for JointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Revolute => "revolute",
            Self::Prismatic => "prismatic",
            Self::Cylindrical => "cylindrical",
            Self::Planar => "planar",
            Self::Spherical => "spherical",
            Self::Fixed => "fixed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wrap_and_unwrap() {
        assert_relative_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.1), -0.1, epsilon = 1e-15);
        // raw -170 deg next to previous 170 deg unwraps to 190 deg
        let raw = (-170f64).to_radians();
        let prev = 170f64.to_radians();
        assert_relative_eq!(unwrap_angle(raw, prev), 190f64.to_radians(), epsilon = 1e-12);
        assert_eq!(unwrap_angle(0.5, f64::NAN), 0.5);
    }

    #[test]
    fn test_counts() {
        for ty in [
            JointType::Revolute,
            JointType::Prismatic,
            JointType::Cylindrical,
            JointType::Planar,
            JointType::Spherical,
            JointType::Fixed,
        ] {
            let free = if ty == JointType::Spherical { 3 } else { 0 };
            assert_eq!(ty.num_coordinates() + ty.num_constraints() + free, 6, "{ty}");
            assert_eq!(ty.coordinate_wrenches(&[0.0; 3]).len(), ty.num_coordinates());
        }
    }

    #[test]
    fn test_revolute_projection() {
        let tcd = JointType::Revolute.coordinates_to_tcd(&[0.8]);
        let (coords, tgd) = JointType::Revolute.project_tcd(&tcd, &[0.7]);
        assert_relative_eq!(coords[0], 0.8, epsilon = 1e-12);
        let (dp, da) = tgd.distance_to(&tcd);
        assert_relative_eq!(dp, 0.0, epsilon = 1e-12);
        assert_relative_eq!(da, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_drops_off_manifold_motion() {
        // a prismatic joint displaced sideways keeps only the z component
        let tcd = Pose::from_xyz_rot_z(0.1, -0.2, 0.5, 0.05);
        let (coords, tgd) = JointType::Prismatic.project_tcd(&tcd, &[0.0]);
        assert_relative_eq!(coords[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(tgd.position.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(tgd.rotation.angle(), 0.0, epsilon = 1e-12);

        let (coords, _) = JointType::Planar.project_tcd(&tcd, &[0.0, 0.0, 0.0]);
        assert_relative_eq!(coords[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(coords[1], -0.2, epsilon = 1e-12);
        assert_relative_eq!(coords[2], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_planar_wrenches_follow_theta() {
        let theta = 0.4;
        let w = JointType::Planar.coordinate_wrenches(&[0.0, 0.0, theta]);
        // expressed back in D through the rotation of G they are the D axes
        let rot = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta);
        let x_in_d = rot * w[0].force;
        let y_in_d = rot * w[1].force;
        assert_relative_eq!(x_in_d, Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(y_in_d, Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_wrench_dot_twist() {
        let w = Wrench::new(Vector3::x(), Vector3::z()).scaled(2.0);
        assert_relative_eq!(
            w.dot_twist(&Vector3::new(1.0, 5.0, 0.0), &Vector3::new(0.0, 0.0, 0.5)),
            3.0,
            epsilon = 1e-12
        );
    }
}
