//! Joints connecting two bodies through a coupling.

use nalgebra::{UnitQuaternion, Vector3};
use sim_types::{BodyId, CoordinateRange, JointCoordinateHandle, JointId, Pose, Result, SimError};

use crate::{Coordinate, JointType};

/// A joint between body A and body B (or ground).
///
/// Frame C is fixed to body A at `TCA`; frame D is fixed to body B at `TDB`
/// (or to the world when B is ground). The joint's coordinates parameterize
/// the relative transform `TCD`.
///
/// # Example
///
/// ```
/// use sim_constraint::{Joint, JointType};
/// use sim_types::{BodyId, CoordinateRange, JointId, Pose};
///
/// let joint = Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(1), None)
///     .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0))
///     .with_range(0, CoordinateRange::degrees(-90.0, 90.0));
///
/// assert_eq!(joint.body_b(), BodyId::GROUND);
/// assert_eq!(joint.num_coordinates(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Joint {
    id: JointId,
    joint_type: JointType,
    body_a: BodyId,
    body_b: Option<BodyId>,
    tca: Pose,
    tdb: Pose,
    coordinates: Vec<Coordinate>,
    tcw: Pose,
    tdw: Pose,
    tcd: Pose,
    tgd: Pose,
}

impl Joint {
    /// Create a joint. A missing `body_b` connects body A to ground.
    #[must_use]
    pub fn new(id: JointId, joint_type: JointType, body_a: BodyId, body_b: Option<BodyId>) -> Self {
        Self {
            id,
            joint_type,
            body_a,
            body_b: body_b.filter(|b| !b.is_ground()),
            tca: Pose::identity(),
            tdb: Pose::identity(),
            coordinates: joint_type
                .motion_types()
                .iter()
                .map(|&m| Coordinate::new(m))
                .collect(),
            tcw: Pose::identity(),
            tdw: Pose::identity(),
            tcd: Pose::identity(),
            tgd: Pose::identity(),
        }
    }

    /// Set the pose of frame C in body A.
    #[must_use]
    pub fn with_frame_a(mut self, tca: Pose) -> Self {
        self.tca = tca;
        self
    }

    /// Set the pose of frame D in body B (in world when B is ground).
    #[must_use]
    pub fn with_frame_b(mut self, tdb: Pose) -> Self {
        self.tdb = tdb;
        self
    }

    /// Set the range of coordinate `index`. Ignored if out of bounds.
    #[must_use]
    pub fn with_range(mut self, index: usize, range: CoordinateRange) -> Self {
        if let Some(c) = self.coordinates.get_mut(index) {
            c.set_range(range);
        }
        self
    }

    /// Joint id.
    #[must_use]
    pub fn id(&self) -> JointId {
        self.id
    }

    /// Coupling type.
    #[must_use]
    pub fn joint_type(&self) -> JointType {
        self.joint_type
    }

    /// Body A.
    #[must_use]
    pub fn body_a(&self) -> BodyId {
        self.body_a
    }

    /// Body B, or [`BodyId::GROUND`] when the joint attaches to the world.
    #[must_use]
    pub fn body_b(&self) -> BodyId {
        BodyId::or_ground(self.body_b)
    }

    /// Both bodies, A first.
    #[must_use]
    pub fn bodies(&self) -> [BodyId; 2] {
        [self.body_a, self.body_b()]
    }

    /// Check whether the joint touches `body`.
    #[must_use]
    pub fn involves(&self, body: BodyId) -> bool {
        self.body_a == body || self.body_b() == body
    }

    /// The body across the joint from `body`.
    #[must_use]
    pub fn other_body(&self, body: BodyId) -> Option<BodyId> {
        if body == self.body_a {
            Some(self.body_b())
        } else if body == self.body_b() {
            Some(self.body_a)
        } else {
            None
        }
    }

    /// Pose of frame C in body A.
    #[must_use]
    pub fn frame_a(&self) -> &Pose {
        &self.tca
    }

    /// Pose of frame D in body B.
    #[must_use]
    pub fn frame_b(&self) -> &Pose {
        &self.tdb
    }

    /// World pose of frame C as of the last update.
    #[must_use]
    pub fn tcw(&self) -> &Pose {
        &self.tcw
    }

    /// World pose of frame D as of the last update.
    #[must_use]
    pub fn tdw(&self) -> &Pose {
        &self.tdw
    }

    /// Relative transform of C with respect to D.
    #[must_use]
    pub fn tcd(&self) -> &Pose {
        &self.tcd
    }

    /// `TCD` projected onto the coupling.
    #[must_use]
    pub fn tgd(&self) -> &Pose {
        &self.tgd
    }

    /// World orientation of frame G, in which wrenches are expressed.
    #[must_use]
    pub fn rotation_gw(&self) -> UnitQuaternion<f64> {
        self.tdw.rotation * self.tgd.rotation
    }

    /// Number of coordinates.
    #[must_use]
    pub fn num_coordinates(&self) -> usize {
        self.coordinates.len()
    }

    /// Coordinate `index`.
    #[must_use]
    pub fn coordinate(&self, index: usize) -> Option<&Coordinate> {
        self.coordinates.get(index)
    }

    pub(crate) fn coordinate_mut(&mut self, index: usize) -> Result<&mut Coordinate> {
        let num_coordinates = self.coordinates.len();
        self.coordinates
            .get_mut(index)
            .ok_or(SimError::InvalidCoordinate {
                joint: self.id,
                index,
                num_coordinates,
            })
    }

    /// All coordinates.
    #[must_use]
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    /// Current coordinate values.
    #[must_use]
    pub fn coordinate_values(&self) -> Vec<f64> {
        self.coordinates.iter().map(Coordinate::value).collect()
    }

    /// Handles of all coordinates, in index order.
    #[must_use]
    pub fn handles(&self) -> Vec<JointCoordinateHandle> {
        (0..self.coordinates.len())
            .map(|i| JointCoordinateHandle::new(self.id, i))
            .collect()
    }

    /// Residual `inv(TGD) * TCD` as (translation, rotation vector).
    #[must_use]
    pub fn constraint_error(&self) -> (Vector3<f64>, Vector3<f64>) {
        let err = self.tgd.inverse().compose(&self.tcd);
        (err.position.coords, err.rotation.scaled_axis())
    }

    /// `TCD` implied by the current coordinate values.
    #[must_use]
    pub fn coordinates_to_tcd(&self) -> Pose {
        self.joint_type.coordinates_to_tcd(&self.coordinate_values())
    }

    /// Recompute frames and coordinates from the body poses.
    pub(crate) fn update_frames(&mut self, pose_a: &Pose, pose_b: &Pose) {
        self.tcw = pose_a.compose(&self.tca);
        self.tdw = pose_b.compose(&self.tdb);
        self.tcd = self.tdw.inverse().compose(&self.tcw);
        let (coords, tgd) = self
            .joint_type
            .project_tcd(&self.tcd, &self.coordinate_values());
        for (c, v) in self.coordinates.iter_mut().zip(coords) {
            c.set_value(v);
        }
        self.tgd = tgd;
    }

    /// Assign coordinate values without moving any body.
    ///
    /// Values are clipped to their ranges; `TCD` and `TGD` follow the new
    /// values so that callers can read the implied relative transform.
    pub(crate) fn assign_coordinates(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.coordinates.len() {
            return Err(SimError::size_mismatch(
                format!("coordinates of {}", self.id),
                self.coordinates.len(),
                values.len(),
            ));
        }
        for (c, &v) in self.coordinates.iter_mut().zip(values) {
            c.assign(v);
        }
        self.tcd = self.coordinates_to_tcd();
        self.tgd = self.tcd;
        Ok(())
    }

    /// Update limit engagement of every coordinate.
    pub(crate) fn update_engagement(&mut self) {
        for c in &mut self.coordinates {
            c.update_engagement();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ground_body_b() {
        let j = Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(2), None);
        assert_eq!(j.body_b(), BodyId::GROUND);
        assert!(j.involves(BodyId::GROUND));
        assert_eq!(j.other_body(BodyId::GROUND), Some(BodyId::new(2)));
        assert_eq!(j.other_body(BodyId::new(7)), None);

        let explicit = Joint::new(
            JointId::new(1),
            JointType::Revolute,
            BodyId::new(2),
            Some(BodyId::GROUND),
        );
        assert_eq!(explicit.body_b(), BodyId::GROUND);
    }

    #[test]
    fn test_update_frames_reads_coordinate() {
        let mut j = Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(1), None)
            .with_frame_a(Pose::from_xyz_rot_z(-1.0, 0.0, 0.0, 0.0));
        // body A rotated 30 degrees about the origin of C
        let angle = 30f64.to_radians();
        let pose_a = Pose::from_xyz_rot_z(angle.cos(), angle.sin(), 0.0, angle);
        j.update_frames(&pose_a, &Pose::identity());
        assert_relative_eq!(j.coordinate(0).unwrap().value(), angle, epsilon = 1e-12);
        let (t, r) = j.constraint_error();
        assert_relative_eq!(t.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constraint_error_for_misaligned_frames() {
        let mut j = Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(1), None);
        j.update_frames(&Pose::from_xyz_rot_z(0.0, 0.2, 0.0, 0.0), &Pose::identity());
        let (t, _) = j.constraint_error();
        assert_relative_eq!(t.y, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_assign_coordinates() {
        let mut j = Joint::new(JointId::new(3), JointType::Prismatic, BodyId::new(1), None)
            .with_range(0, CoordinateRange::new(0.0, 1.0));
        j.assign_coordinates(&[2.0]).unwrap();
        assert_eq!(j.coordinate_values(), vec![1.0]);
        assert_relative_eq!(j.tcd().position.z, 1.0, epsilon = 1e-12);

        let err = j.assign_coordinates(&[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, SimError::SizeMismatch { .. }));
        assert!(j.coordinate_mut(1).is_err());
        assert_eq!(j.handles(), vec![JointCoordinateHandle::new(JointId::new(3), 0)]);
    }
}
