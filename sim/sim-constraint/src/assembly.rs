//! Constraint assembly over a subset of bodies.
//!
//! Builds, for a chosen set of bodies and constrainers, the bilateral
//! matrix `G`, the unilateral matrix `N` and the raw coordinate Jacobian
//! transpose `JT`. Velocities are stacked six per body as `[v; w]` in the
//! world frame, with `v` the velocity of the body origin. Ground and bodies
//! outside the set are treated as fixed.
//!
//! Sign conventions: a row `r` with distance `d` asks for `r . dq = -d`
//! (bilateral) or `r . dq >= -d` (unilateral).

use hashbrown::HashMap;
use nalgebra::{DMatrix, DVector, Point3, Vector3};
use sim_types::{BodyId, ConstraintId, JointCoordinateHandle, JointId, Pose, Result, SimError};
use tracing::trace;

use crate::{ConstrainerId, ExtraConstraint, Joint, LimitEngagement, MechModel, Wrench};

/// Where a constraint row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowInfo {
    /// Owning constrainer.
    pub source: ConstrainerId,
    /// Whether the row holds a locked coordinate.
    pub coord_lock: bool,
}

/// Row layout of the assembled constraints, used to detect when a
/// factorization has to be re-analyzed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSignature {
    /// Bilateral rows.
    pub bilateral: Vec<RowInfo>,
    /// Unilateral rows.
    pub unilateral: Vec<RowInfo>,
}

/// Assembled constraint state for a set of bodies.
#[derive(Debug, Clone)]
pub struct ConstraintAssembly {
    bodies: Vec<BodyId>,
    body_index: HashMap<BodyId, usize>,
    joints: Vec<JointId>,
    extras: Vec<ConstraintId>,
    handles: Vec<JointCoordinateHandle>,
    g: DMatrix<f64>,
    bg: DVector<f64>,
    g_rows: Vec<RowInfo>,
    n: DMatrix<f64>,
    bn: DVector<f64>,
    n_rows: Vec<RowInfo>,
    jt: DMatrix<f64>,
    values: DVector<f64>,
    engagement: Vec<LimitEngagement>,
}

impl ConstraintAssembly {
    /// Set up an assembly. Ground in `bodies` is ignored.
    ///
    /// Coordinates are numbered in joint order, then index order.
    pub fn new(
        model: &MechModel,
        bodies: &[BodyId],
        joints: &[JointId],
        extras: &[ConstraintId],
    ) -> Result<Self> {
        let mut list = Vec::with_capacity(bodies.len());
        let mut body_index = HashMap::new();
        for &b in bodies.iter().filter(|b| !b.is_ground()) {
            model.body(b)?;
            if !body_index.contains_key(&b) {
                body_index.insert(b, list.len());
                list.push(b);
            }
        }
        let mut handles = Vec::new();
        for &j in joints {
            handles.extend(model.joint(j)?.handles());
        }
        for &c in extras {
            model.constraint(c)?;
        }
        let ndof = 6 * list.len();
        let nc = handles.len();
        Ok(Self {
            bodies: list,
            body_index,
            joints: joints.to_vec(),
            extras: extras.to_vec(),
            handles,
            g: DMatrix::zeros(0, ndof),
            bg: DVector::zeros(0),
            g_rows: Vec::new(),
            n: DMatrix::zeros(0, ndof),
            bn: DVector::zeros(0),
            n_rows: Vec::new(),
            jt: DMatrix::zeros(ndof, nc),
            values: DVector::zeros(nc),
            engagement: vec![LimitEngagement::Free; nc],
        })
    }

    /// Bodies with velocity unknowns, in solve index order.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Solve index of a body, if it moves.
    #[must_use]
    pub fn body_solve_index(&self, body: BodyId) -> Option<usize> {
        self.body_index.get(&body).copied()
    }

    /// Joints whose rows are assembled.
    #[must_use]
    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    /// Number of velocity unknowns.
    #[must_use]
    pub fn velocity_size(&self) -> usize {
        6 * self.bodies.len()
    }

    /// Handles of all coordinates; column `k` of `JT` belongs to entry `k`.
    #[must_use]
    pub fn coordinate_handles(&self) -> &[JointCoordinateHandle] {
        &self.handles
    }

    /// Column of a coordinate in `JT`.
    #[must_use]
    pub fn coordinate_index(&self, handle: JointCoordinateHandle) -> Option<usize> {
        self.handles.iter().position(|&h| h == handle)
    }

    /// Bilateral matrix, offsets and row info.
    #[must_use]
    pub fn bilateral(&self) -> (&DMatrix<f64>, &DVector<f64>, &[RowInfo]) {
        (&self.g, &self.bg, &self.g_rows)
    }

    /// Unilateral matrix and offsets.
    #[must_use]
    pub fn unilateral(&self) -> (&DMatrix<f64>, &DVector<f64>) {
        (&self.n, &self.bn)
    }

    /// Coordinate Jacobian transpose: `qdot = JT^T * v`.
    #[must_use]
    pub fn coordinate_jacobian(&self) -> &DMatrix<f64> {
        &self.jt
    }

    /// Coordinate values as of the last update.
    #[must_use]
    pub fn coordinate_values(&self) -> &DVector<f64> {
        &self.values
    }

    /// Limit engagement of each coordinate as of the last update.
    #[must_use]
    pub fn limit_engagement(&self) -> &[LimitEngagement] {
        &self.engagement
    }

    /// Current row layout.
    #[must_use]
    pub fn gt_signature(&self) -> ConstraintSignature {
        ConstraintSignature {
            bilateral: self.g_rows.clone(),
            unilateral: self.n_rows.clone(),
        }
    }

    /// Refresh joint state from body poses and rebuild every matrix.
    pub fn update_constraints(&mut self, model: &mut MechModel) -> Result<()> {
        for &j in &self.joints {
            model.update_joint_state(j)?;
        }

        let ndof = self.velocity_size();
        let mut g_rows: Vec<(DVector<f64>, f64, RowInfo)> = Vec::new();
        let mut n_rows: Vec<(DVector<f64>, f64, RowInfo)> = Vec::new();
        let mut columns = Vec::with_capacity(self.handles.len());
        let mut values = Vec::with_capacity(self.handles.len());
        let mut engagement = Vec::with_capacity(self.handles.len());

        for &jid in &self.joints {
            let joint = model.joint(jid)?;
            let source = ConstrainerId::Joint(jid);
            let rot = joint.rotation_gw();
            let (err_t, err_r) = joint.constraint_error();

            for w in joint.joint_type().constraint_wrenches() {
                let dist = w.force.dot(&err_t) + w.moment.dot(&err_r);
                let row = self.joint_row(model, joint, &w.rotated(&rot))?;
                g_rows.push((row, dist, RowInfo { source, coord_lock: false }));
            }

            let wrenches = joint.joint_type().coordinate_wrenches(&joint.coordinate_values());
            for (coord, w) in joint.coordinates().iter().zip(wrenches) {
                let row = self.joint_row(model, joint, &w.rotated(&rot))?;
                if coord.is_locked() {
                    let dist = coord.value() - coord.locked_value();
                    g_rows.push((row.clone(), dist, RowInfo { source, coord_lock: true }));
                }
                match coord.limit_engagement() {
                    LimitEngagement::Free => {}
                    LimitEngagement::Lower => {
                        let dist = coord.value() - coord.range().lower();
                        n_rows.push((row.clone(), dist, RowInfo { source, coord_lock: false }));
                    }
                    LimitEngagement::Upper => {
                        let dist = coord.range().upper() - coord.value();
                        n_rows.push((-&row, dist, RowInfo { source, coord_lock: false }));
                    }
                }
                values.push(coord.value());
                engagement.push(coord.limit_engagement());
                columns.push(row);
            }
        }

        for &cid in &self.extras {
            let source = ConstrainerId::Constraint(cid);
            match model.constraint(cid)? {
                ExtraConstraint::CoordinateCoupling { a, b, ratio, offset } => {
                    let (row_a, qa) = self.coordinate_row(model, *a)?;
                    let (row_b, qb) = self.coordinate_row(model, *b)?;
                    let dist = qa - ratio * qb - offset;
                    g_rows.push((row_a - row_b * *ratio, dist, RowInfo { source, coord_lock: false }));
                }
                ExtraConstraint::FixedPoint { body, local, target } => {
                    let pose = model.body_pose(*body)?;
                    let p = pose.transform_point(local);
                    for e in [Vector3::x(), Vector3::y(), Vector3::z()] {
                        let mut row = DVector::zeros(ndof);
                        self.add_body_row(&mut row, *body, &pose, &Wrench::force(e), &p, 1.0);
                        let dist = (p - target).dot(&e);
                        g_rows.push((row, dist, RowInfo { source, coord_lock: false }));
                    }
                }
            }
        }

        self.g = stack_rows(&g_rows, ndof);
        self.bg = DVector::from_iterator(g_rows.len(), g_rows.iter().map(|r| -r.1));
        self.g_rows = g_rows.iter().map(|r| r.2).collect();
        self.n = stack_rows(&n_rows, ndof);
        self.bn = DVector::from_iterator(n_rows.len(), n_rows.iter().map(|r| -r.1));
        self.n_rows = n_rows.iter().map(|r| r.2).collect();
        self.jt = if columns.is_empty() {
            DMatrix::zeros(ndof, 0)
        } else {
            DMatrix::from_columns(&columns)
        };
        self.values = DVector::from_vec(values);
        self.engagement = engagement;
        trace!(
            bilateral = self.g.nrows(),
            unilateral = self.n.nrows(),
            coordinates = self.handles.len(),
            "updated constraints"
        );
        Ok(())
    }

    /// Row of a joint wrench (already in world orientation) over all bodies.
    fn joint_row(&self, model: &MechModel, joint: &Joint, w: &Wrench) -> Result<DVector<f64>> {
        let mut row = DVector::zeros(self.velocity_size());
        let point = joint.tcw().position;
        let pose_a = model.body_pose(joint.body_a())?;
        let pose_b = model.body_pose(joint.body_b())?;
        self.add_body_row(&mut row, joint.body_a(), &pose_a, w, &point, 1.0);
        self.add_body_row(&mut row, joint.body_b(), &pose_b, w, &point, -1.0);
        Ok(row)
    }

    /// Coordinate row and value for any coordinate, assembled or not.
    fn coordinate_row(
        &self,
        model: &MechModel,
        handle: JointCoordinateHandle,
    ) -> Result<(DVector<f64>, f64)> {
        let joint = model.joint(handle.joint)?;
        let wrenches = joint.joint_type().coordinate_wrenches(&joint.coordinate_values());
        let w = wrenches.get(handle.index).ok_or(SimError::InvalidCoordinate {
            joint: handle.joint,
            index: handle.index,
            num_coordinates: wrenches.len(),
        })?;
        let row = self.joint_row(model, joint, &w.rotated(&joint.rotation_gw()))?;
        Ok((row, joint.coordinate_values()[handle.index]))
    }

    /// Add `sign * [f; r x f + m]` to the block of `body`, with `r` from the
    /// body origin to `point`.
    fn add_body_row(
        &self,
        row: &mut DVector<f64>,
        body: BodyId,
        pose: &Pose,
        w: &Wrench,
        point: &Point3<f64>,
        sign: f64,
    ) {
        let Some(&i) = self.body_index.get(&body) else {
            return;
        };
        let r = point - pose.position;
        let lin = w.force * sign;
        let ang = (r.cross(&w.force) + w.moment) * sign;
        for k in 0..3 {
            row[6 * i + k] += lin[k];
            row[6 * i + 3 + k] += ang[k];
        }
    }

    /// Advance body poses by `dq * scale`.
    pub fn integrate(&self, model: &mut MechModel, dq: &DVector<f64>, scale: f64) -> Result<()> {
        if dq.len() != self.velocity_size() {
            return Err(SimError::size_mismatch("body velocity", self.velocity_size(), dq.len()));
        }
        for (i, &b) in self.bodies.iter().enumerate() {
            let v = Vector3::new(dq[6 * i], dq[6 * i + 1], dq[6 * i + 2]);
            let w = Vector3::new(dq[6 * i + 3], dq[6 * i + 4], dq[6 * i + 5]);
            let pose = model.body_pose(b)?.integrate(&v, &w, scale);
            model.set_body_pose(b, pose)?;
        }
        Ok(())
    }

    /// Current poses of the assembled bodies.
    pub fn body_poses(&self, model: &MechModel) -> Result<Vec<Pose>> {
        self.bodies.iter().map(|&b| model.body_pose(b)).collect()
    }

    /// Restore poses captured by [`body_poses`](Self::body_poses).
    pub fn restore_poses(&self, model: &mut MechModel, poses: &[Pose]) -> Result<()> {
        if poses.len() != self.bodies.len() {
            return Err(SimError::size_mismatch("saved poses", self.bodies.len(), poses.len()));
        }
        for (&b, pose) in self.bodies.iter().zip(poses) {
            model.set_body_pose(b, *pose)?;
        }
        Ok(())
    }

    /// Refresh attachments of every assembled joint.
    pub fn update_attachments(&self, model: &mut MechModel) -> Result<()> {
        for &j in &self.joints {
            model.update_attachments(j)?;
        }
        Ok(())
    }
}

fn stack_rows(rows: &[(DVector<f64>, f64, RowInfo)], ncols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i].0[j])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::{JointType, RigidBody};
    use approx::assert_relative_eq;
    use sim_types::CoordinateRange;

    /// Single pendulum link of length 1 hinged to ground at the origin.
    fn pendulum() -> MechModel {
        let mut model = MechModel::new();
        model
            .add_body(RigidBody::new(BodyId::new(0), Pose::from_xyz_rot_z(0.5, 0.0, 0.0, 0.0)))
            .unwrap();
        model
            .add_joint(
                Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(0), None)
                    .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0))
                    .with_range(0, CoordinateRange::new(-1.0, 1.0)),
            )
            .unwrap();
        model
    }

    fn assembly(model: &mut MechModel) -> ConstraintAssembly {
        let mut asm =
            ConstraintAssembly::new(model, &[BodyId::new(0)], &[JointId::new(0)], &[]).unwrap();
        asm.update_constraints(model).unwrap();
        asm
    }

    #[test]
    fn test_dimensions() {
        let mut model = pendulum();
        let asm = assembly(&mut model);
        let (g, bg, rows) = asm.bilateral();
        assert_eq!(g.shape(), (5, 6));
        assert_eq!(bg.len(), 5);
        assert!(rows.iter().all(|r| !r.coord_lock));
        assert_eq!(asm.coordinate_jacobian().shape(), (6, 1));
        assert_eq!(asm.unilateral().0.nrows(), 0);
        assert_relative_eq!(bg.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_about_pivot_satisfies_constraints() {
        let mut model = pendulum();
        let asm = assembly(&mut model);
        // rigid rotation about the pivot: v = w x (p - pivot)
        let w = 0.7;
        let dq = DVector::from_vec(vec![0.0, 0.5 * w, 0.0, 0.0, 0.0, w]);
        let (g, _, _) = asm.bilateral();
        assert_relative_eq!((g * &dq).norm(), 0.0, epsilon = 1e-12);
        let qdot = asm.coordinate_jacobian().transpose() * &dq;
        assert_relative_eq!(qdot[0], w, epsilon = 1e-12);
    }

    #[test]
    fn test_integrate_and_restore() {
        let mut model = pendulum();
        let mut asm = assembly(&mut model);
        let saved = asm.body_poses(&model).unwrap();
        let dq = DVector::from_vec(vec![0.0, 0.05, 0.0, 0.0, 0.0, 0.1]);
        asm.integrate(&mut model, &dq, 1.0).unwrap();
        asm.update_constraints(&mut model).unwrap();
        assert_relative_eq!(asm.coordinate_values()[0], 0.1, epsilon = 1e-3);

        asm.restore_poses(&mut model, &saved).unwrap();
        asm.update_constraints(&mut model).unwrap();
        assert_relative_eq!(asm.coordinate_values()[0], 0.0, epsilon = 1e-12);
        assert!(asm.integrate(&mut model, &DVector::zeros(3), 1.0).is_err());
    }

    #[test]
    fn test_lock_and_limit_rows() {
        let mut model = pendulum();
        let handle = JointCoordinateHandle::new(JointId::new(0), 0);
        model.coordinate_mut(handle).unwrap().set_locked(true);
        model.coordinate_mut(handle).unwrap().set_locked_value(0.25);
        let asm = assembly(&mut model);
        let (g, bg, rows) = asm.bilateral();
        assert_eq!(g.nrows(), 6);
        assert!(rows[5].coord_lock);
        assert_relative_eq!(bg[5], 0.25, epsilon = 1e-12);

        // rotate past the upper bound
        let mut model = pendulum();
        let t = Pose::from_xyz_rot_z(0.0, 0.0, 0.0, 1.2);
        model.transform_body_pose(BodyId::new(0), &t).unwrap();
        let asm = assembly(&mut model);
        assert_eq!(asm.limit_engagement()[0], LimitEngagement::Upper);
        let (n, bn) = asm.unilateral();
        assert_eq!(n.nrows(), 1);
        // -qdot >= -(max - value) = 0.2
        assert_relative_eq!(bn[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(n[(0, 5)], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_point_rows() {
        let mut model = pendulum();
        model
            .add_constraint(ExtraConstraint::FixedPoint {
                body: BodyId::new(0),
                local: Point3::new(0.5, 0.0, 0.0),
                target: Point3::new(1.0, 0.1, 0.0),
            })
            .unwrap();
        let mut asm = ConstraintAssembly::new(
            &model,
            &[BodyId::new(0), BodyId::GROUND],
            &[JointId::new(0)],
            &[ConstraintId::new(0)],
        )
        .unwrap();
        asm.update_constraints(&mut model).unwrap();
        assert_eq!(asm.bodies(), &[BodyId::new(0)]);
        let (g, bg, rows) = asm.bilateral();
        assert_eq!(g.nrows(), 8);
        assert_eq!(rows[5].source, ConstrainerId::Constraint(ConstraintId::new(0)));
        // tip is 0.1 below the target in y
        assert_relative_eq!(bg[6], 0.1, epsilon = 1e-12);
    }
}
