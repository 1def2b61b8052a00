//! Mechanism model: an arena of bodies, joints and extra constraints.
//!
//! Ground is not stored. It is the sentinel [`BodyId::GROUND`] with the
//! identity pose, and any joint without a body B attaches to it.

use hashbrown::HashMap;
use nalgebra::Point3;
use sim_types::{BodyId, ConstraintId, JointCoordinateHandle, JointId, Pose, Result, SimError};
use tracing::debug;

use crate::{ConstrainerId, Coordinate, ExtraConstraint, Joint};

/// A rigid body in the mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    id: BodyId,
    name: String,
    pose: Pose,
    grounded: bool,
    dynamic: bool,
}

impl RigidBody {
    /// Create a dynamic, ungrounded body.
    #[must_use]
    pub fn new(id: BodyId, pose: Pose) -> Self {
        Self {
            id,
            name: format!("body{}", id.raw()),
            pose,
            grounded: false,
            dynamic: true,
        }
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the body as grounded (preferred as a tree root).
    #[must_use]
    pub fn grounded(mut self) -> Self {
        self.grounded = true;
        self
    }

    /// Mark the body as non-dynamic (parametrically driven).
    #[must_use]
    pub fn non_dynamic(mut self) -> Self {
        self.dynamic = false;
        self
    }

    /// Body id; its raw value is the body number.
    #[must_use]
    pub fn id(&self) -> BodyId {
        self.id
    }

    /// Body name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// World pose.
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Whether the body is marked grounded.
    #[must_use]
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Whether the body is dynamic.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

/// Arena of bodies and constrainers.
///
/// Every structural change (adding or removing a body, joint or
/// constraint) bumps [`MechModel::structure_version`], which downstream
/// caches compare to decide when to rebuild.
///
/// # Example
///
/// ```
/// use sim_constraint::{Joint, JointType, MechModel, RigidBody};
/// use sim_types::{BodyId, JointId, Pose};
///
/// let mut model = MechModel::new();
/// let link = model.add_body(RigidBody::new(BodyId::new(0), Pose::identity())).unwrap();
/// let hinge = model
///     .add_joint(Joint::new(JointId::new(0), JointType::Revolute, link, None))
///     .unwrap();
///
/// assert_eq!(model.structure_version(), 2);
/// assert_eq!(model.joints_for_body(BodyId::GROUND), vec![hinge]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MechModel {
    bodies: Vec<RigidBody>,
    body_index: HashMap<BodyId, usize>,
    joints: Vec<Joint>,
    joint_index: HashMap<JointId, usize>,
    constraints: Vec<(ConstraintId, ExtraConstraint)>,
    constraint_index: HashMap<ConstraintId, usize>,
    next_constraint: u64,
    structure_version: u64,
    model_size: f64,
}

impl MechModel {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter bumped on every structural change.
    #[must_use]
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    // ------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------

    /// Add a body. Ground and duplicate ids are rejected.
    pub fn add_body(&mut self, body: RigidBody) -> Result<BodyId> {
        let id = body.id;
        if id.is_ground() {
            return Err(SimError::InvalidBodyId(id));
        }
        if self.body_index.contains_key(&id) {
            return Err(SimError::duplicate_id(id));
        }
        self.body_index.insert(id, self.bodies.len());
        self.bodies.push(body);
        self.structure_version += 1;
        Ok(id)
    }

    /// Look up a body.
    pub fn body(&self, id: BodyId) -> Result<&RigidBody> {
        self.body_index
            .get(&id)
            .map(|&i| &self.bodies[i])
            .ok_or(SimError::InvalidBodyId(id))
    }

    /// Check whether `id` is ground or a stored body.
    #[must_use]
    pub fn has_body(&self, id: BodyId) -> bool {
        id.is_ground() || self.body_index.contains_key(&id)
    }

    /// All stored bodies, in insertion order.
    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter()
    }

    /// Number of stored bodies (ground excluded).
    #[must_use]
    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// World pose of a body; ground is the identity.
    pub fn body_pose(&self, id: BodyId) -> Result<Pose> {
        if id.is_ground() {
            return Ok(Pose::identity());
        }
        self.body(id).map(|b| b.pose)
    }

    /// Set the world pose of a body. Attachments are not refreshed.
    pub fn set_body_pose(&mut self, id: BodyId, pose: Pose) -> Result<()> {
        let i = *self.body_index.get(&id).ok_or(SimError::InvalidBodyId(id))?;
        self.bodies[i].pose = pose;
        Ok(())
    }

    /// Pre-multiply a body's pose by a world transform: `TBW <- T * TBW`.
    pub fn transform_body_pose(&mut self, id: BodyId, t: &Pose) -> Result<()> {
        let i = *self.body_index.get(&id).ok_or(SimError::InvalidBodyId(id))?;
        let body = &mut self.bodies[i];
        body.pose = body.pose.transformed_by(t);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Joints
    // ------------------------------------------------------------------

    /// Add a joint. Both bodies must exist and body A may not be ground.
    pub fn add_joint(&mut self, joint: Joint) -> Result<JointId> {
        let id = joint.id();
        if self.joint_index.contains_key(&id) {
            return Err(SimError::duplicate_id(id));
        }
        if joint.body_a().is_ground() || !self.has_body(joint.body_a()) {
            return Err(SimError::InvalidBodyId(joint.body_a()));
        }
        if !self.has_body(joint.body_b()) {
            return Err(SimError::InvalidBodyId(joint.body_b()));
        }
        self.joint_index.insert(id, self.joints.len());
        self.joints.push(joint);
        self.structure_version += 1;
        self.update_attachments(id)?;
        Ok(id)
    }

    /// Remove a joint and any coupling constraint that references it.
    pub fn remove_joint(&mut self, id: JointId) -> Result<Joint> {
        let i = *self.joint_index.get(&id).ok_or(SimError::InvalidJointId(id))?;
        let joint = self.joints.remove(i);
        self.joint_index = index_of(&self.joints, Joint::id);
        let dependent: Vec<ConstraintId> = self
            .constraints
            .iter()
            .filter(|(_, c)| match c {
                ExtraConstraint::CoordinateCoupling { a, b, .. } => a.joint == id || b.joint == id,
                ExtraConstraint::FixedPoint { .. } => false,
            })
            .map(|(cid, _)| *cid)
            .collect();
        for cid in dependent {
            self.remove_constraint(cid)?;
        }
        self.structure_version += 1;
        Ok(joint)
    }

    /// Look up a joint.
    pub fn joint(&self, id: JointId) -> Result<&Joint> {
        self.joint_index
            .get(&id)
            .map(|&i| &self.joints[i])
            .ok_or(SimError::InvalidJointId(id))
    }

    fn joint_mut(&mut self, id: JointId) -> Result<&mut Joint> {
        let i = *self.joint_index.get(&id).ok_or(SimError::InvalidJointId(id))?;
        Ok(&mut self.joints[i])
    }

    /// All joints, in insertion order.
    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter()
    }

    /// Look up a coordinate.
    pub fn coordinate(&self, handle: JointCoordinateHandle) -> Result<&Coordinate> {
        let joint = self.joint(handle.joint)?;
        joint.coordinate(handle.index).ok_or(SimError::InvalidCoordinate {
            joint: handle.joint,
            index: handle.index,
            num_coordinates: joint.num_coordinates(),
        })
    }

    /// Mutable access to a coordinate, for lock and range changes.
    pub fn coordinate_mut(&mut self, handle: JointCoordinateHandle) -> Result<&mut Coordinate> {
        self.joint_mut(handle.joint)?.coordinate_mut(handle.index)
    }

    /// Joints touching `body` (ground included), in insertion order.
    #[must_use]
    pub fn joints_for_body(&self, body: BodyId) -> Vec<JointId> {
        self.joints
            .iter()
            .filter(|j| j.involves(body))
            .map(Joint::id)
            .collect()
    }

    /// Recompute a joint's frames and coordinate values from body poses.
    pub fn update_attachments(&mut self, id: JointId) -> Result<()> {
        let i = *self.joint_index.get(&id).ok_or(SimError::InvalidJointId(id))?;
        let pose_a = self.body_pose(self.joints[i].body_a())?;
        let pose_b = self.body_pose(self.joints[i].body_b())?;
        self.joints[i].update_frames(&pose_a, &pose_b);
        Ok(())
    }

    /// Refresh attachments and then limit engagement of a joint.
    pub fn update_joint_state(&mut self, id: JointId) -> Result<()> {
        self.update_attachments(id)?;
        self.joint_mut(id)?.update_engagement();
        Ok(())
    }

    /// Refresh the attachments of every joint.
    pub fn update_all_attachments(&mut self) -> Result<()> {
        let ids: Vec<JointId> = self.joints.iter().map(Joint::id).collect();
        for id in ids {
            self.update_attachments(id)?;
        }
        Ok(())
    }

    /// Assign joint coordinates without moving any body.
    ///
    /// Each value is clipped to its range and the joint's `TCD` follows
    /// the new values.
    pub fn set_joint_coordinates(&mut self, id: JointId, values: &[f64]) -> Result<()> {
        self.joint_mut(id)?.assign_coordinates(values)
    }

    // ------------------------------------------------------------------
    // Extra constraints
    // ------------------------------------------------------------------

    /// Add an extra constraint. Referenced bodies and coordinates must exist.
    pub fn add_constraint(&mut self, constraint: ExtraConstraint) -> Result<ConstraintId> {
        match &constraint {
            ExtraConstraint::CoordinateCoupling { a, b, .. } => {
                self.coordinate(*a)?;
                self.coordinate(*b)?;
            }
            ExtraConstraint::FixedPoint { body, .. } => {
                self.body(*body)?;
            }
        }
        let id = ConstraintId::new(self.next_constraint);
        self.next_constraint += 1;
        self.constraint_index.insert(id, self.constraints.len());
        self.constraints.push((id, constraint));
        self.structure_version += 1;
        Ok(id)
    }

    /// Remove an extra constraint.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<ExtraConstraint> {
        let i = *self
            .constraint_index
            .get(&id)
            .ok_or(SimError::InvalidConstraintId(id))?;
        let (_, constraint) = self.constraints.remove(i);
        self.constraint_index = index_of(&self.constraints, |(cid, _)| *cid);
        self.structure_version += 1;
        Ok(constraint)
    }

    /// Look up an extra constraint.
    pub fn constraint(&self, id: ConstraintId) -> Result<&ExtraConstraint> {
        self.constraint_index
            .get(&id)
            .map(|&i| &self.constraints[i].1)
            .ok_or(SimError::InvalidConstraintId(id))
    }

    /// All extra constraints with their ids.
    pub fn constraints(&self) -> impl Iterator<Item = (ConstraintId, &ExtraConstraint)> {
        self.constraints.iter().map(|(id, c)| (*id, c))
    }

    /// Bodies an extra constraint touches, sorted and deduplicated.
    pub fn constraint_bodies(&self, id: ConstraintId) -> Result<Vec<BodyId>> {
        let mut bodies = match self.constraint(id)? {
            ExtraConstraint::CoordinateCoupling { a, b, .. } => {
                let mut v = self.joint(a.joint)?.bodies().to_vec();
                v.extend(self.joint(b.joint)?.bodies());
                v
            }
            ExtraConstraint::FixedPoint { body, .. } => vec![*body, BodyId::GROUND],
        };
        bodies.sort_unstable();
        bodies.dedup();
        Ok(bodies)
    }

    /// Extra constraints touching `body` (ground included).
    #[must_use]
    pub fn constraints_for_body(&self, body: BodyId) -> Vec<ConstraintId> {
        self.constraints
            .iter()
            .filter(|(id, _)| {
                self.constraint_bodies(*id)
                    .is_ok_and(|bodies| bodies.contains(&body))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Bodies touched by any constrainer.
    pub fn constrainer_bodies(&self, id: ConstrainerId) -> Result<Vec<BodyId>> {
        match id {
            ConstrainerId::Joint(j) => Ok(self.joint(j)?.bodies().to_vec()),
            ConstrainerId::Constraint(c) => self.constraint_bodies(c),
        }
    }

    /// Every constrainer touching `body`, joints first.
    #[must_use]
    pub fn constrainers_for_body(&self, body: BodyId) -> Vec<ConstrainerId> {
        self.joints_for_body(body)
            .into_iter()
            .map(ConstrainerId::Joint)
            .chain(
                self.constraints_for_body(body)
                    .into_iter()
                    .map(ConstrainerId::Constraint),
            )
            .collect()
    }

    // ------------------------------------------------------------------
    // Model size
    // ------------------------------------------------------------------

    /// Set an explicit characteristic size; `<= 0` restores the computed one.
    pub fn set_model_size(&mut self, size: f64) {
        self.model_size = size;
    }

    /// Characteristic length of the mechanism.
    ///
    /// The explicit size if one is set, otherwise half the diagonal of the
    /// bounding box of all body origins and joint frame origins, or 1 if
    /// that box is degenerate.
    #[must_use]
    pub fn model_size(&self) -> f64 {
        if self.model_size > 0.0 {
            return self.model_size;
        }
        let points = self
            .bodies
            .iter()
            .map(|b| b.pose.position)
            .chain(self.joints.iter().flat_map(|j| [j.tcw().position, j.tdw().position]));
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut any = false;
        for p in points {
            min = min.inf(&p);
            max = max.sup(&p);
            any = true;
        }
        let diagonal = if any { (max - min).norm() } else { 0.0 };
        if diagonal > 0.0 && diagonal.is_finite() {
            diagonal / 2.0
        } else {
            debug!("degenerate model bounds, using unit model size");
            1.0
        }
    }
}

fn index_of<T, K: std::hash::Hash + Eq>(items: &[T], key: impl Fn(&T) -> K) -> HashMap<K, usize> {
    items.iter().enumerate().map(|(i, t)| (key(t), i)).collect()
}
