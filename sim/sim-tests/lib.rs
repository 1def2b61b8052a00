//! Mechanism fixtures for the coordinate setting integration tests.
//!
//! Every fixture lies in the xy plane with revolute joints about z and
//! returns a model whose attachments are already up to date:
//! - [`revolute_chain`]: a serial chain hinged to ground
//! - [`four_bar`]: a closed parallelogram loop on a fixed base link
//! - [`four_bar_with_tail`]: the same loop with a pendulum hung off it
//! - [`coupled_pair`]: two grounded hinges tied by a coordinate coupling

use sim_constraint::{ExtraConstraint, Joint, JointType, MechModel, RigidBody};
use sim_types::{BodyId, JointCoordinateHandle, JointId, Pose};

/// A fixture model with the handles of its joint coordinates.
#[derive(Debug)]
pub struct Fixture {
    /// The mechanism.
    pub model: MechModel,
    /// Bodies, in creation order.
    pub bodies: Vec<BodyId>,
    /// Joints, in creation order.
    pub joints: Vec<JointId>,
}

impl Fixture {
    /// Handle of the single coordinate of joint `k`.
    #[must_use]
    pub fn handle(&self, k: usize) -> JointCoordinateHandle {
        JointCoordinateHandle::new(self.joints[k], 0)
    }

    /// All coordinate handles, in joint order.
    #[must_use]
    pub fn handles(&self) -> Vec<JointCoordinateHandle> {
        self.joints.iter().map(|&j| JointCoordinateHandle::new(j, 0)).collect()
    }

    /// Current value of every coordinate, in joint order.
    ///
    /// # Panics
    ///
    /// Panics if a fixture joint was removed from the model.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn coordinate_values(&self) -> Vec<f64> {
        self.handles()
            .into_iter()
            .map(|h| self.model.coordinate(h).expect("fixture coordinate").value())
            .collect()
    }

    /// Largest joint constraint residual over all joints.
    ///
    /// # Panics
    ///
    /// Panics if a fixture joint was removed from the model.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn max_joint_error(&self) -> f64 {
        self.joints
            .iter()
            .map(|&j| {
                let (t, r) = self.model.joint(j).expect("fixture joint").constraint_error();
                t.norm().max(r.norm())
            })
            .fold(0.0, f64::max)
    }
}

fn at(x: f64, y: f64) -> Pose {
    Pose::from_xyz_rot_z(x, y, 0.0, 0.0)
}

/// Add a hinge at world point `(x, y)`; bodies are assumed unrotated.
#[allow(clippy::expect_used)]
fn hinge(
    model: &mut MechModel,
    id: u64,
    a: BodyId,
    b: Option<BodyId>,
    x: f64,
    y: f64,
) -> JointId {
    let pa = model.body_pose(a).expect("fixture body").position;
    let pb = b.map_or(nalgebra::Point3::origin(), |b| {
        model.body_pose(b).expect("fixture body").position
    });
    model
        .add_joint(
            Joint::new(JointId::new(id), JointType::Revolute, a, b)
                .with_frame_a(at(x - pa.x, y - pa.y))
                .with_frame_b(at(x - pb.x, y - pb.y)),
        )
        .expect("fixture joint")
}

/// Ground - hinge - link 0 - hinge - link 1 ... with unit links along x.
///
/// # Panics
///
/// Never, for the ids used here.
#[must_use]
#[allow(clippy::expect_used)]
pub fn revolute_chain(n: usize) -> Fixture {
    let mut model = MechModel::new();
    let mut bodies = Vec::with_capacity(n);
    let mut joints = Vec::with_capacity(n);
    for i in 0..n {
        let body = model
            .add_body(RigidBody::new(BodyId::new(i as i64), at(i as f64 + 0.5, 0.0)))
            .expect("fixture body");
        let prev = bodies.last().copied();
        joints.push(hinge(&mut model, i as u64, body, prev, i as f64, 0.0));
        bodies.push(body);
    }
    model.update_all_attachments().expect("fixture attachments");
    Fixture {
        model,
        bodies,
        joints,
    }
}

/// Unit-square parallelogram: base (fixed, bottom), crank (left),
/// coupler (top), rocker (right).
///
/// Joints run around the loop, each with the next link as body A, so the
/// four joint angles always sum to zero.
///
/// # Panics
///
/// Never, for the ids used here.
#[must_use]
#[allow(clippy::expect_used)]
pub fn four_bar() -> Fixture {
    let mut model = MechModel::new();
    let poses = [at(0.5, 0.0), at(0.0, 0.5), at(0.5, 1.0), at(1.0, 0.5)];
    let mut bodies = Vec::with_capacity(4);
    for (i, pose) in poses.into_iter().enumerate() {
        let mut body = RigidBody::new(BodyId::new(i as i64), pose);
        if i == 0 {
            body = body.non_dynamic();
        }
        bodies.push(model.add_body(body).expect("fixture body"));
    }
    let corners = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
    let joints = (0..4)
        .map(|k| {
            let a = bodies[(k + 1) % 4];
            let b = bodies[k];
            let (x, y) = corners[k];
            hinge(&mut model, k as u64, a, Some(b), x, y)
        })
        .collect();
    model.update_all_attachments().expect("fixture attachments");
    Fixture {
        model,
        bodies,
        joints,
    }
}

/// [`four_bar`] with a unit pendulum hinged to the middle of the rocker.
///
/// The pendulum is body 4 and its hinge is joint 4.
///
/// # Panics
///
/// Never, for the ids used here.
#[must_use]
#[allow(clippy::expect_used)]
pub fn four_bar_with_tail() -> Fixture {
    let mut fixture = four_bar();
    let rocker = fixture.bodies[3];
    let tail = fixture
        .model
        .add_body(RigidBody::new(BodyId::new(4), at(1.5, 0.5)))
        .expect("fixture body");
    let joint = hinge(&mut fixture.model, 4, tail, Some(rocker), 1.0, 0.5);
    fixture
        .model
        .update_all_attachments()
        .expect("fixture attachments");
    fixture.bodies.push(tail);
    fixture.joints.push(joint);
    fixture
}

/// Two links hinged to ground at `(0, 0)` and `(0, 2)`, with
/// `q0 - ratio * q1 = 0`.
///
/// # Panics
///
/// Never, for the ids used here.
#[must_use]
#[allow(clippy::expect_used)]
pub fn coupled_pair(ratio: f64) -> Fixture {
    let mut model = MechModel::new();
    let mut bodies = Vec::with_capacity(2);
    let mut joints = Vec::with_capacity(2);
    for i in 0..2 {
        let y = 2.0 * i as f64;
        let body = model
            .add_body(RigidBody::new(BodyId::new(i), at(0.5, y)))
            .expect("fixture body");
        joints.push(hinge(&mut model, i as u64, body, None, 0.0, y));
        bodies.push(body);
    }
    model
        .add_constraint(ExtraConstraint::CoordinateCoupling {
            a: JointCoordinateHandle::new(joints[0], 0),
            b: JointCoordinateHandle::new(joints[1], 0),
            ratio,
            offset: 0.0,
        })
        .expect("fixture coupling");
    model.update_all_attachments().expect("fixture attachments");
    Fixture {
        model,
        bodies,
        joints,
    }
}
