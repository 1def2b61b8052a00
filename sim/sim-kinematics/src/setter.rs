//! Setting joint coordinates while keeping the rest of the mechanism
//! consistent.
//!
//! The setter decomposes the mechanism into a [`KinematicTree`] and treats
//! each request according to the joint node that owns it:
//!
//! - **simple** nodes (one joint, no loop) are set directly; the induced
//!   rigid motion is passed on to everything distal to the node;
//! - **coupled** nodes are handed to the [`CoordinateSolver`].
//!
//! Large changes are split into interpolation steps so that geometry that
//! follows the bodies (wrap paths, for instance) never jumps.
//!
//! # Example
//!
//! ```
//! use sim_constraint::{Joint, JointType, MechModel, RigidBody};
//! use sim_kinematics::CoordinateSetter;
//! use sim_types::{BodyId, CoordinateSolverConfig, JointCoordinateHandle, JointId, Pose};
//!
//! let mut model = MechModel::new();
//! let link = model
//!     .add_body(RigidBody::new(BodyId::new(0), Pose::from_xyz_rot_z(0.5, 0.0, 0.0, 0.0)))
//!     .unwrap();
//! let hinge = model
//!     .add_joint(
//!         Joint::new(JointId::new(0), JointType::Revolute, link, None)
//!             .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0)),
//!     )
//!     .unwrap();
//! model.update_all_attachments().unwrap();
//!
//! let mut setter = CoordinateSetter::new(CoordinateSolverConfig::default());
//! let status = setter
//!     .set_coordinate_deg(&mut model, JointCoordinateHandle::new(hinge, 0), 90.0)
//!     .unwrap();
//! assert!(status.converged());
//! let pose = model.body_pose(link).unwrap();
//! assert!((pose.position.y - 0.5).abs() < 1e-9);
//! ```

use std::fmt;

use hashbrown::HashMap;
use nalgebra::DVector;
use sim_constraint::MechModel;
use sim_types::{CoordinateSolverConfig, JointCoordinateHandle, JointId, Pose, Result, SimError};
use tracing::debug;

use crate::request::{JointCoordRequest, SetStatus};
use crate::solver::CoordinateSolver;
use crate::tree::{BodyNodeIndex, JointNodeIndex, KinematicTree};

/// Hook for geometry that has to follow the bodies as coordinates change.
///
/// Called once after every interpolation step.
pub trait WrapPathHook {
    /// Refresh wrapped path segments against the current body poses.
    fn update_wrap_segments(&mut self, model: &MechModel);
}

/// A joint node located in one of the setter's cached trees.
type NodeKey = (usize, JointNodeIndex);

/// Requests grouped by joint node, in first-request order.
#[derive(Default)]
struct Buckets {
    keys: Vec<NodeKey>,
    requests: Vec<Vec<JointCoordRequest>>,
    index: HashMap<NodeKey, usize>,
}

impl Buckets {
    fn push(&mut self, key: NodeKey, req: JointCoordRequest) -> bool {
        if let Some(&i) = self.index.get(&key) {
            self.requests[i].push(req);
            false
        } else {
            self.index.insert(key, self.keys.len());
            self.keys.push(key);
            self.requests.push(vec![req]);
            true
        }
    }

    fn get(&self, key: NodeKey) -> Option<&[JointCoordRequest]> {
        self.index.get(&key).map(|&i| self.requests[i].as_slice())
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Sets joint coordinates of a [`MechModel`].
pub struct CoordinateSetter {
    config: CoordinateSolverConfig,
    solver: CoordinateSolver,
    requests: Vec<(JointCoordinateHandle, f64)>,
    request_index: HashMap<JointCoordinateHandle, usize>,
    trees: Vec<KinematicTree>,
    node_of_joint: HashMap<JointId, NodeKey>,
    structure_version: Option<u64>,
    total_iterations: usize,
    wrap_hook: Option<Box<dyn WrapPathHook>>,
}

impl fmt::Debug for CoordinateSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateSetter")
            .field("config", &self.config)
            .field("requests", &self.requests)
            .field("trees", &self.trees.len())
            .field("total_iterations", &self.total_iterations)
            .field("wrap_hook", &self.wrap_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for CoordinateSetter {
    fn default() -> Self {
        Self::new(CoordinateSolverConfig::default())
    }
}

impl CoordinateSetter {
    /// Create a setter.
    #[must_use]
    pub fn new(config: CoordinateSolverConfig) -> Self {
        Self {
            solver: CoordinateSolver::new(config.clone()),
            config,
            requests: Vec::new(),
            request_index: HashMap::new(),
            trees: Vec::new(),
            node_of_joint: HashMap::new(),
            structure_version: None,
            total_iterations: 0,
            wrap_hook: None,
        }
    }

    /// Install a hook called after every interpolation step.
    #[must_use]
    pub fn with_wrap_hook(mut self, hook: Box<dyn WrapPathHook>) -> Self {
        self.wrap_hook = Some(hook);
        self
    }

    /// The solver configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinateSolverConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Queue a request to set `handle` to `value` (radians for rotary
    /// coordinates). A repeated request replaces the earlier value.
    pub fn request(&mut self, handle: JointCoordinateHandle, value: f64) {
        if let Some(&i) = self.request_index.get(&handle) {
            self.requests[i].1 = value;
        } else {
            self.request_index.insert(handle, self.requests.len());
            self.requests.push((handle, value));
        }
    }

    /// Queue a request with rotary values given in degrees.
    pub fn request_deg(
        &mut self,
        model: &MechModel,
        handle: JointCoordinateHandle,
        value: f64,
    ) -> Result<()> {
        let motion = model.coordinate(handle)?.motion_type();
        self.request(handle, motion.value_from_degrees(value));
        Ok(())
    }

    /// Queue a request for coordinate `index` of `joint`.
    pub fn request_joint(&mut self, joint: JointId, index: usize, value: f64) {
        self.request(JointCoordinateHandle::new(joint, index), value);
    }

    /// Queue a request for coordinate `index` of `joint`, in degrees.
    pub fn request_joint_deg(
        &mut self,
        model: &MechModel,
        joint: JointId,
        index: usize,
        value: f64,
    ) -> Result<()> {
        self.request_deg(model, JointCoordinateHandle::new(joint, index), value)
    }

    /// Pending requests, in the order they were first made.
    #[must_use]
    pub fn pending_requests(&self) -> &[(JointCoordinateHandle, f64)] {
        &self.requests
    }

    /// Drop all pending requests.
    pub fn clear_requests(&mut self) {
        self.requests.clear();
        self.request_index.clear();
    }

    /// Solver iterations spent since the last
    /// [`clear_solve_counts`](Self::clear_solve_counts).
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.total_iterations
    }

    /// Reset the iteration counter.
    pub fn clear_solve_counts(&mut self) {
        self.total_iterations = 0;
    }

    // ------------------------------------------------------------------
    // Setting
    // ------------------------------------------------------------------

    /// Satisfy every pending request in one pass, keeping other
    /// coordinates fixed where the mechanism allows it.
    ///
    /// Requests on simple joint nodes advance together over a shared
    /// number of steps; each coupled joint node is then solved on its own.
    /// The pending requests are cleared.
    pub fn set_coordinates(&mut self, model: &mut MechModel) -> Result<SetStatus> {
        let pending = self.requests.clone();
        let mut status = SetStatus::with_coordinates(true, pending.iter().map(|(h, _)| *h));
        if pending.is_empty() {
            return Ok(status);
        }

        let mut simple = Buckets::default();
        let mut coupled = Buckets::default();
        let mut simple_roots: Vec<usize> = Vec::new();
        for &(handle, value) in &pending {
            let key = self.joint_node(model, handle.joint)?;
            let req = JointCoordRequest::new(model, handle, value)?;
            if self.trees[key.0].joint_node(key.1).is_simple() {
                if simple.push(key, req) && !simple_roots.contains(&key.0) {
                    simple_roots.push(key.0);
                }
            } else {
                coupled.push(key, req);
            }
        }

        if !simple.is_empty() {
            let mut nsteps = 1;
            for reqs in &mut simple.requests {
                nsteps = nsteps.max(compute_num_steps(model, &self.config, reqs)?);
            }
            debug!(
                nodes = simple.keys.len(),
                steps = nsteps,
                "setting simple coordinates"
            );
            for i in 1..=nsteps {
                let s = i as f64 / nsteps as f64;
                for &t in &simple_roots {
                    let tree = &self.trees[t];
                    set_simple_recursive(
                        model,
                        tree,
                        t,
                        tree.root(),
                        &Pose::identity(),
                        s,
                        &simple,
                    )?;
                }
                update_wrap_paths(&mut self.wrap_hook, model);
            }
        }

        for (k, key) in coupled.keys.iter().enumerate() {
            let sub = self.solve_for_coupled_coords(model, *key, &mut coupled.requests[k])?;
            if !sub.converged() {
                status.set_converged(false);
            }
            status.add_iterations(sub.num_iterations());
            status.merge(&sub)?;
        }

        self.clear_requests();
        Ok(status)
    }

    /// Set one coordinate right away. Pending requests are untouched.
    pub fn set_coordinate(
        &mut self,
        model: &mut MechModel,
        handle: JointCoordinateHandle,
        value: f64,
    ) -> Result<SetStatus> {
        let mut reqs = vec![JointCoordRequest::new(model, handle, value)?];
        let key = self.joint_node(model, handle.joint)?;
        let tree = &self.trees[key.0];
        let jnode = tree.joint_node(key.1);
        if !jnode.is_simple() {
            return self.solve_for_coupled_coords(model, key, &mut reqs);
        }

        let nsteps = compute_num_steps(model, &self.config, &mut reqs)?;
        for i in 1..=nsteps {
            let s = i as f64 / nsteps as f64;
            let tx = simple_node_transform(model, tree, key.1, s, &reqs)?;
            tree.update_distal_bodies(model, key.1, &tx)?;
            if let Some(child) = single_child(tree, key.1)? {
                set_simple_recursive(model, tree, key.0, child, &tx, s, &Buckets::default())?;
            }
            update_wrap_paths(&mut self.wrap_hook, model);
        }
        Ok(SetStatus::with_coordinates(true, [handle]))
    }

    /// Set one coordinate right away, rotary values in degrees.
    pub fn set_coordinate_deg(
        &mut self,
        model: &mut MechModel,
        handle: JointCoordinateHandle,
        value: f64,
    ) -> Result<SetStatus> {
        let motion = model.coordinate(handle)?.motion_type();
        self.set_coordinate(model, handle, motion.value_from_degrees(value))
    }

    /// Drive the requests of one coupled node through the solver.
    ///
    /// A proximal body that is not ground is held in place; child body
    /// nodes carry their descendants along with them.
    fn solve_for_coupled_coords(
        &mut self,
        model: &mut MechModel,
        key: NodeKey,
        reqs: &mut [JointCoordRequest],
    ) -> Result<SetStatus> {
        let num_steps = compute_num_steps(model, &self.config, reqs)?;
        let tree = &self.trees[key.0];
        let jnode = tree.joint_node(key.1);
        let bodies = jnode.rigid_bodies();
        self.solver
            .initialize(model, reqs, &bodies, jnode.constrainers())?;

        let fixed = match jnode.proximal_rigid_body() {
            Some(body) => Some((body, model.body_pose(body)?)),
            None => None,
        };
        let mut targets: DVector<f64> = self.solver.coordinate_values()?;

        let mut status =
            SetStatus::with_coordinates(true, reqs.iter().map(JointCoordRequest::handle));
        let indep = self.solver.find_independent_requests(model, reqs)?;
        debug!(
            node = jnode.number(),
            requests = reqs.len(),
            independent = indep.len(),
            steps = num_steps,
            "solving coupled node"
        );

        for step in 1..=num_steps {
            let saved: Vec<Pose> = if jnode.num_children() > 0 {
                bodies
                    .iter()
                    .map(|&b| model.body_pose(b))
                    .collect::<Result<_>>()?
            } else {
                Vec::new()
            };

            let step_status =
                self.solver
                    .solve_for_step(model, reqs, &indep, &mut targets, step, num_steps)?;

            if let Some((body, tgw0)) = &fixed {
                let t = tgw0.compose_inverse(&model.body_pose(*body)?);
                model.transform_body_pose(*body, &t)?;
                tree.update_distal_bodies(model, key.1, &t)?;
            }
            for child in jnode.children() {
                let body = tree.body_node(child).body();
                let Some(bidx) = jnode.index_of_rigid_body(body) else {
                    continue;
                };
                let t = model.body_pose(body)?.compose_inverse(&saved[bidx]);
                tree.update_descendants(model, child, &t)?;
            }
            update_wrap_paths(&mut self.wrap_hook, model);

            if step_status.finished {
                status.set_converged(step_status.converged);
                break;
            }
            if step == num_steps && !step_status.converged {
                status.set_converged(false);
            }
        }

        self.solver.finalize_status(&mut status)?;
        let iterations = self.solver.num_iterations();
        self.total_iterations += iterations;
        status.add_iterations(iterations);
        Ok(status)
    }

    /// Locate the joint node owning `joint`, decomposing its mechanism on
    /// first use. The cache is dropped whenever the model's structure
    /// changes.
    fn joint_node(&mut self, model: &MechModel, joint: JointId) -> Result<NodeKey> {
        if self.structure_version != Some(model.structure_version()) {
            self.trees.clear();
            self.node_of_joint.clear();
            self.structure_version = Some(model.structure_version());
        }
        if let Some(&key) = self.node_of_joint.get(&joint) {
            return Ok(key);
        }
        let tree = KinematicTree::find_tree_for_joint(model, joint)?.ok_or_else(|| {
            SimError::malformed_graph(format!("{joint} is not part of any kinematic tree"))
        })?;
        let t = self.trees.len();
        for j in tree.joint_nodes() {
            for jid in tree.joint_node(j).joints() {
                self.node_of_joint.insert(jid, (t, j));
            }
        }
        self.trees.push(tree);
        self.node_of_joint
            .get(&joint)
            .copied()
            .ok_or_else(|| SimError::malformed_graph(format!("no joint node owns {joint}")))
    }
}

/// Largest step count over `reqs`, and at least one. Also fixes each
/// request's starting value.
fn compute_num_steps(
    model: &MechModel,
    config: &CoordinateSolverConfig,
    reqs: &mut [JointCoordRequest],
) -> Result<usize> {
    let mut nsteps = 1;
    for req in reqs {
        nsteps = nsteps.max(req.compute_num_steps(model, config)?);
    }
    Ok(nsteps)
}

/// The only child of a simple node, if any.
fn single_child(tree: &KinematicTree, node: JointNodeIndex) -> Result<Option<BodyNodeIndex>> {
    let jnode = tree.joint_node(node);
    match jnode.num_children() {
        0 => Ok(None),
        1 => Ok(jnode.children().next()),
        n => Err(SimError::SimpleNodeChildren {
            node: jnode.number(),
            children: n,
        }),
    }
}

/// World transform of the bodies distal to a simple node when its joint
/// moves to the targets at fraction `s`.
///
/// The joint frames are taken from the current body poses, so the
/// transform already accounts for any motion of the proximal body.
fn simple_node_transform(
    model: &mut MechModel,
    tree: &KinematicTree,
    node: JointNodeIndex,
    s: f64,
    reqs: &[JointCoordRequest],
) -> Result<Pose> {
    let jnode = tree.joint_node(node);
    let joint_id = jnode.joints().next().ok_or_else(|| {
        SimError::malformed_graph(format!("joint node {} has no joint", jnode.number()))
    })?;

    let joint = model.joint(joint_id)?;
    let (body_a, body_b) = (joint.body_a(), joint.body_b());
    let tcw = model.body_pose(body_a)?.compose(joint.frame_a());
    let tdw = model.body_pose(body_b)?.compose(joint.frame_b());
    let mut coords = joint.coordinate_values();
    for req in reqs {
        let handle = req.handle();
        if handle.joint != joint_id {
            return Err(SimError::malformed_graph(format!(
                "request for {handle} routed to joint node {}",
                jnode.number()
            )));
        }
        let slot = coords.get_mut(handle.index).ok_or(SimError::InvalidCoordinate {
            joint: joint_id,
            index: handle.index,
            num_coordinates: joint.num_coordinates(),
        })?;
        *slot = req.target_value(s);
    }
    model.set_joint_coordinates(joint_id, &coords)?;
    let tcd = model.joint(joint_id)?.coordinates_to_tcd();

    if Some(body_a) != jnode.proximal_body() {
        // body A moves: TCW' = TDW * TCD
        Ok(tdw.compose(&tcd).compose_inverse(&tcw))
    } else {
        // body B moves: TDW' = TCW * inv(TCD)
        Ok(tcw.compose_inverse(&tcd).compose_inverse(&tdw))
    }
}

/// Walk down from `start`, setting requested simple nodes and carrying
/// the incoming transform through the others.
fn set_simple_recursive(
    model: &mut MechModel,
    tree: &KinematicTree,
    tree_index: usize,
    start: BodyNodeIndex,
    t: &Pose,
    s: f64,
    requests: &Buckets,
) -> Result<()> {
    let mut stack = vec![(start, *t)];
    while let Some((bnode, t)) = stack.pop() {
        for j in tree.body_node(bnode).children() {
            if let Some(reqs) = requests.get((tree_index, j)) {
                let tx = simple_node_transform(model, tree, j, s, reqs)?;
                tree.update_distal_bodies(model, j, &tx)?;
                if let Some(child) = single_child(tree, j)? {
                    stack.push((child, tx));
                }
            } else {
                tree.update_distal_bodies(model, j, &t)?;
                stack.extend(tree.joint_node(j).children().map(|c| (c, t)));
            }
        }
    }
    Ok(())
}

fn update_wrap_paths(hook: &mut Option<Box<dyn WrapPathHook>>, model: &MechModel) {
    if let Some(hook) = hook.as_mut() {
        hook.update_wrap_segments(model);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sim_constraint::{Joint, JointType, RigidBody};
    use sim_types::{BodyId, CoordinateRange};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Ground - hinge 0 - link 0 - hinge 1 - link 1, links of length 1
    /// along x.
    fn chain() -> MechModel {
        let mut model = MechModel::new();
        for i in 0..2_i32 {
            model
                .add_body(RigidBody::new(
                    BodyId::new(i64::from(i)),
                    Pose::from_xyz_rot_z(0.5 + f64::from(i), 0.0, 0.0, 0.0),
                ))
                .unwrap();
        }
        model
            .add_joint(
                Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(0), None)
                    .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0)),
            )
            .unwrap();
        model
            .add_joint(
                Joint::new(
                    JointId::new(1),
                    JointType::Revolute,
                    BodyId::new(1),
                    Some(BodyId::new(0)),
                )
                .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0))
                .with_frame_b(Pose::from_xyz_rot_z(0.5, 0.0, 0.0, 0.0)),
            )
            .unwrap();
        model.update_all_attachments().unwrap();
        model
    }

    fn handle(j: u64) -> JointCoordinateHandle {
        JointCoordinateHandle::new(JointId::new(j), 0)
    }

    struct CountingHook(Rc<Cell<usize>>);

    impl WrapPathHook for CountingHook {
        fn update_wrap_segments(&mut self, _model: &MechModel) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_set_root_hinge_moves_chain() {
        let mut model = chain();
        let mut setter = CoordinateSetter::default();
        let status = setter.set_coordinate_deg(&mut model, handle(0), 90.0).unwrap();
        assert!(status.converged());
        assert!(status.is_free(handle(0)));

        let p1 = model.body_pose(BodyId::new(1)).unwrap();
        assert_relative_eq!(p1.position.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(p1.position.y, 1.5, epsilon = 1e-9);
        assert_relative_eq!(
            model.coordinate(handle(0)).unwrap().value(),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-9
        );
        assert_relative_eq!(model.coordinate(handle(1)).unwrap().value(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_simple_requests_share_steps() {
        let mut model = chain();
        let calls = Rc::new(Cell::new(0));
        let mut setter =
            CoordinateSetter::default().with_wrap_hook(Box::new(CountingHook(calls.clone())));
        setter.request_deg(&model, handle(0), 30.0).unwrap();
        setter.request_deg(&model, handle(1), 60.0).unwrap();
        let status = setter.set_coordinates(&mut model).unwrap();

        assert!(status.converged());
        assert_eq!(status.num_free(), 2);
        // 60 degrees at 15 per step
        assert_eq!(calls.get(), 4);
        assert!(setter.pending_requests().is_empty());
        assert_relative_eq!(
            model.coordinate(handle(0)).unwrap().value(),
            30f64.to_radians(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            model.coordinate(handle(1)).unwrap().value(),
            60f64.to_radians(),
            epsilon = 1e-9
        );
        // tip of link 1 sits at angle 30 + 60
        let p1 = model.body_pose(BodyId::new(1)).unwrap();
        let elbow = (30f64.to_radians().cos(), 30f64.to_radians().sin());
        assert_relative_eq!(p1.position.x, elbow.0, epsilon = 1e-9);
        assert_relative_eq!(p1.position.y, elbow.1 + 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_request_overwrites_in_place() {
        let mut setter = CoordinateSetter::default();
        setter.request(handle(1), 0.1);
        setter.request_joint(JointId::new(0), 0, 0.2);
        setter.request(handle(1), 0.3);
        assert_eq!(
            setter.pending_requests(),
            &[(handle(1), 0.3), (handle(0), 0.2)]
        );
        setter.clear_requests();
        assert!(setter.pending_requests().is_empty());
    }

    #[test]
    fn test_request_clipped_to_range() {
        let mut model = chain();
        model
            .coordinate_mut(handle(1))
            .unwrap()
            .set_range(CoordinateRange::degrees(-45.0, 45.0));
        let mut setter = CoordinateSetter::default();
        setter.set_coordinate_deg(&mut model, handle(1), 80.0).unwrap();
        assert_relative_eq!(
            model.coordinate(handle(1)).unwrap().value(),
            45f64.to_radians(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_empty_request_set() {
        let mut model = chain();
        let mut setter = CoordinateSetter::default();
        let status = setter.set_coordinates(&mut model).unwrap();
        assert!(status.converged());
        assert_eq!(status.num_coordinates(), 0);
        assert_eq!(setter.num_iterations(), 0);
    }

    #[test]
    fn test_unknown_joint() {
        let mut model = chain();
        let mut setter = CoordinateSetter::default();
        let err = setter
            .set_coordinate(&mut model, handle(5), 0.1)
            .unwrap_err();
        assert_eq!(err, SimError::InvalidJointId(JointId::new(5)));
    }

    #[test]
    fn test_cache_follows_structure_changes() {
        let mut model = chain();
        let mut setter = CoordinateSetter::default();
        setter.set_coordinate(&mut model, handle(1), 0.2).unwrap();
        assert_eq!(setter.trees.len(), 1);

        model.remove_joint(JointId::new(1)).unwrap();
        model
            .add_joint(
                Joint::new(
                    JointId::new(2),
                    JointType::Prismatic,
                    BodyId::new(1),
                    Some(BodyId::new(0)),
                )
                .with_frame_a(Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0)),
            )
            .unwrap();
        model.update_all_attachments().unwrap();
        setter.set_coordinate(&mut model, handle(2), 0.1).unwrap();
        assert_eq!(setter.trees.len(), 1);
        assert!(!setter.node_of_joint.contains_key(&JointId::new(1)));
    }
}
