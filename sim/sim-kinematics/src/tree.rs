//! Kinematic tree decomposition.
//!
//! Bodies are the vertices and constrainers the (hyper)edges of a
//! connectivity graph. A depth-first lowlink search finds its cut vertices
//! and biconnected components:
//!
//! - every biconnected component becomes a [`JointNode`], owning all of
//!   the constrainers that cannot be separated without passing through a
//!   cut vertex;
//! - every cut vertex, and the chosen root, becomes a [`BodyNode`].
//!
//! The tree alternates body and joint nodes. Nodes live in two arenas owned
//! by the [`KinematicTree`] and refer to each other by index, since one
//! body is legitimately shared by several joint nodes.
//!
//! # Root Selection
//!
//! The root body is, in order of preference:
//!
//! 1. Ground, if any joint node touches it
//! 2. the lowest-numbered body marked grounded
//! 3. the lowest-numbered non-dynamic body
//! 4. the body with the largest surplus of outward joints (joints for which
//!    it is not body A), lowest number on ties
//! 5. the lowest-numbered body of the single joint node
//!
//! # Example
//!
//! ```
//! use sim_constraint::{Joint, JointType, MechModel, RigidBody};
//! use sim_kinematics::KinematicTree;
//! use sim_types::{BodyId, JointId, Pose};
//!
//! // ground - hinge - link0 - hinge - link1
//! let mut model = MechModel::new();
//! for i in 0..2 {
//!     model.add_body(RigidBody::new(BodyId::new(i), Pose::identity())).unwrap();
//! }
//! model
//!     .add_joint(Joint::new(JointId::new(0), JointType::Revolute, BodyId::new(0), None))
//!     .unwrap();
//! model
//!     .add_joint(Joint::new(
//!         JointId::new(1),
//!         JointType::Revolute,
//!         BodyId::new(1),
//!         Some(BodyId::new(0)),
//!     ))
//!     .unwrap();
//!
//! let tree = KinematicTree::find_tree(&model, BodyId::new(1)).unwrap().unwrap();
//! assert_eq!(tree.root_body(), BodyId::GROUND);
//! assert_eq!(tree.num_joint_nodes(), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;

use hashbrown::{HashMap, HashSet};
use sim_constraint::{ConstrainerId, MechModel};
use sim_types::{BodyId, ConstraintId, JointId, Pose, Result, SimError};
use tracing::debug;

/// Index of a body node within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyNodeIndex(usize);

/// Index of a joint node within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointNodeIndex(usize);

/// A tree node wrapping one cut-vertex body (or the root).
#[derive(Debug, Clone)]
pub struct BodyNode {
    body: BodyId,
    /// All incident joint nodes, parent included, ordered by node number.
    joint_nodes: Vec<JointNodeIndex>,
    proximal: Option<JointNodeIndex>,
}

impl BodyNode {
    fn new(body: BodyId) -> Self {
        Self {
            body,
            joint_nodes: Vec::new(),
            proximal: None,
        }
    }

    /// The wrapped body.
    #[must_use]
    pub fn body(&self) -> BodyId {
        self.body
    }

    /// Node number: the body number.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.body.raw()
    }

    /// Parent joint node, `None` at the root.
    #[must_use]
    pub fn proximal(&self) -> Option<JointNodeIndex> {
        self.proximal
    }

    /// Every incident joint node, including the parent.
    #[must_use]
    pub fn joint_nodes(&self) -> &[JointNodeIndex] {
        &self.joint_nodes
    }

    /// Child joint nodes.
    pub fn children(&self) -> impl Iterator<Item = JointNodeIndex> + '_ {
        self.joint_nodes
            .iter()
            .copied()
            .filter(move |&j| Some(j) != self.proximal)
    }

    /// Number of child joint nodes.
    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children().count()
    }
}

/// A tree node wrapping one biconnected component of constrainers.
#[derive(Debug, Clone)]
pub struct JointNode {
    /// Joints first, each group by number.
    constrainers: Vec<ConstrainerId>,
    num_joints: usize,
    /// Sorted by body number, so ground comes first.
    bodies: Vec<BodyId>,
    /// Attached body nodes, ordered by body number.
    body_nodes: Vec<BodyNodeIndex>,
    proximal: Option<BodyNodeIndex>,
    proximal_body: Option<BodyId>,
}

impl JointNode {
    fn new(mut constrainers: Vec<ConstrainerId>, model: &MechModel) -> Result<Self> {
        constrainers.sort_unstable();
        let mut bodies = Vec::new();
        for &c in &constrainers {
            bodies.extend(model.constrainer_bodies(c)?);
        }
        bodies.sort_unstable();
        bodies.dedup();
        let num_joints = constrainers.iter().filter(|c| c.is_joint()).count();
        Ok(Self {
            constrainers,
            num_joints,
            bodies,
            body_nodes: Vec::new(),
            proximal: None,
            proximal_body: None,
        })
    }

    /// Node number: the larger of the minimum joint number and the minimum
    /// extra-constraint number, `-1` standing in for an absent kind.
    #[must_use]
    pub fn number(&self) -> i64 {
        let min_of = |joints: bool| {
            self.constrainers
                .iter()
                .filter(|c| c.is_joint() == joints)
                .map(|c| c.number() as i64)
                .min()
                .unwrap_or(-1)
        };
        min_of(true).max(min_of(false))
    }

    /// A simple node holds exactly one constrainer, and it is a joint.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.num_joints == 1 && self.constrainers.len() == 1
    }

    /// Number of joints owned by the node.
    #[must_use]
    pub fn num_joints(&self) -> usize {
        self.num_joints
    }

    /// Number of constrainers owned by the node.
    #[must_use]
    pub fn num_constrainers(&self) -> usize {
        self.constrainers.len()
    }

    /// Owned constrainers, joints first.
    #[must_use]
    pub fn constrainers(&self) -> &[ConstrainerId] {
        &self.constrainers
    }

    /// Owned joints.
    pub fn joints(&self) -> impl Iterator<Item = JointId> + '_ {
        self.constrainers.iter().filter_map(|c| match c {
            ConstrainerId::Joint(j) => Some(*j),
            ConstrainerId::Constraint(_) => None,
        })
    }

    /// Owned extra constraints.
    pub fn extra_constraints(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.constrainers.iter().filter_map(|c| match c {
            ConstrainerId::Joint(_) => None,
            ConstrainerId::Constraint(k) => Some(*k),
        })
    }

    /// Every body touched by the node, ground included, by number.
    #[must_use]
    pub fn bodies(&self) -> &[BodyId] {
        &self.bodies
    }

    /// Bodies touched by the node, ground excluded.
    #[must_use]
    pub fn rigid_bodies(&self) -> Vec<BodyId> {
        self.bodies.iter().copied().filter(|b| !b.is_ground()).collect()
    }

    /// Position of `body` within [`rigid_bodies`](Self::rigid_bodies).
    #[must_use]
    pub fn index_of_rigid_body(&self, body: BodyId) -> Option<usize> {
        self.bodies
            .iter()
            .filter(|b| !b.is_ground())
            .position(|&b| b == body)
    }

    /// Check whether the node touches `body`.
    #[must_use]
    pub fn contains_body(&self, body: BodyId) -> bool {
        self.bodies.binary_search(&body).is_ok()
    }

    /// Parent body node.
    #[must_use]
    pub fn proximal(&self) -> Option<BodyNodeIndex> {
        self.proximal
    }

    /// Body of the parent body node.
    #[must_use]
    pub fn proximal_body(&self) -> Option<BodyId> {
        self.proximal_body
    }

    /// The parent body, unless it is ground.
    #[must_use]
    pub fn proximal_rigid_body(&self) -> Option<BodyId> {
        self.proximal_body.filter(|b| !b.is_ground())
    }

    /// Bodies moved when the node's coordinates change: all but the
    /// proximal one.
    pub fn distal_bodies(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies
            .iter()
            .copied()
            .filter(move |&b| Some(b) != self.proximal_body)
    }

    /// Every attached body node, the parent included.
    #[must_use]
    pub fn body_nodes(&self) -> &[BodyNodeIndex] {
        &self.body_nodes
    }

    /// Child body nodes.
    pub fn children(&self) -> impl Iterator<Item = BodyNodeIndex> + '_ {
        self.body_nodes
            .iter()
            .copied()
            .filter(move |&b| Some(b) != self.proximal)
    }

    /// Number of child body nodes.
    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children().count()
    }

    /// Check whether the node owns `joint`.
    #[must_use]
    pub fn contains_joint(&self, joint: JointId) -> bool {
        self.constrainers.contains(&ConstrainerId::Joint(joint))
    }
}

/// A body with every constrainer attached to it, as gathered by
/// [`KinematicTree::find_body_info_for_body`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyInfo {
    /// The body.
    pub body: BodyId,
    /// Joints first, then extra constraints.
    pub constrainers: Vec<ConstrainerId>,
}

/// Rooted tree of alternating body and joint nodes covering one
/// kinematically connected set of bodies.
#[derive(Debug, Clone)]
pub struct KinematicTree {
    body_nodes: Vec<BodyNode>,
    joint_nodes: Vec<JointNode>,
    root: BodyNodeIndex,
}

impl KinematicTree {
    /// Find the tree containing `body`.
    ///
    /// Returns `Ok(None)` if the body is not constrained to anything.
    pub fn find_tree(model: &MechModel, body: BodyId) -> Result<Option<Self>> {
        let infos = Self::find_body_info_for_body(model, body)?;
        Self::from_body_info(model, &infos)
    }

    /// Find the tree containing a joint, starting from its body A.
    pub fn find_tree_for_joint(model: &MechModel, joint: JointId) -> Result<Option<Self>> {
        let body = model.joint(joint)?.body_a();
        Self::find_tree(model, body)
    }

    /// Find one tree per connected set among `bodies`, skipping bodies that
    /// are already covered and bodies that are not constrained at all.
    pub fn find_trees_for_bodies(model: &MechModel, bodies: &[BodyId]) -> Result<Vec<Self>> {
        let mut covered: HashSet<BodyId> = HashSet::new();
        let mut trees = Vec::new();
        for &body in bodies {
            if covered.contains(&body) {
                continue;
            }
            if let Some(tree) = Self::find_tree(model, body)? {
                covered.extend(tree.bodies());
                trees.push(tree);
            }
        }
        Ok(trees)
    }

    /// Gather every body reachable from `body0` through constrainers, in
    /// breadth-first order, each with its attached constrainers.
    ///
    /// The search does not continue through ground, so two mechanisms that
    /// only share ground stay separate. Ground's own list holds just the
    /// constrainers reached from the gathered bodies.
    pub fn find_body_info_for_body(model: &MechModel, body0: BodyId) -> Result<Vec<BodyInfo>> {
        if !model.has_body(body0) {
            return Err(SimError::InvalidBodyId(body0));
        }
        let mut infos: Vec<BodyInfo> = Vec::new();
        let mut ground_constrainers: Vec<ConstrainerId> = Vec::new();
        let mut ground_slot: Option<usize> = None;
        let mut queued: HashSet<BodyId> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(body0);
        queued.insert(body0);

        while let Some(body) = queue.pop_front() {
            if body.is_ground() {
                ground_slot = Some(infos.len());
                infos.push(BodyInfo {
                    body,
                    constrainers: Vec::new(),
                });
                continue;
            }
            let constrainers = model.constrainers_for_body(body);
            for &c in &constrainers {
                for other in model.constrainer_bodies(c)? {
                    if other == body {
                        continue;
                    }
                    if other.is_ground() && !ground_constrainers.contains(&c) {
                        ground_constrainers.push(c);
                    }
                    if queued.insert(other) {
                        queue.push_back(other);
                    }
                }
            }
            infos.push(BodyInfo { body, constrainers });
        }

        if let Some(slot) = ground_slot {
            // joints before extra constraints, as for every other body
            ground_constrainers.sort_by_key(|c| !c.is_joint());
            infos[slot].constrainers = ground_constrainers;
        }
        Ok(infos)
    }

    /// Build the tree for a connected set of bodies.
    fn from_body_info(model: &MechModel, infos: &[BodyInfo]) -> Result<Option<Self>> {
        if infos.len() <= 1 {
            return Ok(None);
        }
        let mut search = JointNodeSearch::new(model, infos)?;
        for v in 0..infos.len() {
            if search.index[v].is_none() {
                search.run(v)?;
            }
        }
        let JointNodeSearch {
            mut tree,
            order,
            body_node_of,
            vertex_of,
            ..
        } = search;

        let (root_body, best_node) = tree.select_root(model, &order)?;
        let root_vertex = *vertex_of
            .get(&root_body)
            .ok_or_else(|| SimError::malformed_graph(format!("root {root_body} not gathered")))?;
        let root = match body_node_of[root_vertex] {
            Some(b) => b,
            None => {
                let b = tree.push_body_node(root_body);
                tree.link(b, best_node);
                b
            }
        };
        tree.root = root;
        tree.build();

        debug!(
            root = %root_body,
            joint_nodes = tree.joint_nodes.len(),
            body_nodes = tree.body_nodes.len(),
            "built kinematic tree"
        );
        Ok(Some(tree))
    }

    fn empty() -> Self {
        Self {
            body_nodes: Vec::new(),
            joint_nodes: Vec::new(),
            root: BodyNodeIndex(0),
        }
    }

    fn push_body_node(&mut self, body: BodyId) -> BodyNodeIndex {
        self.body_nodes.push(BodyNode::new(body));
        BodyNodeIndex(self.body_nodes.len() - 1)
    }

    /// Connect a body node and a joint node, keeping both adjacency lists
    /// ordered by node number.
    fn link(&mut self, b: BodyNodeIndex, j: JointNodeIndex) {
        let jnum = self.joint_nodes[j.0].number();
        let list = &self.body_nodes[b.0].joint_nodes;
        let at = list
            .iter()
            .position(|k| jnum < self.joint_nodes[k.0].number())
            .unwrap_or(list.len());
        self.body_nodes[b.0].joint_nodes.insert(at, j);

        let bnum = self.body_nodes[b.0].number();
        let list = &self.joint_nodes[j.0].body_nodes;
        let at = list
            .iter()
            .position(|k| bnum < self.body_nodes[k.0].number())
            .unwrap_or(list.len());
        self.joint_nodes[j.0].body_nodes.insert(at, b);
    }

    /// Pick the root body and the joint node it hangs from.
    fn select_root(
        &self,
        model: &MechModel,
        order: &[JointNodeIndex],
    ) -> Result<(BodyId, JointNodeIndex)> {
        let mut marked_ground: Option<BodyId> = None;
        let mut non_dynamic: Option<BodyId> = None;
        let mut outward: Option<(i64, BodyId)> = None;
        let mut best: Option<(BodyId, JointNodeIndex)> = None;

        for &j in order {
            let node = &self.joint_nodes[j.0];
            if node.contains_body(BodyId::GROUND) {
                best = Some((BodyId::GROUND, j));
                break;
            } else if let Some(body) = min_body(model, node, |b| b.is_grounded()) {
                if marked_ground.map_or(true, |m| body < m) {
                    best = Some((body, j));
                    marked_ground = Some(body);
                }
            } else if marked_ground.is_none() {
                if let Some(body) = min_body(model, node, |b| !b.is_dynamic()) {
                    if non_dynamic.map_or(true, |m| body < m) {
                        best = Some((body, j));
                        non_dynamic = Some(body);
                    }
                } else if non_dynamic.is_none() {
                    if let Some((surplus, body)) = most_outward_body(model, node) {
                        let better = match outward {
                            None => true,
                            Some((s, b)) => s < surplus || (s == surplus && body < b),
                        };
                        if better {
                            best = Some((body, j));
                            outward = Some((surplus, body));
                        }
                    }
                }
            }
        }

        match best {
            Some(found) => Ok(found),
            None => {
                if order.len() != 1 {
                    return Err(SimError::malformed_graph(format!(
                        "{} joint nodes but no root candidate",
                        order.len()
                    )));
                }
                let j = order[0];
                let body = self.joint_nodes[j.0]
                    .bodies
                    .first()
                    .copied()
                    .ok_or_else(|| SimError::malformed_graph("joint node without bodies"))?;
                Ok((body, j))
            }
        }
    }

    /// Assign proximal links outward from the root.
    fn build(&mut self) {
        let mut stack: Vec<(BodyNodeIndex, Option<JointNodeIndex>)> = vec![(self.root, None)];
        while let Some((b, parent)) = stack.pop() {
            let body = self.body_nodes[b.0].body;
            let jnodes = self.body_nodes[b.0].joint_nodes.clone();
            for j in jnodes {
                if Some(j) == parent {
                    continue;
                }
                self.joint_nodes[j.0].proximal = Some(b);
                self.joint_nodes[j.0].proximal_body = Some(body);
                let children = self.joint_nodes[j.0].body_nodes.clone();
                for child in children {
                    if self.body_nodes[child.0].body != body {
                        self.body_nodes[child.0].proximal = Some(j);
                        stack.push((child, Some(j)));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The root body node.
    #[must_use]
    pub fn root(&self) -> BodyNodeIndex {
        self.root
    }

    /// Body of the root node.
    #[must_use]
    pub fn root_body(&self) -> BodyId {
        self.body_nodes[self.root.0].body
    }

    /// Look up a body node.
    #[must_use]
    pub fn body_node(&self, index: BodyNodeIndex) -> &BodyNode {
        &self.body_nodes[index.0]
    }

    /// Look up a joint node.
    #[must_use]
    pub fn joint_node(&self, index: JointNodeIndex) -> &JointNode {
        &self.joint_nodes[index.0]
    }

    /// Number of body nodes.
    #[must_use]
    pub fn num_body_nodes(&self) -> usize {
        self.body_nodes.len()
    }

    /// Number of joint nodes.
    #[must_use]
    pub fn num_joint_nodes(&self) -> usize {
        self.joint_nodes.len()
    }

    /// Body node wrapping `body`, if the body is a cut vertex or the root.
    #[must_use]
    pub fn find_body_node(&self, body: BodyId) -> Option<BodyNodeIndex> {
        self.body_nodes
            .iter()
            .position(|n| n.body == body)
            .map(BodyNodeIndex)
    }

    /// Joint node owning `joint`.
    #[must_use]
    pub fn node_for_joint(&self, joint: JointId) -> Option<JointNodeIndex> {
        self.joint_nodes
            .iter()
            .position(|n| n.contains_joint(joint))
            .map(JointNodeIndex)
    }

    /// Joint nodes in depth-first order from the root.
    #[must_use]
    pub fn joint_nodes(&self) -> Vec<JointNodeIndex> {
        let mut nodes = Vec::with_capacity(self.joint_nodes.len());
        let mut stack: Vec<JointNodeIndex> = self.body_nodes[self.root.0].children().collect();
        stack.reverse();
        while let Some(j) = stack.pop() {
            nodes.push(j);
            let mut below: Vec<JointNodeIndex> = Vec::new();
            for b in self.joint_nodes[j.0].children() {
                below.extend(self.body_nodes[b.0].children());
            }
            stack.extend(below.into_iter().rev());
        }
        nodes
    }

    /// Every body in the tree: the root body first, then each joint node's
    /// distal bodies in depth-first order.
    #[must_use]
    pub fn bodies(&self) -> Vec<BodyId> {
        let mut bodies = vec![self.root_body()];
        for j in self.joint_nodes() {
            bodies.extend(self.joint_nodes[j.0].distal_bodies());
        }
        bodies
    }

    /// Check whether any node of the tree touches `body`.
    #[must_use]
    pub fn contains_body(&self, body: BodyId) -> bool {
        self.joint_nodes.iter().any(|n| n.contains_body(body))
    }

    // ------------------------------------------------------------------
    // Pose propagation
    // ------------------------------------------------------------------

    /// Pre-multiply every distal body of a joint node by `t` and refresh
    /// the attachments of the node's joints.
    pub fn update_distal_bodies(
        &self,
        model: &mut MechModel,
        node: JointNodeIndex,
        t: &Pose,
    ) -> Result<()> {
        let jnode = &self.joint_nodes[node.0];
        for body in jnode.distal_bodies() {
            if !body.is_ground() {
                model.transform_body_pose(body, t)?;
            }
        }
        for joint in jnode.joints() {
            model.update_attachments(joint)?;
        }
        Ok(())
    }

    /// Apply `t` to everything distal to a body node.
    pub fn update_descendants(
        &self,
        model: &mut MechModel,
        node: BodyNodeIndex,
        t: &Pose,
    ) -> Result<()> {
        let mut stack = vec![node];
        while let Some(b) = stack.pop() {
            for j in self.body_nodes[b.0].children() {
                self.update_distal_bodies(model, j, t)?;
                stack.extend(self.joint_nodes[j.0].children());
            }
        }
        Ok(())
    }
}

impl fmt::Display for KinematicTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "root: {}", self.root_body())?;
        for j in self.joint_nodes() {
            let node = &self.joint_nodes[j.0];
            write!(f, "joint node {:2} constrainers:", node.number())?;
            for c in &node.constrainers {
                write!(f, " {c}")?;
            }
            write!(f, " bodies:")?;
            for b in &node.bodies {
                write!(f, " {b}")?;
            }
            match node.proximal_body {
                Some(b) => writeln!(f, " proximal: {b}")?,
                None => writeln!(f, " proximal: none")?,
            }
        }
        Ok(())
    }
}

/// Lowest-numbered non-ground body of `node` passing `pred`.
fn min_body(
    model: &MechModel,
    node: &JointNode,
    pred: impl Fn(&sim_constraint::RigidBody) -> bool,
) -> Option<BodyId> {
    node.bodies
        .iter()
        .copied()
        .filter(|b| !b.is_ground())
        .find(|&b| model.body(b).is_ok_and(&pred))
}

/// Body of `node` with the largest outward joint surplus, first on ties.
fn most_outward_body(model: &MechModel, node: &JointNode) -> Option<(i64, BodyId)> {
    let mut best: Option<(i64, BodyId)> = None;
    for &body in &node.bodies {
        let surplus = outward_surplus(model, body);
        if best.map_or(true, |(s, _)| surplus > s) {
            best = Some((surplus, body));
        }
    }
    best
}

/// Outward joints (for which the body is not body A) minus inward ones.
fn outward_surplus(model: &MechModel, body: BodyId) -> i64 {
    let joints = model.joints_for_body(body);
    let outward = joints
        .iter()
        .filter(|&&j| model.joint(j).is_ok_and(|jt| jt.body_a() != body))
        .count() as i64;
    2 * outward - joints.len() as i64
}

/// State of the lowlink search that groups constrainers into joint nodes.
struct JointNodeSearch<'a> {
    model: &'a MechModel,
    infos: &'a [BodyInfo],
    vertex_of: HashMap<BodyId, usize>,
    constrainer_bodies: HashMap<ConstrainerId, Vec<BodyId>>,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    parent: Vec<Option<usize>>,
    body_node_of: Vec<Option<BodyNodeIndex>>,
    counter: usize,
    edges: Vec<ConstrainerId>,
    was_stacked: HashSet<ConstrainerId>,
    /// Joint nodes in the order their vertices finished.
    order: Vec<JointNodeIndex>,
    tree: KinematicTree,
}

/// One pending vertex of the depth-first search.
struct Frame {
    v: usize,
    next_constrainer: usize,
    next_body: usize,
    num_children: usize,
    is_cut: bool,
    new_nodes: Vec<JointNodeIndex>,
}

impl Frame {
    fn new(v: usize) -> Self {
        Self {
            v,
            next_constrainer: 0,
            next_body: 0,
            num_children: 0,
            is_cut: false,
            new_nodes: Vec::new(),
        }
    }
}

impl<'a> JointNodeSearch<'a> {
    fn new(model: &'a MechModel, infos: &'a [BodyInfo]) -> Result<Self> {
        let vertex_of: HashMap<BodyId, usize> =
            infos.iter().enumerate().map(|(i, info)| (info.body, i)).collect();
        let mut constrainer_bodies = HashMap::new();
        for info in infos {
            for &c in &info.constrainers {
                if !constrainer_bodies.contains_key(&c) {
                    constrainer_bodies.insert(c, model.constrainer_bodies(c)?);
                }
            }
        }
        let n = infos.len();
        Ok(Self {
            model,
            infos,
            vertex_of,
            constrainer_bodies,
            index: vec![None; n],
            lowlink: vec![0; n],
            parent: vec![None; n],
            body_node_of: vec![None; n],
            counter: 0,
            edges: Vec::new(),
            was_stacked: HashSet::new(),
            order: Vec::new(),
            tree: KinematicTree::empty(),
        })
    }

    fn enter(&mut self, v: usize) {
        self.index[v] = Some(self.counter);
        self.lowlink[v] = self.counter;
        self.counter += 1;
    }

    fn vertex_index(&self, v: usize) -> usize {
        self.index[v].unwrap_or(usize::MAX)
    }

    fn bodies_of(&self, c: ConstrainerId) -> Result<&[BodyId]> {
        self.constrainer_bodies
            .get(&c)
            .map(Vec::as_slice)
            .ok_or_else(|| SimError::malformed_graph(format!("{c} not gathered")))
    }

    /// Depth-first search from `start`, with an explicit frame stack.
    fn run(&mut self, start: usize) -> Result<()> {
        self.enter(start);
        let mut stack = vec![Frame::new(start)];

        while let Some(frame) = stack.last_mut() {
            let v = frame.v;
            let Some(&c) = self.infos[v].constrainers.get(frame.next_constrainer) else {
                // all constrainers of v explored
                let Some(done) = stack.pop() else { break };
                self.finish(done);
                if let Some(up) = stack.last_mut() {
                    self.after_child(up, v)?;
                }
                continue;
            };
            if frame.next_body == 0 && self.was_stacked.insert(c) {
                self.edges.push(c);
            }
            let bodies = self.bodies_of(c)?;
            let Some(&body) = bodies.get(frame.next_body) else {
                frame.next_constrainer += 1;
                frame.next_body = 0;
                continue;
            };
            frame.next_body += 1;
            if body == self.infos[v].body {
                continue;
            }
            let w = *self.vertex_of.get(&body).ok_or_else(|| {
                SimError::malformed_graph(format!("{c} reaches {body} outside the gathered set"))
            })?;
            if self.index[w].is_none() {
                self.parent[w] = Some(v);
                frame.num_children += 1;
                self.enter(w);
                stack.push(Frame::new(w));
            } else if Some(w) != self.parent[v] {
                self.lowlink[v] = self.lowlink[v].min(self.vertex_index(w));
            }
        }
        Ok(())
    }

    /// Back in `up` after the subtree of child `w` is done.
    fn after_child(&mut self, up: &mut Frame, w: usize) -> Result<()> {
        let v = up.v;
        if self.lowlink[w] >= self.vertex_index(v) {
            up.is_cut = true;
            let entry = self.infos[v].constrainers[up.next_constrainer];
            let mut owned = Vec::new();
            loop {
                let c = self.edges.pop().ok_or_else(|| {
                    SimError::malformed_graph(format!("edge stack exhausted before {entry}"))
                })?;
                owned.push(c);
                if c == entry {
                    break;
                }
            }
            let node = JointNode::new(owned, self.model)?;
            self.tree.joint_nodes.push(node);
            let j = JointNodeIndex(self.tree.joint_nodes.len() - 1);
            let bodies = self.tree.joint_nodes[j.0].bodies.clone();
            for body in bodies {
                if let Some(&u) = self.vertex_of.get(&body) {
                    if let Some(b) = self.body_node_of[u] {
                        self.tree.link(b, j);
                    }
                }
            }
            up.new_nodes.push(j);
        }
        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
        Ok(())
    }

    /// Decide whether a finished vertex becomes a body node.
    fn finish(&mut self, frame: Frame) {
        let v = frame.v;
        let is_root = self.parent[v].is_none();
        if (!is_root && frame.is_cut) || (is_root && frame.num_children > 1) {
            let b = self.tree.push_body_node(self.infos[v].body);
            self.body_node_of[v] = Some(b);
            for &j in &frame.new_nodes {
                self.tree.link(b, j);
            }
        }
        self.order.extend(frame.new_nodes);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use sim_constraint::{ExtraConstraint, Joint, JointType, RigidBody};
    use sim_types::JointCoordinateHandle;

    fn add_bodies(model: &mut MechModel, n: i64) {
        for i in 0..n {
            model
                .add_body(RigidBody::new(
                    BodyId::new(i),
                    Pose::from_xyz_rot_z(i as f64, 0.0, 0.0, 0.0),
                ))
                .unwrap();
        }
    }

    fn hinge(model: &mut MechModel, id: u64, a: i64, b: Option<i64>) -> JointId {
        model
            .add_joint(Joint::new(
                JointId::new(id),
                JointType::Revolute,
                BodyId::new(a),
                b.map(BodyId::new),
            ))
            .unwrap()
    }

    /// ground - 0 - 1 - 2, three hinges in series.
    fn chain() -> MechModel {
        let mut model = MechModel::new();
        add_bodies(&mut model, 3);
        hinge(&mut model, 0, 0, None);
        hinge(&mut model, 1, 1, Some(0));
        hinge(&mut model, 2, 2, Some(1));
        model
    }

    #[test]
    fn test_chain_is_all_simple() {
        let model = chain();
        let tree = KinematicTree::find_tree(&model, BodyId::new(2)).unwrap().unwrap();
        assert_eq!(tree.root_body(), BodyId::GROUND);
        assert_eq!(tree.num_joint_nodes(), 3);
        // ground, 0 and 1 are body nodes; the leaf 2 is not
        assert_eq!(tree.num_body_nodes(), 3);
        assert!(tree.find_body_node(BodyId::new(2)).is_none());

        let order: Vec<i64> = tree
            .joint_nodes()
            .into_iter()
            .map(|j| tree.joint_node(j).number())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        for j in tree.joint_nodes() {
            let node = tree.joint_node(j);
            assert!(node.is_simple());
            assert!(node.num_children() <= 1);
        }
        assert_eq!(
            tree.bodies(),
            vec![BodyId::GROUND, BodyId::new(0), BodyId::new(1), BodyId::new(2)]
        );
    }

    #[test]
    fn test_four_bar_is_one_coupled_node() {
        // ground - 0 - 1 - 2 - ground
        let mut model = MechModel::new();
        add_bodies(&mut model, 3);
        hinge(&mut model, 0, 0, None);
        hinge(&mut model, 1, 1, Some(0));
        hinge(&mut model, 2, 2, Some(1));
        hinge(&mut model, 3, 2, None);

        let tree = KinematicTree::find_tree(&model, BodyId::new(0)).unwrap().unwrap();
        assert_eq!(tree.num_joint_nodes(), 1);
        let j = tree.node_for_joint(JointId::new(3)).unwrap();
        let node = tree.joint_node(j);
        assert!(!node.is_simple());
        assert_eq!(node.num_joints(), 4);
        assert_eq!(node.bodies()[0], BodyId::GROUND);
        assert_eq!(node.proximal_body(), Some(BodyId::GROUND));
        assert_eq!(node.proximal_rigid_body(), None);
        assert_eq!(node.rigid_bodies().len(), 3);
        assert_eq!(node.num_children(), 0);
    }

    #[test]
    fn test_loop_with_tail() {
        // loop ground-0-1-ground, tail 1-2
        let mut model = MechModel::new();
        add_bodies(&mut model, 3);
        hinge(&mut model, 0, 0, None);
        hinge(&mut model, 1, 1, Some(0));
        hinge(&mut model, 2, 1, None);
        hinge(&mut model, 3, 2, Some(1));

        let tree = KinematicTree::find_tree(&model, BodyId::new(2)).unwrap().unwrap();
        assert_eq!(tree.num_joint_nodes(), 2);
        let loop_node = tree.joint_node(tree.node_for_joint(JointId::new(0)).unwrap());
        let tail_node = tree.joint_node(tree.node_for_joint(JointId::new(3)).unwrap());
        assert_eq!(loop_node.num_joints(), 3);
        assert!(tail_node.is_simple());
        assert_eq!(tail_node.proximal_body(), Some(BodyId::new(1)));
        assert_eq!(loop_node.num_children(), 1);
        let child = loop_node.children().next().unwrap();
        assert_eq!(tree.body_node(child).body(), BodyId::new(1));
    }

    #[test]
    fn test_coupling_merges_nodes() {
        // two hinges on ground, coupled
        let mut model = MechModel::new();
        add_bodies(&mut model, 2);
        let a = hinge(&mut model, 0, 0, None);
        let b = hinge(&mut model, 1, 1, None);
        // separate mechanisms while uncoupled
        assert!(!KinematicTree::find_tree(&model, BodyId::new(0))
            .unwrap()
            .unwrap()
            .contains_body(BodyId::new(1)));

        model
            .add_constraint(ExtraConstraint::coupling(
                JointCoordinateHandle::new(a, 0),
                JointCoordinateHandle::new(b, 0),
            ))
            .unwrap();
        let tree = KinematicTree::find_tree(&model, BodyId::new(0)).unwrap().unwrap();
        assert_eq!(tree.num_joint_nodes(), 1);
        let node = tree.joint_node(tree.node_for_joint(a).unwrap());
        assert_eq!(node.num_joints(), 2);
        assert_eq!(node.num_constrainers(), 3);
        assert!(!node.constrainers()[2].is_joint());
        // max(min joint 0, min constraint 0)
        assert_eq!(node.number(), 0);
    }

    #[test]
    fn test_isolated_body_has_no_tree() {
        let mut model = chain();
        model
            .add_body(RigidBody::new(BodyId::new(9), Pose::identity()))
            .unwrap();
        assert!(KinematicTree::find_tree(&model, BodyId::new(9)).unwrap().is_none());
        let trees = KinematicTree::find_trees_for_bodies(
            &model,
            &[BodyId::new(0), BodyId::new(9), BodyId::new(2)],
        )
        .unwrap();
        assert_eq!(trees.len(), 1);
    }

    #[test]
    fn test_root_prefers_grounded_body() {
        // free-floating chain 0 - 1 - 2, body 1 marked grounded
        let mut model = MechModel::new();
        model
            .add_body(RigidBody::new(BodyId::new(0), Pose::identity()))
            .unwrap();
        model
            .add_body(RigidBody::new(BodyId::new(1), Pose::identity()).grounded())
            .unwrap();
        model
            .add_body(RigidBody::new(BodyId::new(2), Pose::identity()))
            .unwrap();
        hinge(&mut model, 0, 1, Some(0));
        hinge(&mut model, 1, 2, Some(1));
        let tree = KinematicTree::find_tree(&model, BodyId::new(0)).unwrap().unwrap();
        assert_eq!(tree.root_body(), BodyId::new(1));
        assert_eq!(tree.body_node(tree.root()).num_children(), 2);
    }

    #[test]
    fn test_root_by_outward_surplus() {
        // 1 -> 0 <- 2: body 0 is body B of both joints
        let mut model = MechModel::new();
        add_bodies(&mut model, 3);
        hinge(&mut model, 0, 1, Some(0));
        hinge(&mut model, 1, 2, Some(0));
        let tree = KinematicTree::find_tree(&model, BodyId::new(2)).unwrap().unwrap();
        assert_eq!(tree.root_body(), BodyId::new(0));
    }

    #[test]
    fn test_single_node_root_is_lowest_body() {
        // two free bodies joined by one hinge each way round: one joint node
        let mut model = MechModel::new();
        add_bodies(&mut model, 2);
        hinge(&mut model, 0, 0, Some(1));
        hinge(&mut model, 1, 1, Some(0));
        let tree = KinematicTree::find_tree(&model, BodyId::new(1)).unwrap().unwrap();
        assert_eq!(tree.num_joint_nodes(), 1);
        assert_eq!(tree.root_body(), BodyId::new(0));
        assert_eq!(tree.num_body_nodes(), 1);
    }

    #[test]
    fn test_ground_does_not_join_mechanisms() {
        let mut model = MechModel::new();
        add_bodies(&mut model, 2);
        hinge(&mut model, 0, 0, None);
        hinge(&mut model, 1, 1, None);
        let infos = KinematicTree::find_body_info_for_body(&model, BodyId::new(0)).unwrap();
        let bodies: Vec<BodyId> = infos.iter().map(|i| i.body).collect();
        assert_eq!(bodies, vec![BodyId::new(0), BodyId::GROUND]);
        assert_eq!(infos[1].constrainers, vec![ConstrainerId::Joint(JointId::new(0))]);
    }

    #[test]
    fn test_update_distal_bodies_moves_leaf_only() {
        let mut model = chain();
        let tree = KinematicTree::find_tree(&model, BodyId::new(0)).unwrap().unwrap();
        let j = tree.node_for_joint(JointId::new(2)).unwrap();
        let t = Pose::from_xyz_rot_z(0.0, 1.0, 0.0, 0.0);
        tree.update_distal_bodies(&mut model, j, &t).unwrap();
        assert_eq!(model.body_pose(BodyId::new(2)).unwrap().position.y, 1.0);
        assert_eq!(model.body_pose(BodyId::new(1)).unwrap().position.y, 0.0);

        let b0 = tree.find_body_node(BodyId::new(0)).unwrap();
        tree.update_descendants(&mut model, b0, &t).unwrap();
        assert_eq!(model.body_pose(BodyId::new(1)).unwrap().position.y, 1.0);
        assert_eq!(model.body_pose(BodyId::new(2)).unwrap().position.y, 2.0);
        assert_eq!(model.body_pose(BodyId::new(0)).unwrap().position.y, 0.0);
    }
}
