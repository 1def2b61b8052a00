//! Kinematic tree decomposition of the fixture mechanisms.

use hashbrown::HashSet;
use sim_kinematics::KinematicTree;
use sim_tests::{coupled_pair, four_bar, four_bar_with_tail, revolute_chain};
use sim_types::{BodyId, JointId};

fn tree_of(fixture: &sim_tests::Fixture) -> KinematicTree {
    KinematicTree::find_tree(&fixture.model, fixture.bodies[0])
        .unwrap()
        .expect("fixture bodies are connected")
}

// ============================================================================
// Chains
// ============================================================================

/// Test: every hinge of a serial chain is its own simple joint node.
#[test]
fn test_chain_nodes_are_simple() {
    let fixture = revolute_chain(4);
    let tree = tree_of(&fixture);

    assert_eq!(tree.root_body(), BodyId::GROUND);
    assert_eq!(tree.num_joint_nodes(), 4);
    for j in tree.joint_nodes() {
        let node = tree.joint_node(j);
        assert!(node.is_simple());
        assert!(node.num_children() <= 1);
    }
}

/// Test: joint nodes come out in depth-first order from the root.
#[test]
fn test_chain_depth_first_order() {
    let fixture = revolute_chain(3);
    let tree = tree_of(&fixture);
    let order: Vec<JointId> = tree
        .joint_nodes()
        .into_iter()
        .flat_map(|j| tree.joint_node(j).joints().collect::<Vec<_>>())
        .collect();
    assert_eq!(order, fixture.joints);
}

// ============================================================================
// Loops
// ============================================================================

/// Test: a four-bar is a single coupled node rooted at its fixed base.
#[test]
fn test_four_bar_single_coupled_node() {
    let fixture = four_bar();
    let tree = tree_of(&fixture);

    assert_eq!(tree.root_body(), fixture.bodies[0]);
    assert_eq!(tree.num_joint_nodes(), 1);
    let node = tree.joint_node(tree.joint_nodes()[0]);
    assert!(!node.is_simple());
    assert_eq!(node.num_joints(), 4);
    assert_eq!(node.proximal_rigid_body(), Some(fixture.bodies[0]));
    assert_eq!(node.rigid_bodies().len(), 4);
}

/// Test: a pendulum hung off a loop becomes a simple child node.
#[test]
fn test_tail_is_simple_child_of_loop() {
    let fixture = four_bar_with_tail();
    let tree = tree_of(&fixture);
    assert_eq!(tree.num_joint_nodes(), 2);

    let tail = tree.node_for_joint(fixture.joints[4]).unwrap();
    let node = tree.joint_node(tail);
    assert!(node.is_simple());
    assert_eq!(node.proximal_body(), Some(fixture.bodies[3]));
    // the pendulum is a leaf, not a body node
    assert_eq!(node.num_children(), 0);
    assert!(tree.find_body_node(fixture.bodies[4]).is_none());

    let loop_node = tree.joint_node(tree.node_for_joint(fixture.joints[0]).unwrap());
    assert_eq!(loop_node.num_children(), 1);

    let rocker = tree.find_body_node(fixture.bodies[3]).unwrap();
    assert_eq!(tree.body_node(rocker).num_children(), 1);
}

/// Test: a coordinate coupling ties otherwise separate hinges together.
#[test]
fn test_coupling_merges_hinges() {
    let fixture = coupled_pair(2.0);
    let tree = tree_of(&fixture);
    assert_eq!(tree.num_joint_nodes(), 1);
    let node = tree.joint_node(tree.joint_nodes()[0]);
    assert_eq!(node.num_joints(), 2);
    assert_eq!(node.num_constrainers(), 3);
    assert!(!node.is_simple());
}

// ============================================================================
// Partition
// ============================================================================

/// Test: every joint belongs to exactly one joint node, and every body of
/// the mechanism appears in the tree.
#[test]
fn test_joints_partitioned() {
    for fixture in [revolute_chain(3), four_bar(), four_bar_with_tail(), coupled_pair(1.0)] {
        let tree = tree_of(&fixture);
        let mut seen = HashSet::new();
        for j in tree.joint_nodes() {
            for joint in tree.joint_node(j).joints() {
                assert!(seen.insert(joint), "{joint} in two joint nodes");
            }
        }
        assert_eq!(seen.len(), fixture.joints.len());
        for &b in &fixture.bodies {
            assert!(tree.contains_body(b));
        }
    }
}

/// Test: one tree per connected set of bodies.
#[test]
fn test_trees_for_bodies() {
    let fixture = four_bar_with_tail();
    let trees = KinematicTree::find_trees_for_bodies(&fixture.model, &fixture.bodies).unwrap();
    assert_eq!(trees.len(), 1);
}
