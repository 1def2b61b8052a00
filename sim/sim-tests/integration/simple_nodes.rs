//! Setting coordinates of loop-free joints.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use sim_constraint::MechModel;
use sim_kinematics::{CoordinateSetter, WrapPathHook};
use sim_tests::{four_bar_with_tail, revolute_chain};
use sim_types::{CoordinateRange, Pose};

/// Records the first coordinate of every joint each time it is called.
struct Recorder {
    joints: Vec<sim_types::JointId>,
    seen: Rc<RefCell<Vec<Vec<f64>>>>,
}

impl WrapPathHook for Recorder {
    fn update_wrap_segments(&mut self, model: &MechModel) {
        let values = self
            .joints
            .iter()
            .map(|&j| model.joint(j).unwrap().coordinate_values()[0])
            .collect();
        self.seen.borrow_mut().push(values);
    }
}

fn poses(model: &MechModel, fixture_bodies: &[sim_types::BodyId]) -> Vec<Pose> {
    fixture_bodies
        .iter()
        .map(|&b| model.body_pose(b).unwrap())
        .collect()
}

// ============================================================================
// Exactness
// ============================================================================

/// Test: a simple coordinate lands exactly on its target and no other
/// coordinate moves.
#[test]
fn test_simple_set_is_exact() {
    let mut fixture = revolute_chain(3);
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(1);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 40.0)
        .unwrap();

    assert!(status.converged());
    assert_eq!(status.num_iterations(), 0);
    let values = fixture.coordinate_values();
    assert_relative_eq!(values[0], 0.0, epsilon = 1e-12);
    assert_relative_eq!(values[1], 40f64.to_radians(), epsilon = 1e-12);
    assert_relative_eq!(values[2], 0.0, epsilon = 1e-12);
    assert!(fixture.max_joint_error() < 1e-12);

    // link 0 did not move, link 2 swung with link 1
    let p0 = fixture.model.body_pose(fixture.bodies[0]).unwrap();
    assert_relative_eq!(p0.position.x, 0.5, epsilon = 1e-12);
    let p2 = fixture.model.body_pose(fixture.bodies[2]).unwrap();
    let a = 40f64.to_radians();
    assert_relative_eq!(p2.position.x, 1.0 + 1.5 * a.cos(), epsilon = 1e-12);
    assert_relative_eq!(p2.position.y, 1.5 * a.sin(), epsilon = 1e-12);
}

/// Test: several simple requests resolve in one pass.
#[test]
fn test_simple_requests_together() {
    let mut fixture = revolute_chain(3);
    let mut setter = CoordinateSetter::default();
    setter
        .request_joint_deg(&fixture.model, fixture.joints[0], 0, -20.0)
        .unwrap();
    setter
        .request_joint_deg(&fixture.model, fixture.joints[2], 0, 35.0)
        .unwrap();
    let status = setter.set_coordinates(&mut fixture.model).unwrap();

    assert!(status.converged());
    assert_eq!(status.num_free(), 2);
    let values = fixture.coordinate_values();
    assert_relative_eq!(values[0], (-20f64).to_radians(), epsilon = 1e-12);
    assert_relative_eq!(values[1], 0.0, epsilon = 1e-12);
    assert_relative_eq!(values[2], 35f64.to_radians(), epsilon = 1e-12);
    assert!(fixture.max_joint_error() < 1e-12);
}

// ============================================================================
// Idempotence and ranges
// ============================================================================

/// Test: setting a coordinate to its current value moves nothing.
#[test]
fn test_set_to_current_value_is_noop() {
    let mut fixture = revolute_chain(3);
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);
    setter.set_coordinate_deg(&mut fixture.model, h, 25.0).unwrap();
    let before = poses(&fixture.model, &fixture.bodies);

    let current = fixture.model.coordinate(h).unwrap().value();
    setter.set_coordinate(&mut fixture.model, h, current).unwrap();
    let after = poses(&fixture.model, &fixture.bodies);
    for (p, q) in before.iter().zip(&after) {
        let (dt, dr) = p.distance_to(q);
        assert!(dt < 1e-12 && dr < 1e-12);
    }
}

/// Test: requests outside a coordinate's range are clipped to it.
#[test]
fn test_simple_request_respects_range() {
    let mut fixture = revolute_chain(2);
    let h = fixture.handle(1);
    fixture
        .model
        .coordinate_mut(h)
        .unwrap()
        .set_range(CoordinateRange::degrees(-30.0, 30.0));
    let mut setter = CoordinateSetter::default();
    setter.set_coordinate_deg(&mut fixture.model, h, -75.0).unwrap();
    assert_relative_eq!(
        fixture.model.coordinate(h).unwrap().value(),
        (-30f64).to_radians(),
        epsilon = 1e-12
    );
}

// ============================================================================
// Interpolation
// ============================================================================

/// Test: large changes are spread over steps of at most 15 degrees, and
/// co-scheduled requests advance together.
#[test]
fn test_steps_are_bounded() {
    let mut fixture = revolute_chain(2);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let recorder = Recorder {
        joints: fixture.joints.clone(),
        seen: seen.clone(),
    };
    let mut setter = CoordinateSetter::default().with_wrap_hook(Box::new(recorder));
    setter.request_deg(&fixture.model, fixture.handle(0), 90.0).unwrap();
    setter.request_deg(&fixture.model, fixture.handle(1), 45.0).unwrap();
    setter.set_coordinates(&mut fixture.model).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 6);
    let mut prev = vec![0.0, 0.0];
    for (i, values) in seen.iter().enumerate() {
        let s = (i + 1) as f64 / 6.0;
        assert_relative_eq!(values[0], s * 90f64.to_radians(), epsilon = 1e-12);
        assert_relative_eq!(values[1], s * 45f64.to_radians(), epsilon = 1e-12);
        assert!(values[0] - prev[0] <= 15f64.to_radians() + 1e-12);
        prev.clone_from(values);
    }
}

/// Test: a simple joint hung off a loop is set directly, leaving the loop
/// untouched.
#[test]
fn test_simple_joint_below_loop() {
    let mut fixture = four_bar_with_tail();
    let loop_before = poses(&fixture.model, &fixture.bodies[..4]);
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(4);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, -60.0)
        .unwrap();
    assert!(status.converged());
    assert_eq!(setter.num_iterations(), 0);

    for (p, q) in loop_before.iter().zip(&poses(&fixture.model, &fixture.bodies[..4])) {
        let (dt, dr) = p.distance_to(q);
        assert!(dt < 1e-12 && dr < 1e-12);
    }
    let tail = fixture.model.body_pose(fixture.bodies[4]).unwrap();
    let a = (-60f64).to_radians();
    assert_relative_eq!(tail.position.x, 1.0 + 0.5 * a.cos(), epsilon = 1e-12);
    assert_relative_eq!(tail.position.y, 0.5 + 0.5 * a.sin(), epsilon = 1e-12);
}
