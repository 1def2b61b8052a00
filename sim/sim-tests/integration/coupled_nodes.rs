//! Setting coordinates inside closed loops and coupled joints.

use approx::assert_relative_eq;
use sim_kinematics::CoordinateSetter;
use sim_tests::{coupled_pair, four_bar, four_bar_with_tail};
use sim_types::{CoordinateRange, CoordinateSolverConfig};

const ANGLE_TOL: f64 = 1e-6;

// ============================================================================
// Four-bar
// ============================================================================

/// Test: driving the crank of a parallelogram moves the whole loop and the
/// other three angles follow it.
#[test]
fn test_four_bar_crank() {
    let mut fixture = four_bar();
    let base_before = fixture.model.body_pose(fixture.bodies[0]).unwrap();
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 30.0)
        .unwrap();

    assert!(status.converged(), "{status}");
    assert!(status.is_free(h));
    let q = fixture.coordinate_values();
    let a = 30f64.to_radians();
    assert_relative_eq!(q[0], a, epsilon = ANGLE_TOL);
    assert_relative_eq!(q[1], -a, epsilon = ANGLE_TOL);
    assert_relative_eq!(q[2], a, epsilon = ANGLE_TOL);
    assert_relative_eq!(q[3], -a, epsilon = ANGLE_TOL);
    assert_relative_eq!(q.iter().sum::<f64>(), 0.0, epsilon = ANGLE_TOL);
    assert!(fixture.max_joint_error() < 1e-8);

    // the fixed base stays put
    let base_after = fixture.model.body_pose(fixture.bodies[0]).unwrap();
    let (dt, dr) = base_before.distance_to(&base_after);
    assert!(dt < 1e-9 && dr < 1e-9);

    // the coupler translates without turning
    let coupler = fixture.model.body_pose(fixture.bodies[2]).unwrap();
    assert_relative_eq!(coupler.position.x, 0.5 - a.sin(), epsilon = 1e-6);
    assert_relative_eq!(coupler.position.y, a.cos(), epsilon = 1e-6);
}

/// Test: conflicting requests on a one-degree-of-freedom loop leave at
/// most one of them free.
#[test]
fn test_four_bar_conflicting_requests() {
    let mut fixture = four_bar();
    let mut setter = CoordinateSetter::default();
    setter
        .request_deg(&fixture.model, fixture.handle(0), 20.0)
        .unwrap();
    setter
        .request_deg(&fixture.model, fixture.handle(2), 40.0)
        .unwrap();
    let status = setter.set_coordinates(&mut fixture.model).unwrap();

    assert_eq!(status.num_coordinates(), 2);
    assert!(status.num_free() <= 1);
    assert_eq!(
        status.num_free() + status.num_dependent() + status.num_limited(),
        2
    );
    assert!(status.num_dependent() + status.num_limited() >= 1);
    assert!(setter.pending_requests().is_empty());
    // whatever was chosen, the loop is still closed
    assert!(fixture.max_joint_error() < 1e-6);
}

/// Test: a pendulum hung off the loop rides along without changing its
/// own angle.
#[test]
fn test_tail_follows_loop() {
    let mut fixture = four_bar_with_tail();
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, -25.0)
        .unwrap();

    assert!(status.converged());
    let q = fixture.coordinate_values();
    assert_relative_eq!(q[0], (-25f64).to_radians(), epsilon = ANGLE_TOL);
    assert_relative_eq!(q[4], 0.0, epsilon = 1e-9);
    assert!(fixture.max_joint_error() < 1e-8);
}

/// Test: setting a loop coordinate to its current value moves nothing.
#[test]
fn test_four_bar_set_current_value() {
    let mut fixture = four_bar();
    let before: Vec<_> = fixture
        .bodies
        .iter()
        .map(|&b| fixture.model.body_pose(b).unwrap())
        .collect();
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(1);
    let status = setter
        .set_coordinate(&mut fixture.model, h, 0.0)
        .unwrap();

    assert!(status.converged());
    for (&b, p) in fixture.bodies.iter().zip(&before) {
        let (dt, dr) = p.distance_to(&fixture.model.body_pose(b).unwrap());
        assert!(dt < 1e-9 && dr < 1e-9);
    }
}

/// Test: a large crank swing and the return trip both close the loop.
#[test]
fn test_four_bar_large_swing() {
    let mut fixture = four_bar();
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);

    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 170.0)
        .unwrap();
    assert!(status.converged(), "{status}");
    assert_relative_eq!(
        fixture.coordinate_values()[0],
        170f64.to_radians(),
        epsilon = ANGLE_TOL
    );
    assert!(fixture.max_joint_error() < 1e-9);

    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 0.0)
        .unwrap();
    assert!(status.converged(), "{status}");
    for q in fixture.coordinate_values() {
        assert_relative_eq!(q, 0.0, epsilon = ANGLE_TOL);
    }
    assert!(fixture.max_joint_error() < 1e-9);
}

// ============================================================================
// Limits
// ============================================================================

/// Test: a range on a dependent loop joint stops the crank where the
/// range is reached, and the request is reported limited.
#[test]
fn test_four_bar_stops_at_dependent_range() {
    let mut fixture = four_bar();
    let h1 = fixture.handle(1);
    fixture
        .model
        .coordinate_mut(h1)
        .unwrap()
        .set_range(CoordinateRange::degrees(-10.0, 10.0));
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 30.0)
        .unwrap();

    assert!(status.converged(), "{status}");
    assert_eq!(status.num_limited(), 1);
    assert!(status.is_limited(h));
    assert_eq!(status.to_string(), "CONVERGED, LIMITED=1");

    let q = fixture.coordinate_values();
    let a = 10f64.to_radians();
    let tol = 1e-5;
    assert_relative_eq!(q[0], a, epsilon = tol);
    assert_relative_eq!(q[1], -a, epsilon = tol);
    assert_relative_eq!(q[2], a, epsilon = tol);
    assert_relative_eq!(q[3], -a, epsilon = tol);
    assert!(fixture.max_joint_error() < 1e-8);
}

// ============================================================================
// Polish
// ============================================================================

/// Test: when the iteration budget runs out, the closing pass still
/// assembles the loop; without it the loop is left open.
#[test]
fn test_polish_closes_unconverged_loop() {
    let starved = CoordinateSolverConfig {
        max_iterations: 1,
        intermediate_iterations: 1,
        ..CoordinateSolverConfig::default()
    };
    assert!(starved.apply_polish);

    let mut polished = four_bar();
    let mut setter = CoordinateSetter::new(starved.clone());
    let h = polished.handle(0);
    let status = setter
        .set_coordinate_deg(&mut polished.model, h, 30.0)
        .unwrap();
    assert!(!status.converged());
    assert_eq!(status.to_string(), "NO CONVERGENCE");
    let polished_err = polished.max_joint_error();
    assert!(polished_err < 1e-8, "{polished_err}");

    let mut raw = four_bar();
    let mut setter = CoordinateSetter::new(CoordinateSolverConfig {
        apply_polish: false,
        ..starved
    });
    let h = raw.handle(0);
    let status = setter
        .set_coordinate_deg(&mut raw.model, h, 30.0)
        .unwrap();
    assert!(!status.converged());
    let raw_err = raw.max_joint_error();
    assert!(raw_err > polished_err, "{raw_err} <= {polished_err}");
}

// ============================================================================
// Coordinate couplings
// ============================================================================

/// Test: the driven side of a coupling follows the requested side.
#[test]
fn test_coupled_pair_follows_ratio() {
    let mut fixture = coupled_pair(2.0);
    let mut setter = CoordinateSetter::default();
    setter.request(fixture.handle(1), 0.2);
    let status = setter.set_coordinates(&mut fixture.model).unwrap();

    assert!(status.converged());
    assert_eq!(status.num_free(), status.num_coordinates());
    let q = fixture.coordinate_values();
    assert_relative_eq!(q[1], 0.2, epsilon = ANGLE_TOL);
    assert_relative_eq!(q[0], 0.4, epsilon = ANGLE_TOL);
    assert!(fixture.max_joint_error() < 1e-8);
}

// ============================================================================
// Iteration counts
// ============================================================================

/// Test: loop solves are counted until the counter is cleared.
#[test]
fn test_iteration_counter() {
    let mut fixture = four_bar();
    let mut setter = CoordinateSetter::default();
    let h = fixture.handle(0);
    let status = setter
        .set_coordinate_deg(&mut fixture.model, h, 10.0)
        .unwrap();
    assert!(status.num_iterations() > 0);
    assert_eq!(setter.num_iterations(), status.num_iterations());

    setter
        .set_coordinate_deg(&mut fixture.model, h, 20.0)
        .unwrap();
    assert!(setter.num_iterations() > status.num_iterations());

    setter.clear_solve_counts();
    assert_eq!(setter.num_iterations(), 0);
}
