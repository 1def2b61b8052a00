//! Returning a mechanism to a recorded configuration.

use approx::assert_relative_eq;
use sim_kinematics::CoordinateSetter;
use sim_tests::{four_bar, four_bar_with_tail};

/// Test: after moving the loop away, requesting every recorded coordinate
/// brings it back.
#[test]
fn test_four_bar_restores_recorded_coordinates() {
    let mut fixture = four_bar();
    let mut setter = CoordinateSetter::default();
    let c0 = fixture.coordinate_values();

    setter
        .request_deg(&fixture.model, fixture.handle(0), 40.0)
        .unwrap();
    setter
        .request_deg(&fixture.model, fixture.handle(1), -40.0)
        .unwrap();
    let status = setter.set_coordinates(&mut fixture.model).unwrap();
    assert!(status.converged());
    let moved = fixture.coordinate_values();
    assert_relative_eq!(moved[0], 40f64.to_radians(), epsilon = 1e-6);

    for (k, &value) in c0.iter().enumerate() {
        setter.request(fixture.handle(k), value);
    }
    let status = setter.set_coordinates(&mut fixture.model).unwrap();
    assert!(status.converged(), "{status}");
    assert_eq!(status.num_coordinates(), 4);

    let tol = 1e-4f64.to_radians();
    for (q, q0) in fixture.coordinate_values().iter().zip(&c0) {
        assert_relative_eq!(*q, *q0, epsilon = tol);
    }
    assert!(fixture.max_joint_error() < 1e-8);
}

/// Test: a mixed simple and coupled request set restores in one pass.
#[test]
fn test_mixed_restore() {
    let mut fixture = four_bar_with_tail();
    let mut setter = CoordinateSetter::default();
    let c0 = fixture.coordinate_values();

    setter
        .request_deg(&fixture.model, fixture.handle(0), -30.0)
        .unwrap();
    setter
        .request_deg(&fixture.model, fixture.handle(4), 70.0)
        .unwrap();
    setter.set_coordinates(&mut fixture.model).unwrap();
    let moved = fixture.coordinate_values();
    assert_relative_eq!(moved[4], 70f64.to_radians(), epsilon = 1e-9);

    setter.request(fixture.handle(0), c0[0]);
    setter.request(fixture.handle(4), c0[4]);
    let status = setter.set_coordinates(&mut fixture.model).unwrap();
    assert!(status.converged());

    let tol = 1e-4f64.to_radians();
    for (q, q0) in fixture.coordinate_values().iter().zip(&c0) {
        assert_relative_eq!(*q, *q0, epsilon = tol);
    }
    assert!(fixture.max_joint_error() < 1e-8);
}
