//! Mechanism model and constraint machinery for coordinate setting.
//!
//! This crate provides the collaborators the coordinate setter works
//! against: a model of bodies and constrainers, joint couplings with
//! scalar coordinates, assembled constraint matrices, and the dense linear
//! algebra used to solve for body corrections.
//!
//! # Joint Types
//!
//! [`JointType`] is a closed set of couplings between a frame C on body A
//! and a frame D on body B (or ground):
//!
//! - `Revolute`: rotation about z (hinges, elbows)
//! - `Prismatic`: translation along z (sliders)
//! - `Cylindrical`: translation along and rotation about z
//! - `Planar`: x, y and rotation about z
//! - `Spherical`: ball and socket, no coordinates
//! - `Fixed`: rigid connection
//!
//! # Coordinates
//!
//! Each joint coordinate ([`Coordinate`]) has a value, a range, a lock flag
//! with a locked value, and a [`LimitEngagement`]. Locked coordinates add
//! bilateral rows; engaged limits add unilateral rows.
//!
//! # Constraint Formulation
//!
//! For the bodies being solved, [`ConstraintAssembly`] stacks
//!
//! ```text
//! G  dq  = bg     (joint constraints, locks, extra constraints)
//! N  dq >= bn     (engaged limits)
//! qdot   = JT^T v (coordinate rates)
//! ```
//!
//! and [`KktSolver`] solves the constrained quadratic step. [`PivotedQr`]
//! provides the rank decisions.
//!
//! # Example
//!
//! ```
//! use sim_constraint::{ConstraintAssembly, Joint, JointType, MechModel, RigidBody};
//! use sim_types::{BodyId, JointId, Pose};
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
//!
//! let mut assembly = ConstraintAssembly::new(&model, &[link], &[hinge], &[]).unwrap();
//! assembly.update_constraints(&mut model).unwrap();
//! assert_eq!(assembly.bilateral().0.nrows(), 5);
//! ```
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**.

#![doc(html_root_url = "https://docs.rs/sim-constraint/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::suboptimal_flops,
    clippy::many_single_char_names
)]

mod assembly;
mod coordinate;
mod coupling;
mod extra;
mod joint;
mod kkt;
mod model;
mod qr;

pub use assembly::{ConstraintAssembly, ConstraintSignature, RowInfo};
pub use coordinate::{Coordinate, LimitEngagement};
pub use coupling::{unwrap_angle, wrap_angle, JointType, Wrench};
pub use extra::{ConstrainerId, ExtraConstraint};
pub use joint::Joint;
pub use kkt::{KktMatrixType, KktSolution, KktSolver};
pub use model::{MechModel, RigidBody};
pub use qr::PivotedQr;

// Re-export types needed alongside the model
pub use sim_types::{BodyId, JointCoordinateHandle, JointId, Pose};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    /// A slider on ground: the prismatic coordinate tracks body translation.
    #[test]
    fn test_prismatic_coordinate_rate() {
        let mut model = MechModel::new();
        let block = model
            .add_body(RigidBody::new(BodyId::new(0), Pose::identity()))
            .unwrap();
        let slider = model
            .add_joint(Joint::new(JointId::new(0), JointType::Prismatic, block, None))
            .unwrap();
        let mut asm = ConstraintAssembly::new(&model, &[block], &[slider], &[]).unwrap();
        asm.update_constraints(&mut model).unwrap();

        let dq = DVector::from_vec(vec![0.0, 0.0, 0.3, 0.0, 0.0, 0.0]);
        let qdot = asm.coordinate_jacobian().transpose() * &dq;
        assert_relative_eq!(qdot[0], 0.3, epsilon = 1e-12);

        asm.integrate(&mut model, &dq, 1.0).unwrap();
        asm.update_constraints(&mut model).unwrap();
        assert_relative_eq!(asm.coordinate_values()[0], 0.3, epsilon = 1e-12);
    }

    /// A coupling row between two hinges is the difference of their rates.
    #[test]
    fn test_coordinate_coupling_row() {
        let mut model = MechModel::new();
        for i in 0..2 {
            model
                .add_body(RigidBody::new(BodyId::new(i), Pose::identity()))
                .unwrap();
            model
                .add_joint(Joint::new(
                    JointId::new(i as u64),
                    JointType::Revolute,
                    BodyId::new(i),
                    None,
                ))
                .unwrap();
        }
        let a = JointCoordinateHandle::new(JointId::new(0), 0);
        let b = JointCoordinateHandle::new(JointId::new(1), 0);
        let c = model
            .add_constraint(ExtraConstraint::CoordinateCoupling {
                a,
                b,
                ratio: 2.0,
                offset: 0.1,
            })
            .unwrap();
        let mut asm = ConstraintAssembly::new(
            &model,
            &[BodyId::new(0), BodyId::new(1)],
            &[JointId::new(0), JointId::new(1)],
            &[c],
        )
        .unwrap();
        asm.update_constraints(&mut model).unwrap();
        let (g, bg, _) = asm.bilateral();
        assert_eq!(g.nrows(), 11);
        // q_a - 2 q_b - 0.1 = -0.1
        assert_relative_eq!(bg[10], 0.1, epsilon = 1e-12);
        assert_relative_eq!(g[(10, 5)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(g[(10, 11)], -2.0, epsilon = 1e-12);
    }
}
