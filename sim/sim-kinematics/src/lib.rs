//! Kinematic decomposition and coordinate setting for articulated
//! mechanisms.
//!
//! Given a [`MechModel`](sim_constraint::MechModel) of bodies joined by
//! joints and extra constraints, this crate
//!
//! - decomposes the connectivity graph into a [`KinematicTree`] of body
//!   nodes and joint nodes, where each joint node is a biconnected
//!   component (a closed loop, or a single joint);
//! - sets requested joint coordinates through a [`CoordinateSetter`],
//!   moving the bodies so that all constraints stay satisfied and every
//!   other coordinate keeps its value where the mechanism allows it.
//!
//! # Simple and Coupled Nodes
//!
//! A joint node holding one joint is *simple*: its coordinates can be set
//! directly and the resulting rigid motion is carried down the tree. Every
//! other node is *coupled* and is handed to the [`CoordinateSolver`], which
//! ranks the requested coordinates against the loop constraints and drives
//! the independent ones to their targets with constrained Newton steps.
//!
//! # Results
//!
//! Each set call returns a [`SetStatus`]. Failing to converge, or a request
//! set that the loop cannot satisfy, is reported there as
//! [`CoordStatus::Limited`] or [`CoordStatus::Dependent`] coordinates and is
//! never an error. Errors ([`SimError`](sim_types::SimError)) are reserved
//! for bad ids and broken invariants.
//!
//! # Example
//!
//! ```
//! use sim_constraint::{Joint, JointType, MechModel, RigidBody};
//! use sim_kinematics::CoordinateSetter;
//! use sim_types::{BodyId, JointCoordinateHandle, JointId, Pose};
//!
//! // ground - hinge - link0 - slider - link1
//! let mut model = MechModel::new();
//! let link0 = model
//!     .add_body(RigidBody::new(BodyId::new(0), Pose::identity()))
//!     .unwrap();
//! let link1 = model
//!     .add_body(RigidBody::new(BodyId::new(1), Pose::identity()))
//!     .unwrap();
//! model
//!     .add_joint(Joint::new(JointId::new(0), JointType::Revolute, link0, None))
//!     .unwrap();
//! let slider = model
//!     .add_joint(Joint::new(JointId::new(1), JointType::Prismatic, link1, Some(link0)))
//!     .unwrap();
//! model.update_all_attachments().unwrap();
//!
//! let mut setter = CoordinateSetter::default();
//! setter.request(JointCoordinateHandle::new(slider, 0), 0.25);
//! let status = setter.set_coordinates(&mut model).unwrap();
//! assert!(status.converged());
//! assert!((model.body_pose(link1).unwrap().position.z - 0.25).abs() < 1e-9);
//! ```
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**.

#![doc(html_root_url = "https://docs.rs/sim-kinematics/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::suboptimal_flops,
    clippy::module_name_repetitions,
    clippy::too_many_arguments
)]

mod request;
mod setter;
mod solver;
mod tree;

pub use request::{CoordStatus, JointCoordRequest, SetStatus};
pub use setter::{CoordinateSetter, WrapPathHook};
pub use solver::{CoordinateSolver, StepStatus};
pub use tree::{BodyInfo, BodyNode, BodyNodeIndex, JointNode, JointNodeIndex, KinematicTree};

// Re-export the configuration used by the setter and solver
pub use sim_types::CoordinateSolverConfig;
