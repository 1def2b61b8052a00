//! Core types for articulated-body kinematics.
//!
//! This crate provides the foundational types shared by the mechanism model
//! and the coordinate setting pipeline:
//!
//! - [`BodyId`] - Body identifiers, with [`BodyId::GROUND`] as the fixed frame
//! - [`JointId`], [`ConstraintId`] - Constrainer identifiers
//! - [`JointCoordinateHandle`] - Reference to one scalar joint coordinate
//! - [`Pose`] - Rigid transforms
//! - [`MotionType`], [`CoordinateRange`] - Coordinate units and bounds
//! - [`CoordinateSolverConfig`] - Step schedule and solver tolerances
//! - [`SimError`] - Error taxonomy for invariant violations
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They carry no solver state and can be
//! copied, compared, hashed and (with the `serde` feature) serialized.
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**.
//!
//! # Coordinate System
//!
//! - X: right
//! - Y: forward
//! - Z: up
//! - Right-handed
//!
//! # Example
//!
//! ```
//! use sim_types::{BodyId, JointCoordinateHandle, JointId, Pose};
//!
//! let handle = JointCoordinateHandle::new(JointId::new(2), 0);
//! assert_eq!(handle.joint, JointId::new(2));
//! assert!(BodyId::GROUND.is_ground());
//!
//! let pose = Pose::from_xyz_rot_z(1.0, 0.0, 0.0, 0.0);
//! assert_eq!(pose.position.x, 1.0);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
// Allow certain clippy lints that are overly pedantic for type definitions
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::cast_precision_loss,       // usize to f64 is fine for counts
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod error;
mod joint;

pub use body::{BodyId, Pose};
pub use config::CoordinateSolverConfig;
pub use error::SimError;
pub use joint::{ConstraintId, CoordinateRange, JointCoordinateHandle, JointId, MotionType};

// Re-export math types for convenience
pub use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};

/// Result type for kinematic operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_in_hash_map() {
        let mut map = std::collections::HashMap::new();
        let h = JointCoordinateHandle::new(JointId::new(1), 0);
        map.insert(h, 0.5);
        map.insert(h, 0.7);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&h], 0.7);
    }

    #[test]
    fn test_result_alias() {
        fn check(ok: bool) -> Result<u8> {
            if ok {
                Ok(1)
            } else {
                Err(SimError::invalid_config("nope"))
            }
        }
        assert_eq!(check(true).unwrap(), 1);
        assert!(check(false).is_err());
    }
}
