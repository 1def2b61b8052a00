//! Integration tests for the coordinate setting pipeline.
//!
//! These tests drive whole mechanisms through the public API:
//! - Kinematic tree decomposition of chains, loops and coupled joints
//! - Direct setting of simple (loop-free) joint coordinates
//! - Numeric solving of coordinates inside closed loops
//! - Restoring a looped mechanism to a recorded configuration

pub mod coupled_nodes;
pub mod decomposition;
pub mod restore;
pub mod simple_nodes;
