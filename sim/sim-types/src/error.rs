//! Error types for kinematic operations.
//!
//! Every variant here is a programming or topology-construction error:
//! callers are expected to fix the input, not retry. Numerical
//! non-convergence is not an error and is reported through solve status.

use thiserror::Error;

use crate::{BodyId, ConstraintId, JointCoordinateHandle, JointId};

/// Errors that can occur while building or solving a mechanism.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid body ID referenced.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(BodyId),

    /// Invalid joint ID referenced.
    #[error("invalid joint ID: {0}")]
    InvalidJointId(JointId),

    /// Invalid extra-constraint ID referenced.
    #[error("invalid constraint ID: {0}")]
    InvalidConstraintId(ConstraintId),

    /// Coordinate index outside the joint's coordinate list.
    #[error("joint {joint} has {num_coordinates} coordinates, index {index} is out of range")]
    InvalidCoordinate {
        /// The joint.
        joint: JointId,
        /// The offending index.
        index: usize,
        /// Number of coordinates the joint has.
        num_coordinates: usize,
    },

    /// A body, joint or constraint id was registered twice.
    #[error("duplicate id: {what}")]
    DuplicateId {
        /// Which id collided.
        what: String,
    },

    /// Connectivity graph is inconsistent with the model.
    #[error("malformed kinematic graph: {reason}")]
    MalformedGraph {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A single-joint node was found with more than one distal body node.
    #[error("simple joint node {node} has {children} children")]
    SimpleNodeChildren {
        /// Joint node number.
        node: i64,
        /// Number of child body nodes found.
        children: usize,
    },

    /// A status merge referenced a coordinate that was never requested.
    #[error("coordinate {handle} was not among the requests")]
    UnknownRequest {
        /// The unexpected coordinate.
        handle: JointCoordinateHandle,
    },

    /// Matrix or vector dimensions disagree.
    #[error("size mismatch in {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// What was being sized.
        what: String,
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A matrix declared positive definite failed to factor.
    #[error("{what} is not positive definite")]
    NotPositiveDefinite {
        /// Which matrix.
        what: String,
    },

    /// A dense factorization or decomposition failed numerically.
    #[error("numerical failure: {reason}")]
    NumericalFailure {
        /// What failed.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl SimError {
    /// Create a malformed graph error.
    #[must_use]
    pub fn malformed_graph(reason: impl Into<String>) -> Self {
        Self::MalformedGraph {
            reason: reason.into(),
        }
    }

    /// Create a size mismatch error.
    #[must_use]
    pub fn size_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a numerical failure error.
    #[must_use]
    pub fn numerical_failure(reason: impl Into<String>) -> Self {
        Self::NumericalFailure {
            reason: reason.into(),
        }
    }

    /// Create a duplicate id error.
    #[must_use]
    pub fn duplicate_id(what: impl std::fmt::Display) -> Self {
        Self::DuplicateId {
            what: what.to_string(),
        }
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this error signals a broken internal invariant
    /// (as opposed to a bad id passed in by the caller).
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedGraph { .. }
                | Self::SimpleNodeChildren { .. }
                | Self::UnknownRequest { .. }
                | Self::SizeMismatch { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::InvalidBodyId(BodyId::new(42));
        assert!(err.to_string().contains("42"));

        let err = SimError::InvalidCoordinate {
            joint: JointId::new(3),
            index: 2,
            num_coordinates: 1,
        };
        assert!(err.to_string().contains("Joint(3)"));

        let err = SimError::SimpleNodeChildren {
            node: 4,
            children: 2,
        };
        assert_eq!(err.to_string(), "simple joint node 4 has 2 children");

        let err = SimError::size_mismatch("coordinate JT", 6, 5);
        assert!(err.to_string().contains("coordinate JT"));
    }

    #[test]
    fn test_error_predicates() {
        let err = SimError::malformed_graph("dangling body");
        assert!(err.is_invariant_violation());
        assert!(!err.is_config_error());

        let err = SimError::invalid_config("bad tolerance");
        assert!(err.is_config_error());
        assert!(!err.is_invariant_violation());

        let err = SimError::InvalidJointId(JointId::new(9));
        assert!(!err.is_invariant_violation());

        let err = SimError::numerical_failure("pseudo-inverse");
        assert!(!err.is_config_error());
        assert!(!err.is_invariant_violation());
        assert_eq!(err.to_string(), "numerical failure: pseudo-inverse");
    }
}
