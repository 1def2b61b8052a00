//! Configuration for coordinate setting.
//!
//! Controls the step schedule used to interpolate coordinate changes, the
//! tolerances and iteration budgets of the loop solver, and the clipping
//! bounds applied to each Newton step.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{CoordinateRange, MotionType};

/// Configuration for the coordinate setter and its loop solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoordinateSolverConfig {
    /// Absolute tolerance for numerical rank decisions.
    pub rank_tol: f64,
    /// Cosine between consecutive coordinate deltas below which the
    /// iteration counts as reversing direction.
    pub max_reverse_cos: f64,
    /// Number of consecutive reversals tolerated before the independence
    /// cap is reduced.
    pub max_reverse_count: usize,
    /// Iteration budget for the final step, or whenever no coordinate is free.
    pub max_iterations: usize,
    /// Iteration budget for intermediate steps.
    pub intermediate_iterations: usize,
    /// Convergence tolerance for intermediate steps.
    pub intermediate_tol: f64,
    /// Convergence tolerance for the final step.
    pub final_tol: f64,
    /// Whether to run the constraint-only polish pass after a failed final step.
    pub apply_polish: bool,
    /// Iteration budget of the polish pass.
    pub polish_iterations: usize,
    /// Give every coordinate unit weight instead of only the requested ones.
    pub uniform_weighting: bool,
    /// Diagonal regularization as a fraction of the solve matrix trace.
    pub regularization: f64,
    /// Maximum rotary change per interpolation step (radians).
    pub rotary_step: f64,
    /// Maximum linear change per step, as a fraction of a bounded range.
    pub bounded_step_fraction: f64,
    /// Maximum linear change per step, as a fraction of the model size.
    pub unbounded_step_fraction: f64,
    /// Slack allowed past a rotary limit when clipping (radians).
    pub rotary_limit_tol: f64,
    /// Slack allowed past a bounded linear limit, as a fraction of its range.
    pub bounded_limit_tol_fraction: f64,
    /// Slack allowed past an unbounded-side linear limit, as a fraction of
    /// the model size.
    pub unbounded_limit_tol_fraction: f64,
}

impl Default for CoordinateSolverConfig {
    fn default() -> Self {
        Self {
            rank_tol: 1e-7,
            max_reverse_cos: -0.2, // about 100 degrees
            max_reverse_count: 3,
            max_iterations: 20,
            intermediate_iterations: 10,
            intermediate_tol: 1e-3,
            final_tol: 1e-10,
            apply_polish: true,
            polish_iterations: 10,
            uniform_weighting: false,
            regularization: 0.001,
            rotary_step: 15f64.to_radians(),
            bounded_step_fraction: 0.2,
            unbounded_step_fraction: 0.1,
            rotary_limit_tol: 2f64.to_radians(),
            bounded_limit_tol_fraction: 0.02,
            unbounded_limit_tol_fraction: 0.01,
        }
    }
}

impl CoordinateSolverConfig {
    /// Default configuration with the polish pass disabled.
    #[must_use]
    pub fn without_polish() -> Self {
        Self {
            apply_polish: false,
            ..Default::default()
        }
    }

    /// Weight all coordinates uniformly.
    #[must_use]
    pub fn with_uniform_weighting(mut self) -> Self {
        self.uniform_weighting = true;
        self
    }

    /// Set the rank tolerance.
    #[must_use]
    pub fn with_rank_tol(mut self, tol: f64) -> Self {
        self.rank_tol = tol;
        self
    }

    /// Maximum change per interpolation step for a coordinate.
    #[must_use]
    pub fn step_increment(&self, motion: MotionType, range: &CoordinateRange, model_size: f64) -> f64 {
        match motion {
            MotionType::Rotary => self.rotary_step,
            MotionType::Linear if range.is_bounded() => self.bounded_step_fraction * range.width(),
            MotionType::Linear => self.unbounded_step_fraction * model_size,
        }
    }

    /// Slack allowed past the coordinate range when clipping a step.
    #[must_use]
    pub fn limit_tolerance(&self, motion: MotionType, range: &CoordinateRange, model_size: f64) -> f64 {
        match motion {
            MotionType::Rotary => self.rotary_limit_tol,
            MotionType::Linear if range.is_bounded() => {
                self.bounded_limit_tol_fraction * range.width()
            }
            MotionType::Linear => self.unbounded_limit_tol_fraction * model_size,
        }
    }

    /// Number of interpolation steps needed to move a coordinate by `change`.
    ///
    /// Rotary values step by about 15 degrees, bounded linear values by 0.2
    /// of their range, unbounded ones by 0.1 of the model size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn num_steps(
        &self,
        motion: MotionType,
        range: &CoordinateRange,
        model_size: f64,
        change: f64,
    ) -> usize {
        let step = self.step_increment(motion, range, model_size);
        if step <= 0.0 || !step.is_finite() {
            return 1;
        }
        (change.abs() / step).ceil() as usize
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("rank_tol", self.rank_tol),
            ("intermediate_tol", self.intermediate_tol),
            ("final_tol", self.final_tol),
            ("rotary_step", self.rotary_step),
            ("bounded_step_fraction", self.bounded_step_fraction),
            ("unbounded_step_fraction", self.unbounded_step_fraction),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(crate::SimError::invalid_config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        let non_negative = [
            ("regularization", self.regularization),
            ("rotary_limit_tol", self.rotary_limit_tol),
            ("bounded_limit_tol_fraction", self.bounded_limit_tol_fraction),
            ("unbounded_limit_tol_fraction", self.unbounded_limit_tol_fraction),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(crate::SimError::invalid_config(format!(
                    "{name} cannot be negative, got {value}"
                )));
            }
        }
        if self.max_iterations == 0 || self.intermediate_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "iteration budgets must be at least 1",
            ));
        }
        if !(-1.0..=1.0).contains(&self.max_reverse_cos) {
            return Err(crate::SimError::invalid_config(
                "max_reverse_cos must lie in [-1, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config() {
        let config = CoordinateSolverConfig::default();
        assert!(config.validate().is_ok());
        assert_relative_eq!(config.rotary_step, 15f64.to_radians(), epsilon = 1e-15);
        assert!(config.apply_polish);
        assert!(!config.uniform_weighting);
        assert!(!CoordinateSolverConfig::without_polish().apply_polish);
    }

    #[test]
    fn test_num_steps() {
        let config = CoordinateSolverConfig::default();
        let unbounded = CoordinateRange::unbounded();
        assert_eq!(
            config.num_steps(MotionType::Rotary, &unbounded, 1.0, 40f64.to_radians()),
            3
        );
        assert_eq!(config.num_steps(MotionType::Rotary, &unbounded, 1.0, 0.0), 0);

        let bounded = CoordinateRange::new(0.0, 2.0);
        // 0.2 * 2.0 = 0.4 per step
        assert_eq!(config.num_steps(MotionType::Linear, &bounded, 1.0, 1.0), 3);
        // 0.1 * 5.0 = 0.5 per step
        assert_eq!(config.num_steps(MotionType::Linear, &unbounded, 5.0, -1.2), 3);
    }

    #[test]
    fn test_limit_tolerance() {
        let config = CoordinateSolverConfig::default();
        let bounded = CoordinateRange::new(-1.0, 1.0);
        assert_relative_eq!(
            config.limit_tolerance(MotionType::Linear, &bounded, 10.0),
            0.04,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            config.limit_tolerance(MotionType::Linear, &CoordinateRange::unbounded(), 10.0),
            0.1,
            epsilon = 1e-15
        );
        assert_relative_eq!(
            config.limit_tolerance(MotionType::Rotary, &bounded, 10.0),
            2f64.to_radians(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_validation() {
        let mut config = CoordinateSolverConfig::default();
        config.final_tol = 0.0;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = CoordinateSolverConfig::default();
        config.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = CoordinateSolverConfig::default();
        config.max_reverse_cos = -1.5;
        assert!(config.validate().is_err());

        let config = CoordinateSolverConfig::default().with_rank_tol(f64::NAN);
        assert!(config.validate().is_err());
    }
}
