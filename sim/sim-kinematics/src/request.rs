//! Coordinate requests and per-call set status.

use std::fmt;

use hashbrown::HashMap;
use sim_constraint::MechModel;
use sim_types::{CoordinateSolverConfig, JointCoordinateHandle, Result, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome for one requested coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CoordStatus {
    /// Not yet classified.
    #[default]
    Unknown,
    /// Driven to its target.
    Free,
    /// Never independent of the other coordinates; moved by the solve.
    Dependent,
    /// Could not be driven independently, typically because of a range
    /// limit or an inconsistent request set.
    Limited,
}

impl fmt::Display for CoordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Free => "FREE",
            Self::Dependent => "DEPENDENT",
            Self::Limited => "LIMITED",
        };
        f.write_str(s)
    }
}

/// A pending request to drive one coordinate to a value.
///
/// The request owns the interpolation schedule for its coordinate and
/// remembers the coordinate's lock setting the first time the solver locks
/// or unlocks it, so that the setting can be restored afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct JointCoordRequest {
    handle: JointCoordinateHandle,
    value: f64,
    initial: f64,
    solve_index: Option<usize>,
    saved_lock: Option<(bool, f64)>,
}

impl JointCoordRequest {
    /// Create a request, clipping `value` to the coordinate's range.
    pub fn new(model: &MechModel, handle: JointCoordinateHandle, value: f64) -> Result<Self> {
        let coord = model.coordinate(handle)?;
        Ok(Self {
            handle,
            value: coord.range().clamp(value),
            initial: coord.value(),
            solve_index: None,
            saved_lock: None,
        })
    }

    /// The requested coordinate.
    #[must_use]
    pub fn handle(&self) -> JointCoordinateHandle {
        self.handle
    }

    /// Requested (range-clipped) value.
    #[must_use]
    pub fn requested_value(&self) -> f64 {
        self.value
    }

    /// Value of the coordinate when the step schedule was computed.
    #[must_use]
    pub fn initial_value(&self) -> f64 {
        self.initial
    }

    /// Index of the coordinate within the solver's coordinate vector.
    #[must_use]
    pub fn solve_index(&self) -> Option<usize> {
        self.solve_index
    }

    pub(crate) fn set_solve_index(&mut self, index: usize) {
        self.solve_index = Some(index);
    }

    /// Record the current value as the starting point and return the
    /// number of interpolation steps needed to reach the request.
    pub fn compute_num_steps(
        &mut self,
        model: &MechModel,
        config: &CoordinateSolverConfig,
    ) -> Result<usize> {
        let coord = model.coordinate(self.handle)?;
        self.initial = coord.value();
        Ok(config.num_steps(
            coord.motion_type(),
            coord.range(),
            model.model_size(),
            self.value - self.initial,
        ))
    }

    /// Interpolated target at fraction `s` of the schedule.
    #[must_use]
    pub fn target_value(&self, s: f64) -> f64 {
        (1.0 - s) * self.initial + s * self.value
    }

    /// Lock the coordinate at `value`.
    ///
    /// A coordinate the user already locked is re-targeted to `value` as
    /// well, so a request on it is still driven. The user's flag and locked
    /// value are saved on first touch and come back with
    /// [`restore_lock_setting`].
    ///
    /// [`restore_lock_setting`]: Self::restore_lock_setting
    pub fn lock_coordinate(&mut self, model: &mut MechModel, value: f64) -> Result<()> {
        let coord = model.coordinate_mut(self.handle)?;
        if self.saved_lock.is_none() {
            self.saved_lock = Some((coord.is_locked(), coord.locked_value()));
        }
        if !coord.is_locked() {
            coord.set_locked(true);
        }
        coord.set_locked_value(value);
        Ok(())
    }

    /// Unlock the coordinate if it is locked.
    pub fn unlock_coordinate(&mut self, model: &mut MechModel) -> Result<()> {
        let coord = model.coordinate_mut(self.handle)?;
        if coord.is_locked() {
            if self.saved_lock.is_none() {
                self.saved_lock = Some((true, coord.locked_value()));
            }
            coord.set_locked(false);
        }
        Ok(())
    }

    /// Put back the lock flag and locked value seen before the solver first
    /// touched them.
    pub fn restore_lock_setting(&mut self, model: &mut MechModel) -> Result<()> {
        if let Some((locked, value)) = self.saved_lock {
            let coord = model.coordinate_mut(self.handle)?;
            coord.set_locked(locked);
            coord.set_locked_value(value);
        }
        Ok(())
    }
}

/// Result of one set call.
///
/// Statuses are kept in request order. Non-convergence is reported here,
/// never as an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetStatus {
    converged: bool,
    num_iterations: usize,
    coordinates: Vec<(JointCoordinateHandle, CoordStatus)>,
    index: HashMap<JointCoordinateHandle, usize>,
}

impl SetStatus {
    /// An empty status.
    #[must_use]
    pub fn new(converged: bool) -> Self {
        Self {
            converged,
            ..Self::default()
        }
    }

    /// A status holding `handles`, each [`CoordStatus::Free`].
    #[must_use]
    pub fn with_coordinates(
        converged: bool,
        handles: impl IntoIterator<Item = JointCoordinateHandle>,
    ) -> Self {
        let mut status = Self::new(converged);
        for h in handles {
            status.set_status(h, CoordStatus::Free);
        }
        status
    }

    /// Whether every step reached its tolerance.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub(crate) fn set_converged(&mut self, converged: bool) {
        self.converged = converged;
    }

    /// Solver iterations spent.
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub(crate) fn add_iterations(&mut self, n: usize) {
        self.num_iterations += n;
    }

    /// Number of requested coordinates.
    #[must_use]
    pub fn num_coordinates(&self) -> usize {
        self.coordinates.len()
    }

    /// Requested coordinates with their status, in request order.
    #[must_use]
    pub fn coordinates(&self) -> &[(JointCoordinateHandle, CoordStatus)] {
        &self.coordinates
    }

    /// Status of `handle`, if it was requested.
    #[must_use]
    pub fn status(&self, handle: JointCoordinateHandle) -> Option<CoordStatus> {
        self.index.get(&handle).map(|&i| self.coordinates[i].1)
    }

    /// Check whether `handle` was requested.
    #[must_use]
    pub fn contains(&self, handle: JointCoordinateHandle) -> bool {
        self.index.contains_key(&handle)
    }

    /// Set (or add) the status of `handle`.
    pub(crate) fn set_status(&mut self, handle: JointCoordinateHandle, status: CoordStatus) {
        match self.index.get(&handle) {
            Some(&i) => self.coordinates[i].1 = status,
            None => {
                self.index.insert(handle, self.coordinates.len());
                self.coordinates.push((handle, status));
            }
        }
    }

    fn count(&self, status: CoordStatus) -> usize {
        self.coordinates.iter().filter(|(_, s)| *s == status).count()
    }

    /// Number of coordinates driven to their targets.
    #[must_use]
    pub fn num_free(&self) -> usize {
        self.count(CoordStatus::Free)
    }

    /// Number of coordinates that were dependent on others.
    #[must_use]
    pub fn num_dependent(&self) -> usize {
        self.count(CoordStatus::Dependent)
    }

    /// Number of coordinates that ended limited.
    #[must_use]
    pub fn num_limited(&self) -> usize {
        self.count(CoordStatus::Limited)
    }

    /// Check whether `handle` ended free.
    #[must_use]
    pub fn is_free(&self, handle: JointCoordinateHandle) -> bool {
        self.status(handle) == Some(CoordStatus::Free)
    }

    /// Check whether `handle` ended dependent.
    #[must_use]
    pub fn is_dependent(&self, handle: JointCoordinateHandle) -> bool {
        self.status(handle) == Some(CoordStatus::Dependent)
    }

    /// Check whether `handle` ended limited.
    #[must_use]
    pub fn is_limited(&self, handle: JointCoordinateHandle) -> bool {
        self.status(handle) == Some(CoordStatus::Limited)
    }

    /// Copy the coordinate statuses of a sub-result into this one.
    ///
    /// Every coordinate of `other` must already be present here.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for &(handle, status) in &other.coordinates {
            let i = *self
                .index
                .get(&handle)
                .ok_or(SimError::UnknownRequest { handle })?;
            self.coordinates[i].1 = status;
        }
        Ok(())
    }
}

impl fmt::Display for SetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.converged {
            f.write_str("CONVERGED")?;
        } else {
            f.write_str("NO CONVERGENCE")?;
        }
        let limited = self.num_limited();
        if limited > 0 {
            write!(f, ", LIMITED={limited}")?;
        }
        Ok(())
    }
}
