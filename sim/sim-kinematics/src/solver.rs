//! Numeric coordinate solver for coupled joint nodes.
//!
//! A coupled node is a closed loop (or a set of constrainers coupled by
//! extra constraints), so its coordinates cannot be set one at a time. The
//! solver drives the requested coordinates toward their targets by
//! repeatedly solving
//!
//! ```text
//! [ S  G^T  N^T ] [ dq ]   [ f  ]
//! [ G   0    0  ] [ l  ] = [ bg ]
//! [ N   0    0  ] [ t  ]   [ bn ]
//! ```
//!
//! with `S = JT W JT^T + reg I` and `f = JT W (target - coords)`, where `JT`
//! is the raw coordinate Jacobian transpose and `W` a mask of the
//! coordinates currently being driven.
//!
//! # Independence
//!
//! Before each solve the requested coordinates are ranked against the
//! constraints: `JT` is projected onto the null space of the active
//! bilateral rows (and of the engaged limits), and a pivoted QR of the
//! requested columns tells how many of them can be driven independently.
//! Those are locked to their current target and become [`CoordStatus::Free`];
//! the rest are released and become [`CoordStatus::Limited`].

use nalgebra::{DMatrix, DVector};
use sim_constraint::{
    wrap_angle, ConstrainerId, ConstraintAssembly, ConstraintSignature, KktMatrixType, KktSolver,
    LimitEngagement, MechModel, PivotedQr,
};
use sim_types::{
    BodyId, CoordinateSolverConfig, JointCoordinateHandle, MotionType, Result, SimError,
};
use tracing::{debug, trace, warn};

use crate::request::{CoordStatus, JointCoordRequest, SetStatus};

/// Outcome of one interpolation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepStatus {
    /// The step reached its tolerance.
    pub converged: bool,
    /// No coordinate can be driven any more; remaining steps are pointless.
    pub finished: bool,
    /// Iterations spent, polish included.
    pub iterations: usize,
}

/// Per-coordinate data that stays fixed during a solve.
#[derive(Debug, Clone, Copy)]
struct CoordInfo {
    motion: MotionType,
    lower: f64,
    upper: f64,
    max_increment: f64,
    /// Weight used when measuring coordinate changes.
    del_weight: f64,
}

#[derive(Debug, Clone)]
struct LoopState {
    assembly: ConstraintAssembly,
    info: Vec<CoordInfo>,
    weights: DVector<f64>,
    status: Vec<CoordStatus>,
    model_size: f64,
}

/// Solver for the coordinates of one coupled joint node.
#[derive(Debug, Clone)]
pub struct CoordinateSolver {
    config: CoordinateSolverConfig,
    kkt: KktSolver,
    analyze: bool,
    signature: Option<ConstraintSignature>,
    state: Option<LoopState>,
    num_iterations: usize,
    last_step_norm: f64,
}

impl Default for CoordinateSolver {
    fn default() -> Self {
        Self::new(CoordinateSolverConfig::default())
    }
}

fn not_initialized() -> SimError {
    SimError::malformed_graph("coordinate solver has no bodies; initialize it first")
}

impl CoordinateSolver {
    /// Create a solver.
    #[must_use]
    pub fn new(config: CoordinateSolverConfig) -> Self {
        Self {
            config,
            kkt: KktSolver::new(),
            analyze: true,
            signature: None,
            state: None,
            num_iterations: 0,
            last_step_norm: 0.0,
        }
    }

    /// The solver configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinateSolverConfig {
        &self.config
    }

    /// Iterations spent since the last [`initialize`](Self::initialize).
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// Weighted norm of the last body correction.
    #[must_use]
    pub fn last_step_norm(&self) -> f64 {
        self.last_step_norm
    }

    /// Number of coordinates of the current node.
    #[must_use]
    pub fn num_coordinates(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.info.len())
    }

    /// Status of a node coordinate in the current solve.
    #[must_use]
    pub fn coordinate_status(&self, handle: JointCoordinateHandle) -> Option<CoordStatus> {
        let state = self.state.as_ref()?;
        let idx = state.assembly.coordinate_index(handle)?;
        Some(state.status[idx])
    }

    /// Set up a solve over `bodies` and `constrainers`.
    ///
    /// Every node coordinate starts out [`CoordStatus::Dependent`]; each
    /// request is given its index in the node's coordinate vector.
    pub fn initialize(
        &mut self,
        model: &mut MechModel,
        requests: &mut [JointCoordRequest],
        bodies: &[BodyId],
        constrainers: &[ConstrainerId],
    ) -> Result<()> {
        let mut joints = Vec::new();
        let mut extras = Vec::new();
        for c in constrainers {
            match *c {
                ConstrainerId::Joint(j) => joints.push(j),
                ConstrainerId::Constraint(k) => extras.push(k),
            }
        }
        let mut assembly = ConstraintAssembly::new(model, bodies, &joints, &extras)?;
        assembly.update_constraints(model)?;

        let model_size = model.model_size();
        let mut info = Vec::with_capacity(assembly.coordinate_handles().len());
        for &handle in assembly.coordinate_handles() {
            let coord = model.coordinate(handle)?;
            let range = coord.range();
            let motion = coord.motion_type();
            let tol = self.config.limit_tolerance(motion, range, model_size);
            let del_weight = match motion {
                MotionType::Rotary => 1.0,
                MotionType::Linear => {
                    let width = if range.is_bounded() {
                        range.width()
                    } else {
                        0.1 * model_size
                    };
                    (2.0 * std::f64::consts::PI / width).powi(2)
                }
            };
            info.push(CoordInfo {
                motion,
                lower: range.lower() - tol,
                upper: range.upper() + tol,
                max_increment: self.config.step_increment(motion, range, model_size),
                del_weight,
            });
        }

        for req in requests.iter_mut() {
            let idx = assembly
                .coordinate_index(req.handle())
                .ok_or(SimError::UnknownRequest {
                    handle: req.handle(),
                })?;
            req.set_solve_index(idx);
        }

        let numc = info.len();
        self.state = Some(LoopState {
            assembly,
            info,
            weights: DVector::zeros(numc),
            status: vec![CoordStatus::Dependent; numc],
            model_size,
        });
        self.analyze = true;
        self.signature = None;
        self.num_iterations = 0;
        self.last_step_norm = 0.0;
        Ok(())
    }

    /// Current values of the node coordinates.
    pub fn coordinate_values(&self) -> Result<DVector<f64>> {
        let state = self.state.as_ref().ok_or_else(not_initialized)?;
        Ok(state.assembly.coordinate_values().clone())
    }

    /// Requests whose coordinates are independent of each other given the
    /// constraints, ignoring limits. They are marked [`CoordStatus::Unknown`];
    /// the others stay [`CoordStatus::Dependent`].
    ///
    /// Returns positions into `requests`.
    pub fn find_independent_requests(
        &mut self,
        model: &mut MechModel,
        requests: &[JointCoordRequest],
    ) -> Result<Vec<usize>> {
        let rank_tol = self.config.rank_tol;
        let state = self.state.as_mut().ok_or_else(not_initialized)?;
        state.assembly.update_constraints(model)?;
        let (jtg, _) = constrained_jacobian(&state.assembly, false, rank_tol);

        let cols = solve_indices(requests.iter())?;
        let qr = PivotedQr::factor(&select_columns(&jtg, &cols));
        let rank = qr.abs_rank(rank_tol);
        let perm = qr.column_permutation();
        let mut indep: Vec<usize> = perm[..rank].to_vec();
        if indep.is_empty() {
            if let Some(&first) = perm.first() {
                if jtg.column(cols[first]).norm() < rank_tol {
                    indep.push(first);
                }
            }
        }
        for &r in &indep {
            state.status[cols[r]] = CoordStatus::Unknown;
        }
        debug!(
            requests = requests.len(),
            independent = indep.len(),
            "found independent requests"
        );
        Ok(indep)
    }

    /// Lock the requests that can be driven now and release the rest.
    /// Returns how many are free.
    fn find_independent_coords(
        &mut self,
        model: &mut MechModel,
        requests: &mut [JointCoordRequest],
        indep: &[usize],
        targets: &DVector<f64>,
        max_rank: Option<usize>,
    ) -> Result<usize> {
        let rank_tol = self.config.rank_tol;
        let base_weight = if self.config.uniform_weighting { 1.0 } else { 0.0 };
        let state = self.state.as_mut().ok_or_else(not_initialized)?;
        state.weights.fill(base_weight);

        let (jtg, jtp) = constrained_jacobian(&state.assembly, true, rank_tol);
        let cols = solve_indices(indep.iter().map(|&r| &requests[r]))?;
        let qr = PivotedQr::factor(&select_columns(&jtp, &cols));
        let mut rank = qr.abs_rank(rank_tol);
        if let Some(max) = max_rank {
            rank = rank.min(max);
        }
        let perm = qr.column_permutation();

        let mut controllable = vec![false; cols.len()];
        let mut req_dof = 0;
        for &k in &perm[..rank] {
            let coord = model.coordinate(requests[indep[k]].handle())?;
            if coord.limit_engagement() == LimitEngagement::Free {
                controllable[k] = true;
                req_dof += 1;
            }
        }
        if req_dof == 0 {
            if let Some(&first) = perm.first() {
                if jtg.column(cols[first]).norm() < rank_tol {
                    controllable[first] = true;
                }
            }
        }

        let mut num_free = 0;
        for (k, &r) in indep.iter().enumerate() {
            let idx = cols[k];
            if controllable[k] {
                if state.status[idx] != CoordStatus::Limited {
                    requests[r].lock_coordinate(model, targets[idx])?;
                    state.status[idx] = CoordStatus::Free;
                }
            } else if state.status[idx] == CoordStatus::Free {
                requests[r].unlock_coordinate(model)?;
                state.status[idx] = CoordStatus::Limited;
            }
            if state.status[idx] == CoordStatus::Free {
                num_free += 1;
            }
            if state.status[idx] != CoordStatus::Limited {
                state.weights[idx] = 1.0;
            }
        }
        state.assembly.update_constraints(model)?;
        self.analyze = true;
        Ok(num_free)
    }

    /// Advance the independent requests to step `step` of `num_steps`.
    ///
    /// `targets` holds the target value of every node coordinate and is
    /// updated for the requests still being driven.
    pub fn solve_for_step(
        &mut self,
        model: &mut MechModel,
        requests: &mut [JointCoordRequest],
        indep: &[usize],
        targets: &mut DVector<f64>,
        step: usize,
        num_steps: usize,
    ) -> Result<StepStatus> {
        let cfg = self.config.clone();
        let last = step >= num_steps;
        let starg = step as f64 / num_steps.max(1) as f64;

        let (mut engagement, mut coords) = {
            let state = self.state.as_mut().ok_or_else(not_initialized)?;
            state.assembly.update_constraints(model)?;
            for &r in indep {
                let req = &requests[r];
                let idx = req.solve_index().ok_or_else(not_initialized)?;
                if state.status[idx] != CoordStatus::Limited {
                    targets[idx] = req.target_value(starg);
                }
            }
            (
                state.assembly.limit_engagement().to_vec(),
                state.assembly.coordinate_values().clone(),
            )
        };

        let mut num_free = self.find_independent_coords(model, requests, indep, targets, None)?;
        let (mut tol, mut max_iter) = if last {
            (cfg.final_tol, cfg.max_iterations)
        } else {
            (cfg.intermediate_tol, cfg.intermediate_iterations)
        };
        if num_free == 0 {
            tol = cfg.final_tol;
            max_iter = cfg.max_iterations;
        }

        let numc = coords.len();
        let mut real_del = DVector::zeros(numc);
        let mut target_err = -1.0;
        let mut num_reverse = 0;
        let mut converged = false;
        let mut icnt = 0;

        loop {
            let mut dq = self.solve_kkt(targets, &coords)?;
            let state = self.state.as_mut().ok_or_else(not_initialized)?;
            let s_inc = clip_to_increment_limits(&state.assembly, &state.info, &mut dq);
            let s_lim = clip_to_coordinate_limits(&state.assembly, &state.info, &mut dq, &coords);
            trace!(iteration = icnt, clip_inc = s_inc, clip_lim = s_lim, "clipped step");

            state.assembly.integrate(model, &dq, 1.0)?;
            state.assembly.update_constraints(model)?;
            let new_coords = state.assembly.coordinate_values().clone();
            let real_del_prev = std::mem::replace(&mut real_del, &new_coords - &coords);
            coords = new_coords;
            let target_err_prev = target_err;
            target_err = del_coord_norm_to(&state.info, targets, &coords);

            if icnt > 0
                && del_coord_cos(&state.info, &real_del_prev, &real_del, 1e-5) < cfg.max_reverse_cos
            {
                num_reverse += 1;
            } else {
                num_reverse = 0;
            }

            let new_engagement = state.assembly.limit_engagement();
            let limits_changed = new_engagement != engagement.as_slice();
            if limits_changed {
                engagement = new_engagement.to_vec();
            }

            if limits_changed || self.kkt.num_perturbed_pivots() > 0 {
                num_free = self.find_independent_coords(model, requests, indep, targets, None)?;
                debug!(iteration = icnt, num_free, limits_changed, "re-ranked requests");
                if num_free == 0 {
                    tol = cfg.final_tol;
                    max_iter = cfg.max_iterations;
                }
            } else if num_free > 0
                && num_reverse > cfg.max_reverse_count
                && target_err < target_err_prev
            {
                num_free = self.find_independent_coords(
                    model,
                    requests,
                    indep,
                    targets,
                    Some(num_free - 1),
                )?;
                debug!(iteration = icnt, num_free, "reduced rank after reversals");
                if num_free == 0 {
                    tol = cfg.final_tol;
                    max_iter = cfg.max_iterations;
                }
            }

            let state = self.state.as_mut().ok_or_else(not_initialized)?;
            if num_free == 0 {
                state.weights.fill(0.0);
            }
            self.last_step_norm = dq_norm(&dq, state.model_size);
            trace!(iteration = icnt, norm = self.last_step_norm, "step norm");
            if icnt > 0 && self.last_step_norm <= tol {
                converged = true;
            }
            icnt += 1;
            if icnt >= max_iter || converged {
                break;
            }
        }

        if cfg.apply_polish && last && !converged {
            debug!(step, norm = self.last_step_norm, "polishing unconverged step");
            {
                let state = self.state.as_mut().ok_or_else(not_initialized)?;
                for &r in indep {
                    requests[r].unlock_coordinate(model)?;
                }
                state.weights.fill(0.0);
                state.assembly.update_constraints(model)?;
                self.analyze = true;
            }
            let mut polish = 0;
            loop {
                let dq = self.solve_kkt(targets, &coords)?;
                let state = self.state.as_mut().ok_or_else(not_initialized)?;
                state.assembly.integrate(model, &dq, 1.0)?;
                state.assembly.update_constraints(model)?;
                self.last_step_norm = dq_norm(&dq, state.model_size);
                icnt += 1;
                polish += 1;
                if polish >= cfg.polish_iterations || self.last_step_norm <= tol {
                    break;
                }
            }
            if self.last_step_norm > tol {
                warn!(norm = self.last_step_norm, tol, "polish did not reach tolerance");
            }
        }

        for &r in indep {
            requests[r].restore_lock_setting(model)?;
        }
        let state = self.state.as_mut().ok_or_else(not_initialized)?;
        state.assembly.update_attachments(model)?;
        self.num_iterations += icnt;

        if last && !converged {
            warn!(step, iterations = icnt, num_free, "final step did not converge");
        } else {
            debug!(step, iterations = icnt, num_free, converged, "solved step");
        }
        Ok(StepStatus {
            converged,
            finished: num_free == 0,
            iterations: icnt,
        })
    }

    /// Turn the working statuses into the reported ones: requests that
    /// were ever left out of the solve end up limited.
    pub fn finalize_status(&self, status: &mut SetStatus) -> Result<()> {
        let state = self.state.as_ref().ok_or_else(not_initialized)?;
        for (idx, &handle) in state.assembly.coordinate_handles().iter().enumerate() {
            if !status.contains(handle) {
                continue;
            }
            match state.status[idx] {
                CoordStatus::Limited | CoordStatus::Unknown => {
                    status.set_status(handle, CoordStatus::Limited);
                }
                CoordStatus::Dependent => status.set_status(handle, CoordStatus::Dependent),
                CoordStatus::Free => {}
            }
        }
        Ok(())
    }

    /// Build the solve matrix and solve the KKT system for `dq`.
    fn solve_kkt(&mut self, targets: &DVector<f64>, coords: &DVector<f64>) -> Result<DVector<f64>> {
        let state = self.state.as_ref().ok_or_else(not_initialized)?;
        let asm = &state.assembly;
        let jt = asm.coordinate_jacobian();

        let mut jtw = jt.clone();
        for (c, &w) in state.weights.iter().enumerate() {
            jtw.column_mut(c).scale_mut(w);
        }
        let f = &jtw * (targets - coords);
        let mut s = &jtw * jt.transpose();
        let trace = s.trace();
        let reg = if trace != 0.0 {
            self.config.regularization * trace
        } else {
            1.0
        };
        for i in 0..s.nrows() {
            s[(i, i)] += reg;
        }

        let (g, bg, _) = asm.bilateral();
        let (n, bn) = asm.unilateral();
        let signature = asm.gt_signature();
        if self.analyze || self.signature.as_ref() != Some(&signature) {
            self.kkt.analyze(&s, g, KktMatrixType::Symmetric)?;
            self.analyze = false;
            self.signature = Some(signature);
        }
        self.kkt.factor(&s, g, n)?;
        Ok(self.kkt.solve(&f, bg, bn)?.dq)
    }
}

fn solve_indices<'a>(
    requests: impl Iterator<Item = &'a JointCoordRequest>,
) -> Result<Vec<usize>> {
    requests
        .map(|r| r.solve_index().ok_or(SimError::UnknownRequest { handle: r.handle() }))
        .collect()
}

fn select_columns(m: &DMatrix<f64>, cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), cols.len(), |i, k| m[(i, cols[k])])
}

/// `JT` projected onto the null space of the bilateral rows (`JTg`), and
/// additionally of the engaged unilateral rows (`JTp`).
///
/// Rows that lock a coordinate are left out of the projection, so a locked
/// request still shows up as controllable.
fn constrained_jacobian(
    asm: &ConstraintAssembly,
    use_unilateral: bool,
    rank_tol: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let (g, _, rows) = asm.bilateral();
    let keep: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.coord_lock)
        .map(|(i, _)| i)
        .collect();
    let gt = DMatrix::from_fn(g.ncols(), keep.len(), |i, k| g[(keep[k], i)]);
    let qr = PivotedQr::factor(&gt);
    let q = qr.q(qr.rank(rank_tol));

    let jt = asm.coordinate_jacobian();
    let jtg = jt - &q * (q.transpose() * jt);

    let (n, _) = asm.unilateral();
    if use_unilateral && n.nrows() > 0 {
        let nt = n.transpose();
        let ntp = &nt - &q * (q.transpose() * &nt);
        let qr = PivotedQr::factor(&ntp);
        let q2 = qr.q(qr.abs_rank(rank_tol));
        let jtp = &jtg - &q2 * (q2.transpose() * &jtg);
        (jtg, jtp)
    } else {
        let jtp = jtg.clone();
        (jtg, jtp)
    }
}

/// Scale `dq` so that no coordinate moves by more than its step increment.
fn clip_to_increment_limits(
    asm: &ConstraintAssembly,
    info: &[CoordInfo],
    dq: &mut DVector<f64>,
) -> f64 {
    let dcoords = asm.coordinate_jacobian().transpose() * &*dq;
    let mut slim: f64 = 1.0;
    for (c, d) in info.iter().zip(dcoords.iter()) {
        let dval = d.abs();
        if dval > c.max_increment {
            slim = slim.min(c.max_increment / dval);
        }
    }
    if slim < 1.0 {
        *dq *= slim;
    }
    slim
}

/// Scale `dq` so that no coordinate leaves its range by more than the
/// limit tolerance.
fn clip_to_coordinate_limits(
    asm: &ConstraintAssembly,
    info: &[CoordInfo],
    dq: &mut DVector<f64>,
    coords: &DVector<f64>,
) -> f64 {
    let dcoords = asm.coordinate_jacobian().transpose() * &*dq;
    let mut slim: f64 = 1.0;
    for (k, c) in info.iter().enumerate() {
        let cval = coords[k];
        let d = dcoords[k];
        let cvalx = cval + d;
        if cvalx < c.lower && d < 0.0 {
            let s = if cval >= c.lower {
                (cval - c.lower) / (cval - cvalx)
            } else {
                0.0
            };
            slim = slim.min(s);
        } else if cvalx > c.upper && d > 0.0 {
            let s = if cval <= c.upper {
                (c.upper - cval) / (cvalx - cval)
            } else {
                0.0
            };
            slim = slim.min(s);
        }
    }
    if slim < 1.0 {
        *dq *= slim;
    }
    slim
}

fn del_coord_dot(info: &[CoordInfo], a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    info.iter()
        .enumerate()
        .map(|(k, c)| a[k] * b[k] * c.del_weight)
        .sum()
}

/// Weighted cosine between two coordinate changes; zero if either is
/// shorter than `tol`.
fn del_coord_cos(info: &[CoordInfo], a: &DVector<f64>, b: &DVector<f64>, tol: f64) -> f64 {
    let na = del_coord_dot(info, a, a).sqrt();
    let nb = del_coord_dot(info, b, b).sqrt();
    if na > tol && nb > tol {
        del_coord_dot(info, a, b) / (na * nb)
    } else {
        0.0
    }
}

/// Weighted distance from `coords` to `targets`, rotary differences
/// reduced to `[-pi, pi]`.
fn del_coord_norm_to(info: &[CoordInfo], targets: &DVector<f64>, coords: &DVector<f64>) -> f64 {
    info.iter()
        .enumerate()
        .map(|(k, c)| {
            let mut del = targets[k] - coords[k];
            if c.motion == MotionType::Rotary {
                del = wrap_angle(del);
            }
            del * del * c.del_weight
        })
        .sum::<f64>()
        .sqrt()
}

/// RMS of a body correction, with translations scaled by the model size.
fn dq_norm(dq: &DVector<f64>, model_size: f64) -> f64 {
    if dq.is_empty() {
        return 0.0;
    }
    let sum: f64 = dq
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let v = if (i / 3) % 2 == 0 { v / model_size } else { v };
            v * v
        })
        .sum();
    (sum / dq.len() as f64).sqrt()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sim_constraint::{Joint, JointType, RigidBody};
    use sim_types::{CoordinateRange, JointId, Pose};

    /// Ground - crank (0) - coupler (1) - rocker (2) - ground, unit square.
    fn four_bar() -> (MechModel, Vec<BodyId>, Vec<ConstrainerId>) {
        let mut model = MechModel::new();
        let crank = model
            .add_body(RigidBody::new(BodyId::new(0), Pose::from_xyz_rot_z(0.0, 0.5, 0.0, 0.0)))
            .unwrap();
        let coupler = model
            .add_body(RigidBody::new(BodyId::new(1), Pose::from_xyz_rot_z(0.5, 1.0, 0.0, 0.0)))
            .unwrap();
        let rocker = model
            .add_body(RigidBody::new(BodyId::new(2), Pose::from_xyz_rot_z(1.0, 0.5, 0.0, 0.0)))
            .unwrap();
        let frames = [
            (crank, None, Pose::from_xyz_rot_z(0.0, -0.5, 0.0, 0.0), Pose::identity()),
            (
                coupler,
                Some(crank),
                Pose::from_xyz_rot_z(-0.5, 0.0, 0.0, 0.0),
                Pose::from_xyz_rot_z(0.0, 0.5, 0.0, 0.0),
            ),
            (
                rocker,
                Some(coupler),
                Pose::from_xyz_rot_z(0.0, 0.5, 0.0, 0.0),
                Pose::from_xyz_rot_z(0.5, 0.0, 0.0, 0.0),
            ),
            (
                rocker,
                None,
                Pose::from_xyz_rot_z(0.0, -0.5, 0.0, 0.0),
                Pose::from_xyz_rot_z(1.0, 0.0, 0.0, 0.0),
            ),
        ];
        let mut constrainers = Vec::new();
        for (i, (a, b, ta, tb)) in frames.into_iter().enumerate() {
            let id = model
                .add_joint(
                    Joint::new(JointId::new(i as u64), JointType::Revolute, a, b)
                        .with_frame_a(ta)
                        .with_frame_b(tb),
                )
                .unwrap();
            constrainers.push(ConstrainerId::Joint(id));
        }
        model.update_all_attachments().unwrap();
        (model, vec![crank, coupler, rocker], constrainers)
    }

    fn handle(j: u64) -> JointCoordinateHandle {
        JointCoordinateHandle::new(JointId::new(j), 0)
    }

    #[test]
    fn test_initialize_assigns_indices() {
        let (mut model, bodies, cons) = four_bar();
        let mut solver = CoordinateSolver::default();
        let mut reqs = vec![JointCoordRequest::new(&model, handle(2), 0.1).unwrap()];
        solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap();
        assert_eq!(solver.num_coordinates(), 4);
        assert_eq!(reqs[0].solve_index(), Some(2));
        assert_eq!(
            solver.coordinate_status(handle(0)),
            Some(CoordStatus::Dependent)
        );
    }

    #[test]
    fn test_unknown_request_rejected() {
        let (mut model, bodies, cons) = four_bar();
        model
            .add_body(RigidBody::new(BodyId::new(7), Pose::identity()))
            .unwrap();
        model
            .add_joint(Joint::new(JointId::new(9), JointType::Revolute, BodyId::new(7), None))
            .unwrap();
        let mut solver = CoordinateSolver::default();
        let mut reqs = vec![JointCoordRequest::new(&model, handle(9), 0.1).unwrap()];
        let err = solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap_err();
        assert_eq!(err, SimError::UnknownRequest { handle: handle(9) });
    }

    #[test]
    fn test_loop_has_one_independent_request() {
        let (mut model, bodies, cons) = four_bar();
        let mut solver = CoordinateSolver::default();
        let mut reqs = vec![
            JointCoordRequest::new(&model, handle(0), 0.2).unwrap(),
            JointCoordRequest::new(&model, handle(3), 0.2).unwrap(),
        ];
        solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap();
        let indep = solver.find_independent_requests(&mut model, &reqs).unwrap();
        assert_eq!(indep.len(), 1);
    }

    #[test]
    fn test_single_step_drives_crank() {
        let (mut model, bodies, cons) = four_bar();
        let config = CoordinateSolverConfig::default();
        let mut solver = CoordinateSolver::new(config.clone());
        let mut reqs = vec![JointCoordRequest::new(&model, handle(0), 0.2).unwrap()];
        solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap();
        reqs[0].compute_num_steps(&model, &config).unwrap();
        let indep = solver.find_independent_requests(&mut model, &reqs).unwrap();
        let mut targets = solver.coordinate_values().unwrap();

        let status = solver
            .solve_for_step(&mut model, &mut reqs, &indep, &mut targets, 1, 1)
            .unwrap();
        assert!(status.converged);
        assert!(!status.finished);
        assert!(status.iterations >= 2);
        assert_relative_eq!(model.coordinate(handle(0)).unwrap().value(), 0.2, epsilon = 1e-6);
        // the request lock is restored afterwards
        assert!(!model.coordinate(handle(0)).unwrap().is_locked());

        let mut set = SetStatus::with_coordinates(true, [handle(0)]);
        solver.finalize_status(&mut set).unwrap();
        assert!(set.is_free(handle(0)));
    }

    #[test]
    fn test_rank_cap_releases_request() {
        let (mut model, bodies, cons) = four_bar();
        let mut solver = CoordinateSolver::default();
        let mut reqs = vec![JointCoordRequest::new(&model, handle(0), 0.2).unwrap()];
        solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap();
        let indep = solver.find_independent_requests(&mut model, &reqs).unwrap();
        assert_eq!(solver.coordinate_status(handle(0)), Some(CoordStatus::Unknown));
        let targets = solver.coordinate_values().unwrap();

        let num_free = solver
            .find_independent_coords(&mut model, &mut reqs, &indep, &targets, None)
            .unwrap();
        assert_eq!(num_free, 1);
        assert_eq!(solver.coordinate_status(handle(0)), Some(CoordStatus::Free));
        assert!(model.coordinate(handle(0)).unwrap().is_locked());

        // after repeated reversals the cap drops below the rank
        let num_free = solver
            .find_independent_coords(&mut model, &mut reqs, &indep, &targets, Some(0))
            .unwrap();
        assert_eq!(num_free, 0);
        assert_eq!(solver.coordinate_status(handle(0)), Some(CoordStatus::Limited));
        assert!(!model.coordinate(handle(0)).unwrap().is_locked());

        // a released request stays released when the cap is lifted
        let num_free = solver
            .find_independent_coords(&mut model, &mut reqs, &indep, &targets, None)
            .unwrap();
        assert_eq!(num_free, 0);

        let mut set = SetStatus::with_coordinates(true, [handle(0)]);
        solver.finalize_status(&mut set).unwrap();
        assert!(set.is_limited(handle(0)));
        assert_eq!(set.to_string(), "CONVERGED, LIMITED=1");
    }

    #[test]
    fn test_range_limited_request() {
        let (mut model, bodies, cons) = four_bar();
        model
            .coordinate_mut(handle(0))
            .unwrap()
            .set_range(CoordinateRange::new(-0.1, 0.1));
        let config = CoordinateSolverConfig::default();
        let mut solver = CoordinateSolver::new(config.clone());
        let mut reqs = vec![JointCoordRequest::new(&model, handle(0), 0.5).unwrap()];
        assert_eq!(reqs[0].requested_value(), 0.1);
        solver
            .initialize(&mut model, &mut reqs, &bodies, &cons)
            .unwrap();
        reqs[0].compute_num_steps(&model, &config).unwrap();
        let indep = solver.find_independent_requests(&mut model, &reqs).unwrap();
        let mut targets = solver.coordinate_values().unwrap();
        solver
            .solve_for_step(&mut model, &mut reqs, &indep, &mut targets, 1, 1)
            .unwrap();
        let value = model.coordinate(handle(0)).unwrap().value();
        assert!(value <= 0.1 + 2f64.to_radians());
    }

    #[test]
    fn test_clip_to_coordinate_limits_fraction() {
        let info = [CoordInfo {
            motion: MotionType::Linear,
            lower: -1.0,
            upper: 1.0,
            max_increment: 10.0,
            del_weight: 1.0,
        }];
        let mut model = MechModel::new();
        let block = model
            .add_body(RigidBody::new(BodyId::new(0), Pose::identity()))
            .unwrap();
        let slider = model
            .add_joint(Joint::new(JointId::new(0), JointType::Prismatic, block, None))
            .unwrap();
        let mut asm = ConstraintAssembly::new(&model, &[block], &[slider], &[]).unwrap();
        asm.update_constraints(&mut model).unwrap();

        // z moves 0 -> 4, limit at 1: a quarter of the step survives
        let mut dq = DVector::from_vec(vec![0.0, 0.0, 4.0, 0.0, 0.0, 0.0]);
        let coords = DVector::from_vec(vec![0.0]);
        let s = clip_to_coordinate_limits(&asm, &info, &mut dq, &coords);
        assert_relative_eq!(s, 0.25, epsilon = 1e-12);
        assert_relative_eq!(dq[2], 1.0, epsilon = 1e-12);

        // increments of 10 are not exceeded
        assert_eq!(clip_to_increment_limits(&asm, &info, &mut dq), 1.0);
    }

    #[test]
    fn test_dq_norm_scales_translation() {
        let dq = DVector::from_vec(vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(dq_norm(&dq, 2.0), (1.0f64 / 6.0).sqrt(), epsilon = 1e-12);
        assert_eq!(dq_norm(&DVector::zeros(0), 1.0), 0.0);
    }

    #[test]
    fn test_del_coord_cos_reversal() {
        let info = [CoordInfo {
            motion: MotionType::Rotary,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            max_increment: 1.0,
            del_weight: 1.0,
        }; 2];
        let a = DVector::from_vec(vec![1.0, 0.0]);
        let b = DVector::from_vec(vec![-1.0, 0.1]);
        assert!(del_coord_cos(&info, &a, &b, 1e-5) < -0.2);
        assert_eq!(del_coord_cos(&info, &a, &DVector::zeros(2), 1e-5), 0.0);
        // rotary residuals wrap
        let t = DVector::from_vec(vec![3.0, 0.0]);
        let c = DVector::from_vec(vec![-3.0, 0.0]);
        assert_relative_eq!(
            del_coord_norm_to(&info, &t, &c),
            2.0 * std::f64::consts::PI - 6.0,
            epsilon = 1e-12
        );
    }
}
