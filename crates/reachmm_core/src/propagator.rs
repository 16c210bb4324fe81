//! Reachable-set propagation through the embedding system.
//!
//! A run lifts the initial box into the embedding, then for each control step
//! queries the controller on the current enclosure, holds the resulting control
//! box, integrates the doubled state and records the projected box. Runs are
//! independent: each owns a [`RunContext`], so batches fan out over rayon.

use crate::controller::ControllerBoundProvider;
use crate::decomposition::Decomposition;
use crate::embedding::EmbeddingSystem;
use crate::error::{ReachError, Result};
use crate::interval::IntervalBox;
use crate::solvers::{Integrator, IntegratorKind};
use crate::traits::{cast, Endpoint, Steppable};
use crate::trajectory::Trajectory;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Slack on `horizon / dt` when counting control steps.
const STEP_COUNT_SLACK: f64 = 1e-9;
/// Trajectory entries reserved up front; longer runs grow as they go.
const RESERVED_STEPS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagatorSettings {
    pub t0: f64,
    /// Length of the propagated interval, starting at `t0`.
    pub horizon: f64,
    /// Control period. The last step is shortened to end on the horizon.
    pub dt: f64,
    /// Integrator steps per control period.
    pub substeps: usize,
    pub integrator: IntegratorKind,
    /// A run stops as diverged once any width exceeds this.
    pub divergence_ceiling: f64,
    /// Upper limit on the number of control steps in one run.
    pub max_steps: usize,
}

impl Default for PropagatorSettings {
    fn default() -> Self {
        Self {
            t0: 0.0,
            horizon: 1.0,
            dt: 0.01,
            substeps: 1,
            integrator: IntegratorKind::Rk4,
            divergence_ceiling: 1e6,
            max_steps: 10_000_000,
        }
    }
}

impl PropagatorSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.t0.is_finite() {
            return Err(ReachError::Settings(format!("t0 must be finite, got {}", self.t0)));
        }
        if !(self.horizon >= 0.0 && self.horizon.is_finite()) {
            return Err(ReachError::Settings(format!(
                "horizon must be finite and non-negative, got {}",
                self.horizon
            )));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(ReachError::Settings(format!(
                "dt must be finite and positive, got {}",
                self.dt
            )));
        }
        if self.substeps == 0 {
            return Err(ReachError::Settings("substeps must be at least 1".to_string()));
        }
        if !(self.divergence_ceiling > 0.0) {
            return Err(ReachError::Settings(format!(
                "divergence_ceiling must be positive, got {}",
                self.divergence_ceiling
            )));
        }
        let steps = self.horizon / self.dt - STEP_COUNT_SLACK;
        if steps > self.max_steps as f64 {
            return Err(ReachError::Settings(format!(
                "horizon {} at dt {} needs more than max_steps = {} control steps",
                self.horizon, self.dt, self.max_steps
            )));
        }
        Ok(())
    }

    /// Number of control steps needed to cover the horizon, saturating at
    /// `max_steps`.
    pub fn step_count(&self) -> usize {
        let steps = (self.horizon / self.dt - STEP_COUNT_SLACK).ceil().max(0.0);
        if steps.is_nan() {
            return 0;
        }
        (steps as usize).min(self.max_steps)
    }

    /// End time of control step `k` (zero-based).
    fn step_end(&self, k: usize) -> f64 {
        let end = self.t0 + self.horizon;
        if k + 1 >= self.step_count() {
            end
        } else {
            (self.t0 + (k + 1) as f64 * self.dt).min(end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DivergenceReason {
    WidthExceeded { width: f64 },
    NonFinite,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The horizon was reached.
    Terminated,
    /// Stepping stopped early; the trajectory ends at the last valid step.
    Diverged {
        step: usize,
        time: f64,
        reason: DivergenceReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    Stepping { step: usize },
    Diverged,
    Terminated,
}

/// Result of a run that reached a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct Reachability<T: Endpoint = f64> {
    pub trajectory: Trajectory<T>,
    pub status: RunStatus,
}

impl<T: Endpoint> Reachability<T> {
    pub fn is_terminated(&self) -> bool {
        self.status == RunStatus::Terminated
    }
}

/// An aborted run: the error plus every step computed before it.
#[derive(Debug, Clone, Error)]
#[error("propagation failed after {} recorded steps: {source}", .trajectory.len())]
pub struct PropagationFailure<T: Endpoint = f64> {
    pub trajectory: Trajectory<T>,
    pub source: ReachError,
}

/// Handle into a [`BufferArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(usize);

/// Fixed set of state buffers allocated once per run.
#[derive(Debug, Default)]
pub struct BufferArena<T> {
    buffers: Vec<Vec<T>>,
}

impl<T: Endpoint> BufferArena<T> {
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }

    pub fn alloc(&mut self, len: usize) -> BufferId {
        self.buffers.push(vec![T::zero(); len]);
        BufferId(self.buffers.len() - 1)
    }

    pub fn get(&self, id: BufferId) -> &[T] {
        &self.buffers[id.0]
    }

    pub fn get_mut(&mut self, id: BufferId) -> &mut [T] {
        &mut self.buffers[id.0]
    }

    /// Copies `from` into `to`.
    pub fn copy(&mut self, from: BufferId, to: BufferId) {
        if from == to {
            return;
        }
        let (src, dst) = if from.0 < to.0 {
            let (head, tail) = self.buffers.split_at_mut(to.0);
            (&head[from.0], &mut tail[0])
        } else {
            let (head, tail) = self.buffers.split_at_mut(from.0);
            (&tail[0], &mut head[to.0])
        };
        dst.copy_from_slice(src);
    }
}

/// Mutable state of a single run.
///
/// `current` holds the last accepted embedding state; `candidate` is where a
/// control step is integrated before it is checked and committed.
pub struct RunContext<T: Endpoint> {
    arena: BufferArena<T>,
    current: BufferId,
    candidate: BufferId,
    integrator: Integrator<T>,
    state: RunState,
    time: T,
}

impl<T: Endpoint> RunContext<T> {
    pub fn new(doubled: &[T], t0: T, integrator: IntegratorKind) -> Self {
        let mut arena = BufferArena::new();
        let current = arena.alloc(doubled.len());
        let candidate = arena.alloc(doubled.len());
        arena.get_mut(current).copy_from_slice(doubled);
        Self {
            arena,
            current,
            candidate,
            integrator: integrator.build(doubled.len()),
            state: RunState::Initialized,
            time: t0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn time(&self) -> T {
        self.time
    }

    pub fn current(&self) -> &[T] {
        self.arena.get(self.current)
    }

    pub fn candidate(&self) -> &[T] {
        self.arena.get(self.candidate)
    }

    /// Integrates the candidate from the current state over `[time, end]`.
    fn advance<D>(&mut self, embedding: &EmbeddingSystem<'_, T, D>, end: T, substeps: usize)
    where
        D: Decomposition<T> + ?Sized,
    {
        self.arena.copy(self.current, self.candidate);
        let h = (end - self.time) / cast(substeps as f64);
        let mut t = self.time;
        let candidate = self.arena.get_mut(self.candidate);
        for _ in 0..substeps {
            self.integrator.step(embedding, &mut t, candidate, h);
        }
    }

    fn commit(&mut self, end: T) {
        std::mem::swap(&mut self.current, &mut self.candidate);
        self.time = end;
    }

    fn transition(&mut self, next: RunState) {
        trace!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

/// Propagates interval boxes of initial states through a decomposition,
/// optionally closing the loop through a controller.
pub struct ReachabilityPropagator<D, T: Endpoint = f64> {
    decomposition: D,
    controller: Option<Arc<dyn ControllerBoundProvider<T>>>,
    settings: PropagatorSettings,
}

impl<D, T> ReachabilityPropagator<D, T>
where
    T: Endpoint,
    D: Decomposition<T>,
{
    pub fn new(decomposition: D, settings: PropagatorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            decomposition,
            controller: None,
            settings,
        })
    }

    /// Attaches a controller whose inputs are the full state and whose outputs
    /// are the decomposition's control inputs.
    pub fn with_controller(
        mut self,
        controller: Arc<dyn ControllerBoundProvider<T>>,
    ) -> Result<Self> {
        ReachError::check_len(
            "controller input",
            self.decomposition.state_dim(),
            controller.input_dim(),
        )?;
        ReachError::check_len(
            "controller output",
            self.decomposition.control_dim(),
            controller.output_dim(),
        )?;
        self.controller = Some(controller);
        Ok(self)
    }

    pub fn settings(&self) -> &PropagatorSettings {
        &self.settings
    }

    pub fn decomposition(&self) -> &D {
        &self.decomposition
    }

    /// Propagates `initial` over the horizon.
    ///
    /// Divergence ends the run with [`RunStatus::Diverged`]. Any error aborts
    /// the run and comes back with the steps recorded so far.
    pub fn run(
        &self,
        initial: &IntervalBox<T>,
    ) -> std::result::Result<Reachability<T>, PropagationFailure<T>> {
        let reserved = self.settings.step_count().min(RESERVED_STEPS);
        let mut trajectory = Trajectory::with_capacity(reserved + 1);
        match self.run_into(initial, &mut trajectory) {
            Ok(status) => Ok(Reachability { trajectory, status }),
            Err(source) => {
                warn!(steps = trajectory.len(), error = %source, "propagation aborted");
                Err(PropagationFailure { trajectory, source })
            }
        }
    }

    fn run_into(
        &self,
        initial: &IntervalBox<T>,
        trajectory: &mut Trajectory<T>,
    ) -> Result<RunStatus> {
        let mut embedding = EmbeddingSystem::new(&self.decomposition);
        if self.controller.is_none() && embedding.control_dim() > 0 {
            return Err(ReachError::Dimension {
                what: "controller output",
                expected: embedding.control_dim(),
                got: 0,
            });
        }
        let doubled = embedding.lift(initial)?;
        let mut ctx = RunContext::new(&doubled, cast(self.settings.t0), self.settings.integrator);
        let steps = self.settings.step_count();
        debug!(
            state_dim = embedding.state_dim(),
            control_dim = embedding.control_dim(),
            steps,
            "starting propagation"
        );
        trajectory.push(ctx.time(), initial.clone());
        let ceiling: T = cast(self.settings.divergence_ceiling);

        for k in 0..steps {
            ctx.transition(RunState::Stepping { step: k });
            if let Some(controller) = &self.controller {
                let current = trajectory.final_box().unwrap_or(initial);
                let control = controller.bound_output(current)?;
                trace!(step = k, control = %control, "holding control bounds");
                embedding.hold_control(&control)?;
            }

            let end: T = cast(self.settings.step_end(k));
            ctx.advance(&embedding, end, self.settings.substeps);

            if ctx.candidate().iter().any(|v| !v.is_finite()) {
                return Ok(self.diverge(&mut ctx, k, end, DivergenceReason::NonFinite));
            }
            let enclosure = embedding.project(ctx.candidate())?;
            let width = enclosure.max_width();
            if width > ceiling {
                let width = width.to_f64().unwrap_or(f64::INFINITY);
                let reason = DivergenceReason::WidthExceeded { width };
                return Ok(self.diverge(&mut ctx, k, end, reason));
            }

            ctx.commit(end);
            trace!(step = k, max_width = %width, "step accepted");
            trajectory.push(end, enclosure);
        }

        ctx.transition(RunState::Terminated);
        debug!(steps = trajectory.len() - 1, "propagation terminated");
        Ok(RunStatus::Terminated)
    }

    fn diverge(
        &self,
        ctx: &mut RunContext<T>,
        step: usize,
        end: T,
        reason: DivergenceReason,
    ) -> RunStatus {
        ctx.transition(RunState::Diverged);
        let time = end.to_f64().unwrap_or(f64::NAN);
        warn!(step, time, ?reason, "propagation diverged");
        RunStatus::Diverged { step, time, reason }
    }

    /// Runs every initial box independently in parallel.
    pub fn propagate_batch(
        &self,
        initials: &[IntervalBox<T>],
    ) -> Vec<std::result::Result<Reachability<T>, PropagationFailure<T>>> {
        debug!(runs = initials.len(), "starting batch propagation");
        initials.par_iter().map(|initial| self.run(initial)).collect()
    }

    /// Splits `initial` into `splits[i]` pieces along component `i`, runs each
    /// piece and returns the stepwise hull.
    ///
    /// The first failing piece fails the whole call. If some pieces diverge,
    /// the hull covers the steps every piece completed and the earliest
    /// divergence is reported.
    pub fn propagate_partitioned(
        &self,
        initial: &IntervalBox<T>,
        splits: &[usize],
    ) -> std::result::Result<Reachability<T>, PropagationFailure<T>> {
        let parts = initial.partition(splits).map_err(|source| PropagationFailure {
            trajectory: Trajectory::new(),
            source,
        })?;
        let runs = self
            .propagate_batch(&parts)
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let common = runs.iter().map(|r| r.trajectory.len()).min().unwrap_or(0);
        let status = runs
            .iter()
            .filter_map(|r| match r.status {
                RunStatus::Diverged { step, .. } => Some((step, r.status)),
                RunStatus::Terminated => None,
            })
            .min_by_key(|(step, _)| *step)
            .map_or(RunStatus::Terminated, |(_, status)| status);

        let mut iter = runs.into_iter().map(|mut r| {
            r.trajectory.truncate(common);
            r.trajectory
        });
        let mut hull = iter.next().unwrap_or_default();
        for trajectory in iter {
            hull = hull.hull(&trajectory).map_err(|source| PropagationFailure {
                trajectory: Trajectory::new(),
                source,
            })?;
        }
        debug!(parts = parts.len(), steps = hull.len(), "partitioned propagation finished");
        Ok(Reachability {
            trajectory: hull,
            status,
        })
    }
}
