//! Optimization engine that orchestrates horizon, formulation, solve and materialization.

use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use crate::devices::Battery;
use crate::error::ScheduleError;
use crate::forecast::ForecastSet;

use super::formulator::formulate;
use super::horizon::{HorizonRequest, build_horizon};
use super::schedule::{DEFAULT_SNAP_EPSILON, DEFAULT_TOLERANCE, Materializer, Schedule};
use super::solver::{DEFAULT_TIME_BUDGET, LpSolver, MicroLpSolver};
use super::topology::Topology;

/// Tunables of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Wall-clock budget of one solve.
    pub time_budget: Duration,
    /// See [`Materializer::snap_epsilon`].
    pub snap_epsilon: f64,
    /// See [`Materializer::tolerance`].
    pub tolerance: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            time_budget: DEFAULT_TIME_BUDGET,
            snap_epsilon: DEFAULT_SNAP_EPSILON,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Everything one optimization call needs.
///
/// The fleet is a snapshot read once at the start of the call; the engine
/// never writes it back.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationRequest<'a> {
    pub fleet: &'a [Battery],
    pub forecasts: &'a ForecastSet,
    pub horizon: HorizonRequest,
    /// `None` places the whole fleet and every source behind one unlimited
    /// grid connection (see [`Topology::single_site`]).
    pub topology: Option<&'a Topology>,
}

impl<'a> OptimizationRequest<'a> {
    pub fn new(fleet: &'a [Battery], forecasts: &'a ForecastSet, horizon: HorizonRequest) -> Self {
        Self {
            fleet,
            forecasts,
            horizon,
            topology: None,
        }
    }

    pub fn with_topology(mut self, topology: &'a Topology) -> Self {
        self.topology = Some(topology);
        self
    }
}

/// Stateless battery scheduling engine.
///
/// Generic over `S: LpSolver` for static dispatch. Holds no state between
/// calls, so one engine may serve concurrent requests from several threads.
#[derive(Debug, Clone)]
pub struct Engine<S: LpSolver = MicroLpSolver> {
    solver: S,
    materializer: Materializer,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Engine {
    /// Creates an engine backed by [`MicroLpSolver`].
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            solver: MicroLpSolver::new(settings.time_budget),
            materializer: Materializer::new(settings.snap_epsilon, settings.tolerance),
        }
    }
}

impl<S: LpSolver> Engine<S> {
    /// Creates an engine with a custom solver backend.
    pub fn with_solver(solver: S, materializer: Materializer) -> Self {
        Self {
            solver,
            materializer,
        }
    }

    /// Returns a reference to the solver backend.
    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Computes the cost-minimizing schedule for `request`.
    ///
    /// # Errors
    ///
    /// Any [`ScheduleError`]; the engine never retries.
    #[instrument(skip_all, fields(batteries = request.fleet.len(), steps = request.horizon.steps))]
    pub fn optimize(&self, request: &OptimizationRequest<'_>) -> Result<Schedule, ScheduleError> {
        let started = Instant::now();
        let result = self.run(request);
        match &result {
            Ok(schedule) => info!(
                objective = schedule.objective,
                rows = schedule.len(),
                elapsed = ?started.elapsed(),
                "schedule ready"
            ),
            Err(e @ (ScheduleError::Infeasible | ScheduleError::SolveTimeout { .. })) => {
                warn!(error = %e, "optimization did not produce a schedule");
            }
            Err(e @ (ScheduleError::SolverFailure(_) | ScheduleError::Unbounded)) => {
                error!(error = %e, "solver failed");
            }
            Err(e) => warn!(error = %e, "rejected optimization input"),
        }
        result
    }

    fn run(&self, request: &OptimizationRequest<'_>) -> Result<Schedule, ScheduleError> {
        for battery in request.fleet {
            battery.validate()?;
        }
        let aligned = build_horizon(request.forecasts, &request.horizon)?;

        let derived;
        let topology = match request.topology {
            Some(topology) => topology,
            None => {
                derived = Topology::single_site(request.fleet, aligned.values.keys())?;
                &derived
            }
        };
        info!(
            start = %aligned.horizon.start,
            sites = topology.sites.len(),
            "optimizing"
        );

        let formulation = formulate(request.fleet, topology, &aligned)?;
        let solved = self.solver.solve(&formulation.problem)?;
        self.materializer.materialize(&formulation, &solved)
    }
}
