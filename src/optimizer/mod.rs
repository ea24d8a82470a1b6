//! Battery scheduling optimization: horizon alignment, LP formulation,
//! solving and schedule materialization.
//!
//! [`Engine::optimize`] runs the whole pipeline; the stages are public so they
//! can be driven and tested one by one.

pub mod engine;
pub mod formulator;
pub mod horizon;
pub mod kpi;
pub mod problem;
pub mod schedule;
pub mod solver;
pub mod topology;

pub use engine::{Engine, EngineSettings, OptimizationRequest};
pub use horizon::{
    AlignedForecasts, DEFAULT_HORIZON_STEPS, Horizon, HorizonRequest, MIN_STEP, build_horizon,
};
pub use kpi::ScheduleSummary;
pub use schedule::{GridStep, Materializer, Schedule, ScheduleStep};
pub use solver::{LpSolver, MicroLpSolver, SolvedProblem};
pub use topology::{GridConnection, Site, Topology};
