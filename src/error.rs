//! Error taxonomy shared by every stage of the scheduling pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::devices::BatteryId;
use crate::forecast::SourceId;

/// Every outcome of an optimization call other than a schedule.
///
/// Input errors are reported before any solving starts. The engine itself
/// never retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    /// A battery snapshot violates its own physical bounds.
    #[error("invalid state for battery `{battery}`: {reason}")]
    InvalidBatteryState { battery: BatteryId, reason: String },

    /// A forecast does not cover the horizon on the expected step grid.
    #[error("forecast `{source_id}` is misaligned: {reason}")]
    MisalignedForecast { source_id: SourceId, reason: String },

    /// The requested horizon has no steps (or a non-positive step duration).
    #[error("horizon is empty")]
    EmptyHorizon,

    /// Sites, batteries and sources do not describe a consistent grid.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// No schedule satisfies the battery and grid constraints.
    #[error("no feasible schedule exists for the given fleet and forecasts")]
    Infeasible,

    /// The objective can be decreased without limit.
    #[error("objective is unbounded")]
    Unbounded,

    /// The solver did not finish within its time budget.
    #[error("solver exceeded its time budget of {budget:?}")]
    SolveTimeout { budget: Duration },

    /// Numerical or internal solver error, including post-condition failures.
    #[error("solver failure: {0}")]
    SolverFailure(String),
}

impl ScheduleError {
    /// Returns `true` when repeating the same call with a larger budget may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SolveTimeout { .. })
    }
}
