//! Horizon builder: aligns forecast signals onto one step grid.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::ScheduleError;
use crate::forecast::{ForecastSet, SourceId};

/// Number of steps optimized when the caller does not ask for a length.
pub const DEFAULT_HORIZON_STEPS: usize = 30;

/// Shortest step duration accepted; forecast grids are compared in milliseconds.
pub const MIN_STEP: TimeDelta = TimeDelta::milliseconds(1);

/// The aligned time grid an optimization runs over.
///
/// Step `t` covers `[start + t·step, start + (t+1)·step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub steps: usize,
    #[serde(rename = "step_seconds", serialize_with = "serialize_step")]
    pub step: TimeDelta,
}

fn serialize_step<S: Serializer>(step: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(step.num_seconds())
}

impl Horizon {
    /// Creates a horizon of `steps` steps of `step` each.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::EmptyHorizon`] if `steps` is zero, `step` is
    /// shorter than [`MIN_STEP`], or the end of the last step lies beyond the
    /// representable time range.
    pub fn new(start: DateTime<Utc>, steps: usize, step: TimeDelta) -> Result<Self, ScheduleError> {
        if steps == 0 || step < MIN_STEP {
            return Err(ScheduleError::EmptyHorizon);
        }
        if offset(start, step, steps).is_none() {
            return Err(ScheduleError::EmptyHorizon);
        }
        Ok(Self { start, steps, step })
    }

    /// Step duration in hours.
    pub fn dt_hours(&self) -> f64 {
        self.step.num_milliseconds() as f64 / 3_600_000.0
    }

    /// Start timestamp of step `t`.
    ///
    /// Saturates at `DateTime::<Utc>::MAX_UTC` past the representable range,
    /// which [`Horizon::new`] rules out for `t <= steps`.
    pub fn timestamp(&self, t: usize) -> DateTime<Utc> {
        offset(self.start, self.step, t).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// End of the last step (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp(self.steps)
    }
}

fn offset(start: DateTime<Utc>, step: TimeDelta, t: usize) -> Option<DateTime<Utc>> {
    let span = step.checked_mul(i32::try_from(t).ok()?)?;
    start.checked_add_signed(span)
}

/// What the caller asks the horizon builder for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonRequest {
    /// Number of steps to optimize.
    pub steps: usize,
    /// Expected spacing of every forecast series.
    pub step: TimeDelta,
    /// Explicit horizon start. When `None`, the latest first timestamp across
    /// all series is used so that every series can cover the horizon.
    pub start: Option<DateTime<Utc>>,
}

impl Default for HorizonRequest {
    fn default() -> Self {
        Self {
            steps: DEFAULT_HORIZON_STEPS,
            step: TimeDelta::hours(1),
            start: None,
        }
    }
}

impl HorizonRequest {
    pub fn new(steps: usize, step: TimeDelta) -> Self {
        Self {
            steps,
            step,
            start: None,
        }
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }
}

/// Per-source value vectors, each exactly `horizon.steps` long.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedForecasts {
    pub horizon: Horizon,
    pub values: BTreeMap<SourceId, Vec<f64>>,
}

impl AlignedForecasts {
    /// Aligned values of one source.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::MisalignedForecast`] if no forecast was
    /// supplied for `source_id`.
    pub fn series(&self, source_id: &SourceId) -> Result<&[f64], ScheduleError> {
        self.values
            .get(source_id)
            .map(Vec::as_slice)
            .ok_or_else(|| ScheduleError::MisalignedForecast {
                source_id: source_id.clone(),
                reason: "no forecast supplied for this source".into(),
            })
    }

    /// Step-wise sum of several sources; all zeros when `ids` is empty.
    ///
    /// # Errors
    ///
    /// Same as [`AlignedForecasts::series`].
    pub fn sum_of<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SourceId>,
    ) -> Result<Vec<f64>, ScheduleError> {
        let mut total = vec![0.0; self.horizon.steps];
        for id in ids {
            for (acc, value) in total.iter_mut().zip(self.series(id)?) {
                *acc += value;
            }
        }
        Ok(total)
    }
}

/// Aligns every forecast series onto a common horizon.
///
/// Each series must be evenly spaced at `request.step`, contain only finite
/// values, have a sample exactly at the horizon start, and extend for at
/// least `request.steps` samples from there. Longer series are truncated.
/// Nothing is interpolated or extended.
///
/// # Errors
///
/// * [`ScheduleError::EmptyHorizon`] if `request.steps` is zero, the step is
///   not positive, or there is neither a forecast nor an explicit start to
///   anchor the grid.
/// * [`ScheduleError::MisalignedForecast`] naming the first offending series.
pub fn build_horizon(
    forecasts: &ForecastSet,
    request: &HorizonRequest,
) -> Result<AlignedForecasts, ScheduleError> {
    if request.steps == 0 || request.step < MIN_STEP {
        return Err(ScheduleError::EmptyHorizon);
    }

    for (id, series) in forecasts {
        if series.is_empty() {
            return Err(ScheduleError::MisalignedForecast {
                source_id: id.clone(),
                reason: "series is empty".into(),
            });
        }
        series.check_spacing(id, request.step)?;
    }

    let start = match request.start {
        Some(start) => start,
        None => forecasts
            .values()
            .filter_map(|series| series.start())
            .max()
            .ok_or(ScheduleError::EmptyHorizon)?,
    };
    let horizon = Horizon::new(start, request.steps, request.step)?;

    let values = forecasts
        .iter()
        .map(|(id, series)| {
            series
                .window(id, horizon.start, horizon.step, horizon.steps)
                .map(|window| (id.clone(), window))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    debug!(
        start = %horizon.start,
        steps = horizon.steps,
        sources = values.len(),
        "aligned forecasts"
    );
    Ok(AlignedForecasts { horizon, values })
}
