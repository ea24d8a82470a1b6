//! Forecast signals consumed by the scheduler.
//!
//! Forecasting models live outside this crate. The only contract with them is
//! a [`ForecastSeries`]: timestamped point estimates on a fixed step grid,
//! optionally with uncertainty bounds that the scheduler does not use.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// The physical meaning of a forecast signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Photovoltaic generation (kW).
    Solar,
    /// Wind turbine generation (kW).
    Wind,
    /// Consumption (kW).
    Load,
    /// Market price per kWh.
    Market,
}

impl SourceKind {
    /// Returns `true` for kinds that supply power to a site.
    pub fn is_generation(self) -> bool {
        matches!(self, Self::Solar | Self::Wind)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Solar => "solar",
            Self::Wind => "wind",
            Self::Load => "load",
            Self::Market => "market",
        }
    }
}

/// Identifies one forecast signal, written as `kind:name` (e.g. `solar:roof-1`).
///
/// A bare kind such as `load` is shorthand for `load:default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId {
    pub kind: SourceKind,
    pub name: String,
}

impl SourceId {
    /// Name used when a source id is given without one.
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new(kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn solar(name: impl Into<String>) -> Self {
        Self::new(SourceKind::Solar, name)
    }

    pub fn wind(name: impl Into<String>) -> Self {
        Self::new(SourceKind::Wind, name)
    }

    pub fn load(name: impl Into<String>) -> Self {
        Self::new(SourceKind::Load, name)
    }

    pub fn market(name: impl Into<String>) -> Self {
        Self::new(SourceKind::Market, name)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s.split_once(':').unwrap_or((s, Self::DEFAULT_NAME));
        let kind = match kind.trim() {
            "solar" => SourceKind::Solar,
            "wind" => SourceKind::Wind,
            "load" => SourceKind::Load,
            "market" => SourceKind::Market,
            other => {
                return Err(format!(
                    "unknown source kind \"{other}\", expected solar, wind, load or market"
                ));
            }
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("source \"{s}\" has an empty name"));
        }
        Ok(Self::new(kind, name))
    }
}

impl TryFrom<String> for SourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.to_string()
    }
}

/// One forecast sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    /// Point estimate.
    pub value: f64,
    /// Lower uncertainty bound, if the model reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    /// Upper uncertainty bound, if the model reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl ForecastPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            lower: None,
            upper: None,
        }
    }
}

/// A forecast signal: samples with strictly increasing, evenly spaced timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub points: Vec<ForecastPoint>,
}

/// Forecasts keyed by source, the input shape of the horizon builder.
pub type ForecastSet = BTreeMap<SourceId, ForecastSeries>;

impl ForecastSeries {
    pub fn new(points: Vec<ForecastPoint>) -> Self {
        Self { points }
    }

    /// Builds a series of point estimates starting at `start`, one per `step`.
    pub fn from_values(start: DateTime<Utc>, step: TimeDelta, values: &[f64]) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &value)| ForecastPoint::new(start + step * i as i32, value))
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Timestamp of the first sample.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    /// Verifies that every value is finite and samples are exactly `step` apart.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::MisalignedForecast`] naming `source_id` on the
    /// first gap, duplicate, out-of-order sample, or non-finite value.
    pub fn check_spacing(&self, source_id: &SourceId, step: TimeDelta) -> Result<(), ScheduleError> {
        let misaligned = |reason: String| ScheduleError::MisalignedForecast {
            source_id: source_id.clone(),
            reason,
        };

        if let Some(point) = self.points.iter().find(|p| !p.value.is_finite()) {
            return Err(misaligned(format!(
                "non-finite value at {}",
                point.timestamp
            )));
        }
        for pair in self.points.windows(2) {
            let spacing = pair[1].timestamp - pair[0].timestamp;
            if spacing != step {
                return Err(misaligned(format!(
                    "samples at {} and {} are {}s apart, expected {}s",
                    pair[0].timestamp,
                    pair[1].timestamp,
                    spacing.num_seconds(),
                    step.num_seconds(),
                )));
            }
        }
        Ok(())
    }

    /// Returns `steps` consecutive point estimates starting exactly at `start`.
    ///
    /// Spacing must already have been checked against `step`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::MisalignedForecast`] when `start` is not on this
    /// series' grid or the series ends before `steps` samples are available.
    pub fn window(
        &self,
        source_id: &SourceId,
        start: DateTime<Utc>,
        step: TimeDelta,
        steps: usize,
    ) -> Result<Vec<f64>, ScheduleError> {
        let misaligned = |reason: String| ScheduleError::MisalignedForecast {
            source_id: source_id.clone(),
            reason,
        };

        let Some(first) = self.start() else {
            return Err(misaligned("series is empty".into()));
        };
        let offset_ms = (start - first).num_milliseconds();
        if offset_ms < 0 {
            return Err(misaligned(format!(
                "series starts at {first}, after the horizon start {start}"
            )));
        }
        let step_ms = step.num_milliseconds();
        if step_ms <= 0 {
            return Err(misaligned(format!(
                "step of {step_ms} ms does not form a grid"
            )));
        }
        if offset_ms % step_ms != 0 {
            return Err(misaligned(format!(
                "horizon start {start} is not on the series grid starting at {first}"
            )));
        }

        let offset = (offset_ms / step_ms) as usize;
        let available = self.points.len().saturating_sub(offset);
        if available < steps {
            return Err(misaligned(format!(
                "covers {available} of {steps} horizon steps from {start}"
            )));
        }
        Ok(self.points[offset..offset + steps]
            .iter()
            .map(|p| p.value)
            .collect())
    }
}
