//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::devices::{Battery, BatteryId};
use crate::error::ScheduleError;
use crate::forecast::{ForecastPoint, ForecastSeries, ForecastSet, SourceId, SourceKind};
use crate::optimizer::horizon::DEFAULT_HORIZON_STEPS;
use crate::optimizer::schedule::{DEFAULT_SNAP_EPSILON, DEFAULT_TOLERANCE};
use crate::optimizer::{EngineSettings, GridConnection, HorizonRequest, Site, Topology};

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults. Load from TOML with
/// [`ScenarioConfig::from_toml_file`] or use one of the built-in presets
/// ([`ScenarioConfig::PRESETS`]).
///
/// Timestamps are RFC 3339 strings, e.g. `start = "2025-01-01T00:00:00Z"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Horizon and solver parameters.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Battery fleet snapshot.
    #[serde(default)]
    pub batteries: Vec<BatteryConfig>,
    /// Forecast series, one per source.
    #[serde(default)]
    pub forecasts: Vec<ForecastConfig>,
    /// Grid topology. Empty means one unlimited site holding everything.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    /// Price signal selection.
    #[serde(default)]
    pub market: MarketConfig,
}

/// Horizon and solver parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of steps to optimize (must be > 0).
    pub horizon_steps: usize,
    /// Step duration in minutes (must be > 0).
    pub step_minutes: i64,
    /// Horizon start; defaults to the latest first forecast timestamp.
    pub start: Option<DateTime<Utc>>,
    /// Solver wall-clock budget in milliseconds (must be > 0).
    pub time_budget_ms: u64,
    /// Distance below which solver values snap onto their bounds.
    pub snap_epsilon: f64,
    /// Tolerance of the schedule post-condition checks.
    pub tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_steps: DEFAULT_HORIZON_STEPS,
            step_minutes: 60,
            start: None,
            time_budget_ms: 10_000,
            snap_epsilon: DEFAULT_SNAP_EPSILON,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// One battery snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Fleet-unique identifier.
    pub id: String,
    /// Energy capacity (kWh).
    pub capacity_kwh: f64,
    /// Current state of charge (kWh).
    pub soc_kwh: f64,
    /// Maximum charging power (kW).
    pub max_charge_kw: f64,
    /// Maximum discharging power (kW).
    pub max_discharge_kw: f64,
    /// Round-trip efficiency in `(0, 1]`.
    pub round_trip_efficiency: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            id: "bat-1".to_string(),
            capacity_kwh: 10.0,
            soc_kwh: 5.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            round_trip_efficiency: 0.95,
        }
    }
}

/// One forecast series on a regular grid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForecastConfig {
    /// Source id, `kind:name` with kind one of `solar`, `wind`, `load`, `market`.
    pub source: SourceId,
    /// Timestamp of the first value.
    pub start: DateTime<Utc>,
    /// Spacing between values in minutes.
    #[serde(default = "default_step_minutes")]
    pub step_minutes: i64,
    /// Point estimates.
    pub values: Vec<f64>,
    /// Lower uncertainty bounds, same length as `values`.
    #[serde(default)]
    pub lower: Option<Vec<f64>>,
    /// Upper uncertainty bounds, same length as `values`.
    #[serde(default)]
    pub upper: Option<Vec<f64>>,
}

fn default_step_minutes() -> i64 {
    60
}

impl ForecastConfig {
    pub fn new(source: SourceId, start: DateTime<Utc>, step_minutes: i64, values: Vec<f64>) -> Self {
        Self {
            source,
            start,
            step_minutes,
            values,
            lower: None,
            upper: None,
        }
    }

    /// Expands the compact representation into timestamped points.
    pub fn to_series(&self) -> ForecastSeries {
        let step = TimeDelta::minutes(self.step_minutes);
        let bound = |bounds: &Option<Vec<f64>>, i: usize| bounds.as_ref().and_then(|b| b.get(i).copied());
        let points = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &value)| ForecastPoint {
                timestamp: self.start + step * i as i32,
                value,
                lower: bound(&self.lower, i),
                upper: bound(&self.upper, i),
            })
            .collect();
        ForecastSeries::new(points)
    }
}

/// One grid connection point.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Site name.
    pub id: String,
    /// Ids of the batteries behind this connection.
    pub batteries: Vec<String>,
    /// Generation sources (`solar:*`, `wind:*`).
    pub generation: Vec<SourceId>,
    /// Load sources (`load:*`).
    pub load: Vec<SourceId>,
    /// Maximum import (kW); unlimited when absent.
    pub max_import_kw: Option<f64>,
    /// Maximum export (kW, positive magnitude); unlimited when absent.
    pub max_export_kw: Option<f64>,
}

/// Price signal selection.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketConfig {
    /// Market source used as price; defaults to the first `market:*` forecast.
    pub price_source: Option<SourceId>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"batteries[0].soc_kwh"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 2025-01-01T00:00:00Z, the start of every preset.
const PRESET_START_SECS: i64 = 1_735_689_600;

fn preset_start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(PRESET_START_SECS)
}

/// Samples `f(hour)` once per hour for `steps` steps, rounded to 1e-3.
fn hourly_profile(first_hour: f64, steps: usize, f: impl Fn(f64) -> f64) -> Vec<f64> {
    (0..steps)
        .map(|i| (f(first_hour + i as f64) * 1000.0).round() / 1000.0)
        .collect()
}

/// Half-sine daylight curve peaking at 12:00.
fn daylight(hour: f64, peak_kw: f64) -> f64 {
    let h = hour.rem_euclid(24.0);
    if (6.0..=18.0).contains(&h) {
        peak_kw * (PI * (h - 6.0) / 12.0).sin()
    } else {
        0.0
    }
}

fn bump(hour: f64, center: f64, width: f64) -> f64 {
    (-(hour - center).powi(2) / width).exp()
}

impl ScenarioConfig {
    /// Returns the baseline preset: one 10 kWh battery, four hourly steps,
    /// flat 1 kW load and alternating cheap/expensive prices.
    pub fn baseline() -> Self {
        let start = preset_start();
        Self {
            engine: EngineConfig {
                horizon_steps: 4,
                ..EngineConfig::default()
            },
            batteries: vec![BatteryConfig::default()],
            forecasts: vec![
                ForecastConfig::new(SourceId::solar("pv-1"), start, 60, vec![0.0; 4]),
                ForecastConfig::new(SourceId::load("site"), start, 60, vec![1.0; 4]),
                ForecastConfig::new(SourceId::market("spot"), start, 60, vec![0.1, 0.3, 0.1, 0.3]),
            ],
            sites: Vec::new(),
            market: MarketConfig::default(),
        }
    }

    /// Returns the solar-surplus preset: two home batteries, two PV arrays
    /// and a wind turbine over one day with an evening price peak.
    pub fn solar_surplus() -> Self {
        let start = preset_start();
        let steps = 24;
        Self {
            engine: EngineConfig {
                horizon_steps: steps,
                ..EngineConfig::default()
            },
            batteries: vec![
                BatteryConfig {
                    id: "home-1".to_string(),
                    capacity_kwh: 13.5,
                    soc_kwh: 4.0,
                    max_charge_kw: 5.0,
                    max_discharge_kw: 5.0,
                    round_trip_efficiency: 0.9,
                },
                BatteryConfig {
                    id: "home-2".to_string(),
                    capacity_kwh: 10.0,
                    soc_kwh: 2.0,
                    max_charge_kw: 3.3,
                    max_discharge_kw: 3.3,
                    round_trip_efficiency: 0.92,
                },
            ],
            forecasts: vec![
                ForecastConfig::new(
                    SourceId::solar("roof-1"),
                    start,
                    60,
                    hourly_profile(0.0, steps, |h| daylight(h, 6.0)),
                ),
                ForecastConfig::new(
                    SourceId::solar("roof-2"),
                    start,
                    60,
                    hourly_profile(0.0, steps, |h| daylight(h, 4.0)),
                ),
                ForecastConfig::new(
                    SourceId::wind("ridge"),
                    start,
                    60,
                    hourly_profile(0.0, steps, |h| 1.5 + (2.0 * PI * h / 24.0).cos()),
                ),
                ForecastConfig::new(
                    SourceId::load("homes"),
                    start,
                    60,
                    hourly_profile(0.0, steps, |h| {
                        1.2 + 0.8 * bump(h, 8.0, 4.0) + 1.5 * bump(h, 19.0, 6.0)
                    }),
                ),
                ForecastConfig::new(
                    SourceId::market("day-ahead"),
                    start,
                    60,
                    hourly_profile(0.0, steps, |h| {
                        0.12 + 0.10 * bump(h, 19.0, 8.0) - 0.05 * bump(h, 13.0, 8.0)
                    }),
                ),
            ],
            sites: Vec::new(),
            market: MarketConfig::default(),
        }
    }

    /// Returns the multi-site preset: a PV site with an export cap and a
    /// consumer site with an import cap, sharing one price.
    pub fn multi_site() -> Self {
        let start = preset_start() + TimeDelta::hours(6);
        let steps = 12;
        Self {
            engine: EngineConfig {
                horizon_steps: steps,
                ..EngineConfig::default()
            },
            batteries: vec![
                BatteryConfig {
                    id: "bat-north".to_string(),
                    capacity_kwh: 10.0,
                    soc_kwh: 3.0,
                    max_charge_kw: 5.0,
                    max_discharge_kw: 5.0,
                    round_trip_efficiency: 0.9,
                },
                BatteryConfig {
                    id: "bat-south".to_string(),
                    capacity_kwh: 8.0,
                    soc_kwh: 4.0,
                    max_charge_kw: 4.0,
                    max_discharge_kw: 4.0,
                    round_trip_efficiency: 0.9,
                },
            ],
            forecasts: vec![
                ForecastConfig::new(
                    SourceId::solar("north-pv"),
                    start,
                    60,
                    hourly_profile(6.5, steps, |h| daylight(h, 4.0)),
                ),
                ForecastConfig::new(SourceId::load("north"), start, 60, vec![1.0; steps]),
                ForecastConfig::new(
                    SourceId::load("south"),
                    start,
                    60,
                    hourly_profile(6.0, steps, |h| 2.0 + 0.8 * bump(h, 17.0, 6.0)),
                ),
                ForecastConfig::new(
                    SourceId::market("spot"),
                    start,
                    60,
                    hourly_profile(6.0, steps, |h| 0.1 + 0.2 * bump(h, 17.0, 4.0)),
                ),
            ],
            sites: vec![
                SiteConfig {
                    id: "north".to_string(),
                    batteries: vec!["bat-north".to_string()],
                    generation: vec![SourceId::solar("north-pv")],
                    load: vec![SourceId::load("north")],
                    max_import_kw: None,
                    max_export_kw: Some(2.0),
                },
                SiteConfig {
                    id: "south".to_string(),
                    batteries: vec!["bat-south".to_string()],
                    generation: Vec::new(),
                    load: vec![SourceId::load("south")],
                    max_import_kw: Some(6.0),
                    max_export_kw: None,
                },
            ],
            market: MarketConfig {
                price_source: Some(SourceId::market("spot")),
            },
        }
    }

    /// Returns the infeasible preset: a full battery behind a connection that
    /// cannot export, facing a generation surplus larger than it can absorb.
    pub fn infeasible() -> Self {
        let start = preset_start();
        Self {
            engine: EngineConfig {
                horizon_steps: 2,
                ..EngineConfig::default()
            },
            batteries: vec![BatteryConfig {
                soc_kwh: 10.0,
                ..BatteryConfig::default()
            }],
            forecasts: vec![
                ForecastConfig::new(SourceId::solar("pv-1"), start, 60, vec![5.0; 2]),
                ForecastConfig::new(SourceId::load("site"), start, 60, vec![0.0; 2]),
                ForecastConfig::new(SourceId::market("spot"), start, 60, vec![0.1; 2]),
            ],
            sites: vec![SiteConfig {
                id: "main".to_string(),
                batteries: vec!["bat-1".to_string()],
                generation: vec![SourceId::solar("pv-1")],
                load: vec![SourceId::load("site")],
                max_import_kw: None,
                max_export_kw: Some(0.0),
            }],
            market: MarketConfig::default(),
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "solar_surplus", "multi_site", "infeasible"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "solar_surplus" => Ok(Self::solar_surplus()),
            "multi_site" => Ok(Self::multi_site()),
            "infeasible" => Ok(Self::infeasible()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. Sources referenced
    /// by sites are not required to appear under `forecasts`, since they may
    /// be supplied from CSV files at run time.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let e = &self.engine;
        if e.horizon_steps == 0 {
            errors.push(ConfigError::new("engine.horizon_steps", "must be > 0"));
        }
        if e.step_minutes <= 0 {
            errors.push(ConfigError::new("engine.step_minutes", "must be > 0"));
        }
        if e.time_budget_ms == 0 {
            errors.push(ConfigError::new("engine.time_budget_ms", "must be > 0"));
        }
        if !(e.tolerance.is_finite() && e.tolerance > 0.0) {
            errors.push(ConfigError::new("engine.tolerance", "must be > 0"));
        }
        if !(e.snap_epsilon.is_finite() && e.snap_epsilon >= 0.0 && e.snap_epsilon <= e.tolerance)
        {
            errors.push(ConfigError::new(
                "engine.snap_epsilon",
                "must be in [0, engine.tolerance]",
            ));
        }

        if self.batteries.is_empty() {
            errors.push(ConfigError::new("batteries", "at least one battery is required"));
        }
        let mut battery_ids = BTreeSet::new();
        for (i, b) in self.batteries.iter().enumerate() {
            let field = |name: &str| format!("batteries[{i}].{name}");
            if b.id.is_empty() {
                errors.push(ConfigError::new(field("id"), "must not be empty"));
            } else if !battery_ids.insert(b.id.as_str()) {
                errors.push(ConfigError::new(field("id"), format!("duplicate id \"{}\"", b.id)));
            }
            if !(b.capacity_kwh > 0.0) {
                errors.push(ConfigError::new(field("capacity_kwh"), "must be > 0"));
            }
            if !(0.0..=b.capacity_kwh).contains(&b.soc_kwh) {
                errors.push(ConfigError::new(field("soc_kwh"), "must be in [0, capacity_kwh]"));
            }
            if !(b.max_charge_kw > 0.0) {
                errors.push(ConfigError::new(field("max_charge_kw"), "must be > 0"));
            }
            if !(b.max_discharge_kw > 0.0) {
                errors.push(ConfigError::new(field("max_discharge_kw"), "must be > 0"));
            }
            if !(b.round_trip_efficiency > 0.0 && b.round_trip_efficiency <= 1.0) {
                errors.push(ConfigError::new(field("round_trip_efficiency"), "must be in (0, 1]"));
            }
        }

        let mut sources = BTreeSet::new();
        for (i, f) in self.forecasts.iter().enumerate() {
            let field = |name: &str| format!("forecasts[{i}].{name}");
            if !sources.insert(&f.source) {
                errors.push(ConfigError::new(
                    field("source"),
                    format!("duplicate source \"{}\"", f.source),
                ));
            }
            if f.step_minutes <= 0 {
                errors.push(ConfigError::new(field("step_minutes"), "must be > 0"));
            }
            if f.values.is_empty() {
                errors.push(ConfigError::new(field("values"), "must not be empty"));
            }
            if f.values.iter().any(|v| !v.is_finite()) {
                errors.push(ConfigError::new(field("values"), "must be finite"));
            }
            for (name, bounds) in [("lower", &f.lower), ("upper", &f.upper)] {
                if let Some(b) = bounds {
                    if b.len() != f.values.len() {
                        errors.push(ConfigError::new(
                            field(name),
                            format!("has {} entries, values has {}", b.len(), f.values.len()),
                        ));
                    }
                }
            }
        }

        let mut site_ids = BTreeSet::new();
        let mut assigned = BTreeSet::new();
        for (i, s) in self.sites.iter().enumerate() {
            let field = |name: &str| format!("sites[{i}].{name}");
            if s.id.is_empty() {
                errors.push(ConfigError::new(field("id"), "must not be empty"));
            } else if !site_ids.insert(s.id.as_str()) {
                errors.push(ConfigError::new(field("id"), format!("duplicate id \"{}\"", s.id)));
            }
            for battery in &s.batteries {
                if !battery_ids.contains(battery.as_str()) {
                    errors.push(ConfigError::new(
                        field("batteries"),
                        format!("unknown battery \"{battery}\""),
                    ));
                } else if !assigned.insert(battery.as_str()) {
                    errors.push(ConfigError::new(
                        field("batteries"),
                        format!("battery \"{battery}\" is already assigned to another site"),
                    ));
                }
            }
            if let Some(source) = s.generation.iter().find(|id| !id.kind.is_generation()) {
                errors.push(ConfigError::new(
                    field("generation"),
                    format!("\"{source}\" is not a solar or wind source"),
                ));
            }
            if let Some(source) = s.load.iter().find(|id| id.kind != SourceKind::Load) {
                errors.push(ConfigError::new(
                    field("load"),
                    format!("\"{source}\" is not a load source"),
                ));
            }
            for (name, limit) in [("max_import_kw", s.max_import_kw), ("max_export_kw", s.max_export_kw)] {
                if limit.is_some_and(|kw| !(kw >= 0.0)) {
                    errors.push(ConfigError::new(field(name), "must be >= 0"));
                }
            }
        }
        if !self.sites.is_empty() {
            for id in battery_ids.difference(&assigned) {
                errors.push(ConfigError::new(
                    "sites",
                    format!("battery \"{id}\" is not assigned to any site"),
                ));
            }
        }

        if let Some(price) = &self.market.price_source {
            if price.kind != SourceKind::Market {
                errors.push(ConfigError::new(
                    "market.price_source",
                    format!("\"{price}\" is not a market source"),
                ));
            }
        }

        errors
    }

    /// Builds the battery fleet.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidBatteryState`] for the first invalid battery.
    pub fn fleet(&self) -> Result<Vec<Battery>, ScheduleError> {
        self.batteries
            .iter()
            .map(|b| {
                Battery::new(
                    BatteryId(b.id.clone()),
                    b.capacity_kwh,
                    b.soc_kwh,
                    b.max_charge_kw,
                    b.max_discharge_kw,
                    b.round_trip_efficiency,
                )
            })
            .collect()
    }

    /// Builds the forecast map keyed by source.
    pub fn forecast_set(&self) -> ForecastSet {
        self.forecasts
            .iter()
            .map(|f| (f.source.clone(), f.to_series()))
            .collect()
    }

    /// Builds the grid topology for `fleet` and the sources in `forecasts`.
    ///
    /// Without `[[sites]]` every battery and source goes behind one unlimited
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidTopology`] if no price source can be found.
    pub fn topology(
        &self,
        fleet: &[Battery],
        forecasts: &ForecastSet,
    ) -> Result<Topology, ScheduleError> {
        let price_source = self.market.price_source.as_ref();

        if self.sites.is_empty() {
            let mut topology = Topology::single_site(fleet, forecasts.keys().chain(price_source))?;
            if let Some(price) = price_source {
                topology.price = price.clone();
            }
            return Ok(topology);
        }

        let price = price_source
            .or_else(|| forecasts.keys().find(|id| id.kind == SourceKind::Market))
            .cloned()
            .ok_or_else(|| ScheduleError::InvalidTopology("no market price forecast supplied".into()))?;
        let sites = self
            .sites
            .iter()
            .map(|s| Site {
                id: s.id.clone(),
                grid: GridConnection {
                    max_import_kw: s.max_import_kw,
                    max_export_kw: s.max_export_kw,
                },
                batteries: s.batteries.iter().map(|b| BatteryId(b.clone())).collect(),
                generation: s.generation.clone(),
                load: s.load.clone(),
            })
            .collect();
        Ok(Topology { sites, price })
    }

    /// Horizon request from the `[engine]` section.
    pub fn horizon_request(&self) -> HorizonRequest {
        HorizonRequest {
            steps: self.engine.horizon_steps,
            step: TimeDelta::minutes(self.engine.step_minutes),
            start: self.engine.start,
        }
    }

    /// Engine settings from the `[engine]` section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            time_budget: Duration::from_millis(self.engine.time_budget_ms),
            snap_epsilon: self.engine.snap_epsilon,
            tolerance: self.engine.tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name).expect("preset exists");
            let errors = cfg.validate();
            assert!(errors.is_empty(), "{name} should be valid: {errors:?}");
            assert!(cfg.fleet().is_ok(), "{name} fleet should build");
        }
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn preset_start_is_new_year_2025() {
        assert_eq!(preset_start(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn solar_surplus_profiles_cover_a_day() {
        let cfg = ScenarioConfig::solar_surplus();
        for f in &cfg.forecasts {
            assert_eq!(f.values.len(), 24, "{}", f.source);
        }
        let roof = &cfg.forecasts[0].values;
        assert_eq!(roof[0], 0.0);
        assert_eq!(roof[12], 6.0);
        assert!(roof.iter().all(|&kw| kw >= 0.0));
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[engine]
horizon_steps = 3
step_minutes = 30
start = "2025-06-01T12:00:00Z"
time_budget_ms = 2500

[[batteries]]
id = "garage"
capacity_kwh = 13.5
soc_kwh = 6.0
max_charge_kw = 5.0
max_discharge_kw = 5.0
round_trip_efficiency = 0.9

[[forecasts]]
source = "solar:roof"
start = "2025-06-01T12:00:00Z"
step_minutes = 30
values = [3.0, 2.5, 2.0]
lower = [2.0, 1.5, 1.0]
upper = [4.0, 3.5, 3.0]

[[forecasts]]
source = "market"
start = "2025-06-01T12:00:00Z"
step_minutes = 30
values = [0.2, 0.25, 0.3]

[[sites]]
id = "home"
batteries = ["garage"]
generation = ["solar:roof"]
max_export_kw = 4.0

[market]
price_source = "market:default"
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.unwrap();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.engine.horizon_steps, 3);
        assert_eq!(
            cfg.engine.start,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(cfg.batteries[0].id, "garage");
        assert_eq!(cfg.forecasts[1].source, SourceId::market("default"));
        assert_eq!(cfg.sites[0].max_export_kw, Some(4.0));
        assert_eq!(cfg.sites[0].max_import_kw, None);

        let request = cfg.horizon_request();
        assert_eq!(request.step, TimeDelta::minutes(30));
        assert_eq!(cfg.engine_settings().time_budget, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[engine]
horizon_steps = 24
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn invalid_source_kind_is_rejected() {
        let toml = r#"
[[forecasts]]
source = "hydro:dam"
start = "2025-01-01T00:00:00Z"
values = [1.0]
"#;
        let err = ScenarioConfig::from_toml_str(toml).unwrap_err();
        assert!(err.message.contains("unknown source kind"), "{err}");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[[batteries]]
id = "solo"
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.engine.horizon_steps, 30);
        assert_eq!(cfg.batteries[0].capacity_kwh, 10.0);
        assert!(cfg.sites.is_empty());
    }

    #[test]
    fn validation_catches_zero_horizon() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.engine.horizon_steps = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "engine.horizon_steps"));
    }

    #[test]
    fn validation_catches_invalid_soc() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.batteries[0].soc_kwh = 12.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "batteries[0].soc_kwh"));
    }

    #[test]
    fn validation_catches_bad_efficiency() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.batteries[0].round_trip_efficiency = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "batteries[0].round_trip_efficiency"));
    }

    #[test]
    fn validation_catches_duplicate_ids() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.batteries.push(BatteryConfig::default());
        cfg.forecasts.push(cfg.forecasts[0].clone());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "batteries[1].id"));
        assert!(errors.iter().any(|e| e.field == "forecasts[3].source"));
    }

    #[test]
    fn validation_catches_bound_length_mismatch() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.forecasts[1].upper = Some(vec![1.0]);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "forecasts[1].upper"));
    }

    #[test]
    fn validation_catches_site_problems() {
        let mut cfg = ScenarioConfig::multi_site();
        cfg.sites[0].batteries.push("ghost".to_string());
        cfg.sites[1].generation.push(SourceId::load("south"));
        cfg.sites[1].max_import_kw = Some(-1.0);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "sites[0].batteries"));
        assert!(errors.iter().any(|e| e.field == "sites[1].generation"));
        assert!(errors.iter().any(|e| e.field == "sites[1].max_import_kw"));
    }

    #[test]
    fn validation_catches_unassigned_battery() {
        let mut cfg = ScenarioConfig::multi_site();
        cfg.sites[1].batteries.clear();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "sites" && e.message.contains("bat-south")));
    }

    #[test]
    fn validation_catches_non_market_price() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.market.price_source = Some(SourceId::load("site"));
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "market.price_source"));
    }

    #[test]
    fn forecast_set_keeps_bounds() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.forecasts[1].lower = Some(vec![0.5; 4]);
        let set = cfg.forecast_set();
        assert_eq!(set.len(), 3);
        let load = &set[&SourceId::load("site")];
        assert_eq!(load.points[2].lower, Some(0.5));
        assert_eq!(load.points[2].upper, None);
        assert_eq!(load.points[3].timestamp, preset_start() + TimeDelta::hours(3));
    }

    #[test]
    fn topology_without_sites_is_single_site() {
        let cfg = ScenarioConfig::baseline();
        let fleet = cfg.fleet().unwrap();
        let topology = cfg.topology(&fleet, &cfg.forecast_set()).unwrap();
        assert_eq!(topology.sites.len(), 1);
        assert_eq!(topology.price, SourceId::market("spot"));
        assert_eq!(topology.sites[0].generation, vec![SourceId::solar("pv-1")]);
    }

    #[test]
    fn topology_honours_price_source() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.forecasts.push(ForecastConfig::new(
            SourceId::market("alt"),
            preset_start(),
            60,
            vec![0.2; 4],
        ));
        cfg.market.price_source = Some(SourceId::market("spot"));
        let fleet = cfg.fleet().unwrap();
        let topology = cfg.topology(&fleet, &cfg.forecast_set()).unwrap();
        assert_eq!(topology.price, SourceId::market("spot"));
    }

    #[test]
    fn topology_from_sites() {
        let cfg = ScenarioConfig::multi_site();
        let fleet = cfg.fleet().unwrap();
        let topology = cfg.topology(&fleet, &cfg.forecast_set()).unwrap();
        assert_eq!(topology.sites.len(), 2);
        assert_eq!(topology.sites[0].grid.max_export_kw, Some(2.0));
        assert_eq!(topology.sites[1].batteries, vec![BatteryId::from("bat-south")]);
        assert!(topology.validate(&fleet).is_ok());
    }
}
