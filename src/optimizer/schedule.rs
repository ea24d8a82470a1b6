//! Result materializer and the schedule records it produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::devices::BatteryId;
use crate::error::ScheduleError;
use crate::optimizer::formulator::Formulation;
use crate::optimizer::horizon::Horizon;
use crate::optimizer::problem::VariableDef;
use crate::optimizer::solver::SolvedProblem;

/// Values this close to a variable bound are reported as the bound itself.
pub const DEFAULT_SNAP_EPSILON: f64 = 1e-7;

/// Largest mismatch accepted by the post-condition checks (kWh or kW).
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Operating plan of one battery for one step.
///
/// The grid columns repeat the values of the battery's site for that step, so
/// every row is self-contained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleStep {
    pub battery_id: BatteryId,
    pub site_id: String,
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub charge_kw: f64,
    pub discharge_kw: f64,
    /// State of charge at the end of the step.
    pub soc_kwh: f64,
    pub grid_buy_kw: f64,
    pub grid_sell_kw: f64,
}

impl fmt::Display for ScheduleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>3} {} {:<10} charge={:>7.3} kW discharge={:>7.3} kW soc={:>8.3} kWh \
             buy={:>7.3} kW sell={:>7.3} kW",
            self.step,
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.battery_id.0,
            self.charge_kw,
            self.discharge_kw,
            self.soc_kwh,
            self.grid_buy_kw,
            self.grid_sell_kw,
        )
    }
}

/// Grid exchange of one site for one step, with the inputs that drove it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridStep {
    pub site_id: String,
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub generation_kw: f64,
    pub load_kw: f64,
    pub buy_kw: f64,
    pub sell_kw: f64,
}

/// The engine's answer: a plan for every battery and site over the horizon.
///
/// `steps` is ordered by step, then by fleet order; `grid` by step, then by
/// site order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub horizon: Horizon,
    pub steps: Vec<ScheduleStep>,
    pub grid: Vec<GridStep>,
    /// Net grid cost over the horizon (negative means net revenue).
    pub objective: f64,
}

impl Schedule {
    /// Rows of one battery in step order.
    pub fn for_battery<'a>(
        &'a self,
        battery: &BatteryId,
    ) -> impl Iterator<Item = &'a ScheduleStep> + use<'a> {
        let battery = battery.clone();
        self.steps.iter().filter(move |s| s.battery_id == battery)
    }

    /// Rows of every battery for step `t`.
    pub fn at_step(&self, t: usize) -> impl Iterator<Item = &ScheduleStep> + '_ {
        self.steps.iter().filter(move |s| s.step == t)
    }

    /// State of charge of `battery` at the end of the horizon.
    pub fn final_soc(&self, battery: &BatteryId) -> Option<f64> {
        self.for_battery(battery).last().map(|s| s.soc_kwh)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Converts raw solver values into a [`Schedule`] and checks them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Materializer {
    pub snap_epsilon: f64,
    pub tolerance: f64,
}

impl Default for Materializer {
    fn default() -> Self {
        Self {
            snap_epsilon: DEFAULT_SNAP_EPSILON,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Materializer {
    pub fn new(snap_epsilon: f64, tolerance: f64) -> Self {
        Self {
            snap_epsilon,
            tolerance,
        }
    }

    /// Builds the schedule for `solved`, which must be a solution of
    /// `formulation.problem`.
    ///
    /// Values within `snap_epsilon` of a bound are moved onto it. Then every
    /// value must lie within its bounds and every step must reproduce
    /// [`crate::devices::Battery::projected_soc_from`]. Every site must
    /// balance. No battery may charge and discharge in the same step, and no
    /// site may import and export in the same step. Finally every row of the
    /// problem must hold. All checks use `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::SolverFailure`] naming the first failed check.
    pub fn materialize(
        &self,
        formulation: &Formulation<'_>,
        solved: &SolvedProblem,
    ) -> Result<Schedule, ScheduleError> {
        let problem = &formulation.problem;
        if solved.values.len() != problem.variables.len() {
            return Err(ScheduleError::SolverFailure(format!(
                "solver returned {} values for {} variables",
                solved.values.len(),
                problem.variables.len()
            )));
        }

        let mut values = Vec::with_capacity(solved.values.len());
        for (def, &raw) in problem.variables.iter().zip(&solved.values) {
            values.push(self.snap(def, raw)?);
        }

        let horizon = formulation.horizon;
        let dt = horizon.dt_hours();
        let topology = formulation.topology;

        for (b, battery) in formulation.fleet.iter().enumerate() {
            let vars = &formulation.batteries[b];
            let mut previous = battery.soc_kwh;
            for t in 0..horizon.steps {
                let charge = values[vars.charge[t].0];
                let discharge = values[vars.discharge[t].0];
                let soc = values[vars.soc[t].0];
                if charge > self.tolerance && discharge > self.tolerance {
                    return Err(ScheduleError::SolverFailure(format!(
                        "battery `{}` step {t}: charges {charge} kW and discharges \
                         {discharge} kW at once",
                        battery.id
                    )));
                }
                let projected = battery.projected_soc_from(previous, charge, discharge, dt);
                if (projected - soc).abs() > self.tolerance {
                    return Err(ScheduleError::SolverFailure(format!(
                        "battery `{}` step {t}: solver soc {soc} kWh differs from projected \
                         {projected} kWh",
                        battery.id
                    )));
                }
                previous = soc;
            }
        }

        for (s, site_vars) in formulation.sites.iter().enumerate() {
            let input = &formulation.inputs[s];
            for t in 0..horizon.steps {
                let buy = values[site_vars.buy[t].0];
                let sell = values[site_vars.sell[t].0];
                if buy > self.tolerance && sell > self.tolerance {
                    return Err(ScheduleError::SolverFailure(format!(
                        "site `{}` step {t}: imports {buy} kW and exports {sell} kW at once",
                        topology.sites[s].id
                    )));
                }
                let mut supply = input.generation[t] + buy;
                let mut demand = input.load[t] + sell;
                for (b, vars) in formulation.batteries.iter().enumerate() {
                    if formulation.site_of_battery[b] == s {
                        supply += values[vars.discharge[t].0];
                        demand += values[vars.charge[t].0];
                    }
                }
                if (supply - demand).abs() > self.tolerance {
                    return Err(ScheduleError::SolverFailure(format!(
                        "site `{}` step {t}: supply {supply} kW does not match demand {demand} kW",
                        topology.sites[s].id
                    )));
                }
            }
        }

        if let Some(row) = problem.first_violation(&values, self.tolerance) {
            return Err(ScheduleError::SolverFailure(format!(
                "{} violated by {}",
                row.kind,
                row.residual(&values)
            )));
        }

        let mut steps = Vec::with_capacity(formulation.fleet.len() * horizon.steps);
        let mut grid = Vec::with_capacity(formulation.sites.len() * horizon.steps);
        for t in 0..horizon.steps {
            let timestamp = horizon.timestamp(t);
            for (b, battery) in formulation.fleet.iter().enumerate() {
                let vars = &formulation.batteries[b];
                let s = formulation.site_of_battery[b];
                let site_vars = &formulation.sites[s];
                steps.push(ScheduleStep {
                    battery_id: battery.id.clone(),
                    site_id: topology.sites[s].id.clone(),
                    step: t,
                    timestamp,
                    charge_kw: values[vars.charge[t].0],
                    discharge_kw: values[vars.discharge[t].0],
                    soc_kwh: values[vars.soc[t].0],
                    grid_buy_kw: values[site_vars.buy[t].0],
                    grid_sell_kw: values[site_vars.sell[t].0],
                });
            }
            for (s, site_vars) in formulation.sites.iter().enumerate() {
                let input = &formulation.inputs[s];
                grid.push(GridStep {
                    site_id: topology.sites[s].id.clone(),
                    step: t,
                    timestamp,
                    price: formulation.price[t],
                    generation_kw: input.generation[t],
                    load_kw: input.load[t],
                    buy_kw: values[site_vars.buy[t].0],
                    sell_kw: values[site_vars.sell[t].0],
                });
            }
        }

        let objective = problem.objective_value(&values);
        debug!(
            objective,
            raw_objective = solved.objective,
            rows = steps.len(),
            "materialized schedule"
        );

        Ok(Schedule {
            horizon,
            steps,
            grid,
            objective,
        })
    }

    fn snap(&self, def: &VariableDef, raw: f64) -> Result<f64, ScheduleError> {
        if !raw.is_finite() || !def.contains(raw, self.tolerance) {
            return Err(ScheduleError::SolverFailure(format!(
                "`{}` = {raw} violates its bounds [{}, {}]",
                def.name,
                def.lower,
                def.upper.map_or_else(|| "inf".to_string(), |u| u.to_string()),
            )));
        }
        if (raw - def.lower).abs() <= self.snap_epsilon {
            return Ok(def.lower);
        }
        match def.upper {
            Some(upper) if (raw - upper).abs() <= self.snap_epsilon => Ok(upper),
            Some(upper) => Ok(raw.clamp(def.lower, upper)),
            None => Ok(raw.max(def.lower)),
        }
    }
}
