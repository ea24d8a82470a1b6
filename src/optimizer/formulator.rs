//! Schedule formulator: turns a fleet, a topology and aligned forecasts into a
//! mixed-integer linear program.
//!
//! Variables per battery `b` and step `t`:
//!
//! * `charge[b][t]` in `[0, max_charge_kw]`
//! * `discharge[b][t]` in `[0, max_discharge_kw]`
//! * `soc[b][t]` in `[0, capacity_kwh]`, the state *after* step `t`
//! * `charging[b][t]` in `{0, 1}`
//!
//! Variables per site `s` and step `t`:
//!
//! * `buy[s][t]` in `[0, max_import_kw]`
//! * `sell[s][t]` in `[0, max_export_kw]`
//! * `importing[s][t]` in `{0, 1}`
//!
//! Rows:
//!
//! * SOC coupling: `soc[b][t] − soc[b][t−1] − √η·Δt·charge[b][t] + Δt/√η·discharge[b][t] = 0`,
//!   with the battery's current SOC moved to the right-hand side for `t = 0`.
//! * Power balance: `Σ discharge + buy − Σ charge − sell = load − generation`.
//! * Battery direction: `charge ≤ max_charge_kw·charging` and
//!   `discharge ≤ max_discharge_kw·(1 − charging)`.
//! * Grid direction: `buy ≤ M_buy·importing` and `sell ≤ M_sell·(1 − importing)`,
//!   where `M_buy` is the import limit or, when tighter, the most the site can
//!   draw in that step (`max(load − generation, 0) + Σ max_charge_kw`).
//!   `M_sell` mirrors it for export.
//!
//! Objective: `Σ_s Σ_t price[t]·Δt·(buy[s][t] − sell[s][t])`.

use tracing::debug;

use crate::devices::Battery;
use crate::error::ScheduleError;
use crate::optimizer::horizon::{AlignedForecasts, Horizon};
use crate::optimizer::problem::{ConstraintKind, Problem, Sense, VarId};
use crate::optimizer::topology::Topology;

/// Variables of one battery, indexed by step.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryVars {
    pub charge: Vec<VarId>,
    pub discharge: Vec<VarId>,
    pub soc: Vec<VarId>,
    /// `1` while charging, `0` while discharging or idle.
    pub charging: Vec<VarId>,
}

/// Grid variables of one site, indexed by step.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteVars {
    pub buy: Vec<VarId>,
    pub sell: Vec<VarId>,
    /// `1` while importing, `0` while exporting or idle.
    pub importing: Vec<VarId>,
}

/// Forecast inputs of one site after summing its sources.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteInputs {
    pub generation: Vec<f64>,
    pub load: Vec<f64>,
}

/// An assembled LP together with the mapping back to the physical model.
#[derive(Debug, Clone, PartialEq)]
pub struct Formulation<'a> {
    pub problem: Problem,
    pub horizon: Horizon,
    pub fleet: &'a [Battery],
    pub topology: &'a Topology,
    /// Same order as `fleet`.
    pub batteries: Vec<BatteryVars>,
    /// Same order as `topology.sites`.
    pub sites: Vec<SiteVars>,
    /// Site index of every battery, same order as `fleet`.
    pub site_of_battery: Vec<usize>,
    /// Same order as `topology.sites`.
    pub inputs: Vec<SiteInputs>,
    pub price: Vec<f64>,
}

/// Builds the scheduling LP.
///
/// The result depends only on the arguments: identical inputs produce an
/// identical [`Problem`], variable order and row order included.
///
/// # Errors
///
/// * [`ScheduleError::InvalidBatteryState`] for the first invalid battery.
/// * [`ScheduleError::InvalidTopology`] if the topology does not match the fleet.
/// * [`ScheduleError::MisalignedForecast`] if the topology names a source that
///   was not supplied.
pub fn formulate<'a>(
    fleet: &'a [Battery],
    topology: &'a Topology,
    forecasts: &AlignedForecasts,
) -> Result<Formulation<'a>, ScheduleError> {
    for battery in fleet {
        battery.validate()?;
    }
    topology.validate(fleet)?;

    let horizon = forecasts.horizon;
    let steps = horizon.steps;
    let dt = horizon.dt_hours();

    let price = forecasts.series(&topology.price)?.to_vec();
    let inputs = topology
        .sites
        .iter()
        .map(|site| {
            Ok(SiteInputs {
                generation: forecasts.sum_of(&site.generation)?,
                load: forecasts.sum_of(&site.load)?,
            })
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

    let mut problem = Problem::new();

    let mut batteries = Vec::with_capacity(fleet.len());
    let mut site_of_battery = Vec::with_capacity(fleet.len());
    for battery in fleet {
        let id = &battery.id;
        let mut vars = BatteryVars {
            charge: Vec::with_capacity(steps),
            discharge: Vec::with_capacity(steps),
            soc: Vec::with_capacity(steps),
            charging: Vec::with_capacity(steps),
        };
        for t in 0..steps {
            vars.charge.push(problem.add_variable(
                format!("charge[{id}][{t}]"),
                0.0,
                Some(battery.max_charge_kw),
            ));
            vars.discharge.push(problem.add_variable(
                format!("discharge[{id}][{t}]"),
                0.0,
                Some(battery.max_discharge_kw),
            ));
            vars.soc.push(problem.add_variable(
                format!("soc[{id}][{t}]"),
                0.0,
                Some(battery.capacity_kwh),
            ));
            vars.charging
                .push(problem.add_binary(format!("charging[{id}][{t}]")));
        }
        batteries.push(vars);
        site_of_battery.push(topology.site_of(id).ok_or_else(|| {
            ScheduleError::InvalidTopology(format!("battery `{id}` is not assigned to any site"))
        })?);
    }

    let sites: Vec<SiteVars> = topology
        .sites
        .iter()
        .map(|site| {
            let id = &site.id;
            let buy = (0..steps)
                .map(|t| problem.add_variable(format!("buy[{id}][{t}]"), 0.0, site.grid.max_import_kw))
                .collect();
            let sell = (0..steps)
                .map(|t| problem.add_variable(format!("sell[{id}][{t}]"), 0.0, site.grid.max_export_kw))
                .collect();
            let importing = (0..steps)
                .map(|t| problem.add_binary(format!("importing[{id}][{t}]")))
                .collect();
            SiteVars {
                buy,
                sell,
                importing,
            }
        })
        .collect();

    for (b, (battery, vars)) in fleet.iter().zip(&batteries).enumerate() {
        let charge_coefficient = battery.charge_coefficient(dt);
        let discharge_coefficient = battery.discharge_coefficient(dt);
        for t in 0..steps {
            let mut terms = Vec::with_capacity(4);
            terms.push((vars.soc[t], 1.0));
            let rhs = if t == 0 {
                battery.soc_kwh
            } else {
                terms.push((vars.soc[t - 1], -1.0));
                0.0
            };
            terms.push((vars.charge[t], -charge_coefficient));
            terms.push((vars.discharge[t], discharge_coefficient));
            problem.add_constraint(
                ConstraintKind::SocCoupling { battery: b, step: t },
                terms,
                Sense::Eq,
                rhs,
            );

            let kind = ConstraintKind::BatteryDirection { battery: b, step: t };
            problem.add_constraint(
                kind,
                vec![(vars.charge[t], 1.0), (vars.charging[t], -battery.max_charge_kw)],
                Sense::Le,
                0.0,
            );
            problem.add_constraint(
                kind,
                vec![(vars.discharge[t], 1.0), (vars.charging[t], battery.max_discharge_kw)],
                Sense::Le,
                battery.max_discharge_kw,
            );
        }
    }

    for (s, (site_vars, input)) in sites.iter().zip(&inputs).enumerate() {
        for t in 0..steps {
            let mut terms = Vec::new();
            for (b, vars) in batteries.iter().enumerate() {
                if site_of_battery[b] == s {
                    terms.push((vars.discharge[t], 1.0));
                    terms.push((vars.charge[t], -1.0));
                }
            }
            terms.push((site_vars.buy[t], 1.0));
            terms.push((site_vars.sell[t], -1.0));
            problem.add_constraint(
                ConstraintKind::PowerBalance { site: s, step: t },
                terms,
                Sense::Eq,
                input.load[t] - input.generation[t],
            );
        }
    }

    for (s, (site, site_vars)) in topology.sites.iter().zip(&sites).enumerate() {
        let input = &inputs[s];
        let (max_charge, max_discharge) = fleet
            .iter()
            .zip(&site_of_battery)
            .filter(|&(_, &at)| at == s)
            .fold((0.0, 0.0), |(c, d), (battery, _)| {
                (c + battery.max_charge_kw, d + battery.max_discharge_kw)
            });
        for t in 0..steps {
            let net_load = input.load[t] - input.generation[t];
            let import_bound = tighter(site.grid.max_import_kw, net_load.max(0.0) + max_charge);
            let export_bound =
                tighter(site.grid.max_export_kw, (-net_load).max(0.0) + max_discharge);

            let kind = ConstraintKind::GridDirection { site: s, step: t };
            problem.add_constraint(
                kind,
                vec![(site_vars.buy[t], 1.0), (site_vars.importing[t], -import_bound)],
                Sense::Le,
                0.0,
            );
            problem.add_constraint(
                kind,
                vec![(site_vars.sell[t], 1.0), (site_vars.importing[t], export_bound)],
                Sense::Le,
                export_bound,
            );
        }
    }

    for site_vars in &sites {
        for t in 0..steps {
            let energy_price = price[t] * dt;
            problem.objective.push((site_vars.buy[t], energy_price));
            problem.objective.push((site_vars.sell[t], -energy_price));
        }
    }

    debug!(
        variables = problem.variables.len(),
        constraints = problem.constraints.len(),
        batteries = fleet.len(),
        sites = sites.len(),
        steps,
        "formulated schedule problem"
    );

    Ok(Formulation {
        problem,
        horizon,
        fleet,
        topology,
        batteries,
        sites,
        site_of_battery,
        inputs,
        price,
    })
}

fn tighter(limit: Option<f64>, bound: f64) -> f64 {
    limit.map_or(bound, |limit| limit.min(bound))
}
