//! Post-hoc KPI computation from a schedule.

use std::fmt;

use serde::Serialize;

use crate::devices::Battery;

use super::schedule::Schedule;

/// Aggregate indicators derived from a complete [`Schedule`].
///
/// Computed from the schedule rows themselves so that reported metrics always
/// match the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSummary {
    /// Net grid cost of the plan.
    pub net_cost: f64,
    /// Net grid cost of serving the same load and generation with no battery
    /// activity and no grid limits.
    pub baseline_cost: f64,
    /// `baseline_cost − net_cost`.
    pub savings: f64,
    /// Energy imported over all sites (kWh).
    pub energy_bought_kwh: f64,
    /// Energy exported over all sites (kWh).
    pub energy_sold_kwh: f64,
    /// Battery energy throughput at the terminals (kWh, charge + discharge).
    pub battery_throughput_kwh: f64,
    /// Throughput divided by twice the fleet capacity.
    pub equivalent_full_cycles: f64,
    /// Largest import of any site in any step (kW).
    pub peak_import_kw: f64,
    /// Largest export of any site in any step (kW, positive magnitude).
    pub peak_export_kw: f64,
}

impl ScheduleSummary {
    /// Computes all KPIs for `schedule`.
    ///
    /// # Arguments
    ///
    /// * `schedule` - The materialized schedule
    /// * `fleet` - The battery snapshots the schedule was computed for
    pub fn from_schedule(schedule: &Schedule, fleet: &[Battery]) -> Self {
        let dt = schedule.horizon.dt_hours();

        let mut baseline_cost = 0.0;
        let mut bought = 0.0;
        let mut sold = 0.0;
        let mut peak_import = 0.0_f64;
        let mut peak_export = 0.0_f64;
        for g in &schedule.grid {
            baseline_cost += g.price * dt * (g.load_kw - g.generation_kw);
            bought += g.buy_kw * dt;
            sold += g.sell_kw * dt;
            peak_import = peak_import.max(g.buy_kw);
            peak_export = peak_export.max(g.sell_kw);
        }

        let throughput: f64 = schedule
            .steps
            .iter()
            .map(|s| (s.charge_kw + s.discharge_kw) * dt)
            .sum();
        let capacity: f64 = fleet.iter().map(|b| b.capacity_kwh).sum();
        let cycles = if capacity > 0.0 {
            throughput / (2.0 * capacity)
        } else {
            0.0
        };

        Self {
            net_cost: schedule.objective,
            baseline_cost,
            savings: baseline_cost - schedule.objective,
            energy_bought_kwh: bought,
            energy_sold_kwh: sold,
            battery_throughput_kwh: throughput,
            equivalent_full_cycles: cycles,
            peak_import_kw: peak_import,
            peak_export_kw: peak_export,
        }
    }
}

impl fmt::Display for ScheduleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Schedule Summary ---")?;
        writeln!(f, "Net cost:              {:.4}", self.net_cost)?;
        writeln!(f, "Baseline cost:         {:.4}", self.baseline_cost)?;
        writeln!(f, "Savings:               {:.4}", self.savings)?;
        writeln!(f, "Energy bought:         {:.3} kWh", self.energy_bought_kwh)?;
        writeln!(f, "Energy sold:           {:.3} kWh", self.energy_sold_kwh)?;
        writeln!(f, "Peak import:           {:.3} kW", self.peak_import_kw)?;
        writeln!(f, "Peak export:           {:.3} kW", self.peak_export_kw)?;
        write!(
            f,
            "Battery throughput:    {:.3} kWh ({:.3} equiv. cycles)",
            self.battery_throughput_kwh, self.equivalent_full_cycles
        )
    }
}
