//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use vpp_scheduler::devices::Battery;
use vpp_scheduler::forecast::{ForecastSeries, ForecastSet, SourceId};
use vpp_scheduler::optimizer::{HorizonRequest, Schedule};

/// Tolerance for physical checks on solved schedules.
pub const TOL: f64 = 1e-6;

/// Start of every fixture horizon: 2025-01-01T00:00Z.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly series starting at [`start`].
pub fn hourly(values: &[f64]) -> ForecastSeries {
    ForecastSeries::from_values(start(), TimeDelta::hours(1), values)
}

/// Horizon request of `steps` hourly steps.
pub fn hours(steps: usize) -> HorizonRequest {
    HorizonRequest::new(steps, TimeDelta::hours(1))
}

/// Reference battery (10 kWh, 5 kWh stored, 5 kW both ways, 95% round trip).
pub fn reference_battery() -> Battery {
    Battery::new("bat-1", 10.0, 5.0, 5.0, 5.0, 0.95).unwrap()
}

/// Forecasts of the four-step reference scenario: no generation, flat 1 kW
/// load and alternating 0.1 / 0.3 prices.
pub fn reference_forecasts() -> ForecastSet {
    ForecastSet::from([
        (SourceId::solar("pv-1"), hourly(&[0.0; 4])),
        (SourceId::load("site"), hourly(&[1.0; 4])),
        (SourceId::market("spot"), hourly(&[0.1, 0.3, 0.1, 0.3])),
    ])
}

/// Asserts `0 <= soc <= capacity` and the rate limits for every row.
pub fn assert_within_battery_limits(schedule: &Schedule, fleet: &[Battery]) {
    for row in &schedule.steps {
        let battery = fleet
            .iter()
            .find(|b| b.id == row.battery_id)
            .expect("row for unknown battery");
        assert!(
            row.soc_kwh >= -TOL && row.soc_kwh <= battery.capacity_kwh + TOL,
            "soc out of bounds: {row}"
        );
        assert!(row.charge_kw >= -TOL && row.charge_kw <= battery.max_charge_kw + TOL, "{row}");
        assert!(
            row.discharge_kw >= -TOL && row.discharge_kw <= battery.max_discharge_kw + TOL,
            "{row}"
        );
    }
}

/// Asserts per site and step:
/// `Σ charge + load + sell = Σ discharge + buy + generation`.
pub fn assert_power_balance(schedule: &Schedule) {
    for g in &schedule.grid {
        let (charge, discharge) = schedule
            .at_step(g.step)
            .filter(|s| s.site_id == g.site_id)
            .fold((0.0, 0.0), |(c, d), s| (c + s.charge_kw, d + s.discharge_kw));
        let consumed = charge + g.load_kw + g.sell_kw;
        let supplied = discharge + g.buy_kw + g.generation_kw;
        assert!(
            (consumed - supplied).abs() <= TOL,
            "site {} step {}: consumed {consumed} != supplied {supplied}",
            g.site_id,
            g.step
        );
    }
}

/// Replays the schedule on copies of the fleet and asserts that the reported
/// soc follows the battery model.
pub fn assert_replay_matches(schedule: &Schedule, fleet: &[Battery]) {
    let dt = schedule.horizon.dt_hours();
    let mut replay: Vec<Battery> = fleet.to_vec();
    for row in &schedule.steps {
        let battery = replay
            .iter_mut()
            .find(|b| b.id == row.battery_id)
            .expect("row for unknown battery");
        let soc = battery
            .apply_step(row.charge_kw, row.discharge_kw, dt, TOL)
            .expect("scheduled step must be executable");
        assert!(
            (soc - row.soc_kwh).abs() <= 1e-5,
            "replayed soc {soc} != scheduled {}",
            row.soc_kwh
        );
    }
}

/// Asserts that no battery charges while discharging and no site imports
/// while exporting in the same step.
pub fn assert_one_direction_per_step(schedule: &Schedule) {
    for row in &schedule.steps {
        assert!(
            row.charge_kw <= TOL || row.discharge_kw <= TOL,
            "battery flows both ways: {row}"
        );
    }
    for g in &schedule.grid {
        assert!(
            g.buy_kw <= TOL || g.sell_kw <= TOL,
            "site {} step {} imports {} kW and exports {} kW",
            g.site_id,
            g.step,
            g.buy_kw,
            g.sell_kw
        );
    }
}
