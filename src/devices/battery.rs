use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Identifier of a battery within a fleet snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryId(pub String);

impl fmt::Display for BatteryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatteryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A battery energy storage system as seen by the scheduler.
///
/// `Battery` is a snapshot: physical limits plus the current state of charge.
/// The scheduler only reads it; the owner mutates it through [`Battery::apply_step`]
/// after a schedule step was executed, or through the direct
/// [`Battery::charge`] / [`Battery::discharge`] calls.
///
/// # Efficiency Convention
///
/// The round-trip efficiency `η` is split evenly: energy flowing into the
/// cells is multiplied by `√η`, energy drawn from the cells to serve the
/// terminals is divided by `√η`. A full cycle therefore returns exactly `η`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    /// Fleet-unique identifier.
    pub id: BatteryId,

    /// Usable energy capacity in kilowatt-hours.
    pub capacity_kwh: f64,

    /// Stored energy in kilowatt-hours (0 to `capacity_kwh`).
    pub soc_kwh: f64,

    /// Maximum charging power at the terminals in kilowatts.
    pub max_charge_kw: f64,

    /// Maximum discharging power at the terminals in kilowatts.
    pub max_discharge_kw: f64,

    /// Round-trip efficiency in `(0, 1]`.
    pub round_trip_efficiency: f64,
}

impl Battery {
    /// Registers a battery, rejecting physically impossible parameters.
    ///
    /// # Arguments
    ///
    /// * `id` - Fleet-unique identifier
    /// * `capacity_kwh` - Energy capacity in kWh (must be > 0)
    /// * `soc_kwh` - Initial stored energy in kWh (0 to capacity)
    /// * `max_charge_kw` - Maximum charging power in kW (must be > 0)
    /// * `max_discharge_kw` - Maximum discharging power in kW (must be > 0)
    /// * `round_trip_efficiency` - Round-trip efficiency in `(0, 1]`
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidBatteryState`] if any parameter is out of range.
    pub fn new(
        id: impl Into<BatteryId>,
        capacity_kwh: f64,
        soc_kwh: f64,
        max_charge_kw: f64,
        max_discharge_kw: f64,
        round_trip_efficiency: f64,
    ) -> Result<Self, ScheduleError> {
        let battery = Self {
            id: id.into(),
            capacity_kwh,
            soc_kwh,
            max_charge_kw,
            max_discharge_kw,
            round_trip_efficiency,
        };
        battery.validate()?;
        Ok(battery)
    }

    /// Checks the snapshot invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidBatteryState`] when the state of charge is
    /// outside `[0, capacity]`, a rate or the capacity is not positive, or the
    /// efficiency is outside `(0, 1]`. Non-finite values are rejected as well.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let fields = [
            ("capacity_kwh", self.capacity_kwh),
            ("soc_kwh", self.soc_kwh),
            ("max_charge_kw", self.max_charge_kw),
            ("max_discharge_kw", self.max_discharge_kw),
            ("round_trip_efficiency", self.round_trip_efficiency),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(self.invalid(format!("{name} is not finite ({value})")));
        }
        if self.capacity_kwh <= 0.0 {
            return Err(self.invalid(format!("capacity must be > 0, got {}", self.capacity_kwh)));
        }
        if self.max_charge_kw <= 0.0 {
            return Err(self.invalid(format!(
                "max charge power must be > 0, got {}",
                self.max_charge_kw
            )));
        }
        if self.max_discharge_kw <= 0.0 {
            return Err(self.invalid(format!(
                "max discharge power must be > 0, got {}",
                self.max_discharge_kw
            )));
        }
        if !(self.round_trip_efficiency > 0.0 && self.round_trip_efficiency <= 1.0) {
            return Err(self.invalid(format!(
                "round-trip efficiency must be in (0, 1], got {}",
                self.round_trip_efficiency
            )));
        }
        if !(0.0..=self.capacity_kwh).contains(&self.soc_kwh) {
            return Err(self.invalid(format!(
                "soc {} kWh is outside [0, {}]",
                self.soc_kwh, self.capacity_kwh
            )));
        }
        Ok(())
    }

    /// One-way efficiency, `√η`.
    pub fn one_way_efficiency(&self) -> f64 {
        self.round_trip_efficiency.sqrt()
    }

    /// Stored kWh gained per kW of charging power over `dt_hours`.
    ///
    /// This coefficient is shared verbatim with the optimization constraint.
    pub fn charge_coefficient(&self, dt_hours: f64) -> f64 {
        self.one_way_efficiency() * dt_hours
    }

    /// Stored kWh lost per kW of discharging power over `dt_hours`.
    ///
    /// This coefficient is shared verbatim with the optimization constraint.
    pub fn discharge_coefficient(&self, dt_hours: f64) -> f64 {
        dt_hours / self.one_way_efficiency()
    }

    /// State of charge after one step starting from the current state.
    ///
    /// `soc' = soc + charge·√η·dt − discharge·dt/√η`. The result is not
    /// clamped; leaving `[0, capacity]` is a constraint violation for the
    /// caller to detect.
    pub fn projected_soc(&self, charge_kw: f64, discharge_kw: f64, dt_hours: f64) -> f64 {
        self.projected_soc_from(self.soc_kwh, charge_kw, discharge_kw, dt_hours)
    }

    /// Same as [`Battery::projected_soc`] but starting from an arbitrary `soc_kwh`.
    pub fn projected_soc_from(
        &self,
        soc_kwh: f64,
        charge_kw: f64,
        discharge_kw: f64,
        dt_hours: f64,
    ) -> f64 {
        soc_kwh + charge_kw * self.charge_coefficient(dt_hours)
            - discharge_kw * self.discharge_coefficient(dt_hours)
    }

    /// Charges outside of a schedule and returns the power actually drawn (kW).
    ///
    /// The request is limited by `max_charge_kw` and by the remaining headroom;
    /// negative requests are treated as zero.
    pub fn charge(&mut self, power_kw: f64, dt_hours: f64) -> f64 {
        if dt_hours <= 0.0 {
            return 0.0;
        }
        let requested_kw = power_kw.clamp(0.0, self.max_charge_kw);
        let headroom_kw = (self.capacity_kwh - self.soc_kwh) / self.charge_coefficient(dt_hours);
        let actual_kw = requested_kw.min(headroom_kw.max(0.0));

        self.soc_kwh = self
            .projected_soc(actual_kw, 0.0, dt_hours)
            .min(self.capacity_kwh);
        actual_kw
    }

    /// Discharges outside of a schedule and returns the power actually delivered (kW).
    ///
    /// The request is limited by `max_discharge_kw` and by the stored energy;
    /// negative requests are treated as zero.
    pub fn discharge(&mut self, power_kw: f64, dt_hours: f64) -> f64 {
        if dt_hours <= 0.0 {
            return 0.0;
        }
        let requested_kw = power_kw.clamp(0.0, self.max_discharge_kw);
        let available_kw = self.soc_kwh / self.discharge_coefficient(dt_hours);
        let actual_kw = requested_kw.min(available_kw.max(0.0));

        self.soc_kwh = self.projected_soc(0.0, actual_kw, dt_hours).max(0.0);
        actual_kw
    }

    /// Applies one executed schedule step to this battery.
    ///
    /// The resulting state of charge may deviate from `[0, capacity]` by at
    /// most `tolerance_kwh`, which is absorbed; anything larger is rejected
    /// and the battery is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidBatteryState`] when the step exceeds the
    /// rate limits or would leave the state of charge out of bounds.
    pub fn apply_step(
        &mut self,
        charge_kw: f64,
        discharge_kw: f64,
        dt_hours: f64,
        tolerance_kwh: f64,
    ) -> Result<f64, ScheduleError> {
        if charge_kw < -tolerance_kwh || charge_kw > self.max_charge_kw + tolerance_kwh {
            return Err(self.invalid(format!(
                "charge {charge_kw} kW outside [0, {}]",
                self.max_charge_kw
            )));
        }
        if discharge_kw < -tolerance_kwh || discharge_kw > self.max_discharge_kw + tolerance_kwh {
            return Err(self.invalid(format!(
                "discharge {discharge_kw} kW outside [0, {}]",
                self.max_discharge_kw
            )));
        }

        let next = self.projected_soc(charge_kw, discharge_kw, dt_hours);
        if next < -tolerance_kwh || next > self.capacity_kwh + tolerance_kwh {
            return Err(self.invalid(format!(
                "step would move soc to {next} kWh, outside [0, {}]",
                self.capacity_kwh
            )));
        }
        self.soc_kwh = next.clamp(0.0, self.capacity_kwh);
        Ok(self.soc_kwh)
    }

    fn invalid(&self, reason: String) -> ScheduleError {
        ScheduleError::InvalidBatteryState {
            battery: self.id.clone(),
            reason,
        }
    }
}
