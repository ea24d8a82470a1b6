//! Physical assets the scheduler plans for.

pub mod battery;

pub use battery::{Battery, BatteryId};
