//! Battery scheduling optimization engine for a Virtual Power Plant.

pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod forecast;
pub mod io;
pub mod optimizer;
