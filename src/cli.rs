//! Command-line arguments of the `vpp-scheduler` binary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::forecast::SourceId;

#[derive(Debug, Parser)]
#[command(author, version, about = "Battery schedule optimizer for a virtual power plant")]
#[command(
    long_about = "Computes a cost-minimizing charge/discharge schedule for a battery fleet\n\
    from load, generation and price forecasts.\n\
    \nScenario sources (choose one, default: --preset baseline):\n  \
    - TOML file: --scenario <path>\n  \
    - Built-in:  --preset <baseline|solar_surplus|multi_site|infeasible>\n\
    \nExit codes: 0 schedule computed, 2 infeasible, 3 solver timeout, 1 any other error."
)]
pub struct Cli {
    /// Load the scenario from a TOML file.
    #[clap(long, conflicts_with = "preset")]
    pub scenario: Option<PathBuf>,

    /// Use a built-in scenario preset.
    #[clap(long)]
    pub preset: Option<String>,

    /// Override the number of horizon steps.
    #[clap(long)]
    pub horizon: Option<usize>,

    /// Override the solver time budget in milliseconds.
    #[clap(long = "time-budget-ms")]
    pub time_budget_ms: Option<u64>,

    /// Replace or add a forecast from a CSV file, as `kind:name=path`.
    #[clap(long = "forecast-csv", value_parser = ForecastCsvArg::from_str)]
    pub forecast_csv: Vec<ForecastCsvArg>,

    /// Write the schedule rows to a CSV file.
    #[clap(long = "schedule-out")]
    pub schedule_out: Option<PathBuf>,

    /// Print the schedule and summary as JSON instead of text.
    #[clap(long)]
    pub json: bool,
}

/// A `--forecast-csv` value: the source it feeds and the file to read.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastCsvArg {
    pub source: SourceId,
    pub path: PathBuf,
}

impl FromStr for ForecastCsvArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected `kind:name=path`, got \"{s}\""))?;
        if path.is_empty() {
            return Err(format!("missing path in \"{s}\""));
        }
        let source = source.parse::<SourceId>()?;
        Ok(Self {
            source,
            path: PathBuf::from(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_command() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["vpp-scheduler"]).unwrap();
        assert!(cli.scenario.is_none());
        assert!(cli.preset.is_none());
        assert!(cli.forecast_csv.is_empty());
        assert!(!cli.json);
    }

    #[test]
    fn overrides_and_forecasts() {
        let cli = Cli::try_parse_from([
            "vpp-scheduler",
            "--preset",
            "solar_surplus",
            "--horizon",
            "12",
            "--time-budget-ms",
            "250",
            "--forecast-csv",
            "load:homes=data/load.csv",
            "--forecast-csv",
            "market=prices.csv",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.preset.as_deref(), Some("solar_surplus"));
        assert_eq!(cli.horizon, Some(12));
        assert_eq!(cli.time_budget_ms, Some(250));
        assert_eq!(
            cli.forecast_csv,
            vec![
                ForecastCsvArg {
                    source: SourceId::load("homes"),
                    path: PathBuf::from("data/load.csv"),
                },
                ForecastCsvArg {
                    source: SourceId::market("default"),
                    path: PathBuf::from("prices.csv"),
                },
            ]
        );
        assert!(cli.json);
    }

    #[test]
    fn scenario_conflicts_with_preset() {
        let result =
            Cli::try_parse_from(["vpp-scheduler", "--scenario", "a.toml", "--preset", "baseline"]);
        assert!(result.is_err());
    }

    #[test]
    fn forecast_csv_rejects_malformed_values() {
        assert!("load:homes".parse::<ForecastCsvArg>().is_err());
        assert!("load:homes=".parse::<ForecastCsvArg>().is_err());
        assert!("hydro:dam=x.csv".parse::<ForecastCsvArg>().is_err());
    }
}
