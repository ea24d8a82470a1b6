//! Battery scheduler entry point: CLI wiring and config-driven engine construction.

use std::fmt::Display;
use std::io;
use std::process;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vpp_scheduler::cli::Cli;
use vpp_scheduler::config::ScenarioConfig;
use vpp_scheduler::error::ScheduleError;
use vpp_scheduler::io::export::{export_csv, write_json};
use vpp_scheduler::io::import::import_forecast_csv;
use vpp_scheduler::optimizer::{Engine, OptimizationRequest, ScheduleSummary};

const EXIT_FAILURE: i32 = 1;
const EXIT_INFEASIBLE: i32 = 2;
const EXIT_TIMEOUT: i32 = 3;

fn exit_code(error: &ScheduleError) -> i32 {
    match error {
        ScheduleError::Infeasible => EXIT_INFEASIBLE,
        ScheduleError::SolveTimeout { .. } => EXIT_TIMEOUT,
        _ => EXIT_FAILURE,
    }
}

fn fail(message: impl Display) -> ! {
    eprintln!("error: {message}");
    process::exit(EXIT_FAILURE);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // --scenario takes priority, then --preset, then the baseline preset
    let mut scenario = match &cli.scenario {
        Some(path) => ScenarioConfig::from_toml_file(path).unwrap_or_else(|e| fail(e)),
        None => ScenarioConfig::from_preset(cli.preset.as_deref().unwrap_or("baseline"))
            .unwrap_or_else(|e| fail(e)),
    };

    if let Some(steps) = cli.horizon {
        scenario.engine.horizon_steps = steps;
    }
    if let Some(ms) = cli.time_budget_ms {
        scenario.engine.time_budget_ms = ms;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(EXIT_FAILURE);
    }

    let mut forecasts = scenario.forecast_set();
    for arg in &cli.forecast_csv {
        let series = import_forecast_csv(&arg.path)
            .unwrap_or_else(|e| fail(format!("forecast `{}`: {e}", arg.source)));
        info!(source = %arg.source, samples = series.len(), "imported forecast");
        forecasts.insert(arg.source.clone(), series);
    }

    let fleet = scenario.fleet().unwrap_or_else(|e| fail(e));
    let topology = scenario
        .topology(&fleet, &forecasts)
        .unwrap_or_else(|e| fail(e));
    let engine = Engine::new(scenario.engine_settings());
    let request = OptimizationRequest::new(&fleet, &forecasts, scenario.horizon_request())
        .with_topology(&topology);

    let schedule = match engine.optimize(&request) {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(exit_code(&e));
        }
    };
    let summary = ScheduleSummary::from_schedule(&schedule, &fleet);

    if cli.json {
        if let Err(e) = write_json(&schedule, &summary, io::stdout().lock()) {
            fail(format!("failed to write JSON: {e}"));
        }
    } else {
        for step in &schedule.steps {
            println!("{step}");
        }
        println!("\n{summary}");
    }

    if let Some(path) = &cli.schedule_out {
        if let Err(e) = export_csv(&schedule, path) {
            fail(format!("failed to write CSV: {e}"));
        }
        eprintln!("Schedule written to {}", path.display());
    }
}
