//! CSV and JSON export for computed schedules.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::optimizer::{Schedule, ScheduleSummary};

/// Column header of the schedule CSV, one row per battery and step.
const HEADER: &str = "step,timestamp,battery_id,site_id,charge_kw,discharge_kw,\
                       soc_kwh,grid_buy_kw,grid_sell_kw";

/// Exports a schedule to a CSV file at the given path.
///
/// Writes a header row followed by one data row per battery and step, in the
/// schedule's row order. Produces deterministic output for identical inputs.
///
/// # Arguments
///
/// * `schedule` - The materialized schedule
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(schedule: &Schedule, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(schedule, buf)
}

/// Writes a schedule as CSV to any writer.
///
/// # Arguments
///
/// * `schedule` - The materialized schedule
/// * `writer` - Destination implementing `Write`
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(schedule: &Schedule, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for s in &schedule.steps {
        wtr.write_record(&[
            s.step.to_string(),
            s.timestamp.to_rfc3339(),
            s.battery_id.to_string(),
            s.site_id.clone(),
            format!("{:.6}", s.charge_kw),
            format!("{:.6}", s.discharge_kw),
            format!("{:.6}", s.soc_kwh),
            format!("{:.6}", s.grid_buy_kw),
            format!("{:.6}", s.grid_sell_kw),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Machine-readable run output: the schedule and its KPIs.
#[derive(Debug, Serialize)]
pub struct ScheduleReport<'a> {
    pub schedule: &'a Schedule,
    pub summary: &'a ScheduleSummary,
}

/// Writes a schedule and its summary as pretty-printed JSON.
///
/// # Errors
///
/// Returns an `io::Error` if serialization or writing fails.
pub fn write_json(
    schedule: &Schedule,
    summary: &ScheduleSummary,
    mut writer: impl Write,
) -> io::Result<()> {
    let report = ScheduleReport { schedule, summary };
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::devices::{Battery, BatteryId};
    use crate::optimizer::{Horizon, ScheduleStep};

    fn schedule(steps: usize) -> Schedule {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let horizon = Horizon::new(start, steps, TimeDelta::hours(1)).unwrap();
        let rows = (0..steps)
            .map(|t| ScheduleStep {
                battery_id: BatteryId::from("bat-1"),
                site_id: "main".into(),
                step: t,
                timestamp: horizon.timestamp(t),
                charge_kw: if t % 2 == 0 { 2.5 } else { 0.0 },
                discharge_kw: if t % 2 == 1 { 1.25 } else { 0.0 },
                soc_kwh: 5.0,
                grid_buy_kw: 1.0,
                grid_sell_kw: 0.0,
            })
            .collect();
        Schedule {
            horizon,
            steps: rows,
            grid: Vec::new(),
            objective: 0.42,
        }
    }

    #[test]
    fn header_matches_schedule_columns() {
        let mut buf = Vec::new();
        write_csv(&schedule(1), &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let first_line = output.as_deref().unwrap_or("").lines().next().unwrap_or("");
        assert_eq!(
            first_line,
            "step,timestamp,battery_id,site_id,charge_kw,discharge_kw,\
             soc_kwh,grid_buy_kw,grid_sell_kw"
        );
    }

    #[test]
    fn row_count_matches_step_count() {
        let mut buf = Vec::new();
        write_csv(&schedule(24), &mut buf).ok();
        let output = String::from_utf8(buf).ok();
        let lines: Vec<&str> = output.as_deref().unwrap_or("").lines().collect();
        // 1 header + 24 data rows
        assert_eq!(lines.len(), 25);
    }

    #[test]
    fn deterministic_output() {
        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        write_csv(&schedule(5), &mut buf1).ok();
        write_csv(&schedule(5), &mut buf2).ok();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn rows_parse_back() {
        let mut buf = Vec::new();
        write_csv(&schedule(3), &mut buf).ok();

        let mut rdr = csv::ReaderBuilder::new().from_reader(buf.as_slice());
        let headers = rdr.headers().cloned().ok();
        assert_eq!(headers.as_ref().map(csv::StringRecord::len), Some(9));

        let records: Vec<csv::StringRecord> = rdr.records().filter_map(Result::ok).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[1][0], "1");
        assert_eq!(&records[1][1], "2025-01-01T01:00:00+00:00");
        assert_eq!(&records[1][2], "bat-1");
        let discharge: f64 = records[1][5].parse().unwrap();
        assert_eq!(discharge, 1.25);
    }

    #[test]
    fn json_report_contains_schedule_and_summary() {
        let schedule = schedule(2);
        let fleet = [Battery::new("bat-1", 10.0, 5.0, 5.0, 5.0, 0.95).unwrap()];
        let summary = ScheduleSummary::from_schedule(&schedule, &fleet);
        let mut buf = Vec::new();
        write_json(&schedule, &summary, &mut buf).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["schedule"]["steps"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["schedule"]["steps"][0]["battery_id"], "bat-1");
        assert_eq!(value["schedule"]["horizon"]["steps"], 2);
        assert_eq!(value["summary"]["net_cost"], 0.42);
    }
}
