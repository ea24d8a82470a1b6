//! CSV import for forecast series.
//!
//! Expected layout, one sample per row:
//!
//! ```text
//! timestamp,value,lower,upper
//! 2025-01-01T00:00:00Z,1.2,0.9,1.5
//! 2025-01-01T01:00:00Z,1.4,,
//! ```
//!
//! `lower` and `upper` are optional, both as columns and per row.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::forecast::{ForecastPoint, ForecastSeries};

/// Failure to read a forecast CSV.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot open \"{path}\": {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("forecast file contains no samples")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ForecastRow {
    timestamp: DateTime<Utc>,
    value: f64,
    #[serde(default)]
    lower: Option<f64>,
    #[serde(default)]
    upper: Option<f64>,
}

/// Reads a forecast series from a CSV file.
///
/// # Errors
///
/// Returns an [`ImportError`] if the file cannot be opened, a row does not
/// parse, or the file holds no samples.
pub fn import_forecast_csv(path: &Path) -> Result<ForecastSeries, ImportError> {
    let file = File::open(path).map_err(|source| ImportError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_forecast_csv(file)
}

/// Reads a forecast series from any CSV source.
///
/// Spacing is not checked here; the horizon builder validates it against the
/// requested step.
///
/// # Errors
///
/// Returns an [`ImportError`] if a row does not parse or there are no rows.
pub fn read_forecast_csv(reader: impl Read) -> Result<ForecastSeries, ImportError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut points = Vec::new();
    for row in rdr.deserialize::<ForecastRow>() {
        let row = row.map_err(|source| ImportError::Row {
            line: source.position().map_or(0, csv::Position::line),
            source,
        })?;
        points.push(ForecastPoint {
            timestamp: row.timestamp,
            value: row.value,
            lower: row.lower,
            upper: row.upper,
        });
    }

    if points.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(ForecastSeries::new(points))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::forecast::SourceId;

    #[test]
    fn reads_values_and_bounds() {
        let csv = "timestamp,value,lower,upper\n\
                   2025-01-01T00:00:00Z,1.2,0.9,1.5\n\
                   2025-01-01T01:00:00Z,1.4,,\n";
        let series = read_forecast_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(
            series.start(),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(series.points[0].lower, Some(0.9));
        assert_eq!(series.points[0].upper, Some(1.5));
        assert_eq!(series.points[1].value, 1.4);
        assert_eq!(series.points[1].lower, None);
        assert!(series.check_spacing(&SourceId::load("x"), TimeDelta::hours(1)).is_ok());
    }

    #[test]
    fn bound_columns_are_optional() {
        let csv = "timestamp,value\n2025-01-01T00:00:00Z,0.25\n";
        let series = read_forecast_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.points[0].value, 0.25);
        assert_eq!(series.points[0].upper, None);
    }

    #[test]
    fn whitespace_is_trimmed() {
        let csv = "timestamp, value\n 2025-01-01T00:00:00Z , 3.5 \n";
        let series = read_forecast_csv(csv.as_bytes()).unwrap();
        assert_eq!(series.points[0].value, 3.5);
    }

    #[test]
    fn bad_value_reports_line() {
        let csv = "timestamp,value\n\
                   2025-01-01T00:00:00Z,1.0\n\
                   2025-01-01T01:00:00Z,lots\n";
        let err = read_forecast_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Row { line: 3, .. }), "{err}");
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let csv = "timestamp,value\nyesterday,1.0\n";
        assert!(matches!(
            read_forecast_csv(csv.as_bytes()),
            Err(ImportError::Row { .. })
        ));
    }

    #[test]
    fn header_only_is_empty() {
        let csv = "timestamp,value\n";
        assert!(matches!(read_forecast_csv(csv.as_bytes()), Err(ImportError::Empty)));
    }

    #[test]
    fn missing_file() {
        let err = import_forecast_csv(Path::new("/nonexistent/forecast.csv")).unwrap_err();
        assert!(matches!(err, ImportError::Open { .. }));
    }
}
