//! Point log
//!
//! Recorded readings are saved as
//! `{"points":[{"time":..,"monitored":"23.456","target":"25.000"}]}`.
//! Values are fixed three-decimal strings so logs diff cleanly.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use ch_error::{ChamberError, Result};

use crate::point::TemperaturePoint;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Serialize)]
struct PointRecord {
    time: String,
    monitored: String,
    target: String,
}

#[derive(Serialize)]
struct PointLog {
    points: Vec<PointRecord>,
}

impl From<&TemperaturePoint> for PointRecord {
    fn from(point: &TemperaturePoint) -> Self {
        Self {
            time: point.time().format(TIME_FORMAT).to_string(),
            monitored: format!("{:.3}", point.monitored()),
            target: format!("{:.3}", point.target()),
        }
    }
}

/// Write `points` in order to `path`, creating parent directories
pub fn save_points(points: &[TemperaturePoint], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ChamberError::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let log = PointLog {
        points: points.iter().map(PointRecord::from).collect(),
    };
    let json = serde_json::to_string_pretty(&log)?;

    fs::write(path, json).map_err(|e| ChamberError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// `<dir>/points-YYYYmmdd-HHMMSS.json` for a recording started at `started`
pub fn log_path(dir: &Path, started: DateTime<Local>) -> PathBuf {
    dir.join(format!("points-{}.json", started.format("%Y%m%d-%H%M%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_points_are_written_in_order_with_three_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("today").join("points.json");
        let t0 = Local.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let points = vec![
            TemperaturePoint::new(t0, 23.456, 25.0),
            TemperaturePoint::new(t0 + chrono::Duration::seconds(1), -40.1, -40.0),
        ];

        save_points(&points, &path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let saved = json["points"].as_array().unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0]["time"], "2024-03-01 10:00:00.000");
        assert_eq!(saved[0]["monitored"], "23.456");
        assert_eq!(saved[0]["target"], "25.000");
        assert_eq!(saved[1]["time"], "2024-03-01 10:00:01.000");
        assert_eq!(saved[1]["monitored"], "-40.100");
    }

    #[test]
    fn test_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        save_points(&[], &path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["points"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_log_path() {
        let started = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            log_path(Path::new("/tmp/logs"), started),
            PathBuf::from("/tmp/logs/points-20240301-090507.json")
        );
    }
}
