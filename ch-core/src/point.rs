//! Temperature readings

use chrono::{DateTime, Local};

/// One reading taken from a chamber
///
/// `time` is the moment the reply was received locally, not a device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePoint {
    time: DateTime<Local>,
    monitored: f64,
    target: f64,
}

impl TemperaturePoint {
    pub fn new(time: DateTime<Local>, monitored: f64, target: f64) -> Self {
        Self {
            time,
            monitored,
            target,
        }
    }

    /// Stamp a reading with the current local time
    pub fn now(monitored: f64, target: f64) -> Self {
        Self::new(Local::now(), monitored, target)
    }

    pub fn time(&self) -> DateTime<Local> {
        self.time
    }

    pub fn monitored(&self) -> f64 {
        self.monitored
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// How far the chamber still has to go: `target - monitored`
    pub fn delta(&self) -> f64 {
        self.target - self.monitored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_is_target_minus_monitored() {
        let point = TemperaturePoint::now(23.456, 25.0);
        assert!((point.delta() - 1.544).abs() < 1e-6);

        let cooling = TemperaturePoint::now(30.0, -10.0);
        assert!((cooling.delta() + 40.0).abs() < 1e-9);
    }
}
