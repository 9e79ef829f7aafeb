//! Controller command text
//!
//! Builders for the command lines the controller accepts and the parser for
//! its `TEMP?` reply. Numbers are written with Rust's shortest round-trip
//! formatting, so `25.0` goes out as `25` and `-12.5` as `-12.5`.

use std::sync::OnceLock;
use std::time::Duration;

use ch_error::{ChamberError, Result};
use regex::Regex;

use crate::descriptor::Channel;
use crate::point::TemperaturePoint;
use crate::RefMode;

pub use crate::constants::commands::{MODE_CONSTANT, MODE_STANDBY, ROM_QUERY, TEMP_QUERY, TYPE_QUERY};

/// Prefix `command` with `"<channel>, "` when a channel is set
pub fn frame(channel: Channel, command: &str) -> String {
    match channel.get() {
        Some(channel) => format!("{}, {}", channel, command),
        None => command.to_string(),
    }
}

pub fn set_ref(ref_mode: RefMode) -> String {
    format!("SET, REF{}", ref_mode.code())
}

pub fn set_temperature(target: f64) -> String {
    format!("TEMP, S{}", target)
}

/// Single-step ramp program from `current` to `target`
pub fn ramp_program(current: f64, target: f64, duration: Duration, ref_mode: RefMode) -> String {
    format!(
        "RUN PRGM, TEMP{} GOTEMP{} TIME{} REF{}",
        current,
        target,
        format_duration(duration),
        ref_mode.code()
    )
}

/// `hh:mm` with total hours; seconds are truncated
pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn temperature_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            let field = r"([-+]?\d+\.?\d*)";
            Regex::new(&format!(r"{f}\s*,\s*{f}\s*,\s*{f}\s*,\s*{f}", f = field)).ok()
        })
        .as_ref()
}

/// Parse a `TEMP?` reply: four comma-separated decimals, the first two being
/// the monitored and target temperatures.
pub fn parse_temperature(reply: &str) -> Result<TemperaturePoint> {
    let parse_error = || ChamberError::Parse {
        reply: reply.to_string(),
    };

    let captures = temperature_pattern()
        .and_then(|pattern| pattern.captures(reply))
        .ok_or_else(parse_error)?;
    let monitored: f64 = captures[1].parse().map_err(|_| parse_error())?;
    let target: f64 = captures[2].parse().map_err(|_| parse_error())?;

    Ok(TemperaturePoint::now(monitored, target))
}
