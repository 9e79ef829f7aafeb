//! Relay wire protocol
//!
//! Newline-delimited JSON envelopes exchanged between a remote chamber
//! backend and the `chamberd` relay that owns the physical line. Every reply
//! carries a numeric status; anything other than [`STATUS_OK`] is a failure
//! whose `error` text is surfaced verbatim to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for relay traffic (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Maximum length of a port name or device id
const MAX_PORT_LENGTH: usize = 64;

/// Highest sub-unit address a multi-zone chassis exposes
pub const MAX_CHANNEL: i32 = 99;

/// Raw channel value meaning "no channel"
pub const NO_CHANNEL: i32 = -1;

/// Ramp programs are sent as `TIME<hh:mm>`; two hour digits cap the duration
pub const MAX_RAMP_SECONDS: u32 = (99 * 60 + 59) * 60;

pub const STATUS_OK: i32 = 0;
/// The relay or the device behind it failed to carry out the request
pub const STATUS_FAILED: i32 = 1;
/// The request did not parse or did not validate
pub const STATUS_INVALID_REQUEST: i32 = 2;
/// The request needs a line that has not been opened yet
pub const STATUS_NOT_OPEN: i32 = 3;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// How the controller arbitrates its reference sensor
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RefMode {
    #[default]
    Auto,
    On,
    Off,
    None,
}

impl RefMode {
    /// Integer code used in `SET, REF<n>` and `REF<n>` program fields
    pub fn code(self) -> u8 {
        match self {
            RefMode::Auto => 0,
            RefMode::On => 1,
            RefMode::Off => 2,
            RefMode::None => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RefMode::Auto),
            1 => Some(RefMode::On),
            2 => Some(RefMode::Off),
            3 => Some(RefMode::None),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RefMode::Auto => "auto",
            RefMode::On => "on",
            RefMode::Off => "off",
            RefMode::None => "none",
        }
    }
}

impl fmt::Display for RefMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RefMode {
    type Err = String;

    /// Accepts either the name or the integer code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return RefMode::from_code(code).ok_or_else(|| format!("Unknown reference mode code {}", code));
        }
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(RefMode::Auto),
            "on" => Ok(RefMode::On),
            "off" => Ok(RefMode::Off),
            "none" => Ok(RefMode::None),
            other => Err(format!("Unknown reference mode {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

/// One logical operation per chamber backend method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Open the line for `port` (a relay device id); `channel` is raw, -1 = none
    Open { port: String, channel: i32 },
    Close,
    TurnOn,
    TurnOff,
    GetInfo,
    GetTemperature,
    GoTemp { temperature: f64, ref_mode: RefMode },
    /// Linear ramp from the current monitored value over `seconds`
    GoTempRamp { temperature: f64, seconds: u32, ref_mode: RefMode },
}

impl Request {
    /// Validate request parameters before sending to the relay
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::Close
            | Request::TurnOn
            | Request::TurnOff
            | Request::GetInfo
            | Request::GetTemperature => Ok(()),

            Request::Open { port, channel } => {
                validate_port_name(port)?;
                validate_channel(*channel)?;
                Ok(())
            }

            Request::GoTemp { temperature, ref_mode: _ } => validate_temperature(*temperature),

            Request::GoTempRamp { temperature, seconds, ref_mode: _ } => {
                validate_temperature(*temperature)?;
                validate_ramp_seconds(*seconds)?;
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Open { .. } => "Open",
            Request::Close => "Close",
            Request::TurnOn => "TurnOn",
            Request::TurnOff => "TurnOff",
            Request::GetInfo => "GetInfo",
            Request::GetTemperature => "GetTemperature",
            Request::GoTemp { .. } => "GoTemp",
            Request::GoTempRamp { .. } => "GoTempRamp",
        }
    }

    /// Requests whose reply only comes once the chamber has settled; clients
    /// must not apply their normal read timeout to these
    pub fn is_long_running(&self) -> bool {
        matches!(self, Request::GoTemp { .. } | Request::GoTempRamp { .. })
    }

    /// Requests that change device state; the relay audits these
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::Open { .. }
                | Request::Close
                | Request::TurnOn
                | Request::TurnOff
                | Request::GoTemp { .. }
                | Request::GoTempRamp { .. }
        )
    }
}

/// Reply to a single request: `{id, status, error, payload...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Request ID this reply corresponds to
    pub id: u64,
    pub status: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Reply payload; which fields are present depends on the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Raw identity string (`GetInfo`), version or pong text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl Payload {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn info(info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            ..Self::default()
        }
    }

    pub fn temperature(monitored: f64, target: f64) -> Self {
        Self {
            monitored: Some(monitored),
            target: Some(target),
            ..Self::default()
        }
    }
}

impl Reply {
    pub fn ok(id: u64, payload: Payload) -> Self {
        Self {
            id,
            status: STATUS_OK,
            error: String::new(),
            payload,
        }
    }

    pub fn failed(id: u64, status: i32, error: impl Into<String>) -> Self {
        Self {
            id,
            status,
            error: error.into(),
            payload: Payload::none(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Whether the payload carries what `request` is expected to return
    pub fn matches(&self, request: &Request) -> bool {
        if !self.is_ok() {
            return true;
        }
        match request {
            Request::Ping | Request::Version | Request::GetInfo => self.payload.info.is_some(),
            Request::GetTemperature => {
                self.payload.monitored.is_some() && self.payload.target.is_some()
            }
            _ => true,
        }
    }
}

pub fn validate_port_name(port: &str) -> Result<(), String> {
    if port.trim().is_empty() {
        return Err("Port name cannot be empty".into());
    }

    if port.len() > MAX_PORT_LENGTH {
        return Err(format!(
            "Port name too long: {} > {} chars",
            port.len(),
            MAX_PORT_LENGTH
        ));
    }

    if let Some(c) = port.chars().find(|c| c.is_control()) {
        return Err(format!("Port name contains control character: {:?}", c));
    }

    Ok(())
}

pub fn validate_channel(channel: i32) -> Result<(), String> {
    if channel < NO_CHANNEL || channel > MAX_CHANNEL {
        return Err(format!(
            "Channel out of range: {} (expected -1 or 0-{})",
            channel, MAX_CHANNEL
        ));
    }
    Ok(())
}

pub fn validate_temperature(temperature: f64) -> Result<(), String> {
    if !temperature.is_finite() {
        return Err(format!("Temperature must be a finite number, got {}", temperature));
    }
    Ok(())
}

pub fn validate_ramp_seconds(seconds: u32) -> Result<(), String> {
    if seconds > MAX_RAMP_SECONDS {
        return Err(format!(
            "Ramp duration too long: {}s (maximum {}s)",
            seconds, MAX_RAMP_SECONDS
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_mode_codes_and_names() {
        assert_eq!(RefMode::Auto.code(), 0);
        assert_eq!(RefMode::None.code(), 3);
        assert_eq!("off".parse::<RefMode>(), Ok(RefMode::Off));
        assert_eq!("1".parse::<RefMode>(), Ok(RefMode::On));
        assert!("7".parse::<RefMode>().is_err());
        assert!("sideways".parse::<RefMode>().is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let envelope = RequestEnvelope::with_id(
            Request::GoTempRamp { temperature: 85.0, seconds: 5400, ref_mode: RefMode::On },
            7,
        );
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["cmd"], "GoTempRamp");
        assert_eq!(json["data"]["seconds"], 5400);
        assert_eq!(json["data"]["ref_mode"], "on");

        let parsed: RequestEnvelope = serde_json::from_str(r#"{"id":3,"cmd":"GetTemperature"}"#).unwrap();
        assert_eq!(parsed.request, Request::GetTemperature);
    }

    #[test]
    fn test_failed_reply_wire_shape() {
        let reply: Reply = serde_json::from_str(r#"{"id":5,"status":1,"error":"E123"}"#).unwrap();
        assert!(!reply.is_ok());
        assert_eq!(reply.error, "E123");
        assert_eq!(reply.payload, Payload::none());
    }

    #[test]
    fn test_reply_matches_request() {
        let reply = Reply::ok(1, Payload::none());
        assert!(!reply.matches(&Request::GetTemperature));
        assert!(reply.matches(&Request::TurnOn));
        assert!(Reply::ok(1, Payload::temperature(20.0, 25.0)).matches(&Request::GetTemperature));
    }

    #[test]
    fn test_validate_open() {
        assert!(Request::Open { port: "COM3".into(), channel: -1 }.validate().is_ok());
        assert!(Request::Open { port: "1".into(), channel: 4 }.validate().is_ok());
        assert!(Request::Open { port: "".into(), channel: -1 }.validate().is_err());
        assert!(Request::Open { port: "COM3\n".into(), channel: -1 }.validate().is_err());
        assert!(Request::Open { port: "COM3".into(), channel: -2 }.validate().is_err());
        assert!(Request::Open { port: "COM3".into(), channel: 100 }.validate().is_err());
    }

    #[test]
    fn test_validate_temperatures() {
        assert!(Request::GoTemp { temperature: -40.0, ref_mode: RefMode::Auto }.validate().is_ok());
        assert!(Request::GoTemp { temperature: f64::NAN, ref_mode: RefMode::Auto }.validate().is_err());
        assert!(Request::GoTempRamp { temperature: 25.0, seconds: MAX_RAMP_SECONDS + 1, ref_mode: RefMode::Auto }
            .validate()
            .is_err());
    }
}
