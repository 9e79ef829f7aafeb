//! Connection descriptors and channel addressing
//!
//! A descriptor is the single string an operator types to reach a chamber:
//! either a local serial port (`COM3`, `/dev/ttyUSB0`) or a relay address with
//! a device id (`10.0.0.5:5000:1`). It is parsed once per connect.

use std::fmt;
use std::str::FromStr;

use ch_error::{ChamberError, Result};
use ch_protocol::{validate_channel, NO_CHANNEL};

/// Sub-unit address within a multi-zone chassis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Channel(Option<u8>);

impl Channel {
    pub const NONE: Channel = Channel(None);

    pub fn new(channel: u8) -> Self {
        Self(Some(channel))
    }

    /// Build from the raw wire form, where -1 means no channel
    pub fn from_raw(raw: i32) -> Result<Self> {
        validate_channel(raw).map_err(|reason| ChamberError::InvalidConfig {
            field: "channel".into(),
            reason,
        })?;
        if raw == NO_CHANNEL {
            Ok(Self::NONE)
        } else {
            // validate_channel bounds raw to 0..=99
            Ok(Self(Some(raw as u8)))
        }
    }

    pub fn as_raw(self) -> i32 {
        self.0.map(i32::from).unwrap_or(NO_CHANNEL)
    }

    pub fn get(self) -> Option<u8> {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(channel) => write!(f, "{}", channel),
            None => f.write_str("none"),
        }
    }
}

/// Where a chamber lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    /// A serial port on this machine
    Direct(String),
    /// A device behind a `chamberd` relay
    Remote {
        host: String,
        port: u16,
        device_id: String,
    },
}

impl ConnectionDescriptor {
    /// Parse `port` or `host:port:deviceId`.
    ///
    /// Anything containing a colon is treated as a relay address and must have
    /// exactly three parts. Bracketed IPv6 hosts are not supported.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(ChamberError::invalid_descriptor(descriptor, "descriptor is empty"));
        }

        if !descriptor.contains(':') {
            return Ok(Self::Direct(descriptor.to_string()));
        }

        let parts: Vec<&str> = descriptor.split(':').collect();
        let [host, port, device_id] = parts.as_slice() else {
            return Err(ChamberError::invalid_descriptor(
                descriptor,
                format!("expected host:port:deviceId, found {} parts", parts.len()),
            ));
        };

        if host.is_empty() {
            return Err(ChamberError::invalid_descriptor(descriptor, "relay host is empty"));
        }
        let port = port.parse::<u16>().map_err(|e| {
            ChamberError::invalid_descriptor(descriptor, format!("invalid relay port {:?}: {}", port, e))
        })?;
        if device_id.is_empty() {
            return Err(ChamberError::invalid_descriptor(descriptor, "device id is empty"));
        }

        Ok(Self::Remote {
            host: host.to_string(),
            port,
            device_id: device_id.to_string(),
        })
    }

    /// `host:port` of the relay, if this is a remote descriptor
    pub fn relay_address(&self) -> Option<String> {
        match self {
            Self::Direct(_) => None,
            Self::Remote { host, port, .. } => Some(format!("{}:{}", host, port)),
        }
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ChamberError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(port) => f.write_str(port),
            Self::Remote { host, port, device_id } => write!(f, "{}:{}:{}", host, port, device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_raw_forms() {
        assert_eq!(Channel::from_raw(-1).unwrap(), Channel::NONE);
        assert_eq!(Channel::from_raw(3).unwrap().get(), Some(3));
        assert_eq!(Channel::new(7).as_raw(), 7);
        assert_eq!(Channel::NONE.as_raw(), -1);
        assert!(Channel::from_raw(-2).is_err());
        assert!(Channel::from_raw(100).is_err());
    }

    #[test]
    fn test_direct_descriptors() {
        assert_eq!(
            ConnectionDescriptor::parse("COM3").unwrap(),
            ConnectionDescriptor::Direct("COM3".into())
        );
        assert_eq!(
            ConnectionDescriptor::parse("/dev/ttyUSB0").unwrap(),
            ConnectionDescriptor::Direct("/dev/ttyUSB0".into())
        );
    }

    #[test]
    fn test_remote_descriptor() {
        let descriptor = ConnectionDescriptor::parse("10.0.0.5:5000:1").unwrap();
        assert_eq!(
            descriptor,
            ConnectionDescriptor::Remote {
                host: "10.0.0.5".into(),
                port: 5000,
                device_id: "1".into(),
            }
        );
        assert_eq!(descriptor.relay_address().as_deref(), Some("10.0.0.5:5000"));
        assert_eq!(descriptor.to_string(), "10.0.0.5:5000:1");
    }

    #[test]
    fn test_malformed_descriptors() {
        for bad in ["", "   ", "host:5000", "host:5000:1:2", ":5000:1", "host:port:1", "host:5000:", "host:70000:1"] {
            let err = ConnectionDescriptor::parse(bad).unwrap_err();
            assert!(
                matches!(err, ChamberError::InvalidDescriptor { .. }),
                "{:?} gave {:?}",
                bad,
                err
            );
        }
    }
}
