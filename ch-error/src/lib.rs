//! Unified error handling for Chambers
//!
//! This crate provides the single error type shared by the chamber backends,
//! the relay protocol and the relay process itself.

use std::io;
use std::path::PathBuf;

/// Result type alias using ChamberError
pub type Result<T> = std::result::Result<T, ChamberError>;

/// Unified error type for all chamber operations
#[derive(thiserror::Error, Debug)]
pub enum ChamberError {
    // ============================================================================
    // Transport Errors
    // ============================================================================
    /// A write or read on the transport failed. `command` is the exact text
    /// (or remote call name) that was in flight; operators rely on it.
    #[error("Chamber did not respond to {command:?}: {source}")]
    ConnectionFailure {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open line {port}: {reason}")]
    LineOpen {
        port: String,
        reason: String,
    },

    #[error("Relay connection failed: {0}")]
    RelayConnection(String),

    #[error("Not connected to a chamber")]
    NotConnected,

    // ============================================================================
    // Protocol Errors
    // ============================================================================
    /// Device- or relay-reported failure. Displays the literal error text.
    #[error("{0}")]
    Protocol(String),

    #[error("Unrecognized temperature reply: {reply:?}")]
    Parse {
        reply: String,
    },

    #[error("Chamber rejected the ROM? confirmation: {reply:?}")]
    HandshakeRejected {
        reply: String,
    },

    #[error("Relay protocol error: {0}")]
    RelayProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid connection descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor {
        descriptor: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },
}

impl ChamberError {
    /// Wrap a transport fault together with the command that triggered it
    pub fn connection(command: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailure {
            command: command.into(),
            source,
        }
    }

    /// Create a protocol error carrying the literal device/relay text
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the transport rather than the device.
    ///
    /// Temperature reads retry once on these; everything else propagates.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. }
                | Self::Parse { .. }
                | Self::RelayConnection(_)
                | Self::RelayProtocol(_)
                | Self::Io(_)
        )
    }

    /// Whether the failure is a read/write timeout on the transport
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionFailure { source, .. } | Self::Io(source) => {
                matches!(
                    source.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                )
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_displays_literal_text() {
        let err = ChamberError::protocol("E123");
        assert_eq!(err.to_string(), "E123");
        assert!(!err.is_transport_fault());
    }

    #[test]
    fn test_connection_failure_keeps_command_text() {
        let err = ChamberError::connection(
            "3, TEMP?",
            io::Error::new(io::ErrorKind::TimedOut, "timed out"),
        );
        assert!(err.to_string().contains("\"3, TEMP?\""));
        assert!(err.is_transport_fault());
        assert!(err.is_timeout());
    }

    #[test]
    fn test_parse_error_is_transport_fault() {
        let err = ChamberError::Parse { reply: "NA:DATA".into() };
        assert!(err.is_transport_fault());
        assert!(!err.is_timeout());
    }
}
