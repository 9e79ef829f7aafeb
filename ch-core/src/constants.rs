//! Constants and configuration values for Chambers
//!
//! Protocol constants of the chamber controller live here; none of them are
//! user-configurable. Runtime options belong in `settings`.

use std::time::Duration;

/// Serial link parameters fixed by the controller firmware
pub mod link {
    use super::*;

    pub const BAUD_RATE: u32 = 19_200;

    /// Read and write timeout on the line
    pub const TIMEOUT: Duration = Duration::from_millis(1000);

    /// Receive/transmit buffer size in bytes
    pub const BUFFER_SIZE: usize = 4096;

    /// Line delimiter appended to every outgoing command
    pub const TERMINATOR: &str = "\n";

    /// Prefix the `ROM?` reply must start with for the line to be trusted
    pub const DEFAULT_ROM_MARKER: &str = "ESPEC";
}

/// Text commands understood by the controller
pub mod commands {
    pub const TYPE_QUERY: &str = "TYPE?";
    pub const ROM_QUERY: &str = "ROM?";
    pub const TEMP_QUERY: &str = "TEMP?";
    pub const MODE_STANDBY: &str = "MODE, STANDBY";
    pub const MODE_CONSTANT: &str = "MODE, CONSTANT";
}

/// Convergence polling
pub mod convergence {
    /// Absolute tolerance between the reported and the commanded target
    pub const TOLERANCE: f64 = 0.05;

    /// Discard-polls performed after a ramp program is issued
    pub const SETTLE_POLLS: usize = 5;
}

/// Chamber identity lookup
pub mod identity {
    /// Raw `TYPE?` replies and the model label each one maps to
    pub const KNOWN_MODELS: &[(&str, &str)] = &[
        ("T,SCP220,110.0", "MC711"),
        ("T,SCP220,190.0", "MC811"),
        ("T,P-300,190.0", "MC812"),
    ];

    pub const UNKNOWN_LABEL: &str = "Unknown Chamber";
}

/// Remote relay defaults
pub mod relay {
    /// Socket read/write timeout for relay calls
    pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

    pub const DEFAULT_LISTEN: &str = "0.0.0.0:5000";

    pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

    /// Initial buffer size for replies
    pub const INITIAL_BUFFER_SIZE: usize = 512;
}

/// Settings locations
pub mod paths {
    /// Environment variable overriding the settings file location
    pub const CONFIG_ENV: &str = "CHAMBERS_CONFIG";

    pub const CONFIG_DIR_NAME: &str = "chambers";

    pub const SETTINGS_FILE: &str = "settings.json";

    /// Fallback when no user config directory can be resolved
    pub const SYSTEM_SETTINGS: &str = "/etc/chambers/settings.json";

    /// Maximum settings file size (1MB)
    pub const MAX_SETTINGS_SIZE: u64 = 1024 * 1024;
}
