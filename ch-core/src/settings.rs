//! Settings
//!
//! Persistent settings stored as JSON in ~/.config/chambers/settings.json,
//! or wherever `CHAMBERS_CONFIG` points. A missing file yields defaults; a
//! malformed one is an error rather than a silent reset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ch_error::{ChamberError, Result};
use tracing::debug;

use crate::constants::{link, paths, relay};
use crate::descriptor::{Channel, ConnectionDescriptor};
use crate::direct::LinkOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub relay: RelaySettings,
}

/// Settings used by applications holding a [`Chamber`](crate::Chamber)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Descriptor used when none is given on the command line
    #[serde(default)]
    pub descriptor: Option<String>,

    /// Raw channel, -1 for none
    #[serde(default = "default_channel")]
    pub channel: i32,

    /// Socket timeout for relay calls in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Expected prefix of the `ROM?` reply; empty disables the check
    #[serde(default = "default_rom_marker")]
    pub rom_marker: String,

    /// Where recorded point logs go
    #[serde(default)]
    pub points_dir: Option<PathBuf>,
}

/// Settings for the `chamberd` relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Device id → serial port. Ids without an entry are used as port names.
    #[serde(default)]
    pub devices: BTreeMap<String, String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_channel() -> i32 {
    ch_protocol::NO_CHANNEL
}

fn default_remote_timeout_ms() -> u64 {
    relay::DEFAULT_TIMEOUT_MS
}

fn default_rom_marker() -> String {
    link::DEFAULT_ROM_MARKER.to_string()
}

fn default_listen() -> String {
    relay::DEFAULT_LISTEN.to_string()
}

fn default_max_connections() -> usize {
    relay::DEFAULT_MAX_CONNECTIONS
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            descriptor: None,
            channel: default_channel(),
            remote_timeout_ms: default_remote_timeout_ms(),
            rom_marker: default_rom_marker(),
            points_dir: None,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            devices: BTreeMap::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl ClientSettings {
    pub fn channel(&self) -> Result<Channel> {
        Channel::from_raw(self.channel)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            rom_marker: self.rom_marker.clone(),
        }
    }
}

impl RelaySettings {
    /// Serial port for a device id
    pub fn port_for<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.devices.get(device_id).map(String::as_str).unwrap_or(device_id)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.client.channel()?;

        if let Some(descriptor) = &self.client.descriptor {
            ConnectionDescriptor::parse(descriptor)?;
        }

        if self.client.remote_timeout_ms == 0 {
            return Err(ChamberError::InvalidConfig {
                field: "client.remote_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        self.relay
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ChamberError::InvalidConfig {
                field: "relay.listen".into(),
                reason: format!("{:?} is not a socket address: {}", self.relay.listen, e),
            })?;

        if self.relay.max_connections == 0 {
            return Err(ChamberError::InvalidConfig {
                field: "relay.max_connections".into(),
                reason: "must be greater than zero".into(),
            });
        }

        for (device_id, port) in &self.relay.devices {
            ch_protocol::validate_port_name(device_id).map_err(|reason| ChamberError::InvalidConfig {
                field: format!("relay.devices.{}", device_id),
                reason,
            })?;
            ch_protocol::validate_port_name(port).map_err(|reason| ChamberError::InvalidConfig {
                field: format!("relay.devices.{}", device_id),
                reason,
            })?;
        }

        Ok(())
    }
}

/// Get the settings file path
///
/// `CHAMBERS_CONFIG` wins; otherwise the user config directory, falling back
/// to /etc/chambers/settings.json for system accounts without one.
pub fn settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(paths::CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .map(|dir| dir.join(paths::CONFIG_DIR_NAME).join(paths::SETTINGS_FILE))
        .unwrap_or_else(|| PathBuf::from(paths::SYSTEM_SETTINGS))
}

/// Load settings from the default location
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&settings_path())
}

/// Load settings from `path`; defaults if the file does not exist
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let metadata = fs::metadata(path).map_err(|e| ChamberError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.len() > paths::MAX_SETTINGS_SIZE {
        return Err(ChamberError::config(format!(
            "Settings file {} is too large ({} bytes)",
            path.display(),
            metadata.len()
        )));
    }

    let content = fs::read_to_string(path).map_err(|e| ChamberError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: Settings = serde_json::from_str(&content).map_err(|e| {
        ChamberError::config(format!("Failed to parse settings {}: {}", path.display(), e))
    })?;
    settings.validate()?;

    debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to `path`
///
/// Atomic write: temp file then rename, so a crash never leaves half a file.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    settings.validate()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ChamberError::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");
    let write_err = |e| ChamberError::FileWrite {
        path: temp_path.clone(),
        source: e,
    };

    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| ChamberError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
