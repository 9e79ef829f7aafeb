//! Device registry
//!
//! One shared serial line per device id. Every connection that opens a
//! device gets its own backend on that line, addressing its own channel;
//! the line stays open until the last of them closes.

use std::collections::HashMap;
use std::sync::Arc;

use ch_core::direct::{LineOpener, SharedLine};
use ch_core::{DirectLineBackend, LinkOptions, RelaySettings};
use parking_lot::Mutex;
use tracing::info;

pub struct DeviceRegistry {
    settings: RelaySettings,
    link: LinkOptions,
    opener: Arc<dyn LineOpener>,
    devices: Mutex<HashMap<String, Arc<SharedLine>>>,
}

impl DeviceRegistry {
    pub fn new(settings: RelaySettings, link: LinkOptions, opener: Arc<dyn LineOpener>) -> Self {
        Self {
            settings,
            link,
            opener,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Serial port a device id maps to
    pub fn port_for<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.settings.port_for(device_id)
    }

    /// A fresh, unopened backend on `device_id`'s line
    pub fn backend(&self, device_id: &str) -> Arc<DirectLineBackend> {
        let line = self
            .devices
            .lock()
            .entry(device_id.to_string())
            .or_insert_with(SharedLine::new)
            .clone();

        Arc::new(DirectLineBackend::on_shared_line(
            Box::new(self.opener.clone()),
            self.link.clone(),
            line,
        ))
    }

    /// Device ids with an open line
    pub fn open_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .lock()
            .iter()
            .filter(|(_, line)| line.is_open())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Close every line, whoever holds it
    pub fn close_all(&self) {
        let devices: Vec<(String, Arc<SharedLine>)> = self.devices.lock().drain().collect();
        for (device_id, line) in devices {
            if line.is_open() {
                info!("Closing device {} ({} holders)", device_id, line.holders());
            }
            line.close();
        }
    }
}
