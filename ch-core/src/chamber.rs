//! Chamber façade
//!
//! [`Chamber`] is what applications hold. It picks a backend from the shape of
//! the connection descriptor, serializes every operation behind one lock, and
//! closes the backend when it is disconnected or dropped.

use std::time::Duration;

use ch_error::{ChamberError, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{settle, wait_for_target, ChamberBackend};
use crate::descriptor::{Channel, ConnectionDescriptor};
use crate::direct::{DirectLineBackend, LinkOptions};
use crate::point::TemperaturePoint;
use crate::remote::RemoteBackend;
use crate::settings::ClientSettings;
use crate::RefMode;

/// Builds backends for [`Chamber::connect`]
#[cfg_attr(test, mockall::automock)]
pub trait BackendFactory: Send + Sync {
    /// A fresh, unopened serial-line backend
    fn direct_line(&self) -> Box<dyn ChamberBackend>;

    /// A remote backend already connected to the relay at `address`
    fn remote(&self, address: &str) -> Result<Box<dyn ChamberBackend>>;
}

/// Real serial ports and TCP relays
#[derive(Debug, Clone)]
pub struct DefaultBackendFactory {
    link: LinkOptions,
    remote_timeout: Duration,
}

impl DefaultBackendFactory {
    pub fn new(link: LinkOptions, remote_timeout: Duration) -> Self {
        Self { link, remote_timeout }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.link_options(), settings.remote_timeout())
    }
}

impl Default for DefaultBackendFactory {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn direct_line(&self) -> Box<dyn ChamberBackend> {
        Box::new(DirectLineBackend::new(self.link.clone()))
    }

    fn remote(&self, address: &str) -> Result<Box<dyn ChamberBackend>> {
        let backend = RemoteBackend::new(self.remote_timeout);
        backend.connect(address)?;
        Ok(Box::new(backend))
    }
}

/// A temperature chamber reached through whichever backend its descriptor names
pub struct Chamber {
    factory: Box<dyn BackendFactory>,
    backend: Mutex<Option<Box<dyn ChamberBackend>>>,
}

impl Chamber {
    pub fn new() -> Self {
        Self::with_factory(Box::new(DefaultBackendFactory::default()))
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::with_factory(Box::new(DefaultBackendFactory::from_settings(settings)))
    }

    pub fn with_factory(factory: Box<dyn BackendFactory>) -> Self {
        Self {
            factory,
            backend: Mutex::new(None),
        }
    }

    /// Connect to `descriptor`, closing whatever was connected before.
    ///
    /// A descriptor without a colon is a serial port; `host:port:deviceId`
    /// goes through the relay at `host:port`.
    pub fn connect(&self, descriptor: &str, channel: Channel) -> Result<()> {
        let mut slot = self.backend.lock();
        if let Some(previous) = slot.take() {
            debug!("Closing previous backend before connecting to {}", descriptor);
            previous.close();
        }

        let backend = match ConnectionDescriptor::parse(descriptor)? {
            ConnectionDescriptor::Direct(port) => {
                let backend = self.factory.direct_line();
                backend.open(&port, channel)?;
                backend
            }
            ConnectionDescriptor::Remote { host, port, device_id } => {
                let backend = self.factory.remote(&format!("{}:{}", host, port))?;
                backend.open(&device_id, channel)?;
                backend
            }
        };

        info!("Connected to {} ({})", descriptor, backend.info());
        *slot = Some(backend);
        Ok(())
    }

    /// Close the backend, if any. Never fails.
    pub fn disconnect(&self) {
        if let Some(backend) = self.backend.lock().take() {
            backend.close();
            info!("Disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.backend.lock().is_some()
    }

    fn with_backend<T>(&self, op: impl FnOnce(&dyn ChamberBackend) -> Result<T>) -> Result<T> {
        let slot = self.backend.lock();
        let backend = slot.as_deref().ok_or(ChamberError::NotConnected)?;
        op(backend)
    }

    pub fn turn_on(&self) -> Result<()> {
        self.with_backend(|backend| backend.turn_on())
    }

    pub fn turn_off(&self) -> Result<()> {
        self.with_backend(|backend| backend.turn_off())
    }

    /// Hold `target`; returns once the chamber reports it as its target.
    ///
    /// The backend's own wait is followed by a second one here, so a remote
    /// chamber is also confirmed from this side of the relay.
    pub fn go_temp(&self, target: f64, ref_mode: RefMode) -> Result<()> {
        self.with_backend(|backend| {
            backend.go_temp(target, ref_mode)?;
            wait_for_target(target, || backend.temperature()).map(drop)
        })
    }

    /// Ramp to `target` over `duration`; returns once the program is running
    pub fn go_temp_ramp(&self, target: f64, duration: Duration, ref_mode: RefMode) -> Result<()> {
        self.with_backend(|backend| {
            backend.go_temp_ramp(target, duration, ref_mode)?;
            settle(|| backend.temperature())
        })
    }

    pub fn temperature(&self) -> Result<TemperaturePoint> {
        self.with_backend(|backend| backend.temperature())
    }

    /// Model label of the connected chamber, empty when not connected
    pub fn chamber_info(&self) -> String {
        self.backend
            .lock()
            .as_deref()
            .map(|backend| backend.info())
            .unwrap_or_default()
    }
}

impl Default for Chamber {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Chamber {
    fn drop(&mut self) {
        self.disconnect();
    }
}
