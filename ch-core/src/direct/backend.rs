//! Serial-line backend
//!
//! A [`SharedLine`] owns the port. Each [`DirectLineBackend`] holding it
//! addresses one channel, so zones of a multi-zone chassis can be driven
//! through one line without seeing each other's channel. The line closes
//! when its last holder closes.

use std::sync::Arc;
use std::time::Duration;

use ch_error::{ChamberError, Result};
use ch_protocol::{validate_ramp_seconds, validate_temperature};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::command::{self, MODE_CONSTANT, MODE_STANDBY, ROM_QUERY, TEMP_QUERY, TYPE_QUERY};
use super::line::{Line, LineOpener, SerialOpener};
use crate::backend::{retry_once, settle, wait_for_target, ChamberBackend};
use crate::constants::link::DEFAULT_ROM_MARKER;
use crate::descriptor::Channel;
use crate::identity::model_label;
use crate::point::TemperaturePoint;
use crate::RefMode;

/// Options applied when a line is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Prefix the `ROM?` reply must start with. Empty accepts any reply.
    pub rom_marker: String,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            rom_marker: DEFAULT_ROM_MARKER.to_string(),
        }
    }
}

#[derive(Default)]
struct LineState {
    line: Option<Box<dyn Line>>,
    port: Option<String>,
    holders: usize,
}

impl LineState {
    fn shut(&mut self) {
        if self.line.take().is_some() {
            info!("Closed line {}", self.port.as_deref().unwrap_or("?"));
        }
        self.port = None;
        self.holders = 0;
    }
}

/// One serial port, shared by the backends that hold it
#[derive(Default)]
pub struct SharedLine {
    state: Mutex<LineState>,
}

impl SharedLine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().line.is_some()
    }

    pub fn port(&self) -> Option<String> {
        self.state.lock().port.clone()
    }

    /// Backends currently holding the line open
    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }

    /// Close the port whoever holds it
    pub fn close(&self) {
        self.state.lock().shut();
    }

    /// Hold the line to `port`, opening it if nobody else holds it
    fn acquire(&self, opener: &dyn LineOpener, port: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.line.is_some() {
            if state.port.as_deref() == Some(port) {
                state.holders += 1;
                debug!("Sharing line {} ({} holders)", port, state.holders);
                return Ok(());
            }
            return Err(ChamberError::LineOpen {
                port: port.to_string(),
                reason: format!("line is in use on {}", state.port.as_deref().unwrap_or("?")),
            });
        }

        state.line = Some(opener.open(port)?);
        state.port = Some(port.to_string());
        state.holders = 1;
        Ok(())
    }

    /// Drop one hold; the last one closes the port
    fn release(&self) {
        let mut state = self.state.lock();
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.shut();
        }
    }

    /// One command out on `channel`, one trimmed reply back
    fn request(&self, channel: Channel, command: &str) -> Result<String> {
        let framed = command::frame(channel, command);
        let mut state = self.state.lock();
        let line = state.line.as_mut().ok_or(ChamberError::NotConnected)?;

        debug!("TX {:?}", framed);
        let reply = line
            .write_line(&framed)
            .and_then(|_| line.read_line())
            .map_err(|e| ChamberError::connection(framed.as_str(), e))?;
        debug!("RX {:?}", reply);

        Ok(reply)
    }
}

/// What this backend addresses on the line
#[derive(Default)]
struct Zone {
    channel: Channel,
    identity: Option<String>,
    holding: bool,
}

/// Chamber on a local serial port
pub struct DirectLineBackend {
    opener: Box<dyn LineOpener>,
    options: LinkOptions,
    line: Arc<SharedLine>,
    zone: Mutex<Zone>,
}

impl DirectLineBackend {
    /// Backend over real serial ports
    pub fn new(options: LinkOptions) -> Self {
        Self::with_opener(Box::new(SerialOpener), options)
    }

    pub fn with_opener(opener: Box<dyn LineOpener>, options: LinkOptions) -> Self {
        Self::on_shared_line(opener, options, SharedLine::new())
    }

    /// Backend for one zone of a line other backends may also hold
    pub fn on_shared_line(
        opener: Box<dyn LineOpener>,
        options: LinkOptions,
        line: Arc<SharedLine>,
    ) -> Self {
        Self {
            opener,
            options,
            line,
            zone: Mutex::new(Zone::default()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.zone.lock().holding && self.line.is_open()
    }

    /// Port of the open line
    pub fn port(&self) -> Option<String> {
        if self.zone.lock().holding {
            self.line.port()
        } else {
            None
        }
    }

    pub fn channel(&self) -> Channel {
        self.zone.lock().channel
    }

    /// Raw `TYPE?` reply recorded at open
    pub fn identity(&self) -> Option<String> {
        self.zone.lock().identity.clone()
    }

    fn request(&self, command: &str) -> Result<String> {
        let channel = {
            let zone = self.zone.lock();
            if !zone.holding {
                return Err(ChamberError::NotConnected);
            }
            zone.channel
        };
        self.line.request(channel, command)
    }

    fn read_temperature(&self) -> Result<TemperaturePoint> {
        command::parse_temperature(&self.request(TEMP_QUERY)?)
    }

    /// `ROM?` confirmation then `TYPE?`; returns the raw identity
    fn handshake(&self) -> Result<String> {
        let rom = match self.request(ROM_QUERY) {
            Err(e) if e.is_timeout() => {
                warn!("ROM? timed out, asking once more");
                self.request(ROM_QUERY)?
            }
            other => other?,
        };

        if !rom.starts_with(&self.options.rom_marker) {
            return Err(ChamberError::HandshakeRejected { reply: rom });
        }

        self.request(TYPE_QUERY)
    }
}

fn check_target(target: f64) -> Result<()> {
    validate_temperature(target).map_err(ChamberError::InvalidRequest)
}

impl ChamberBackend for DirectLineBackend {
    fn open(&self, port: &str, channel: Channel) -> Result<()> {
        self.close();

        self.line.acquire(self.opener.as_ref(), port)?;
        {
            let mut zone = self.zone.lock();
            zone.channel = channel;
            zone.holding = true;
        }

        match self.handshake() {
            Ok(identity) => {
                info!(
                    "Opened {} (channel {}): {}",
                    port,
                    channel,
                    model_label(&identity)
                );
                self.zone.lock().identity = Some(identity);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn close(&self) {
        let was_holding = {
            let mut zone = self.zone.lock();
            zone.identity = None;
            std::mem::take(&mut zone.holding)
        };
        if was_holding {
            self.line.release();
        }
    }

    fn turn_on(&self) -> Result<()> {
        self.request(MODE_CONSTANT).map(drop)
    }

    fn turn_off(&self) -> Result<()> {
        self.request(MODE_STANDBY).map(drop)
    }

    fn go_temp(&self, target: f64, ref_mode: RefMode) -> Result<()> {
        check_target(target)?;

        self.request(&command::set_ref(ref_mode))?;
        self.request(MODE_CONSTANT)?;
        self.request(&command::set_temperature(target))?;

        wait_for_target(target, || self.read_temperature()).map(drop)
    }

    fn go_temp_ramp(&self, target: f64, duration: Duration, ref_mode: RefMode) -> Result<()> {
        check_target(target)?;
        let seconds = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        validate_ramp_seconds(seconds).map_err(ChamberError::InvalidRequest)?;

        let current = self.temperature()?.monitored();
        self.request(&command::ramp_program(current, target, duration, ref_mode))?;

        settle(|| self.read_temperature())
    }

    fn temperature(&self) -> Result<TemperaturePoint> {
        retry_once(TEMP_QUERY, || self.read_temperature())
    }

    fn info(&self) -> String {
        self.zone
            .lock()
            .identity
            .as_deref()
            .map(|identity| model_label(identity).to_string())
            .unwrap_or_default()
    }
}
