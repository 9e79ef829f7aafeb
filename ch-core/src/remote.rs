//! Remote backend
//!
//! Drives a chamber attached to a `chamberd` relay. Each backend operation is
//! exactly one request/reply exchange of newline-delimited JSON over TCP.
//! A reply with a nonzero status becomes [`ChamberError::Protocol`] carrying
//! the relay's error text; those are never retried.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ch_error::{ChamberError, Result};
use ch_protocol::{Reply, Request, RequestEnvelope, MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{retry_once, ChamberBackend};
use crate::constants::relay::INITIAL_BUFFER_SIZE;
use crate::descriptor::Channel;
use crate::identity::model_label;
use crate::point::TemperaturePoint;
use crate::RefMode;

/// One request/reply exchange with a relay
#[cfg_attr(test, mockall::automock)]
pub trait RelayLink: Send {
    fn call(&mut self, request: Request) -> Result<Reply>;
}

/// Establishes relay links by `host:port`
#[cfg_attr(test, mockall::automock)]
pub trait RelayConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Box<dyn RelayLink>>;
}

/// JSON-lines client over a TCP socket
pub struct RelayClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    timeout: Duration,
}

impl RelayClient {
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| ChamberError::RelayConnection(format!("Failed to resolve {}: {}", address, e)))?;

        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            ChamberError::RelayConnection(match last_error {
                Some(e) => format!("Failed to connect to relay at {}: {}", address, e),
                None => format!("No addresses found for {}", address),
            })
        })?;

        let reader_stream = stream.try_clone().map_err(|e| {
            ChamberError::RelayConnection(format!("Failed to clone relay socket for reader: {}", e))
        })?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        reader_stream.set_read_timeout(Some(timeout))?;

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader_stream),
            timeout,
        })
    }

    fn read_reply(&mut self, name: &str) -> Result<Reply> {
        // Cap the read so a misbehaving relay cannot grow the buffer unbounded
        let mut buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        let read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .map_err(|e| ChamberError::connection(name, e))?;

        if read == 0 {
            return Err(ChamberError::RelayConnection("Relay closed connection".into()));
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(ChamberError::MessageTooLarge {
                size: buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        serde_json::from_slice(&buf)
            .map_err(|e| ChamberError::RelayProtocol(format!("Failed to parse reply: {}", e)))
    }
}

impl RelayLink for RelayClient {
    fn call(&mut self, request: Request) -> Result<Reply> {
        request.validate().map_err(ChamberError::InvalidRequest)?;

        let name = request.type_name();
        let read_timeout = if request.is_long_running() { None } else { Some(self.timeout) };
        let envelope = RequestEnvelope::new(request);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(ChamberError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.reader.get_ref().set_read_timeout(read_timeout)?;
        self.writer
            .write_all(&json)
            .map_err(|e| ChamberError::connection(name, e))?;

        // Replies to earlier requests that timed out are still queued on the
        // socket ahead of ours; drop them
        let reply = loop {
            let reply = self.read_reply(name)?;
            if reply.id != 0 && reply.id < envelope.id {
                debug!("Discarding late reply {} while waiting for {}", reply.id, envelope.id);
                continue;
            }
            break reply;
        };

        if reply.id != envelope.id {
            return Err(ChamberError::RelayProtocol(format!(
                "Reply ID mismatch: expected {}, got {}",
                envelope.id, reply.id
            )));
        }
        if !reply.matches(&envelope.request) {
            return Err(ChamberError::RelayProtocol(format!(
                "Reply to {} is missing its payload",
                name
            )));
        }

        Ok(reply)
    }
}

/// Connects [`RelayClient`]s with a fixed socket timeout
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RelayConnector for TcpConnector {
    fn connect(&self, address: &str) -> Result<Box<dyn RelayLink>> {
        Ok(Box::new(RelayClient::connect(address, self.timeout)?))
    }
}

/// Chamber behind a `chamberd` relay
pub struct RemoteBackend {
    connector: Box<dyn RelayConnector>,
    link: Mutex<Option<Box<dyn RelayLink>>>,
    identity: Mutex<Option<String>>,
}

impl RemoteBackend {
    pub fn new(timeout: Duration) -> Self {
        Self::with_connector(Box::new(TcpConnector::new(timeout)))
    }

    pub fn with_connector(connector: Box<dyn RelayConnector>) -> Self {
        Self {
            connector,
            link: Mutex::new(None),
            identity: Mutex::new(None),
        }
    }

    /// Establish the relay link, replacing any previous one
    pub fn connect(&self, address: &str) -> Result<()> {
        let link = self.connector.connect(address)?;
        if self.link.lock().replace(link).is_some() {
            debug!("Replaced relay link with {}", address);
        }
        info!("Connected to relay at {}", address);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Relay liveness check; returns the pong text
    pub fn ping(&self) -> Result<String> {
        Ok(self.call(Request::Ping)?.payload.info.unwrap_or_default())
    }

    /// Version string reported by the relay
    pub fn relay_version(&self) -> Result<String> {
        Ok(self.call(Request::Version)?.payload.info.unwrap_or_default())
    }

    fn call(&self, request: Request) -> Result<Reply> {
        let mut link = self.link.lock();
        let link = link.as_mut().ok_or(ChamberError::NotConnected)?;

        let reply = link.call(request)?;
        if !reply.is_ok() {
            return Err(ChamberError::Protocol(if reply.error.is_empty() {
                format!("Relay reported status {}", reply.status)
            } else {
                reply.error
            }));
        }
        Ok(reply)
    }

    fn read_temperature(&self) -> Result<TemperaturePoint> {
        let reply = self.call(Request::GetTemperature)?;
        match (reply.payload.monitored, reply.payload.target) {
            (Some(monitored), Some(target)) => Ok(TemperaturePoint::now(monitored, target)),
            _ => Err(ChamberError::RelayProtocol("Temperature reply without readings".into())),
        }
    }
}

impl ChamberBackend for RemoteBackend {
    fn open(&self, port: &str, channel: Channel) -> Result<()> {
        self.identity.lock().take();
        self.call(Request::Open {
            port: port.to_string(),
            channel: channel.as_raw(),
        })?;

        let identity = self.call(Request::GetInfo)?.payload.info.unwrap_or_default();
        info!(
            "Opened remote device {} (channel {}): {}",
            port,
            channel,
            model_label(&identity)
        );
        *self.identity.lock() = Some(identity);
        Ok(())
    }

    fn close(&self) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.call(Request::Close) {
            warn!("Ignoring relay close failure: {}", e);
        }
    }

    fn turn_on(&self) -> Result<()> {
        self.call(Request::TurnOn).map(drop)
    }

    fn turn_off(&self) -> Result<()> {
        self.call(Request::TurnOff).map(drop)
    }

    fn go_temp(&self, target: f64, ref_mode: RefMode) -> Result<()> {
        self.call(Request::GoTemp {
            temperature: target,
            ref_mode,
        })
        .map(drop)
    }

    fn go_temp_ramp(&self, target: f64, duration: Duration, ref_mode: RefMode) -> Result<()> {
        // Oversized durations saturate and are rejected by request validation
        let seconds = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        self.call(Request::GoTempRamp {
            temperature: target,
            seconds,
            ref_mode,
        })
        .map(drop)
    }

    fn temperature(&self) -> Result<TemperaturePoint> {
        retry_once("GetTemperature", || self.read_temperature())
    }

    fn info(&self) -> String {
        self.identity
            .lock()
            .as_deref()
            .map(|identity| model_label(identity).to_string())
            .unwrap_or_default()
    }
}
