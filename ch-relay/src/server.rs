//! TCP relay server
//!
//! Newline-delimited JSON over TCP. Each connection binds to at most one
//! device through `Open`; later requests on that connection act on it.
//!
//! # Limits
//! - **Connections**: capped by `relay.max_connections`
//! - **Messages**: [`MAX_MESSAGE_SIZE`] per line, enforced before buffering
//! - **Idle**: connections with no request for [`READ_TIMEOUT`] are dropped
//!
//! Device calls block on the serial line, so they run on the blocking pool.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ch_core::{ChamberBackend, ChamberError, DirectLineBackend};
use ch_protocol::{
    Payload, Reply, Request, RequestEnvelope, MAX_MESSAGE_SIZE, STATUS_FAILED,
    STATUS_INVALID_REQUEST, STATUS_NOT_OPEN,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::registry::DeviceRegistry;

/// Idle time allowed between requests
const READ_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Accept connections until `shutdown` is notified
pub async fn run_server(
    listener: TcpListener,
    registry: Arc<DeviceRegistry>,
    max_connections: usize,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    let mut accepted: u64 = 0;

    info!(
        "Listening on {} (max_conn={}, max_msg={})",
        listener.local_addr()?,
        max_connections,
        MAX_MESSAGE_SIZE
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= max_connections {
                            warn!("Connection limit reached ({}), rejecting {}", current, peer);
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        accepted += 1;
                        let registry = registry.clone();
                        let active = active.clone();

                        tokio::spawn(async move {
                            handle_client(stream, peer, registry).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.notified() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    info!("Server stopped (handled {} connections)", accepted);
    Ok(())
}

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, registry: Arc<DeviceRegistry>) {
    info!("Connection from {}", peer);
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut session = Session::new(peer, registry);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        match timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await {
            Ok(Ok(0)) => {
                debug!(
                    "Client {} disconnected: requests={}, duration={:?}",
                    peer,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from {}: {} bytes", request_count, peer, n);

                let reply = match std::str::from_utf8(&line) {
                    Ok(text) => session.process(text.trim_end()).await,
                    Err(_) => Reply::failed(0, STATUS_INVALID_REQUEST, "Invalid request encoding"),
                };

                if send_reply(&mut writer, &reply).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!("Message too large (>{} bytes) from {}", MAX_MESSAGE_SIZE, peer);
                    let reply = Reply::failed(0, STATUS_INVALID_REQUEST, "Message too large");
                    let _ = send_reply(&mut writer, &reply).await;
                } else {
                    error!("Read error from {}: {}", peer, e);
                }
                break;
            }
            Err(_) => {
                debug!("Idle timeout for {}", peer);
                break;
            }
        }
    }

    if let Err(e) = session.release().await {
        warn!("Releasing device for {} failed: {}", peer, e);
    }
}

async fn send_reply(writer: &mut OwnedWriteHalf, reply: &Reply) -> Result<(), ()> {
    let mut json = match serde_json::to_vec(reply) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize reply: {}", e);
            br#"{"id":0,"status":1,"error":"Serialization error"}"#.to_vec()
        }
    };
    json.push(b'\n');

    match timeout(WRITE_TIMEOUT, writer.write_all(&json)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Per-connection state: the device this connection opened, if any
struct Session {
    peer: SocketAddr,
    registry: Arc<DeviceRegistry>,
    device: Option<(String, Arc<DirectLineBackend>)>,
}

impl Session {
    fn new(peer: SocketAddr, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            peer,
            registry,
            device: None,
        }
    }

    async fn process(&mut self, line: &str) -> Reply {
        let envelope: RequestEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Invalid request from {}: {}", self.peer, e);
                return Reply::failed(0, STATUS_INVALID_REQUEST, format!("Invalid request: {}", e));
            }
        };
        let id = envelope.id;
        let request = envelope.request;

        if let Err(e) = request.validate() {
            warn!("Rejected {} from {}: {}", request.type_name(), self.peer, e);
            return Reply::failed(id, STATUS_INVALID_REQUEST, e);
        }

        if request.is_mutating() {
            info!(
                "AUDIT: {:?} device={} by {}",
                request,
                self.device_id().unwrap_or("-"),
                self.peer
            );
        }

        match request {
            Request::Ping => Reply::ok(id, Payload::info("pong")),
            Request::Version => Reply::ok(id, Payload::info(VERSION)),
            Request::Open { port, channel } => self.open(id, port, channel).await,
            Request::Close => match self.release().await {
                Ok(()) => Reply::ok(id, Payload::none()),
                Err(e) => failed(id, e),
            },
            request => {
                let Some((_, backend)) = self.device.clone() else {
                    return Reply::failed(id, STATUS_NOT_OPEN, "No device opened on this connection");
                };
                device_call(id, backend, request).await
            }
        }
    }

    /// Give up this connection's hold on its device, if any
    async fn release(&mut self) -> ch_core::Result<()> {
        let Some((device_id, backend)) = self.device.take() else {
            return Ok(());
        };
        debug!("{} releasing device {}", self.peer, device_id);
        run_blocking(move || {
            backend.close();
            Ok(())
        })
        .await
    }

    fn device_id(&self) -> Option<&str> {
        self.device.as_ref().map(|(id, _)| id.as_str())
    }

    async fn open(&mut self, id: u64, device_id: String, channel: i32) -> Reply {
        let channel = match ch_core::Channel::from_raw(channel) {
            Ok(channel) => channel,
            Err(e) => return Reply::failed(id, STATUS_INVALID_REQUEST, e.to_string()),
        };

        if let Err(e) = self.release().await {
            warn!("Releasing previous device for {} failed: {}", self.peer, e);
        }

        let port = self.registry.port_for(&device_id).to_string();
        let backend = self.registry.backend(&device_id);

        let opening = backend.clone();
        match run_blocking(move || opening.open(&port, channel)).await {
            Ok(()) => {
                self.device = Some((device_id, backend));
                Reply::ok(id, Payload::none())
            }
            Err(e) => failed(id, e),
        }
    }
}

fn failed(id: u64, error: ChamberError) -> Reply {
    warn!("Request {} failed: {}", id, error);
    Reply::failed(id, STATUS_FAILED, error.to_string())
}

async fn run_blocking<T, F>(op: F) -> ch_core::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> ch_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ChamberError::RelayProtocol(format!("Device task failed: {}", e)))?
}

async fn device_call(id: u64, backend: Arc<DirectLineBackend>, request: Request) -> Reply {
    let result = run_blocking(move || match request {
        Request::TurnOn => backend.turn_on().map(|_| Payload::none()),
        Request::TurnOff => backend.turn_off().map(|_| Payload::none()),
        Request::GetInfo => Ok(Payload::info(backend.identity().unwrap_or_default())),
        Request::GetTemperature => backend
            .temperature()
            .map(|point| Payload::temperature(point.monitored(), point.target())),
        Request::GoTemp { temperature, ref_mode } => {
            backend.go_temp(temperature, ref_mode).map(|_| Payload::none())
        }
        Request::GoTempRamp { temperature, seconds, ref_mode } => backend
            .go_temp_ramp(temperature, Duration::from_secs(u64::from(seconds)), ref_mode)
            .map(|_| Payload::none()),
        other => Err(ChamberError::InvalidRequest(format!(
            "{} is not a device call",
            other.type_name()
        ))),
    })
    .await;

    match result {
        Ok(payload) => Reply::ok(id, payload),
        Err(e) => failed(id, e),
    }
}
