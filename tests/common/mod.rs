//! In-process stand-in for a `chamberd` relay

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ch_protocol::{Payload, Reply, Request, RequestEnvelope, STATUS_FAILED};

pub const IDENTITY: &str = "T,SCP220,190.0";

/// Device state the fake relay keeps between requests
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub monitored: f64,
    pub target: f64,
    pub running: bool,
    /// Answer `GetTemperature` with this device error instead of a reading
    pub temperature_error: Option<String>,
    /// Hold back the next `GetTemperature` reply this long
    pub slow_read: Option<Duration>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            monitored: 23.456,
            target: 25.0,
            running: false,
            temperature_error: None,
            slow_read: None,
        }
    }
}

pub struct FakeRelay {
    port: u16,
    pub device: Arc<Mutex<FakeDevice>>,
    pub requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeRelay {
    pub fn start(device: FakeDevice) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = Arc::new(Mutex::new(device));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = device.clone();
        let log = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let mut writer = stream.try_clone().unwrap();
                for line in BufReader::new(stream).lines() {
                    let Ok(line) = line else { break };
                    let envelope: RequestEnvelope = serde_json::from_str(&line).unwrap();
                    log.lock().unwrap().push(envelope.request.clone());

                    let mut reply = respond(&mut state.lock().unwrap(), &envelope.request);
                    reply.id = envelope.id;
                    let mut json = serde_json::to_string(&reply).unwrap();
                    json.push('\n');
                    if writer.write_all(json.as_bytes()).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            port,
            device,
            requests,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Remote descriptor for `device_id` on this relay
    pub fn descriptor(&self, device_id: &str) -> String {
        format!("{}:{}", self.address(), device_id)
    }

    pub fn request_names(&self) -> Vec<&'static str> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(Request::type_name)
            .collect()
    }
}

fn respond(device: &mut FakeDevice, request: &Request) -> Reply {
    match request {
        Request::Ping => Reply::ok(0, Payload::info("pong")),
        Request::Version => Reply::ok(0, Payload::info("0.1.0")),
        Request::GetInfo => Reply::ok(0, Payload::info(IDENTITY)),
        Request::GetTemperature => {
            if let Some(delay) = device.slow_read.take() {
                thread::sleep(delay);
            }
            match &device.temperature_error {
                Some(error) => Reply::failed(0, STATUS_FAILED, error.clone()),
                None => Reply::ok(0, Payload::temperature(device.monitored, device.target)),
            }
        }
        Request::TurnOn => {
            device.running = true;
            Reply::ok(0, Payload::none())
        }
        Request::TurnOff => {
            device.running = false;
            Reply::ok(0, Payload::none())
        }
        Request::GoTemp { temperature, .. } | Request::GoTempRamp { temperature, .. } => {
            device.target = *temperature;
            device.monitored = *temperature - 0.02;
            device.running = true;
            Reply::ok(0, Payload::none())
        }
        Request::Open { .. } | Request::Close => Reply::ok(0, Payload::none()),
    }
}
