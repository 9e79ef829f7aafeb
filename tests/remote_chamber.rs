//! Chamber façade against a relay over real TCP

mod common;

use std::time::Duration;

use ch_core::{Chamber, ChamberError, Channel, ClientSettings, RefMode};
use common::{FakeDevice, FakeRelay};

#[test]
fn test_remote_descriptor_opens_device_and_reads() {
    let relay = FakeRelay::start(FakeDevice::default());
    let chamber = Chamber::new();

    chamber.connect(&relay.descriptor("1"), Channel::NONE).unwrap();
    assert!(chamber.is_connected());
    assert_eq!(chamber.chamber_info(), "MC811");

    let point = chamber.temperature().unwrap();
    assert!((point.monitored() - 23.456).abs() < 1e-9);
    assert!((point.target() - 25.0).abs() < 1e-9);

    let requests = relay.requests.lock().unwrap().clone();
    assert_eq!(
        requests[0],
        ch_protocol::Request::Open {
            port: "1".into(),
            channel: -1
        }
    );
    assert_eq!(relay.request_names()[1..], ["GetInfo", "GetTemperature"]);
}

#[test]
fn test_device_error_text_reaches_caller() {
    let relay = FakeRelay::start(FakeDevice {
        temperature_error: Some("E123".into()),
        ..FakeDevice::default()
    });
    let chamber = Chamber::new();
    chamber.connect(&relay.descriptor("bench"), Channel::new(2)).unwrap();

    let err = chamber.temperature().unwrap_err();
    assert!(matches!(err, ChamberError::Protocol(_)));
    assert_eq!(err.to_string(), "E123");

    // Device errors are not retried
    let reads = relay
        .request_names()
        .iter()
        .filter(|name| **name == "GetTemperature")
        .count();
    assert_eq!(reads, 1);
}

#[test]
fn test_go_temp_returns_once_target_reported() {
    let relay = FakeRelay::start(FakeDevice::default());
    let chamber = Chamber::new();
    chamber.connect(&relay.descriptor("1"), Channel::NONE).unwrap();

    chamber.go_temp(-40.0, RefMode::On).unwrap();

    let point = chamber.temperature().unwrap();
    assert!((point.target() + 40.0).abs() <= 0.05);
    let names = relay.request_names();
    let go = names.iter().position(|name| *name == "GoTemp").unwrap();
    assert_eq!(names[go + 1], "GetTemperature");
}

#[test]
fn test_ramp_settles_with_five_reads() {
    let relay = FakeRelay::start(FakeDevice::default());
    let chamber = Chamber::new();
    chamber.connect(&relay.descriptor("1"), Channel::NONE).unwrap();

    chamber
        .go_temp_ramp(60.0, Duration::from_secs(90 * 60), RefMode::Auto)
        .unwrap();

    let names = relay.request_names();
    let ramp = names.iter().position(|name| *name == "GoTempRamp").unwrap();
    assert_eq!(names[ramp + 1..], ["GetTemperature"; 5]);
    assert!((relay.device.lock().unwrap().target - 60.0).abs() < 1e-9);
}

#[test]
fn test_disconnect_closes_remote_device() {
    let relay = FakeRelay::start(FakeDevice::default());
    let chamber = Chamber::new();
    chamber.connect(&relay.descriptor("1"), Channel::NONE).unwrap();
    chamber.turn_on().unwrap();
    assert!(relay.device.lock().unwrap().running);

    chamber.disconnect();
    assert!(!chamber.is_connected());
    assert_eq!(relay.request_names().last(), Some(&"Close"));
    assert_eq!(chamber.chamber_info(), "");
}

#[test]
fn test_late_reply_does_not_desync_link() {
    let relay = FakeRelay::start(FakeDevice {
        slow_read: Some(Duration::from_millis(300)),
        ..FakeDevice::default()
    });
    let chamber = Chamber::from_settings(&ClientSettings {
        remote_timeout_ms: 200,
        ..ClientSettings::default()
    });
    chamber.connect(&relay.descriptor("1"), Channel::NONE).unwrap();

    // First read times out; the retry skips the late reply and gets its own
    let point = chamber.temperature().unwrap();
    assert!((point.monitored() - 23.456).abs() < 1e-9);

    chamber.turn_on().unwrap();
    assert!(chamber.temperature().is_ok());
    assert!(relay.device.lock().unwrap().running);
}

#[test]
fn test_unreachable_relay_fails_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let chamber = Chamber::new();
    let err = chamber
        .connect(&format!("127.0.0.1:{}:1", port), Channel::NONE)
        .unwrap_err();
    assert!(matches!(err, ChamberError::RelayConnection(_)));
    assert!(!chamber.is_connected());
}

#[test]
fn test_malformed_descriptor_rejected() {
    let chamber = Chamber::new();
    let err = chamber.connect("10.0.0.5:5000", Channel::NONE).unwrap_err();
    assert!(matches!(err, ChamberError::InvalidDescriptor { .. }));
}
