//! Command-line tests: argument parsing and full command runs against a
//! relay on localhost

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use ch_core::settings::{load_settings_from, save_settings_to};
use ch_core::{RefMode, Settings};
use chambers::{run_cli, Cli, Commands};
use clap::Parser;
use common::{FakeDevice, FakeRelay};
use serial_test::serial;
use tempfile::TempDir;

fn settings_with_descriptor(dir: &TempDir, descriptor: &str) -> PathBuf {
    let path = dir.path().join("settings.json");
    let mut settings = Settings::default();
    settings.client.descriptor = Some(descriptor.to_string());
    settings.client.points_dir = Some(dir.path().join("points"));
    save_settings_to(&settings, &path).unwrap();
    path
}

fn run(args: &[&str]) -> anyhow::Result<String> {
    let cli = Cli::try_parse_from(args)?;
    let mut out = Vec::new();
    run_cli(&cli, &mut out)?;
    Ok(String::from_utf8(out)?)
}

fn config_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_negative_target() {
    let cli = Cli::try_parse_from(["chambers", "go", "-40"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Go {
            target: -40.0,
            ref_mode: RefMode::Auto
        }
    );
}

#[test]
fn test_parse_ramp_with_ref_mode() {
    let cli = Cli::try_parse_from([
        "chambers", "-d", "COM3", "ramp", "85", "--minutes", "90", "--ref", "off",
    ])
    .unwrap();
    assert_eq!(cli.descriptor.as_deref(), Some("COM3"));
    assert_eq!(
        cli.command,
        Commands::Ramp {
            target: 85.0,
            minutes: 90,
            ref_mode: RefMode::Off
        }
    );
}

#[test]
fn test_parse_rejects_unknown_ref_mode() {
    assert!(Cli::try_parse_from(["chambers", "go", "25", "--ref", "maybe"]).is_err());
}

#[test]
fn test_parse_global_channel_after_subcommand() {
    let cli = Cli::try_parse_from(["chambers", "temp", "--channel", "-1"]).unwrap();
    assert_eq!(cli.channel, Some(-1));
}

// ============================================================================
// Commands against a relay
// ============================================================================

#[test]
fn test_temp_prints_reading() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));

    let output = run(&["chambers", "--config", &config_arg(&config), "temp"]).unwrap();
    assert!(output.contains("Monitored: 23.456 °C"), "{}", output);
    assert!(output.contains("Target:    25.000 °C"), "{}", output);
    assert!(output.contains("Delta:     +1.544 °C"), "{}", output);
}

#[test]
fn test_descriptor_flag_overrides_settings() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, "127.0.0.1:1:unused");

    let output = run(&[
        "chambers",
        "--config",
        &config_arg(&config),
        "-d",
        &relay.descriptor("1"),
        "info",
    ])
    .unwrap();
    assert_eq!(output.trim(), "MC811");
}

#[test]
fn test_missing_descriptor_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("absent.json");

    let err = run(&["chambers", "--config", &config_arg(&config), "temp"]).unwrap_err();
    assert!(err.to_string().contains("No chamber descriptor"));
}

#[test]
fn test_go_and_off() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));

    let output = run(&["chambers", "--config", &config_arg(&config), "go", "85", "--ref", "on"]).unwrap();
    assert!(output.contains("Going to 85.0 °C (ref on)"), "{}", output);
    assert!(output.contains("Reached 84.980 °C"), "{}", output);

    run(&["chambers", "--config", &config_arg(&config), "off"]).unwrap();
    assert!(!relay.device.lock().unwrap().running);
}

#[test]
fn test_device_error_surfaces() {
    let relay = FakeRelay::start(FakeDevice {
        temperature_error: Some("E123".into()),
        ..FakeDevice::default()
    });
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));

    let err = run(&["chambers", "--config", &config_arg(&config), "temp"]).unwrap_err();
    assert_eq!(err.to_string(), "E123");
}

#[test]
fn test_watch_saves_point_log() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));
    let log = dir.path().join("run.json");

    let output = run(&[
        "chambers",
        "--config",
        &config_arg(&config),
        "watch",
        "-n",
        "3",
        "--interval-ms",
        "0",
        "--out",
        &config_arg(&log),
    ])
    .unwrap();
    assert!(output.contains("Saved 3 points"), "{}", output);

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&log).unwrap()).unwrap();
    let points = saved["points"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["monitored"], "23.456");
    assert_eq!(points[2]["target"], "25.000");
}

#[test]
fn test_watch_defaults_to_points_dir() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));

    run(&[
        "chambers",
        "--config",
        &config_arg(&config),
        "watch",
        "-n",
        "1",
        "--interval-ms",
        "0",
    ])
    .unwrap();

    let logs: Vec<_> = fs::read_dir(dir.path().join("points")).unwrap().collect();
    assert_eq!(logs.len(), 1);
}

#[test]
fn test_ping_reports_relay() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("absent.json");

    let output = run(&[
        "chambers",
        "--config",
        &config_arg(&config),
        "-d",
        &relay.descriptor("1"),
        "ping",
    ])
    .unwrap();
    assert!(output.contains("pong"), "{}", output);
    assert!(output.contains("Version: 0.1.0"), "{}", output);
}

#[test]
fn test_ping_rejects_local_port() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("absent.json");

    let err = run(&["chambers", "--config", &config_arg(&config), "-d", "COM3", "ping"]).unwrap_err();
    assert!(err.to_string().contains("local port"));
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn test_config_init_writes_defaults_once() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("settings.json");

    let output = run(&["chambers", "--config", &config_arg(&config), "config", "--init"]).unwrap();
    assert!(output.contains("Wrote default settings"));
    assert_eq!(load_settings_from(&config).unwrap(), Settings::default());

    assert!(run(&["chambers", "--config", &config_arg(&config), "config", "--init"]).is_err());
}

#[test]
fn test_config_shows_effective_settings() {
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, "COM7");

    let output = run(&["chambers", "--config", &config_arg(&config), "config"]).unwrap();
    assert!(output.contains("\"descriptor\": \"COM7\""), "{}", output);
}

#[test]
#[serial]
fn test_settings_location_from_environment() {
    let relay = FakeRelay::start(FakeDevice::default());
    let dir = TempDir::new().unwrap();
    let config = settings_with_descriptor(&dir, &relay.descriptor("1"));

    std::env::set_var("CHAMBERS_CONFIG", &config);
    let result = run(&["chambers", "info"]);
    std::env::remove_var("CHAMBERS_CONFIG");

    assert_eq!(result.unwrap().trim(), "MC811");
}
