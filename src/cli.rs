/*
 * This file is part of Chambers.
 *
 * Copyright (C) 2025 Chambers contributors
 *
 * Chambers is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Chambers is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Chambers. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! One subcommand per chamber operation, plus recording, relay health and
//! settings management.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use ch_core::direct::available_ports;
use ch_core::point_log::log_path;
use ch_core::settings::{load_settings_from, save_settings_to, settings_path};
use ch_core::{
    save_points, Chamber, Channel, ConnectionDescriptor, RefMode, RemoteBackend, Settings,
    TemperaturePoint,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::recorder::{Recorder, RecorderOptions};

#[derive(Parser, Debug)]
#[command(name = "chambers")]
#[command(version)]
#[command(about = "Chambers - temperature chamber control")]
#[command(long_about = "Chambers - temperature chamber control

Drives ESPEC-style temperature chambers on a local serial line or through
a chamberd relay. The descriptor selects the transport: a port name such
as COM3 or /dev/ttyUSB0 is opened directly, host:port:deviceId goes
through the relay at host:port.

EXAMPLES:
    chambers -d /dev/ttyUSB0 info          Show the chamber model
    chambers -d 10.0.0.5:5000:1 temp       Read monitored and target values
    chambers go 85 --ref on                Hold 85 °C, wait until reached
    chambers go -40                        Cold soak at -40 °C
    chambers ramp 25 --minutes 90          Linear ramp to 25 °C over 90 min
    chambers watch -n 600 -o run.json      Record 600 readings to run.json
    chambers -d 10.0.0.5:5000:1 ping       Check the relay is alive
    chambers config --init                 Write default settings

ENVIRONMENT VARIABLES:
    CHAMBERS_LOG=debug     Log filter (shows every line sent and received)
    CHAMBERS_CONFIG=PATH   Settings file location

FILES:
    ~/.config/chambers/settings.json       Client and relay settings")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Chamber descriptor: a serial port or host:port:deviceId
    #[arg(short, long, global = true)]
    pub descriptor: Option<String>,

    /// Channel on a multi-zone chassis, -1 for none
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub channel: Option<i32>,

    /// Settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging when CHAMBERS_LOG is unset
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Show the chamber model
    Info,

    /// Read the monitored and target temperature
    Temp,

    /// Start constant-temperature operation
    On,

    /// Put the chamber in standby
    Off,

    /// Set a target and wait until the chamber reaches it
    Go {
        /// Target temperature in °C
        #[arg(allow_negative_numbers = true)]
        target: f64,

        /// Refrigeration mode: auto, on, off or none
        #[arg(long = "ref", default_value = "auto")]
        ref_mode: RefMode,
    },

    /// Ramp linearly from the current temperature to a target
    Ramp {
        /// Target temperature in °C
        #[arg(allow_negative_numbers = true)]
        target: f64,

        /// Ramp length in minutes
        #[arg(short, long)]
        minutes: u64,

        /// Refrigeration mode: auto, on, off or none
        #[arg(long = "ref", default_value = "auto")]
        ref_mode: RefMode,
    },

    /// Record readings at a fixed interval and save them as a point log
    Watch {
        /// Number of readings; runs until Ctrl-C when omitted
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Milliseconds between readings
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,

        /// Point log file; defaults to a timestamped file in client.points_dir
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check that the relay in the descriptor answers
    Ping,

    /// List serial ports on this machine
    Ports,

    /// Show the effective settings
    Config {
        /// Write default settings if no settings file exists
        #[arg(long)]
        init: bool,
    },
}

// ============================================================================
// CLI Execution
// ============================================================================

pub fn run_cli(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    execute_command(cli, &settings, &path, out)
}

fn execute_command(
    cli: &Cli,
    settings: &Settings,
    path: &Path,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Ports => cmd_ports(out),
        Commands::Config { init } => cmd_config(settings, path, *init, out),
        Commands::Ping => cmd_ping(&resolve_descriptor(cli, settings)?, settings, out),
        command => {
            let chamber = connect(cli, settings)?;
            run_chamber_command(&chamber, command, settings, out)
        }
    }
}

/// Descriptor from the command line, else from settings
pub fn resolve_descriptor(cli: &Cli, settings: &Settings) -> anyhow::Result<String> {
    cli.descriptor
        .clone()
        .or_else(|| settings.client.descriptor.clone())
        .context("No chamber descriptor: pass --descriptor or set client.descriptor in the settings file")
}

/// Channel from the command line, else from settings
pub fn resolve_channel(cli: &Cli, settings: &Settings) -> anyhow::Result<Channel> {
    let channel = match cli.channel {
        Some(raw) => Channel::from_raw(raw)?,
        None => settings.client.channel()?,
    };
    Ok(channel)
}

pub fn connect(cli: &Cli, settings: &Settings) -> anyhow::Result<Chamber> {
    let descriptor = resolve_descriptor(cli, settings)?;
    let channel = resolve_channel(cli, settings)?;

    let chamber = Chamber::from_settings(&settings.client);
    chamber
        .connect(&descriptor, channel)
        .with_context(|| format!("Failed to connect to {}", descriptor))?;
    Ok(chamber)
}

/// Run one command against a connected chamber
pub fn run_chamber_command(
    chamber: &Chamber,
    command: &Commands,
    settings: &Settings,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Info => cmd_info(chamber, out),
        Commands::Temp => cmd_temp(chamber, out),
        Commands::On => {
            chamber.turn_on()?;
            writeln!(out, "Chamber running")?;
            Ok(())
        }
        Commands::Off => {
            chamber.turn_off()?;
            writeln!(out, "Chamber in standby")?;
            Ok(())
        }
        Commands::Go { target, ref_mode } => cmd_go(chamber, *target, *ref_mode, out),
        Commands::Ramp {
            target,
            minutes,
            ref_mode,
        } => cmd_ramp(chamber, *target, *minutes, *ref_mode, out),
        Commands::Watch {
            count,
            interval_ms,
            out: log_file,
        } => {
            let mut recorder = Recorder::new(RecorderOptions {
                count: *count,
                interval: Duration::from_millis(*interval_ms),
            });
            if count.is_none() {
                install_stop_handler(recorder.stop_handle());
            }
            cmd_watch(chamber, &mut recorder, log_file.as_deref(), settings, out)
        }
        Commands::Ping | Commands::Ports | Commands::Config { .. } => {
            bail!("{:?} does not run against a chamber", command)
        }
    }
}

// ============================================================================
// Chamber Commands
// ============================================================================

fn cmd_info(chamber: &Chamber, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{}", chamber.chamber_info())?;
    Ok(())
}

fn cmd_temp(chamber: &Chamber, out: &mut dyn Write) -> anyhow::Result<()> {
    let point = chamber.temperature()?;
    writeln!(out, "Monitored: {:.3} °C", point.monitored())?;
    writeln!(out, "Target:    {:.3} °C", point.target())?;
    writeln!(out, "Delta:     {:+.3} °C", point.delta())?;
    Ok(())
}

fn cmd_go(chamber: &Chamber, target: f64, ref_mode: RefMode, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "Going to {:.1} °C (ref {})", target, ref_mode)?;
    out.flush()?;

    let started = Instant::now();
    chamber.go_temp(target, ref_mode)?;
    let point = chamber.temperature()?;
    writeln!(
        out,
        "Reached {:.3} °C in {}s",
        point.monitored(),
        started.elapsed().as_secs()
    )?;
    Ok(())
}

fn cmd_ramp(
    chamber: &Chamber,
    target: f64,
    minutes: u64,
    ref_mode: RefMode,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    writeln!(
        out,
        "Ramping to {:.1} °C over {} min (ref {})",
        target, minutes, ref_mode
    )?;
    out.flush()?;

    chamber.go_temp_ramp(target, Duration::from_secs(minutes.saturating_mul(60)), ref_mode)?;
    let point = chamber.temperature()?;
    writeln!(out, "Ramp finished at {:.3} °C", point.monitored())?;
    Ok(())
}

fn install_stop_handler(stop: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
        warn!("Failed to set Ctrl-C handler: {}. Recording can only end on error.", e);
    }
}

fn cmd_watch(
    chamber: &Chamber,
    recorder: &mut Recorder,
    log_file: Option<&Path>,
    settings: &Settings,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let started = Local::now();
    let destination = log_file.map(Path::to_path_buf).or_else(|| {
        settings
            .client
            .points_dir
            .as_deref()
            .map(|dir| log_path(dir, started))
    });

    writeln!(out, "{:<12} {:>10} {:>10}", "TIME", "MONITORED", "TARGET")?;
    let mut write_failed = None;
    let result = recorder.run(chamber, |point| {
        if let Err(e) = write_point(out, point) {
            if write_failed.is_none() {
                write_failed = Some(e);
            }
        }
    });

    match &destination {
        Some(path) if !recorder.points().is_empty() => {
            save_points(recorder.points(), path)
                .with_context(|| format!("Failed to save points to {}", path.display()))?;
            writeln!(out, "Saved {} points to {}", recorder.points().len(), path.display())?;
        }
        Some(_) => {}
        None => writeln!(out, "Points not saved: pass --out or set client.points_dir")?,
    }

    if let Some(e) = write_failed {
        return Err(e.into());
    }
    result.context("Recording failed")
}

fn write_point(out: &mut dyn Write, point: &TemperaturePoint) -> std::io::Result<()> {
    writeln!(
        out,
        "{:<12} {:>10.3} {:>10.3}",
        point.time().format("%H:%M:%S%.3f"),
        point.monitored(),
        point.target()
    )
}

// ============================================================================
// Relay, Ports and Settings Commands
// ============================================================================

fn cmd_ping(descriptor: &str, settings: &Settings, out: &mut dyn Write) -> anyhow::Result<()> {
    let parsed = ConnectionDescriptor::parse(descriptor)?;
    let Some(address) = parsed.relay_address() else {
        bail!("{} is a local port; ping needs host:port:deviceId", descriptor);
    };

    let backend = RemoteBackend::new(settings.client.remote_timeout());
    let started = Instant::now();
    backend
        .connect(&address)
        .with_context(|| format!("Relay {} unreachable", address))?;
    let reply = backend.ping()?;
    let elapsed = started.elapsed();
    let version = backend.relay_version()?;

    writeln!(out, "Relay:   {}", address)?;
    writeln!(out, "Reply:   {} ({} ms)", reply, elapsed.as_millis())?;
    writeln!(out, "Version: {}", version)?;
    Ok(())
}

fn cmd_ports(out: &mut dyn Write) -> anyhow::Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        writeln!(out, "No serial ports found")?;
        return Ok(());
    }

    writeln!(out, "{:<24} {:<20} DESCRIPTION", "PORT", "TYPE")?;
    for port in ports {
        writeln!(
            out,
            "{:<24} {:<20} {}",
            port.name,
            port.kind,
            port.description.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

fn cmd_config(settings: &Settings, path: &Path, init: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        save_settings_to(&Settings::default(), path)?;
        writeln!(out, "Wrote default settings to {}", path.display())?;
        return Ok(());
    }

    writeln!(out, "# {}", path.display())?;
    writeln!(out, "{}", serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
