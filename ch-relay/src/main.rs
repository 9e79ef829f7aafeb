//! Chamber relay daemon (chamberd)
//!
//! Owns the serial lines of one or more temperature chambers and serves the
//! remote call surface over TCP, so operators can drive a chamber with a
//! descriptor such as `10.0.0.5:5000:bench`.
//!
//! Device ids are mapped to serial ports through `relay.devices` in the
//! settings file; an id without a mapping is used as the port name itself.

mod registry;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ch_core::direct::SerialOpener;
use ch_core::settings::{load_settings_from, settings_path};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::registry::DeviceRegistry;
use crate::server::VERSION;

const LOG_ENV: &str = "CHAMBERS_LOG";

fn print_help() {
    eprintln!("chamberd {} - temperature chamber relay", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    chamberd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Settings file (default: $CHAMBERS_CONFIG or ~/.config/chambers/settings.json)");
    eprintln!("    -l, --listen ADDR   Listen address, overrides relay.listen");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    CHAMBERS_LOG        Log filter (trace, debug, info, warn, error)");
    eprintln!("    CHAMBERS_CONFIG     Settings file location");
}

struct Args {
    config: Option<PathBuf>,
    listen: Option<String>,
}

/// `Ok(None)` means help or version was printed
fn parse_args() -> anyhow::Result<Option<Args>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: None,
        listen: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("chamberd {}", VERSION);
                return Ok(None);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).context("--config requires a path argument")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-l" | "--listen" => {
                i += 1;
                let addr = args.get(i).context("--listen requires an address argument")?;
                parsed.listen = Some(addr.clone());
            }
            arg => {
                print_help();
                anyhow::bail!("Unknown argument: {}", arg);
            }
        }
        i += 1;
    }

    Ok(Some(parsed))
}

/// Journald when running under systemd, stdout otherwise
fn init_logging() -> bool {
    use tracing_subscriber::prelude::*;

    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();
    false
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let journald = init_logging();
    info!("STARTUP: chamberd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    let config_path = args.config.unwrap_or_else(settings_path);
    let mut settings = load_settings_from(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    if let Some(listen) = args.listen {
        settings.relay.listen = listen;
        settings.validate().context("Invalid --listen address")?;
    }

    for (device_id, port) in &settings.relay.devices {
        info!("STARTUP: device {} -> {}", device_id, port);
    }

    let listener = TcpListener::bind(&settings.relay.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", settings.relay.listen))?;

    let registry = Arc::new(DeviceRegistry::new(
        settings.relay.clone(),
        settings.client.link_options(),
        Arc::new(SerialOpener),
    ));

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT - initiating shutdown");
        signal.notify_one();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let result = server::run_server(
        listener,
        registry.clone(),
        settings.relay.max_connections,
        shutdown,
    )
    .await;

    let open = registry.open_devices();
    if !open.is_empty() {
        info!("SHUTDOWN: closing open devices {:?}", open);
    }
    registry.close_all();
    info!("SHUTDOWN: all lines closed");

    result.context("Relay server failed")
}
