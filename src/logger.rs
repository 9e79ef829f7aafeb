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

//! Logging setup for the command-line tool
//!
//! Diagnostics go to stderr so command output on stdout stays scriptable.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "CHAMBERS_LOG";

/// Filter used when `CHAMBERS_LOG` is unset
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

pub fn init_logging(verbose: bool) {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| default_filter(verbose).to_string());

    // A second init (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}
