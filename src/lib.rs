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

//! Chambers - temperature chamber control from the command line
//!
//! This library provides the command-line surface over `ch-core`: argument
//! parsing, command execution, temperature recording and logging setup.

pub mod cli;
pub mod logger;
pub mod recorder;

pub use cli::{run_cli, Cli, Commands};
pub use recorder::{Recorder, RecorderOptions, TemperatureSource};
