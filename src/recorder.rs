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

//! Temperature recording
//!
//! Polls a chamber at a fixed interval and keeps every reading so the run
//! can be saved as a point log afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ch_core::{Chamber, Result, TemperaturePoint};
use tracing::{debug, warn};

/// Anything that can produce a reading
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource {
    fn temperature(&self) -> Result<TemperaturePoint>;
}

impl TemperatureSource for Chamber {
    fn temperature(&self) -> Result<TemperaturePoint> {
        Chamber::temperature(self)
    }
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Stop after this many readings; `None` runs until stopped
    pub count: Option<usize>,
    pub interval: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            count: None,
            interval: Duration::from_secs(1),
        }
    }
}

pub struct Recorder {
    options: RecorderOptions,
    stop: Arc<AtomicBool>,
    points: Vec<TemperaturePoint>,
}

impl Recorder {
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            options,
            stop: Arc::new(AtomicBool::new(false)),
            points: Vec::new(),
        }
    }

    /// Flag that ends [`run`](Self::run) after the current reading
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn points(&self) -> &[TemperaturePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TemperaturePoint> {
        self.points
    }

    /// Poll `source` until the count is reached, the stop flag is set, or a
    /// read fails. Readings taken before a failure are kept.
    pub fn run(
        &mut self,
        source: &dyn TemperatureSource,
        mut on_point: impl FnMut(&TemperaturePoint),
    ) -> Result<()> {
        loop {
            if self.is_finished() {
                debug!("Recording finished after {} points", self.points.len());
                return Ok(());
            }

            let point = source.temperature().inspect_err(|e| {
                warn!("Recording stopped after {} points: {}", self.points.len(), e);
            })?;
            on_point(&point);
            self.points.push(point);

            if !self.is_finished() {
                std::thread::sleep(self.options.interval);
            }
        }
    }

    fn is_finished(&self) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.options.count, Some(count) if self.points.len() >= count)
    }
}
