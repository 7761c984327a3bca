// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Periodic reporting of the stack's performance counters.

use crate::perf::{FrameReport, PerfMonitor};
use snax_core::Stopwatch;
use std::rc::Rc;
use std::time::Duration;

/// Service that publishes the performance monitor's reports at a fixed interval.
#[derive(Debug)]
pub struct TelemetryService {
    monitor: Rc<PerfMonitor>,
    last_update: Stopwatch,
    update_interval: Duration,
    published: u64,
}

impl TelemetryService {
    /// Creates a new telemetry service with the given update interval.
    pub fn new(monitor: Rc<PerfMonitor>, update_interval: Duration) -> Self {
        Self {
            monitor,
            last_update: Stopwatch::new(),
            update_interval,
            published: 0,
        }
    }

    /// Should be called once per frame, after the frame ended.
    /// Logs the last frame report if the interval has passed and returns it.
    pub fn tick(&mut self) -> Option<FrameReport> {
        if self.last_update.elapsed().unwrap_or_default() < self.update_interval {
            return None;
        }
        let report = self.monitor.last_frame_report();
        log::info!("{}", report.to_string().trim_end());
        self.last_update.restart();
        self.published += 1;
        Some(report)
    }

    /// Number of reports published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Returns the monitor the service reads from.
    pub fn monitor(&self) -> &Rc<PerfMonitor> {
        &self.monitor
    }
}
