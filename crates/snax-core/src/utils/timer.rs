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

//! A high-resolution stopwatch used to attribute time to stack records.

use std::time::{Duration, Instant};

/// A stopwatch that can be stopped, restarted and read in laps.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start_time: Option<Instant>,
    lap_time: Option<Instant>,
}

impl Stopwatch {
    /// Creates a new, running stopwatch.
    #[inline]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: Some(now),
            lap_time: Some(now),
        }
    }

    /// Creates a stopwatch that has not been started yet.
    #[inline]
    pub fn stopped() -> Self {
        Self {
            start_time: None,
            lap_time: None,
        }
    }

    /// (Re)starts the stopwatch from zero.
    #[inline]
    pub fn restart(&mut self) {
        *self = Self::new();
    }

    /// Stops the stopwatch, returning the total elapsed time if it was running.
    #[inline]
    pub fn stop(&mut self) -> Option<Duration> {
        let elapsed = self.elapsed();
        self.start_time = None;
        self.lap_time = None;
        elapsed
    }

    /// Returns `true` while the stopwatch is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Returns the elapsed time since the stopwatch was started, or `None` if it is stopped.
    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    /// Returns the time since the previous lap (or the start) and begins a new lap.
    #[inline]
    pub fn lap(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let lap = self.lap_time.map(|last| now.duration_since(last));
        if lap.is_some() {
            self.lap_time = Some(now);
        }
        lap
    }
}
