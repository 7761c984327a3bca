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

//! Serializable per-frame performance reports.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Counters of one behavior or parameter over a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipReport {
    /// The behavior or parameter name.
    pub label: String,
    /// Number of times the record was entered.
    pub calls: u64,
    /// Time spent in the record itself, in microseconds.
    pub self_time_us: u64,
    /// Time spent in the records it called, in microseconds.
    pub child_time_us: u64,
}

impl ChipReport {
    /// Self time plus child time.
    pub fn total_time_us(&self) -> u64 {
        self.self_time_us + self.child_time_us
    }
}

/// Performance of a whole frame, most expensive entries first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    /// The frame number.
    pub frame: u64,
    /// Wall time between the start and the end of the frame, in microseconds.
    pub frame_time_us: u64,
    /// Per-label counters, sorted by descending self time.
    pub entries: Vec<ChipReport>,
}

impl FrameReport {
    /// Finds the entry of `label`.
    pub fn entry(&self, label: &str) -> Option<&ChipReport> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    /// Serializes the report to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a report previously produced by [`FrameReport::to_json`].
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }

    /// Writes the report as JSON to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self
            .to_json()
            .context("Failed to serialize frame report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write frame report to '{}'", path.display()))?;
        Ok(())
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Frame {} took {:.3} ms",
            self.frame,
            self.frame_time_us as f64 / 1000.0
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  {:<24} calls={:<6} self={:>8}us child={:>8}us",
                entry.label, entry.calls, entry.self_time_us, entry.child_time_us
            )?;
        }
        Ok(())
    }
}
