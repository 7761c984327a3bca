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

//! Runtime configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use snax_core::StackConfig;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings of a [`Runtime`](crate::Runtime), usually read from a RON file.
///
/// ```ron
/// (
///     stack: (capacity: 2048, ref_limit: 500),
///     perf_monitoring: true,
///     report_interval_ms: 1000,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Sizing and limits of the evaluation stack.
    pub stack: StackConfig,
    /// Attaches a performance monitor to the stack.
    pub perf_monitoring: bool,
    /// How often the performance report is logged, in milliseconds.
    pub report_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack: StackConfig::default(),
            perf_monitoring: false,
            report_interval_ms: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Reads and validates a RON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime config '{}'", path.display()))?;
        Self::from_ron_str(&source)
            .with_context(|| format!("Failed to load runtime config '{}'", path.display()))
    }

    /// Parses and validates a RON configuration.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).context("Failed to parse RON")?;
        config.stack.validate()?;
        Ok(config)
    }

    /// The report interval as a [`Duration`].
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}
