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

//! Human-readable call chains for diagnostics.

use super::{RecordInfo, RecordKindTag};
use std::fmt;

/// One frame of a [`StackTrace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceEntry {
    /// The record at this frame.
    pub record: RecordInfo,
    /// Label of the chip that made the call or is linked to the parameter.
    pub chip: Option<String>,
    /// Reference count of the record when the trace was taken.
    pub ref_count: u32,
    /// Name of the instance the record pins, if any.
    pub instance: Option<String>,
}

/// The chain of records from the current one back to the root, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    /// The frames, innermost first.
    pub entries: Vec<StackTraceEntry>,
}

impl StackTrace {
    /// Number of frames in the trace.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the trace holds no frame (the stack is not running).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The behavior and parameter names from innermost to outermost.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.record.label.as_str()).collect()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "<empty stack>");
        }
        for entry in &self.entries {
            let record = &entry.record;
            match record.kind {
                RecordKindTag::Root => writeln!(f, "  {} <root> refs={}", record.index, entry.ref_count)?,
                RecordKindTag::FunctionCall => {
                    write!(
                        f,
                        "  {} call  {} from '{}' ({}) refs={}",
                        record.index,
                        record.label,
                        entry.chip.as_deref().unwrap_or("?"),
                        record.id,
                        entry.ref_count
                    )?;
                    match &entry.instance {
                        Some(name) => writeln!(f, " on '{name}'")?,
                        None => writeln!(f)?,
                    }
                }
                RecordKindTag::ParameterCall => writeln!(
                    f,
                    "  {} param {} -> '{}' ({}, scope {}) refs={}",
                    record.index,
                    record.label,
                    entry.chip.as_deref().unwrap_or("?"),
                    record.id,
                    record.origin,
                    entry.ref_count
                )?,
            }
        }
        Ok(())
    }
}
