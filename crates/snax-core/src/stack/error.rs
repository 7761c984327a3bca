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

//! Defines the errors raised by the evaluation stack.

use super::RecordIndex;
use std::fmt;

/// A specialized `Result` type for stack operations.
pub type StackResult<T> = Result<T, StackError>;

/// An error raised by the [`FunctionStack`](super::FunctionStack).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A call was attempted outside of `start_of_frame` / `end_of_frame`.
    NotRunning,
    /// The record store is full; the graph recursed deeper than the stack allows.
    Overflow {
        /// The fixed capacity of the store.
        capacity: usize,
    },
    /// A record refused a further reference; the graph probably loops forever.
    ReferenceLimit {
        /// The record that refused the reference.
        index: RecordIndex,
        /// The configured ceiling.
        limit: u32,
    },
    /// A parameter was read while no function call was active.
    ParameterOutsideFunction,
    /// A data or parameter slot id is outside the configured range.
    SlotOutOfRange {
        /// The requested slot.
        slot: u16,
        /// The number of available slots.
        max: usize,
    },
    /// The stack did not unwind to the root at the end of the frame.
    Corruption {
        /// Number of records left on the stack (1 expected).
        depth: usize,
        /// Reference count of the root record (1 expected).
        root_refs: u32,
        /// The current record pointer (the root expected).
        current: RecordIndex,
    },
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::NotRunning => write!(f, "The function stack is not running a frame."),
            StackError::Overflow { capacity } => {
                write!(f, "Function stack overflow: all {capacity} records are in use.")
            }
            StackError::ReferenceLimit { index, limit } => write!(
                f,
                "Record {index} reached its reference limit of {limit}; possible infinite loop."
            ),
            StackError::ParameterOutsideFunction => {
                write!(f, "A parameter call requires an enclosing function call.")
            }
            StackError::SlotOutOfRange { slot, max } => {
                write!(f, "Slot {slot} is out of range (max {max}).")
            }
            StackError::Corruption {
                depth,
                root_refs,
                current,
            } => write!(
                f,
                "Function stack corrupted at end of frame: {depth} record(s) left (expected 1), \
                 root reference count {root_refs} (expected 1), current record {current} (expected #0)."
            ),
        }
    }
}

impl std::error::Error for StackError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_error_display() {
        assert_eq!(
            StackError::Overflow { capacity: 8 }.to_string(),
            "Function stack overflow: all 8 records are in use."
        );
        assert_eq!(
            StackError::ReferenceLimit {
                index: RecordIndex::new(3),
                limit: 10
            }
            .to_string(),
            "Record #3 reached its reference limit of 10; possible infinite loop."
        );

        let err = StackError::Corruption {
            depth: 2,
            root_refs: 1,
            current: RecordIndex::ROOT,
        };
        assert!(err.to_string().contains("2 record(s) left"));
    }
}
