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

//! Hooks for instrumenting the evaluation stack.
//!
//! The stack itself never measures anything. Profilers implement
//! [`StackObserver`] and are attached with
//! [`FunctionStack::set_observer`](super::FunctionStack::set_observer).

use super::{RecordId, RecordIndex, RecordKindTag};

/// A snapshot of a record handed to observers and stack traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Position of the record.
    pub index: RecordIndex,
    /// Unique id of the activation.
    pub id: RecordId,
    /// What the record was pushed for.
    pub kind: RecordKindTag,
    /// The behavior or parameter name.
    pub label: String,
    /// The record that was current when it was pushed.
    pub prev: RecordIndex,
    /// The function-call record whose scope it serves.
    pub origin: RecordIndex,
    /// Push order within the frame; the root is 0.
    pub pushed_at: u64,
}

/// Receives notifications about the stack's activity.
///
/// Every method has an empty default body. Hooks are called without any
/// borrow of the stack held, so observers may query the stack.
pub trait StackObserver {
    /// A new frame started; the root record is current.
    fn on_frame_start(&self, _frame: u64) {}

    /// The frame ended (successfully or not).
    fn on_frame_end(&self, _frame: u64) {}

    /// A record was pushed.
    fn on_push(&self, _record: &RecordInfo) {}

    /// A record was retired from the top of the stack.
    fn on_pop(&self, _record: &RecordInfo) {}

    /// Execution moved into the scope of `to`.
    fn on_enter(&self, _from: RecordIndex, _to: RecordIndex) {}

    /// Execution returned from `from` to the scope of `to`.
    fn on_exit(&self, _from: RecordIndex, _to: RecordIndex) {}
}
