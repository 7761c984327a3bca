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

//! The call-graph evaluation stack.
//!
//! Chips invoke each other through [`ChildPtr`] handles. Each function call or
//! parameter forward pushes a [`StackRecord`] onto a fixed-capacity
//! [`RecordStore`]; records stay alive while any handle references them and
//! are retired from the physical top of the stack once their reference count
//! reaches zero. The [`FunctionStack`] controller owns the store and enforces
//! the once-per-frame lifecycle.

mod controller;
mod error;
mod handle;
mod observer;
mod record;
mod store;
mod trace;

pub use controller::{FrameState, FrameSummary, FunctionStack};
pub use error::{StackError, StackResult};
pub use handle::{CallScope, ChildPtr};
pub use observer::{RecordInfo, StackObserver};
pub use record::{DataSlot, ParameterSlot, RecordKind, RecordKindTag, SlotCache, StackRecord};
pub use store::RecordStore;
pub use trace::{StackTrace, StackTraceEntry};

use std::fmt;

/// A strongly-typed index into the [`RecordStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIndex(u32);

impl RecordIndex {
    /// The index of the per-frame root sentinel.
    pub const ROOT: RecordIndex = RecordIndex(0);

    /// Creates an index from a raw position in the store.
    #[inline]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    /// Returns the raw position of the record in the store.
    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for [`RecordIndex::ROOT`].
    #[inline]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for RecordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A unique identifier of a record, never reused for the lifetime of a stack.
///
/// Two activations at the same [`RecordIndex`] always have different ids,
/// which lets callers tell "same call" from "different call".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Pairs a record's position with its id.
///
/// Reference operations through a stale key (one whose id no longer matches
/// the record at its index) are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Position of the record in the store.
    pub index: RecordIndex,
    /// Id of the record when the key was taken.
    pub id: RecordId,
}
