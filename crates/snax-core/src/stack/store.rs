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

//! Fixed-capacity, contiguous storage for stack records.

use super::{RecordIndex, StackRecord};
use crate::config::DEFAULT_STACK_CAPACITY;

/// An arena of [`StackRecord`]s with O(1) push and pop at the top.
///
/// The store never grows past the capacity it was created with. It does not
/// guard that capacity itself: callers check [`RecordStore::can_push`] first.
#[derive(Debug)]
pub struct RecordStore {
    records: Vec<StackRecord>,
    capacity: usize,
}

impl RecordStore {
    /// Creates an empty store able to hold `capacity` records.
    ///
    /// At most [`DEFAULT_STACK_CAPACITY`] records are reserved up front.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity.min(DEFAULT_STACK_CAPACITY)),
            capacity,
        }
    }

    /// The fixed number of records the store can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records currently on the stack.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record is on the stack.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `true` if one more record fits.
    #[inline]
    pub fn can_push(&self) -> bool {
        self.records.len() < self.capacity
    }

    /// Index of the top record, if any.
    #[inline]
    pub fn top(&self) -> Option<RecordIndex> {
        self.records.len().checked_sub(1).map(RecordIndex::new)
    }

    /// Appends a record and returns its index.
    pub fn push(&mut self, record: StackRecord) -> RecordIndex {
        debug_assert!(self.can_push(), "record store overflow");
        let index = RecordIndex::new(self.records.len());
        self.records.push(record);
        index
    }

    /// Removes the top record and hands it back to the caller.
    ///
    /// Dropping the returned record releases its cached chips; callers must do
    /// so without holding a borrow of the stack.
    pub fn pop(&mut self) -> Option<StackRecord> {
        self.records.pop()
    }

    /// Removes every record, top first.
    pub fn clear(&mut self) -> Vec<StackRecord> {
        let mut removed: Vec<StackRecord> = self.records.drain(..).collect();
        removed.reverse();
        removed
    }

    /// Returns the record at `index`, if it is on the stack.
    #[inline]
    pub fn get(&self, index: RecordIndex) -> Option<&StackRecord> {
        self.records.get(index.get())
    }

    /// Returns the record at `index` mutably, if it is on the stack.
    #[inline]
    pub fn get_mut(&mut self, index: RecordIndex) -> Option<&mut StackRecord> {
        self.records.get_mut(index.get())
    }

    /// Iterates over the records from the bottom of the stack upwards.
    pub fn iter(&self) -> impl Iterator<Item = (RecordIndex, &StackRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| (RecordIndex::new(i), record))
    }
}
