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

//! A single activation on the evaluation stack.

use super::{RecordId, RecordIndex};
use crate::chip::{Behavior, Chip, ParameterDescriptor};
use crate::instance::Instance;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// Identifies a chip-local memoization slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSlot(pub u16);

/// Identifies a cached parameter of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterSlot(pub u16);

/// What a record was pushed for.
#[derive(Debug, Clone)]
pub enum RecordKind {
    /// The per-frame sentinel at the bottom of the stack.
    Root,
    /// A chip invoking another chip's behavior.
    FunctionCall {
        /// The chip that made the call.
        caller: Rc<dyn Chip>,
        /// The behavior being invoked.
        behavior: Behavior,
    },
    /// A chip reached through a connected parameter edge.
    ParameterCall {
        /// The parameter being forwarded.
        descriptor: ParameterDescriptor,
        /// The chip connected to the parameter.
        linked: Rc<dyn Chip>,
    },
}

impl RecordKind {
    /// Returns the payload-free tag of this kind.
    pub fn tag(&self) -> RecordKindTag {
        match self {
            RecordKind::Root => RecordKindTag::Root,
            RecordKind::FunctionCall { .. } => RecordKindTag::FunctionCall,
            RecordKind::ParameterCall { .. } => RecordKindTag::ParameterCall,
        }
    }

    /// Returns the label used in traces and performance reports.
    pub fn label(&self) -> Cow<'_, str> {
        match self {
            RecordKind::Root => Cow::Borrowed("<root>"),
            RecordKind::FunctionCall { behavior, .. } => Cow::Borrowed(&behavior.name),
            RecordKind::ParameterCall { descriptor, .. } => Cow::Borrowed(&descriptor.name),
        }
    }
}

/// The payload-free variant of a [`RecordKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKindTag {
    /// See [`RecordKind::Root`].
    Root,
    /// See [`RecordKind::FunctionCall`].
    FunctionCall,
    /// See [`RecordKind::ParameterCall`].
    ParameterCall,
}

impl fmt::Display for RecordKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKindTag::Root => "root",
            RecordKindTag::FunctionCall => "call",
            RecordKindTag::ParameterCall => "param",
        })
    }
}

/// A small, bounded map from slot ids to chips owned by a record.
#[derive(Debug, Default, Clone)]
pub struct SlotCache {
    entries: Vec<(u16, Rc<dyn Chip>)>,
}

impl SlotCache {
    /// Returns the chip stored in `slot`.
    pub fn get(&self, slot: u16) -> Option<&Rc<dyn Chip>> {
        self.entries
            .iter()
            .find(|(id, _)| *id == slot)
            .map(|(_, chip)| chip)
    }

    /// Stores `chip` in `slot`, returning the chip it replaces.
    pub fn insert(&mut self, slot: u16, chip: Rc<dyn Chip>) -> Option<Rc<dyn Chip>> {
        match self.entries.iter_mut().find(|(id, _)| *id == slot) {
            Some((_, existing)) => Some(std::mem::replace(existing, chip)),
            None => {
                self.entries.push((slot, chip));
                None
            }
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the cache, handing back the chips it owned.
    pub fn take_all(&mut self) -> Vec<(u16, Rc<dyn Chip>)> {
        std::mem::take(&mut self.entries)
    }
}

/// One activation on the stack: a function call, a parameter call or the root.
///
/// Dropping a record releases its cached chips and lifts the delayed
/// destruction of its instance. Records are therefore only ever dropped
/// outside of any borrow of the stack state.
#[derive(Debug)]
pub struct StackRecord {
    pub(crate) id: RecordId,
    pub(crate) ref_count: u32,
    pub(crate) prev: RecordIndex,
    pub(crate) origin: RecordIndex,
    pub(crate) kind: RecordKind,
    pub(crate) instance: Option<Rc<Instance>>,
    pub(crate) data: SlotCache,
    pub(crate) parameters: SlotCache,
    pub(crate) pushed_at: u64,
}

impl StackRecord {
    /// Creates the root sentinel record.
    pub fn root(id: RecordId) -> Self {
        Self::new(id, RecordIndex::ROOT, RecordIndex::ROOT, RecordKind::Root, None)
    }

    /// Creates a record with a reference count of 1.
    ///
    /// The instance, if any, is pinned for the lifetime of the record.
    pub fn new(
        id: RecordId,
        prev: RecordIndex,
        origin: RecordIndex,
        kind: RecordKind,
        instance: Option<Rc<Instance>>,
    ) -> Self {
        if let Some(instance) = &instance {
            instance.set_delay_destruction(true);
        }
        Self {
            id,
            ref_count: 1,
            prev,
            origin,
            kind,
            instance,
            data: SlotCache::default(),
            parameters: SlotCache::default(),
            pushed_at: 0,
        }
    }

    /// The unique id of this activation.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Number of outstanding references.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// The record that was current when this one was pushed.
    pub fn prev(&self) -> RecordIndex {
        self.prev
    }

    /// The function-call record whose scope this record serves.
    pub fn origin(&self) -> RecordIndex {
        self.origin
    }

    /// The payload of the record.
    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    /// The instance pinned by this record, if any.
    pub fn instance(&self) -> Option<&Rc<Instance>> {
        self.instance.as_ref()
    }

    /// The memoized chips owned by this record.
    pub fn data(&self) -> &SlotCache {
        &self.data
    }

    /// The cached parameter chips owned by this record.
    pub fn parameters(&self) -> &SlotCache {
        &self.parameters
    }

    /// Push order of the record within its frame; the root is 0.
    pub fn pushed_at(&self) -> u64 {
        self.pushed_at
    }

    /// Checks the ordering between `prev`, `origin` and the record's own index.
    pub fn is_well_ordered(&self, own: RecordIndex) -> bool {
        match self.kind {
            RecordKind::Root => own.is_root() && self.prev.is_root() && self.origin.is_root(),
            RecordKind::FunctionCall { .. } => self.origin == own && self.prev < own,
            RecordKind::ParameterCall { .. } => self.origin < self.prev && self.prev < own,
        }
    }
}

impl Drop for StackRecord {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            instance.set_delay_destruction(false);
        }
    }
}
