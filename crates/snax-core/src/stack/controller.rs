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

//! The stack controller: frame lifecycle, push/pop, reference counting,
//! memoization and diagnostics.

use super::{
    DataSlot, ParameterSlot, RecordId, RecordIndex, RecordInfo, RecordKey, RecordKind,
    RecordKindTag, RecordStore, StackError, StackObserver, StackRecord, StackResult, StackTrace,
    StackTraceEntry,
};
use crate::chip::{Behavior, Chip, ParameterDescriptor};
use crate::config::{StackConfig, MAX_STACK_CAPACITY};
use crate::instance::Instance;
use crate::message::EngineMessage;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The lifecycle state of a [`FunctionStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Between `end_of_frame` and the next `start_of_frame`.
    #[default]
    Idle,
    /// A frame is being evaluated.
    Running,
}

/// Statistics of a frame that unwound cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    /// The frame number.
    pub frame: u64,
    /// Number of records pushed during the frame, the root excluded.
    pub records_pushed: u64,
    /// The deepest the stack got, the root included.
    pub peak_depth: usize,
}

struct StackState {
    config: StackConfig,
    store: RecordStore,
    current: RecordIndex,
    next_id: u64,
    ref_limit: u32,
    state: FrameState,
    frame_number: u64,
    records_pushed: u64,
    peak_depth: usize,
    messages: Option<flume::Sender<EngineMessage>>,
}

impl StackState {
    fn next_record_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    fn ensure_running(&self) -> StackResult<()> {
        match self.state {
            FrameState::Running => Ok(()),
            FrameState::Idle => Err(StackError::NotRunning),
        }
    }

    fn ensure_capacity(&self) -> StackResult<()> {
        if self.store.can_push() {
            Ok(())
        } else {
            log::error!(
                "Function stack overflow in frame {} ({} records); the graph recursed too deep.",
                self.frame_number,
                self.store.capacity()
            );
            Err(StackError::Overflow {
                capacity: self.store.capacity(),
            })
        }
    }

    /// The function-call scope served by the record at `index`.
    fn scope_of(&self, index: RecordIndex) -> RecordIndex {
        self.store
            .get(index)
            .map(|record| record.origin)
            .unwrap_or(RecordIndex::ROOT)
    }

    fn live(&self, key: RecordKey) -> Option<&StackRecord> {
        self.store.get(key.index).filter(|record| record.id == key.id)
    }

    fn push(
        &mut self,
        prev: RecordIndex,
        origin: RecordIndex,
        kind: RecordKind,
        instance: Option<Rc<Instance>>,
    ) -> RecordKey {
        let id = self.next_record_id();
        let tag = kind.tag();
        self.records_pushed += 1;
        let mut record = StackRecord::new(id, prev, origin, kind, instance);
        record.pushed_at = self.records_pushed;
        let index = self.store.push(record);
        debug_assert!(
            self.store
                .get(index)
                .is_some_and(|record| record.is_well_ordered(index)),
            "record {index} breaks the prev/origin ordering"
        );
        self.peak_depth = self.peak_depth.max(self.store.len());
        log::trace!("Pushed {tag} record {index} ({id}), prev {prev}, origin {origin}.");
        RecordKey { index, id }
    }
}

fn describe(index: RecordIndex, record: &StackRecord) -> RecordInfo {
    RecordInfo {
        index,
        id: record.id,
        kind: record.kind.tag(),
        label: record.kind.label().into_owned(),
        prev: record.prev,
        origin: record.origin,
        pushed_at: record.pushed_at,
    }
}

fn check_slot(slot: u16, max: usize) -> StackResult<()> {
    if (slot as usize) < max {
        Ok(())
    } else {
        Err(StackError::SlotOutOfRange { slot, max })
    }
}

struct Shared {
    state: RefCell<StackState>,
    observer: RefCell<Option<Rc<dyn StackObserver>>>,
}

/// The call-graph evaluation stack.
///
/// A `FunctionStack` is a cheap-to-clone context object; clones share the same
/// records. It is single-threaded by construction (`!Send`): every evaluating
/// thread owns its own stack.
///
/// No borrow of the internal state is held while foreign code runs (cached
/// chips being dropped, instance destroy callbacks, observer hooks), so every
/// operation can be re-entered from those places.
#[derive(Clone)]
pub struct FunctionStack {
    shared: Rc<Shared>,
}

impl FunctionStack {
    /// Creates an idle stack sized by `config`.
    ///
    /// A capacity above [`MAX_STACK_CAPACITY`] is clamped to it.
    pub fn new(mut config: StackConfig) -> Self {
        debug_assert!(config.capacity >= 2, "stack capacity below two records");
        debug_assert!(config.ref_limit > 0, "zero reference limit");
        if config.capacity > MAX_STACK_CAPACITY {
            log::warn!(
                "Stack capacity {} clamped to {MAX_STACK_CAPACITY}.",
                config.capacity
            );
            config.capacity = MAX_STACK_CAPACITY;
        }
        let state = StackState {
            store: RecordStore::with_capacity(config.capacity),
            current: RecordIndex::ROOT,
            next_id: 0,
            ref_limit: config.ref_limit,
            state: FrameState::Idle,
            frame_number: 0,
            records_pushed: 0,
            peak_depth: 0,
            messages: None,
            config,
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                observer: RefCell::new(None),
            }),
        }
    }

    // --- Wiring ---

    /// Attaches an observer, replacing the previous one.
    pub fn set_observer(&self, observer: Rc<dyn StackObserver>) {
        *self.shared.observer.borrow_mut() = Some(observer);
    }

    /// Detaches the current observer, if any.
    pub fn clear_observer(&self) {
        self.shared.observer.borrow_mut().take();
    }

    /// Routes fatal end-of-frame reports to the given channel.
    pub fn attach_message_bus(&self, sender: flume::Sender<EngineMessage>) {
        self.shared.state.borrow_mut().messages = Some(sender);
    }

    fn has_observer(&self) -> bool {
        self.shared.observer.borrow().is_some()
    }

    fn notify(&self, hook: impl FnOnce(&dyn StackObserver)) {
        let observer = self.shared.observer.borrow().clone();
        if let Some(observer) = observer {
            hook(observer.as_ref());
        }
    }

    // --- Frame lifecycle ---

    /// Resets the stack to a single root record and starts a new frame.
    ///
    /// Records left over from a frame that never ended are released first.
    /// Returns the new frame number.
    pub fn start_of_frame(&self) -> u64 {
        let (leftovers, frame) = {
            let mut st = self.shared.state.borrow_mut();
            if st.state == FrameState::Running {
                log::warn!(
                    "Frame {} never ended; discarding {} record(s).",
                    st.frame_number,
                    st.store.len()
                );
            }
            let leftovers = st.store.clear();
            st.frame_number += 1;
            let id = st.next_record_id();
            st.store.push(StackRecord::root(id));
            st.current = RecordIndex::ROOT;
            st.state = FrameState::Running;
            st.records_pushed = 0;
            st.peak_depth = 1;
            (leftovers, st.frame_number)
        };
        drop(leftovers);

        log::trace!("Function stack frame {frame} started.");
        self.notify(|observer| observer.on_frame_start(frame));
        frame
    }

    /// Ends the current frame, checking that the stack unwound to the root.
    ///
    /// On corruption the error is logged, published as
    /// [`EngineMessage::Fatal`] on the attached bus and returned; the stack
    /// is released and returns to [`FrameState::Idle`] either way.
    pub fn end_of_frame(&self) -> StackResult<FrameSummary> {
        let (outcome, retired, messages, frame) = {
            let mut st = self.shared.state.borrow_mut();
            st.ensure_running()?;
            st.state = FrameState::Idle;

            let depth = st.store.len();
            let root_refs = st
                .store
                .get(RecordIndex::ROOT)
                .map(|root| root.ref_count)
                .unwrap_or(0);
            let current = std::mem::replace(&mut st.current, RecordIndex::ROOT);

            let outcome = if depth == 1 && root_refs == 1 && current.is_root() {
                Ok(FrameSummary {
                    frame: st.frame_number,
                    records_pushed: st.records_pushed,
                    peak_depth: st.peak_depth,
                })
            } else {
                Err(StackError::Corruption {
                    depth,
                    root_refs,
                    current,
                })
            };
            (outcome, st.store.clear(), st.messages.clone(), st.frame_number)
        };
        drop(retired);

        match &outcome {
            Ok(summary) => log::trace!(
                "Function stack frame {frame} ended ({} pushes, peak depth {}).",
                summary.records_pushed,
                summary.peak_depth
            ),
            Err(err) => {
                log::error!("Frame {frame}: {err}");
                if let Some(sender) = messages {
                    let message = EngineMessage::Fatal {
                        frame,
                        message: err.to_string(),
                    };
                    if let Err(e) = sender.send(message) {
                        log::warn!("Failed to publish stack corruption: {e}.");
                    }
                }
            }
        }

        self.notify(|observer| observer.on_frame_end(frame));
        outcome
    }

    // --- Push ---

    /// Returns `true` if a frame is running and one more record fits.
    pub fn can_add_record(&self) -> bool {
        let st = self.shared.state.borrow();
        st.state == FrameState::Running && st.store.can_push()
    }

    /// Pushes a function-call record with a reference count of 1.
    ///
    /// The record serves as its own origin. A supplied instance is pinned
    /// (its destruction delayed) until the record is retired.
    pub fn add_function_call_record(
        &self,
        caller: Rc<dyn Chip>,
        behavior: Behavior,
        instance: Option<Rc<Instance>>,
    ) -> StackResult<RecordKey> {
        let observing = self.has_observer();
        let (key, info) = {
            let mut st = self.shared.state.borrow_mut();
            st.ensure_running()?;
            st.ensure_capacity()?;

            let prev = st.current;
            let origin = RecordIndex::new(st.store.len());
            let key = st.push(
                prev,
                origin,
                RecordKind::FunctionCall { caller, behavior },
                instance,
            );
            let info = observing
                .then(|| st.store.get(key.index).map(|r| describe(key.index, r)))
                .flatten();
            (key, info)
        };

        if let Some(info) = info {
            self.notify(|observer| observer.on_push(&info));
        }
        Ok(key)
    }

    /// Pushes a parameter-call record with a reference count of 1.
    ///
    /// The linked chip lives in the graph of whoever called the current
    /// function, so the record's origin is the function scope of that caller:
    /// the current record's function scope, then its `prev`, then that
    /// record's function scope. Chained parameter forwards therefore all
    /// resolve to the right activation.
    pub fn add_parameter_call_record(
        &self,
        descriptor: ParameterDescriptor,
        linked: Rc<dyn Chip>,
    ) -> StackResult<RecordKey> {
        let observing = self.has_observer();
        let (key, info) = {
            let mut st = self.shared.state.borrow_mut();
            st.ensure_running()?;
            st.ensure_capacity()?;

            let prev = st.current;
            let scope = st.scope_of(prev);
            if scope.is_root() {
                return Err(StackError::ParameterOutsideFunction);
            }
            let caller_frame = st
                .store
                .get(scope)
                .map(|record| record.prev)
                .unwrap_or(RecordIndex::ROOT);
            let origin = st.scope_of(caller_frame);

            let key = st.push(
                prev,
                origin,
                RecordKind::ParameterCall { descriptor, linked },
                None,
            );
            let info = observing
                .then(|| st.store.get(key.index).map(|r| describe(key.index, r)))
                .flatten();
            (key, info)
        };

        if let Some(info) = info {
            self.notify(|observer| observer.on_push(&info));
        }
        Ok(key)
    }

    // --- Reference counting ---

    /// Adds a reference to a live record.
    ///
    /// Returns `false` (and does nothing) if the key is stale.
    pub fn increment_record_ref(&self, key: RecordKey) -> bool {
        let mut st = self.shared.state.borrow_mut();
        match st.store.get_mut(key.index) {
            Some(record) if record.id == key.id => {
                record.ref_count += 1;
                true
            }
            _ => {
                log::warn!(
                    "Ignoring reference to stale record {} ({}).",
                    key.index,
                    key.id
                );
                false
            }
        }
    }

    /// Drops a reference to a record.
    ///
    /// When the count reaches zero on the physical top of the stack, the
    /// record is retired along with every zero-count record directly below it.
    /// A zero-count record that is not on top stays until it becomes the top.
    pub fn decrement_record_ref(&self, key: RecordKey) {
        let retire = {
            let mut st = self.shared.state.borrow_mut();
            let top = st.store.top();
            match st.store.get_mut(key.index) {
                Some(record) if record.id == key.id => {
                    debug_assert!(record.ref_count > 0, "record {} over-released", key.index);
                    record.ref_count = record.ref_count.saturating_sub(1);
                    record.ref_count == 0 && top == Some(key.index) && !key.index.is_root()
                }
                _ => {
                    log::warn!(
                        "Ignoring release of stale record {} ({}).",
                        key.index,
                        key.id
                    );
                    false
                }
            }
        };

        if retire {
            self.retire_from_top();
        }
    }

    fn retire_from_top(&self) {
        let observing = self.has_observer();
        loop {
            let (index, record) = {
                let mut st = self.shared.state.borrow_mut();
                let Some(top) = st.store.top() else {
                    break;
                };
                let retirable = !top.is_root()
                    && st.store.get(top).is_some_and(|record| record.ref_count == 0);
                if !retirable {
                    break;
                }
                let Some(record) = st.store.pop() else {
                    break;
                };
                if st.current == top {
                    log::warn!("Retired record {top} while it was current.");
                    st.current = record.prev;
                }
                (top, record)
            };

            let info = observing.then(|| describe(index, &record));
            log::trace!("Retired record {index} ({}).", record.id);
            // Releases cached chips and lifts the instance pin.
            drop(record);
            if let Some(info) = info {
                self.notify(|observer| observer.on_pop(&info));
            }
        }
    }

    /// Returns `true` if the record at `index` accepts another reference.
    ///
    /// This is the engine's guard against runaway graphs: a record accepts
    /// `ref_limit` references beyond the one it was created with. It also
    /// returns `false` outside of a frame, so editor code never enters the
    /// runtime stack.
    pub fn can_increment_record_ref(&self, index: RecordIndex) -> bool {
        let st = self.shared.state.borrow();
        st.state == FrameState::Running
            && st
                .store
                .get(index)
                .is_some_and(|record| record.ref_count > 0 && record.ref_count <= st.ref_limit)
    }

    /// Changes the per-record reference ceiling.
    pub fn set_reference_count_limit(&self, limit: u32) {
        self.shared.state.borrow_mut().ref_limit = limit;
    }

    /// The per-record reference ceiling.
    pub fn reference_count_limit(&self) -> u32 {
        self.shared.state.borrow().ref_limit
    }

    // --- Execution context ---

    /// Makes `index` the current record and returns the previous one.
    ///
    /// Paired with [`FunctionStack::reset_stack_ptr`]; use
    /// [`ChildPtr::call`](super::ChildPtr::call) rather than calling both by hand.
    pub fn set_stack_ptr(&self, index: RecordIndex) -> RecordIndex {
        let prev = {
            let mut st = self.shared.state.borrow_mut();
            debug_assert!(st.store.get(index).is_some(), "entering dead record {index}");
            std::mem::replace(&mut st.current, index)
        };
        self.notify(|observer| observer.on_enter(prev, index));
        prev
    }

    /// Restores the current record saved by [`FunctionStack::set_stack_ptr`].
    pub fn reset_stack_ptr(&self, prev: RecordIndex) {
        let from = std::mem::replace(&mut self.shared.state.borrow_mut().current, prev);
        self.notify(|observer| observer.on_exit(from, prev));
    }

    // --- Memoization ---

    /// Returns the chip memoized in `slot` by the current function call.
    ///
    /// Parameter-call records share the cache of the function call they serve.
    pub fn get_data(&self, slot: DataSlot) -> Option<Rc<dyn Chip>> {
        let st = self.shared.state.borrow();
        let scope = st.scope_of(st.current);
        st.store.get(scope)?.data.get(slot.0).cloned()
    }

    /// Like [`FunctionStack::get_data`], downcast to a concrete chip type.
    pub fn get_data_as<T: Chip>(&self, slot: DataSlot) -> Option<Rc<T>> {
        self.get_data(slot)?.as_any_rc().downcast::<T>().ok()
    }

    /// Memoizes `chip` in `slot` for the rest of the current function call.
    pub fn set_data(&self, slot: DataSlot, chip: Rc<dyn Chip>) -> StackResult<()> {
        let replaced = {
            let mut st = self.shared.state.borrow_mut();
            st.ensure_running()?;
            check_slot(slot.0, st.config.max_data_slots)?;
            let scope = st.scope_of(st.current);
            match st.store.get_mut(scope) {
                Some(record) => record.data.insert(slot.0, chip),
                None => return Err(StackError::NotRunning),
            }
        };
        drop(replaced);
        Ok(())
    }

    /// Returns the chip memoized in `slot`, creating it with `create` on first use.
    ///
    /// `create` runs without any borrow of the stack and may call into it.
    pub fn get_or_insert_data(
        &self,
        slot: DataSlot,
        create: impl FnOnce() -> Rc<dyn Chip>,
    ) -> StackResult<Rc<dyn Chip>> {
        {
            let st = self.shared.state.borrow();
            st.ensure_running()?;
            check_slot(slot.0, st.config.max_data_slots)?;
        }
        if let Some(existing) = self.get_data(slot) {
            return Ok(existing);
        }
        let chip = create();
        self.set_data(slot, chip.clone())?;
        Ok(chip)
    }

    /// Returns the parameter chip cached in `slot` by the current function call.
    pub fn get_parameter(&self, slot: ParameterSlot) -> Option<Rc<dyn Chip>> {
        let st = self.shared.state.borrow();
        let scope = st.scope_of(st.current);
        st.store.get(scope)?.parameters.get(slot.0).cloned()
    }

    /// Caches a resolved parameter chip for the rest of the current function call.
    pub fn set_parameter(&self, slot: ParameterSlot, chip: Rc<dyn Chip>) -> StackResult<()> {
        let replaced = {
            let mut st = self.shared.state.borrow_mut();
            st.ensure_running()?;
            check_slot(slot.0, st.config.max_parameter_slots)?;
            let scope = st.scope_of(st.current);
            match st.store.get_mut(scope) {
                Some(record) => record.parameters.insert(slot.0, chip),
                None => return Err(StackError::NotRunning),
            }
        };
        drop(replaced);
        Ok(())
    }

    /// Reads a memoized chip of any live record, for tooling.
    pub fn peek_data(&self, index: RecordIndex, slot: DataSlot) -> Option<Rc<dyn Chip>> {
        let st = self.shared.state.borrow();
        st.store.get(index)?.data.get(slot.0).cloned()
    }

    // --- Diagnostics ---

    /// Walks from the current record back to the root.
    pub fn dump_stack_trace(&self) -> StackTrace {
        let st = self.shared.state.borrow();
        let mut trace = StackTrace::default();
        if st.state != FrameState::Running {
            return trace;
        }

        let mut index = st.current;
        while let Some(record) = st.store.get(index) {
            let chip = match &record.kind {
                RecordKind::Root => None,
                RecordKind::FunctionCall { caller, .. } => Some(caller.label().into_owned()),
                RecordKind::ParameterCall { linked, .. } => Some(linked.label().into_owned()),
            };
            trace.entries.push(StackTraceEntry {
                record: describe(index, record),
                chip,
                ref_count: record.ref_count,
                instance: record.instance().map(|instance| instance.name().to_owned()),
            });
            if index.is_root() {
                break;
            }
            index = record.prev;
        }
        trace
    }

    /// Snapshots every record on the stack, bottom first.
    pub fn records(&self) -> Vec<RecordInfo> {
        let st = self.shared.state.borrow();
        st.store
            .iter()
            .map(|(index, record)| describe(index, record))
            .collect()
    }

    /// Snapshot of the record at `index`, if it is on the stack.
    pub fn record_info(&self, index: RecordIndex) -> Option<RecordInfo> {
        let st = self.shared.state.borrow();
        st.store.get(index).map(|record| describe(index, record))
    }

    /// Reference count of the record at `index`.
    pub fn record_ref_count(&self, index: RecordIndex) -> Option<u32> {
        self.shared
            .state
            .borrow()
            .store
            .get(index)
            .map(|record| record.ref_count)
    }

    /// Origin (function scope) of the record at `index`.
    pub fn record_origin(&self, index: RecordIndex) -> Option<RecordIndex> {
        self.shared
            .state
            .borrow()
            .store
            .get(index)
            .map(|record| record.origin)
    }

    /// The record that was current when the record at `index` was pushed.
    pub fn record_prev(&self, index: RecordIndex) -> Option<RecordIndex> {
        self.shared
            .state
            .borrow()
            .store
            .get(index)
            .map(|record| record.prev)
    }

    /// Kind of the record at `index`.
    pub fn record_kind(&self, index: RecordIndex) -> Option<RecordKindTag> {
        self.shared
            .state
            .borrow()
            .store
            .get(index)
            .map(|record| record.kind.tag())
    }

    /// Returns `true` if `key` still designates a record on the stack.
    pub fn is_live(&self, key: RecordKey) -> bool {
        self.shared.state.borrow().live(key).is_some()
    }

    /// Key of the current record, or `None` outside of a frame.
    pub fn current_key(&self) -> Option<RecordKey> {
        let st = self.shared.state.borrow();
        if st.state != FrameState::Running {
            return None;
        }
        st.store.get(st.current).map(|record| RecordKey {
            index: st.current,
            id: record.id,
        })
    }

    /// The current record.
    pub fn current(&self) -> RecordIndex {
        self.shared.state.borrow().current
    }

    /// Number of records on the stack, the root included.
    pub fn depth(&self) -> usize {
        self.shared.state.borrow().store.len()
    }

    /// The fixed capacity of the record store.
    pub fn capacity(&self) -> usize {
        self.shared.state.borrow().store.capacity()
    }

    /// The lifecycle state.
    pub fn frame_state(&self) -> FrameState {
        self.shared.state.borrow().state
    }

    /// Returns `true` while a frame is running.
    pub fn is_running(&self) -> bool {
        self.frame_state() == FrameState::Running
    }

    /// Number of the current (or last) frame.
    pub fn frame_number(&self) -> u64 {
        self.shared.state.borrow().frame_number
    }

    /// The configuration the stack was created with.
    pub fn config(&self) -> StackConfig {
        self.shared.state.borrow().config.clone()
    }
}

impl Default for FunctionStack {
    fn default() -> Self {
        Self::new(StackConfig::default())
    }
}

impl fmt::Debug for FunctionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.state.try_borrow() {
            Ok(st) => f
                .debug_struct("FunctionStack")
                .field("state", &st.state)
                .field("frame", &st.frame_number)
                .field("depth", &st.store.len())
                .field("current", &st.current)
                .finish(),
            Err(_) => f.write_str("FunctionStack { <borrowed> }"),
        }
    }
}
