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

//! Integration tests for the frame lifecycle, reference counting and
//! memoization of the function stack.

use snax_core::config::MAX_STACK_CAPACITY;
use snax_core::stack::{
    DataSlot, FrameState, ParameterSlot, RecordIndex, RecordInfo, RecordKindTag, StackError,
};
use snax_core::{
    Behavior, ChildPtr, Chip, EngineMessage, FunctionStack, Instance, MessageBus,
    ParameterDescriptor, StackConfig, StackObserver,
};
use std::any::Any;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

// --- Test Setup: minimal chips ---

struct Node {
    name: &'static str,
}

impl Chip for Node {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn node(name: &'static str) -> Rc<dyn Chip> {
    Rc::new(Node { name })
}

/// A chip that counts how many times it was dropped.
struct Tracked {
    drops: Rc<Cell<u32>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl Chip for Tracked {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed("Tracked")
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A memoized chip that keeps a handle to its own function call alive.
struct HoldsHandle {
    _handle: ChildPtr,
}

impl Chip for HoldsHandle {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed("HoldsHandle")
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn running_stack(config: StackConfig) -> FunctionStack {
    let stack = FunctionStack::new(config);
    stack.start_of_frame();
    stack
}

fn call(stack: &FunctionStack, name: &'static str) -> ChildPtr {
    stack
        .call_function(node("caller"), Behavior::new(name), None, node(name))
        .expect("push should succeed")
}

// --- Lifecycle ---

#[test]
fn test_start_of_frame_pushes_root() {
    let stack = FunctionStack::default();
    assert_eq!(stack.frame_state(), FrameState::Idle);
    assert!(!stack.can_add_record());

    let frame = stack.start_of_frame();
    assert_eq!(frame, 1);
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.current(), RecordIndex::ROOT);
    assert_eq!(stack.record_ref_count(RecordIndex::ROOT), Some(1));
    assert_eq!(stack.record_kind(RecordIndex::ROOT), Some(RecordKindTag::Root));

    let summary = stack.end_of_frame().unwrap();
    assert_eq!(summary.frame, 1);
    assert_eq!(summary.records_pushed, 0);
    assert_eq!(stack.frame_state(), FrameState::Idle);
    assert_eq!(stack.depth(), 0);
}

#[test]
fn test_calls_outside_frame_are_refused() {
    let stack = FunctionStack::default();
    let err = stack
        .add_function_call_record(node("a"), Behavior::new("f"), None)
        .unwrap_err();
    assert_eq!(err, StackError::NotRunning);
    assert_eq!(stack.end_of_frame().unwrap_err(), StackError::NotRunning);
}

#[test]
fn test_balanced_push_pop_unwinds_to_root() {
    // P1
    let stack = running_stack(StackConfig::default());
    {
        let a = call(&stack, "a");
        let b = a.call(|_| call(&stack, "b")).unwrap();
        let p = b
            .call(|_| stack.call_parameter(ParameterDescriptor::new("x", 0), node("x")))
            .unwrap()
            .unwrap();
        assert_eq!(stack.depth(), 4);
        drop((p, b, a));
    }
    let summary = stack.end_of_frame().unwrap();
    assert_eq!(summary.records_pushed, 3);
    assert_eq!(summary.peak_depth, 4);
}

#[test]
fn test_scenario_a_unpopped_child_corrupts_frame() {
    let bus = MessageBus::new();
    let stack = FunctionStack::default();
    stack.attach_message_bus(bus.sender());
    stack.start_of_frame();

    let child = call(&stack, "leak");
    let err = stack.end_of_frame().unwrap_err();
    assert_eq!(
        err,
        StackError::Corruption {
            depth: 2,
            root_refs: 1,
            current: RecordIndex::ROOT,
        }
    );
    assert_eq!(stack.frame_state(), FrameState::Idle);

    let messages = bus.drain();
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], EngineMessage::Fatal { frame: 1, .. }));

    // The leaked handle is stale now; releasing it must not touch the next frame.
    stack.start_of_frame();
    drop(child);
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.record_ref_count(RecordIndex::ROOT), Some(1));
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_scenario_b_function_then_parameter() {
    let stack = running_stack(StackConfig::default());

    let a = call(&stack, "A");
    let a_index = a.record().unwrap();
    let b = a
        .call(|_| stack.call_parameter(ParameterDescriptor::new("B", 0), node("B")))
        .unwrap()
        .unwrap();
    let b_index = b.record().unwrap();
    assert_eq!(stack.record_ref_count(a_index), Some(1));
    assert_eq!(stack.record_ref_count(b_index), Some(1));

    drop(b);
    assert_eq!(stack.depth(), 2);
    drop(a);
    assert_eq!(stack.depth(), 1);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_scenario_c_overflow_is_refused_before_writing() {
    let stack = running_stack(StackConfig::default().with_capacity(1024));
    let mut handles: Vec<ChildPtr> = Vec::new();
    let mut refused_at = None;

    for attempt in 1..=1025 {
        if !stack.can_add_record() {
            refused_at = Some(attempt);
            break;
        }
        let handle = match handles.last() {
            Some(parent) => parent.call(|_| call(&stack, "deep")).unwrap(),
            None => call(&stack, "deep"),
        };
        handles.push(handle);
    }

    // The root takes one of the 1024 slots.
    assert_eq!(refused_at, Some(1024));
    assert_eq!(stack.depth(), 1024);
    let err = stack
        .add_function_call_record(node("x"), Behavior::new("deep"), None)
        .unwrap_err();
    assert_eq!(err, StackError::Overflow { capacity: 1024 });
    assert_eq!(stack.depth(), 1024);

    while let Some(handle) = handles.pop() {
        drop(handle);
    }
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_oversized_capacity_is_clamped() {
    let stack = FunctionStack::new(StackConfig::default().with_capacity(usize::MAX));
    assert_eq!(stack.capacity(), MAX_STACK_CAPACITY);
    assert_eq!(stack.config().capacity, MAX_STACK_CAPACITY);
    stack.start_of_frame();
    drop(call(&stack, "f"));
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_scenario_d_reference_ceiling() {
    // P4
    let stack = running_stack(StackConfig::default());
    assert_eq!(stack.reference_count_limit(), 1000);
    let key = stack
        .add_function_call_record(node("a"), Behavior::new("f"), None)
        .unwrap();

    for _ in 0..1000 {
        assert!(stack.can_increment_record_ref(key.index));
        assert!(stack.increment_record_ref(key));
    }
    assert!(!stack.can_increment_record_ref(key.index));

    stack.decrement_record_ref(key);
    assert!(stack.can_increment_record_ref(key.index));

    for _ in 0..1000 {
        stack.decrement_record_ref(key);
    }
    assert_eq!(stack.depth(), 1);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_reference_limit_is_runtime_settable() {
    let stack = running_stack(StackConfig::default());
    stack.set_reference_count_limit(3);
    let handle = call(&stack, "f");
    let index = handle.record().unwrap();
    let clones: Vec<_> = (0..3).map(|_| handle.clone()).collect();
    assert!(!stack.can_increment_record_ref(index));
    assert!(stack.try_child(node("again")).is_ok()); // root is unaffected

    // Anything reached from inside the saturated record is refused.
    let guarded = handle.call(|_| stack.try_child(node("loop"))).unwrap();
    assert!(matches!(
        guarded,
        Err(StackError::ReferenceLimit { limit: 3, .. })
    ));
    drop((clones, handle));
    assert!(stack.end_of_frame().is_ok());
}

// --- Ordering and retirement ---

#[test]
fn test_parameter_origin_skips_to_caller_scope() {
    // P2 for a concrete chain: root -> f -> g -> param -> param.
    let stack = running_stack(StackConfig::default());
    let f = call(&stack, "f");
    let g = f.call(|_| call(&stack, "g")).unwrap();
    let p1 = g
        .call(|_| stack.call_parameter(ParameterDescriptor::new("p1", 0), node("p1")))
        .unwrap()
        .unwrap();
    let p2 = p1
        .call(|_| stack.call_parameter(ParameterDescriptor::new("p2", 1), node("p2")))
        .unwrap()
        .unwrap();

    let f_info = stack.record_info(f.record().unwrap()).unwrap();
    let g_info = stack.record_info(g.record().unwrap()).unwrap();
    let p1_info = stack.record_info(p1.record().unwrap()).unwrap();
    let p2_info = stack.record_info(p2.record().unwrap()).unwrap();

    assert_eq!(f_info.origin, f_info.index);
    assert_eq!(g_info.origin, g_info.index);
    assert!(g_info.prev < g_info.index);
    // p1 reads a parameter of g, which lives in f's graph.
    assert_eq!(p1_info.prev, g_info.index);
    assert_eq!(p1_info.origin, f_info.index);
    // p2 reads a parameter of f (p1's scope), which lives at the root.
    assert_eq!(p2_info.prev, p1_info.index);
    assert_eq!(p2_info.origin, RecordIndex::ROOT);
    for info in [&p1_info, &p2_info] {
        assert!(info.origin < info.prev);
    }
    assert_eq!(stack.record_origin(p2_info.index), Some(RecordIndex::ROOT));
    assert_eq!(stack.record_prev(p2_info.index), Some(p1_info.index));
    let order: Vec<u64> = [&f_info, &g_info, &p1_info, &p2_info]
        .iter()
        .map(|info| info.pushed_at)
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    let snapshot: Vec<RecordIndex> = stack.records().iter().map(|info| info.index).collect();
    assert_eq!(
        snapshot,
        vec![
            RecordIndex::ROOT,
            f_info.index,
            g_info.index,
            p1_info.index,
            p2_info.index
        ]
    );

    drop((p2, p1, g, f));
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_parameter_at_root_is_refused() {
    let stack = running_stack(StackConfig::default());
    let err = stack
        .call_parameter(ParameterDescriptor::new("x", 0), node("x"))
        .unwrap_err();
    assert_eq!(err, StackError::ParameterOutsideFunction);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_retirement_waits_for_the_top() {
    let stack = running_stack(StackConfig::default());
    let a = call(&stack, "a");
    let b = call(&stack, "b");
    let a_index = a.record().unwrap();

    // `a` is logically dead but `b` sits above it.
    drop(a);
    assert_eq!(stack.depth(), 3);
    assert_eq!(stack.record_ref_count(a_index), Some(0));

    // Releasing `b` cascades through `a`.
    drop(b);
    assert_eq!(stack.depth(), 1);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_no_early_retirement_of_parent_data() {
    // P3
    let stack = running_stack(StackConfig::default());
    let drops = Rc::new(Cell::new(0));
    let parent = call(&stack, "parent");
    let parent_index = parent.record().unwrap();

    parent.call(|_| {
        stack
            .set_data(DataSlot(4), Rc::new(Tracked { drops: drops.clone() }))
            .unwrap();
        let child = stack
            .call_parameter(ParameterDescriptor::new("p", 0), node("p"))
            .unwrap();
        drop(child);
    });

    assert_eq!(stack.depth(), 2);
    assert_eq!(drops.get(), 0);
    assert!(stack.peek_data(parent_index, DataSlot(4)).is_some());

    drop(parent);
    assert_eq!(drops.get(), 1);
    assert!(stack.end_of_frame().is_ok());
}

// --- Memoization ---

#[test]
fn test_memoization_is_scoped_to_the_activation() {
    // P5
    let stack = running_stack(StackConfig::default());
    let slot = DataSlot(9);

    let first = call(&stack, "f");
    let index = first.record().unwrap();
    let stored = node("memo");
    first.call(|_| {
        stack.set_data(slot, stored.clone()).unwrap();
        let found = stack.get_data(slot).unwrap();
        assert!(snax_core::chip::same_chip(&found, &stored));
    });
    drop(first);

    let second = call(&stack, "f");
    assert_eq!(second.record(), Some(index));
    second.call(|_| assert!(stack.get_data(slot).is_none()));
    drop(second);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_parameter_records_share_the_origin_cache() {
    let stack = running_stack(StackConfig::default());
    let f = call(&stack, "f");
    f.call(|_| stack.set_data(DataSlot(1), node("in-f")).unwrap());

    let g = f.call(|_| call(&stack, "g")).unwrap();
    let p = g
        .call(|_| stack.call_parameter(ParameterDescriptor::new("x", 0), node("x")))
        .unwrap()
        .unwrap();

    // `p` serves `f`, so it sees `f`'s memoized chips.
    let seen = p.call(|_| stack.get_data(DataSlot(1))).unwrap();
    assert_eq!(seen.unwrap().label(), "in-f");
    // `g` has its own, empty cache.
    assert!(g.call(|_| stack.get_data(DataSlot(1))).unwrap().is_none());

    drop((p, g, f));
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_get_or_insert_data_creates_once() {
    let stack = running_stack(StackConfig::default());
    let created = Cell::new(0);
    let f = call(&stack, "f");
    f.call(|_| {
        for _ in 0..3 {
            let chip = stack
                .get_or_insert_data(DataSlot(0), || {
                    created.set(created.get() + 1);
                    Rc::new(Node { name: "lazy" }) as Rc<dyn Chip>
                })
                .unwrap();
            assert_eq!(chip.label(), "lazy");
        }
        assert!(stack.get_data_as::<Node>(DataSlot(0)).is_some());
        assert!(stack.get_data_as::<Tracked>(DataSlot(0)).is_none());
    });
    assert_eq!(created.get(), 1);
    drop(f);
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_slots_are_bounded() {
    let stack = running_stack(StackConfig::default());
    assert_eq!(
        stack.set_data(DataSlot(128), node("x")).unwrap_err(),
        StackError::SlotOutOfRange { slot: 128, max: 128 }
    );
    assert_eq!(
        stack.set_parameter(ParameterSlot(16), node("x")).unwrap_err(),
        StackError::SlotOutOfRange { slot: 16, max: 16 }
    );
    assert!(stack.set_parameter(ParameterSlot(15), node("x")).is_ok());
    assert_eq!(stack.get_parameter(ParameterSlot(15)).unwrap().label(), "x");
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_cached_chip_holding_its_own_handle_releases_on_pop() {
    // Dropping the cache re-enters the stack from inside a retirement.
    let stack = running_stack(StackConfig::default());
    let outer = call(&stack, "outer");
    let inner = outer.call(|_| call(&stack, "inner")).unwrap();
    inner.call(|_| {
        let back_to_outer = outer.clone();
        stack
            .set_data(
                DataSlot(0),
                Rc::new(HoldsHandle {
                    _handle: back_to_outer,
                }),
            )
            .unwrap();
    });
    assert_eq!(stack.record_ref_count(outer.record().unwrap()), Some(2));

    drop(outer);
    assert_eq!(stack.depth(), 3);
    drop(inner);
    assert_eq!(stack.depth(), 1);
    assert!(stack.end_of_frame().is_ok());
}

// --- Instances ---

#[test]
fn test_instance_destruction_is_delayed_while_called() {
    let stack = running_stack(StackConfig::default());
    let instance = Rc::new(Instance::new("enemy"));
    let handle = stack
        .call_function(
            node("spawner"),
            Behavior::new("Update"),
            Some(instance.clone()),
            node("enemy"),
        )
        .unwrap();

    handle.call(|_| {
        let trace = stack.dump_stack_trace();
        assert_eq!(trace.entries[0].instance.as_deref(), Some("enemy"));
        assert!(trace.to_string().contains("call  Update from 'spawner'"));
        assert!(trace.to_string().contains(" on 'enemy'"));
        assert!(!instance.destroy());
        assert!(instance.is_destruction_pending());
    });
    assert!(!instance.is_destroyed());

    drop(handle);
    assert!(instance.is_destroyed());
    assert!(stack.end_of_frame().is_ok());
}

#[test]
fn test_corrupted_frame_lifts_instance_pins() {
    let stack = running_stack(StackConfig::default());
    let instance = Rc::new(Instance::new("leaked"));
    let _leak = stack
        .call_function(node("a"), Behavior::new("f"), Some(instance.clone()), node("b"))
        .unwrap();
    assert_eq!(instance.delay_count(), 1);
    assert!(stack.end_of_frame().is_err());
    assert_eq!(instance.delay_count(), 0);
}

// --- Diagnostics ---

#[test]
fn test_stack_trace_walks_prev_links() {
    let stack = running_stack(StackConfig::default());
    let f = call(&stack, "f");
    let trace = f
        .call(|_| {
            let g = call(&stack, "g");
            g.call(|_| stack.dump_stack_trace()).unwrap()
        })
        .unwrap();

    assert_eq!(trace.labels(), vec!["g", "f", "<root>"]);
    let rendered = trace.to_string();
    assert!(rendered.contains("call  g from 'caller'"));
    assert!(rendered.contains("<root>"));

    drop(f);
    assert!(stack.end_of_frame().is_ok());
    assert!(stack.dump_stack_trace().is_empty());
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl StackObserver for Recorder {
    fn on_frame_start(&self, frame: u64) {
        self.events.borrow_mut().push(format!("start {frame}"));
    }
    fn on_frame_end(&self, frame: u64) {
        self.events.borrow_mut().push(format!("end {frame}"));
    }
    fn on_push(&self, record: &RecordInfo) {
        self.events
            .borrow_mut()
            .push(format!("push {} {}", record.kind, record.label));
    }
    fn on_pop(&self, record: &RecordInfo) {
        self.events.borrow_mut().push(format!("pop {}", record.label));
    }
    fn on_enter(&self, from: RecordIndex, to: RecordIndex) {
        self.events.borrow_mut().push(format!("enter {from}->{to}"));
    }
    fn on_exit(&self, from: RecordIndex, to: RecordIndex) {
        self.events.borrow_mut().push(format!("exit {from}->{to}"));
    }
}

#[test]
fn test_observer_sees_every_transition() {
    let recorder = Rc::new(Recorder::default());
    let stack = FunctionStack::default();
    stack.set_observer(recorder.clone());

    stack.start_of_frame();
    let f = call(&stack, "f");
    f.call(|_| ());
    drop(f);
    stack.end_of_frame().unwrap();

    assert_eq!(
        *recorder.events.borrow(),
        vec![
            "start 1",
            "push call f",
            "enter #0->#1",
            "exit #1->#0",
            "pop f",
            "end 1",
        ]
    );

    stack.clear_observer();
    stack.start_of_frame();
    stack.end_of_frame().unwrap();
    assert_eq!(recorder.events.borrow().len(), 6);
}

#[test]
fn test_record_ids_are_never_reused() {
    let stack = FunctionStack::default();
    let mut seen = Vec::new();
    for _ in 0..3 {
        stack.start_of_frame();
        seen.push(stack.current_key().unwrap().id);
        let f = call(&stack, "f");
        seen.push(f.record_id().unwrap());
        drop(f);
        stack.end_of_frame().unwrap();
    }
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), seen.len());
}

#[test]
fn test_unfinished_frame_is_discarded_on_restart() {
    let stack = FunctionStack::default();
    stack.start_of_frame();
    let leaked = call(&stack, "leaked");
    assert_eq!(stack.start_of_frame(), 2);
    assert_eq!(stack.depth(), 1);
    assert!(!stack.is_live(leaked.record_key().unwrap()));
    drop(leaked);
    assert!(stack.end_of_frame().is_ok());
}
