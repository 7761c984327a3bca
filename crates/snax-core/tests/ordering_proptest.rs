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

//! Randomized call sequences: every record keeps `origin <= prev < index`,
//! and releasing every handle always unwinds the stack to the root.

use proptest::prelude::*;
use snax_core::stack::{RecordIndex, RecordKindTag, StackError};
use snax_core::{Behavior, ChildPtr, Chip, FunctionStack, ParameterDescriptor, StackConfig};
use std::any::Any;
use std::borrow::Cow;
use std::rc::Rc;

struct Leaf;

impl Chip for Leaf {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed("Leaf")
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

#[derive(Debug, Clone)]
enum Op {
    /// Call a function from inside the scope of a live handle (or the root).
    Function(usize),
    /// Forward a parameter from inside the scope of a live handle.
    Parameter(usize),
    /// Duplicate a live handle.
    Clone(usize),
    /// Release a live handle.
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<usize>().prop_map(Op::Function),
        3 => any::<usize>().prop_map(Op::Parameter),
        1 => any::<usize>().prop_map(Op::Clone),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

fn leaf() -> Rc<dyn Chip> {
    Rc::new(Leaf)
}

/// Pushes from the scope picked by `pick`, or from the root when no handle lives.
fn push_from(
    stack: &FunctionStack,
    handles: &[ChildPtr],
    pick: usize,
    push: impl FnOnce() -> Result<ChildPtr, StackError>,
) -> Result<ChildPtr, StackError> {
    if handles.is_empty() {
        return push();
    }
    let scope = &handles[pick % handles.len()];
    let result = scope.call(|_| push()).unwrap_or(Err(StackError::NotRunning));
    assert_eq!(stack.current(), RecordIndex::ROOT);
    result
}

fn assert_well_ordered(stack: &FunctionStack) {
    for position in 1..stack.depth() {
        let index = RecordIndex::new(position);
        let info = stack.record_info(index).expect("record below the top is live");
        assert!(info.prev < index, "{index}: prev {} not below", info.prev);
        assert!(info.origin <= info.prev || info.origin == index);
        match info.kind {
            RecordKindTag::FunctionCall => assert_eq!(info.origin, index),
            RecordKindTag::ParameterCall => assert!(info.origin < info.prev),
            RecordKindTag::Root => panic!("root above position 0"),
        }
    }
}

proptest! {
    #[test]
    fn test_records_stay_ordered(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let stack = FunctionStack::new(StackConfig::default());
        stack.start_of_frame();
        let mut handles: Vec<ChildPtr> = Vec::new();

        for op in ops {
            match op {
                Op::Function(pick) => {
                    let handle = push_from(&stack, &handles, pick, || {
                        stack.call_function(leaf(), Behavior::new("f"), None, leaf())
                    });
                    handles.push(handle.expect("capacity is never reached"));
                }
                Op::Parameter(pick) => {
                    let pushed = push_from(&stack, &handles, pick, || {
                        stack.call_parameter(ParameterDescriptor::new("p", 0), leaf())
                    });
                    match pushed {
                        Ok(handle) => handles.push(handle),
                        Err(err) => prop_assert_eq!(err, StackError::ParameterOutsideFunction),
                    }
                }
                Op::Clone(pick) if !handles.is_empty() => {
                    let copy = handles[pick % handles.len()].clone();
                    handles.push(copy);
                }
                Op::Release(pick) if !handles.is_empty() => {
                    let at = pick % handles.len();
                    drop(handles.swap_remove(at));
                }
                Op::Clone(_) | Op::Release(_) => {}
            }
            assert_well_ordered(&stack);
        }

        handles.clear();
        prop_assert_eq!(stack.depth(), 1);
        prop_assert!(stack.end_of_frame().is_ok());
    }
}
