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

//! Defines the contract every node of the dataflow graph must fulfil to be
//! invoked through the call stack.
//!
//! The stack only needs a chip's identity, a label for diagnostics and its
//! runtime type (for covariant handle casts). Everything else a chip does is
//! up to the graph layer.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// A node in the visual dataflow graph.
pub trait Chip: Any {
    /// Returns a human-readable label used in stack traces and performance reports.
    fn label(&self) -> Cow<'_, str>;

    /// Allows downcasting a borrowed chip to its concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Allows downcasting a shared chip to its concrete type.
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

impl fmt::Debug for dyn Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chip({})", self.label())
    }
}

/// Identifies the behavior a function call invokes on its callee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Behavior {
    /// The name of the behavior (e.g., "CallChip", "Evaluate").
    pub name: Cow<'static, str>,
}

impl Behavior {
    /// Creates a new behavior descriptor.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Describes the parameter edge a parameter call forwards through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterDescriptor {
    /// The name of the parameter as shown in the editor.
    pub name: Cow<'static, str>,
    /// The position of the parameter on its function chip.
    pub position: u32,
}

impl ParameterDescriptor {
    /// Creates a new parameter descriptor.
    pub fn new(name: impl Into<Cow<'static, str>>, position: u32) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}

impl fmt::Display for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.position)
    }
}

/// Returns `true` if both shared chips point to the same allocation.
pub fn same_chip(a: &Rc<dyn Chip>, b: &Rc<dyn Chip>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
