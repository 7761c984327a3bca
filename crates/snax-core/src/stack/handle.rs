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

//! Reference-counted handles that tie a chip to the record it was reached through.

use super::{FunctionStack, RecordId, RecordIndex, RecordKey, StackError, StackResult};
use crate::chip::{Behavior, Chip, ParameterDescriptor};
use crate::instance::Instance;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
struct Link {
    stack: FunctionStack,
    key: RecordKey,
}

/// A handle to a chip plus the stack record it was obtained under.
///
/// The handle owns one reference on its record: cloning it adds a reference
/// to the *same* record, dropping it releases that reference, and the record
/// (with its memoized data and instance pin) is retired once the last
/// reference is gone and it is on top of the stack.
///
/// A null handle, or one created outside of a frame, carries no record and
/// every reference operation on it is a no-op.
pub struct ChildPtr<T: ?Sized + Chip = dyn Chip> {
    chip: Option<Rc<T>>,
    link: Option<Link>,
}

impl<T: ?Sized + Chip> ChildPtr<T> {
    /// A handle to nothing.
    pub fn null() -> Self {
        Self {
            chip: None,
            link: None,
        }
    }

    /// A handle to a chip that is not tied to any record.
    pub fn unlinked(chip: Rc<T>) -> Self {
        Self {
            chip: Some(chip),
            link: None,
        }
    }

    /// Wraps a chip and a record reference the caller already owns.
    fn adopt(stack: &FunctionStack, key: RecordKey, chip: Rc<T>) -> Self {
        Self {
            chip: Some(chip),
            link: Some(Link {
                stack: stack.clone(),
                key,
            }),
        }
    }

    /// Returns `true` if the handle points to no chip.
    pub fn is_null(&self) -> bool {
        self.chip.is_none()
    }

    /// Borrows the chip without entering its record.
    pub fn get(&self) -> Option<&T> {
        self.chip.as_deref()
    }

    /// The shared chip, if any.
    pub fn chip(&self) -> Option<&Rc<T>> {
        self.chip.as_ref()
    }

    /// The record this handle references.
    pub fn record(&self) -> Option<RecordIndex> {
        self.link.as_ref().map(|link| link.key.index)
    }

    /// The id of the record this handle references.
    pub fn record_id(&self) -> Option<RecordId> {
        self.link.as_ref().map(|link| link.key.id)
    }

    /// The full key of the record this handle references.
    pub fn record_key(&self) -> Option<RecordKey> {
        self.link.as_ref().map(|link| link.key)
    }

    /// The stack this handle is tied to.
    pub fn stack(&self) -> Option<&FunctionStack> {
        self.link.as_ref().map(|link| &link.stack)
    }

    /// Makes the handle's record current until the returned guard is dropped.
    #[must_use = "the record is left as soon as the scope is dropped"]
    pub fn enter(&self) -> CallScope<'_> {
        match &self.link {
            Some(link) => CallScope {
                stack: Some(&link.stack),
                prev: link.stack.set_stack_ptr(link.key.index),
            },
            None => CallScope {
                stack: None,
                prev: RecordIndex::ROOT,
            },
        }
    }

    /// Runs `f` on the chip inside the scope of the handle's record.
    ///
    /// Memoized data and performance time of everything `f` does are
    /// attributed to this record. Returns `None` for a null handle.
    pub fn call<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let chip = self.chip.as_deref()?;
        let _scope = self.enter();
        Some(f(chip))
    }

    /// Clones the handle, refusing once the record reached its reference limit.
    pub fn try_clone(&self) -> StackResult<Self> {
        if let Some(link) = &self.link {
            if !link.stack.can_increment_record_ref(link.key.index) {
                return Err(StackError::ReferenceLimit {
                    index: link.key.index,
                    limit: link.stack.reference_count_limit(),
                });
            }
        }
        Ok(self.clone())
    }

    /// Casts to a concrete chip type, referencing the same record.
    ///
    /// Returns `None` if the chip is not a `U`.
    pub fn downcast<U: Chip>(&self) -> Option<ChildPtr<U>> {
        let chip = self.chip.clone()?;
        let typed = chip.as_any_rc().downcast::<U>().ok()?;
        if let Some(link) = &self.link {
            link.stack.increment_record_ref(link.key);
        }
        Some(ChildPtr {
            chip: Some(typed),
            link: self.link.clone(),
        })
    }

    /// Releases the chip and the record reference, leaving a null handle.
    pub fn reset(&mut self) {
        *self = Self::null();
    }
}

impl<T: Chip> ChildPtr<T> {
    /// Erases the chip type, referencing the same record.
    pub fn upcast(&self) -> ChildPtr<dyn Chip> {
        if let Some(link) = &self.link {
            link.stack.increment_record_ref(link.key);
        }
        ChildPtr {
            chip: self.chip.clone().map(|chip| chip as Rc<dyn Chip>),
            link: self.link.clone(),
        }
    }
}

impl<T: ?Sized + Chip> Clone for ChildPtr<T> {
    fn clone(&self) -> Self {
        if let Some(link) = &self.link {
            link.stack.increment_record_ref(link.key);
        }
        Self {
            chip: self.chip.clone(),
            link: self.link.clone(),
        }
    }
}

impl<T: ?Sized + Chip> Drop for ChildPtr<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.stack.decrement_record_ref(link.key);
        }
    }
}

impl<T: ?Sized + Chip> Default for ChildPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + Chip> fmt::Debug for ChildPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildPtr")
            .field("chip", &self.chip.as_deref().map(|chip| chip.label().into_owned()))
            .field("record", &self.record_key())
            .finish()
    }
}

/// Keeps a record current for as long as it lives.
///
/// Created by [`ChildPtr::enter`]; dropping it restores the previous record.
pub struct CallScope<'a> {
    stack: Option<&'a FunctionStack>,
    prev: RecordIndex,
}

impl CallScope<'_> {
    /// The record that was current before the scope was entered.
    pub fn previous(&self) -> RecordIndex {
        self.prev
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        if let Some(stack) = self.stack {
            stack.reset_stack_ptr(self.prev);
        }
    }
}

impl FunctionStack {
    /// Wraps a chip reached from the current record, adding a reference to it.
    ///
    /// Outside of a frame the handle is unlinked.
    pub fn child<T: ?Sized + Chip>(&self, chip: Rc<T>) -> ChildPtr<T> {
        match self.current_key() {
            Some(key) if self.increment_record_ref(key) => ChildPtr::adopt(self, key, chip),
            _ => ChildPtr::unlinked(chip),
        }
    }

    /// Like [`FunctionStack::child`], refused once the current record reached
    /// its reference limit.
    pub fn try_child<T: ?Sized + Chip>(&self, chip: Rc<T>) -> StackResult<ChildPtr<T>> {
        let current = self.current();
        if self.is_running() && !self.can_increment_record_ref(current) {
            return Err(StackError::ReferenceLimit {
                index: current,
                limit: self.reference_count_limit(),
            });
        }
        Ok(self.child(chip))
    }

    /// Pushes a function-call record and returns the handle that owns it.
    pub fn call_function<T: ?Sized + Chip>(
        &self,
        caller: Rc<dyn Chip>,
        behavior: Behavior,
        instance: Option<Rc<Instance>>,
        callee: Rc<T>,
    ) -> StackResult<ChildPtr<T>> {
        let key = self.add_function_call_record(caller, behavior, instance)?;
        Ok(ChildPtr::adopt(self, key, callee))
    }

    /// Pushes a parameter-call record and returns the handle that owns it.
    pub fn call_parameter(
        &self,
        descriptor: ParameterDescriptor,
        linked: Rc<dyn Chip>,
    ) -> StackResult<ChildPtr<dyn Chip>> {
        let key = self.add_parameter_call_record(descriptor, linked.clone())?;
        Ok(ChildPtr::adopt(self, key, linked))
    }
}
