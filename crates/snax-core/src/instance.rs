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

//! Class instances whose destruction can be delayed by live stack records.

use std::cell::{Cell, RefCell};
use std::fmt;

type DestroyCallback = Box<dyn FnOnce()>;

/// A runtime object that stack records can pin.
///
/// While at least one record pins the instance, [`Instance::destroy`] only
/// marks the destruction as pending. The destroy callback runs once the last
/// pin is lifted.
pub struct Instance {
    name: String,
    delay_count: Cell<u32>,
    pending: Cell<bool>,
    destroyed: Cell<bool>,
    on_destroy: RefCell<Option<DestroyCallback>>,
}

impl Instance {
    /// Creates a new, live instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay_count: Cell::new(0),
            pending: Cell::new(false),
            destroyed: Cell::new(false),
            on_destroy: RefCell::new(None),
        }
    }

    /// Creates a new instance that runs `callback` when it is finally destroyed.
    pub fn with_destroy_callback(name: impl Into<String>, callback: impl FnOnce() + 'static) -> Self {
        let instance = Self::new(name);
        *instance.on_destroy.borrow_mut() = Some(Box::new(callback));
        instance
    }

    /// The name of the instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pins (`true`) or unpins (`false`) the instance.
    ///
    /// Unpinning the last pin of an instance whose destruction is pending
    /// destroys it.
    pub fn set_delay_destruction(&self, delay: bool) {
        if delay {
            self.delay_count.set(self.delay_count.get() + 1);
            return;
        }

        let count = self.delay_count.get();
        debug_assert!(count > 0, "unbalanced delay release on '{}'", self.name);
        let count = count.saturating_sub(1);
        self.delay_count.set(count);
        if count == 0 && self.pending.get() {
            self.finish_destroy();
        }
    }

    /// Requests the destruction of the instance.
    ///
    /// Returns `true` if the instance was destroyed immediately, `false` if
    /// the destruction was deferred (or had already happened).
    pub fn destroy(&self) -> bool {
        if self.destroyed.get() {
            return false;
        }
        if self.delay_count.get() > 0 {
            log::debug!(
                "Destruction of instance '{}' deferred ({} pins).",
                self.name,
                self.delay_count.get()
            );
            self.pending.set(true);
            return false;
        }
        self.finish_destroy();
        true
    }

    /// Number of live records currently pinning the instance.
    pub fn delay_count(&self) -> u32 {
        self.delay_count.get()
    }

    /// Returns `true` if a destruction request is waiting for pins to be lifted.
    pub fn is_destruction_pending(&self) -> bool {
        self.pending.get()
    }

    /// Returns `true` once the instance has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn finish_destroy(&self) {
        self.pending.set(false);
        self.destroyed.set(true);
        // Taken before the call so the callback may inspect the instance.
        let callback = self.on_destroy.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
        log::trace!("Instance '{}' destroyed.", self.name);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("delay_count", &self.delay_count.get())
            .field("pending", &self.pending.get())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_destroy_without_pins_is_immediate() {
        let instance = Instance::new("a");
        assert!(instance.destroy());
        assert!(instance.is_destroyed());
        assert!(!instance.destroy());
    }

    #[test]
    fn test_destroy_is_deferred_while_pinned() {
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let instance = Instance::with_destroy_callback("b", move || flag.set(true));

        instance.set_delay_destruction(true);
        instance.set_delay_destruction(true);
        assert!(!instance.destroy());
        assert!(instance.is_destruction_pending());

        instance.set_delay_destruction(false);
        assert!(!instance.is_destroyed());
        assert!(!fired.get());

        instance.set_delay_destruction(false);
        assert!(instance.is_destroyed());
        assert!(!instance.is_destruction_pending());
        assert!(fired.get());
    }

    #[test]
    fn test_unpin_without_request_keeps_instance_alive() {
        let instance = Instance::new("c");
        instance.set_delay_destruction(true);
        instance.set_delay_destruction(false);
        assert!(!instance.is_destroyed());
        assert_eq!(instance.delay_count(), 0);
    }
}
