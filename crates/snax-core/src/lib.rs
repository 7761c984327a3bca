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

//! # SnaX Core
//!
//! Foundational crate containing the chip contract, the call-graph evaluation
//! stack and the interface contracts the rest of the engine builds on.

#![warn(missing_docs)]

pub mod chip;
pub mod config;
pub mod instance;
pub mod message;
pub mod stack;
pub mod utils;

pub use chip::{Behavior, Chip, ParameterDescriptor};
pub use config::StackConfig;
pub use instance::Instance;
pub use message::{EngineMessage, MessageBus};
pub use stack::{ChildPtr, FunctionStack, RecordIndex, StackError, StackObserver, StackResult};
pub use utils::timer::Stopwatch;
