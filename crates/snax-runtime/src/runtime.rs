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

//! The frame driver.

use crate::config::RuntimeConfig;
use anyhow::Result;
use snax_core::stack::FrameSummary;
use snax_core::{EngineMessage, FunctionStack, MessageBus};
use snax_telemetry::{PerfMonitor, TelemetryService};
use std::rc::Rc;

/// What happened to one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The graph evaluated and the stack unwound to its root.
    Completed(FrameSummary),
    /// The evaluation failed or left the stack corrupted.
    Failed {
        /// The frame number.
        frame: u64,
        /// Why the frame failed.
        error: anyhow::Error,
        /// Messages published on the bus since the previous frame.
        messages: Vec<EngineMessage>,
    },
}

impl FrameOutcome {
    /// Returns `true` for [`FrameOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, FrameOutcome::Completed(_))
    }

    /// The summary of a completed frame.
    pub fn summary(&self) -> Option<&FrameSummary> {
        match self {
            FrameOutcome::Completed(summary) => Some(summary),
            FrameOutcome::Failed { .. } => None,
        }
    }
}

/// Owns an evaluation stack and runs one graph evaluation per tick.
pub struct Runtime {
    stack: FunctionStack,
    bus: MessageBus,
    monitor: Option<Rc<PerfMonitor>>,
    telemetry: Option<TelemetryService>,
    failed_frames: u64,
}

impl Runtime {
    /// Creates a runtime from a validated configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.stack.validate()?;
        let stack = FunctionStack::new(config.stack.clone());
        let bus = MessageBus::new();
        stack.attach_message_bus(bus.sender());

        let (monitor, telemetry) = if config.perf_monitoring {
            let monitor = Rc::new(PerfMonitor::new());
            stack.set_observer(monitor.clone());
            let service = TelemetryService::new(monitor.clone(), config.report_interval());
            (Some(monitor), Some(service))
        } else {
            (None, None)
        };

        log::info!(
            "Runtime ready (stack capacity {}, reference limit {}, perf monitoring {}).",
            config.stack.capacity,
            config.stack.ref_limit,
            if config.perf_monitoring { "on" } else { "off" }
        );

        Ok(Self {
            stack,
            bus,
            monitor,
            telemetry,
            failed_frames: 0,
        })
    }

    /// The evaluation stack.
    pub fn stack(&self) -> &FunctionStack {
        &self.stack
    }

    /// The performance monitor, when monitoring is enabled.
    pub fn monitor(&self) -> Option<&Rc<PerfMonitor>> {
        self.monitor.as_ref()
    }

    /// Publishes a message on the runtime's bus.
    pub fn publish(&self, message: EngineMessage) {
        self.bus.publish(message);
    }

    /// Number of frames that did not complete.
    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }

    /// Runs one frame: starts the stack, evaluates, then checks the stack unwound.
    ///
    /// Every handle created by `evaluate` must be dropped before it returns.
    pub fn run_frame<F>(&mut self, evaluate: F) -> FrameOutcome
    where
        F: FnOnce(&FunctionStack) -> Result<()>,
    {
        let frame = self.stack.start_of_frame();
        let evaluated = evaluate(&self.stack);
        let ended = self.stack.end_of_frame();
        let messages = self.bus.drain();

        if let Some(telemetry) = &mut self.telemetry {
            telemetry.tick();
        }

        let error = match (evaluated, ended) {
            (Ok(()), Ok(summary)) => {
                for message in &messages {
                    log::warn!("Frame {frame}: {message}");
                }
                return FrameOutcome::Completed(summary);
            }
            (Err(err), _) => err.context(format!("Evaluation of frame {frame} failed")),
            (Ok(()), Err(err)) => anyhow::Error::new(err),
        };

        self.failed_frames += 1;
        log::error!("Frame {frame} failed: {error:#}");
        FrameOutcome::Failed {
            frame,
            error,
            messages,
        }
    }
}
