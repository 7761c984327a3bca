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

// SnaX Sandbox
// Evaluates a small chip graph for a few frames and prints the perf report.

use anyhow::{Context, Result};
use snax_core::stack::DataSlot;
use snax_core::{Behavior, ChildPtr, Chip, FunctionStack, Instance, ParameterDescriptor};
use snax_runtime::{FrameOutcome, Runtime, RuntimeConfig};
use std::any::Any;
use std::borrow::Cow;
use std::rc::Rc;

const FRAMES: u64 = 3;

/// A number typed into the graph.
struct Literal(u64);

impl Chip for Literal {
    fn label(&self) -> Cow<'_, str> {
        Cow::Owned(self.0.to_string())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A chip with behaviors; the sandbox only tells them apart by name.
struct Script(&'static str);

impl Chip for Script {
    fn label(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.0)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn read_literal(edge: &ChildPtr) -> Result<u64> {
    edge.call(|chip| chip.as_any().downcast_ref::<Literal>().map(|l| l.0))
        .flatten()
        .context("parameter is not a literal")
}

/// `Fibonacci.Eval(n)`: reads `n` through its parameter edge and recurses.
fn fibonacci(stack: &FunctionStack, n: u64) -> Result<u64> {
    let caller: Rc<dyn Chip> = Rc::new(Script("Fibonacci"));
    let body = stack.call_function(caller.clone(), Behavior::new("Eval"), None, caller)?;
    body.call(|_| -> Result<u64> {
        let edge = stack.call_parameter(ParameterDescriptor::new("n", 0), Rc::new(Literal(n)))?;
        let n = read_literal(&edge)?;
        if n < 2 {
            return Ok(n);
        }
        Ok(fibonacci(stack, n - 1)? + fibonacci(stack, n - 2)?)
    })
    .context("null fibonacci body")?
}

/// `Enemy.Update()`: reads its speed and plans a path.
fn update_enemy(stack: &FunctionStack, enemy: &Rc<Instance>, frame: u64) -> Result<()> {
    let world: Rc<dyn Chip> = Rc::new(Script("World"));
    let update = stack.call_function(
        world,
        Behavior::new("Update"),
        Some(enemy.clone()),
        Rc::new(Script("Enemy")),
    )?;
    update
        .call(|_| -> Result<()> {
            let speed =
                stack.call_parameter(ParameterDescriptor::new("speed", 0), Rc::new(Literal(3)))?;
            let speed = read_literal(&speed)?;
            let fib = fibonacci(stack, 10)?;

            // The path is planned once per Update and reused by later reads.
            for _ in 0..2 {
                let path = stack.get_or_insert_data(DataSlot(0), || {
                    log::debug!("Planning enemy path.");
                    Rc::new(Literal(speed * frame)) as Rc<dyn Chip>
                })?;
                log::info!("Frame {frame}: enemy moves {} units (fib {fib}).", path.label());
            }

            if frame == 2 {
                // Pinned by the running Update; destroyed once it returns.
                enemy.destroy();
                log::info!("{}", stack.dump_stack_trace().to_string().trim_end());
            }
            Ok(())
        })
        .context("null update handle")?
}

fn main() -> Result<()> {
    snax_telemetry::logging::init_logging("info");

    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig {
            perf_monitoring: true,
            ..RuntimeConfig::default()
        },
    };
    let mut runtime = Runtime::new(config)?;
    let enemy = Rc::new(Instance::with_destroy_callback("enemy", || {
        log::info!("Enemy despawned.");
    }));

    for _ in 0..FRAMES {
        let outcome = runtime.run_frame(|stack| {
            if enemy.is_destroyed() {
                return Ok(());
            }
            update_enemy(stack, &enemy, stack.frame_number())
        });
        match outcome {
            FrameOutcome::Completed(summary) => log::info!(
                "Frame {} completed: {} records pushed, peak depth {}.",
                summary.frame,
                summary.records_pushed,
                summary.peak_depth
            ),
            FrameOutcome::Failed { frame, error, .. } => {
                log::error!("Frame {frame} failed: {error:#}");
            }
        }
    }

    if let Some(monitor) = runtime.monitor() {
        let report = monitor.last_frame_report();
        println!("{report}");
        println!("{}", report.to_json()?);
    }
    Ok(())
}
