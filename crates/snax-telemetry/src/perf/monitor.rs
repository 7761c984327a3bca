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

//! A [`StackObserver`] that attributes wall time to behaviors and parameters.

use super::report::{ChipReport, FrameReport};
use snax_core::stack::{RecordIndex, RecordInfo};
use snax_core::{StackObserver, Stopwatch};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

const ROOT_LABEL: &str = "<root>";

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    calls: u64,
    self_time: Duration,
    /// Time between entering and leaving the outermost activations.
    inclusive: Duration,
}

impl Counters {
    fn child_time(&self) -> Duration {
        self.inclusive.saturating_sub(self.self_time)
    }
}

#[derive(Debug)]
struct Activation {
    index: RecordIndex,
    label: String,
    /// Frame clock when the activation was entered.
    entered_at: Duration,
}

#[derive(Debug)]
struct PerfState {
    frame: u64,
    lap: Stopwatch,
    frame_watch: Stopwatch,
    frame_time: Duration,
    /// Sum of every lap charged since the frame started.
    clock: Duration,
    labels: HashMap<RecordIndex, String>,
    active: Vec<Activation>,
    counters: HashMap<String, Counters>,
    last_report: Option<FrameReport>,
    frames_observed: u64,
}

impl Default for PerfState {
    fn default() -> Self {
        Self {
            frame: 0,
            lap: Stopwatch::stopped(),
            frame_watch: Stopwatch::stopped(),
            frame_time: Duration::ZERO,
            clock: Duration::ZERO,
            labels: HashMap::new(),
            active: Vec::new(),
            counters: HashMap::new(),
            last_report: None,
            frames_observed: 0,
        }
    }
}

impl PerfState {
    /// Charges the time since the last transition to the innermost activation.
    fn charge_self_time(&mut self) {
        let Some(elapsed) = self.lap.lap() else {
            return;
        };
        self.clock += elapsed;
        if let Some(top) = self.active.last() {
            self.counters.entry(top.label.clone()).or_default().self_time += elapsed;
        }
    }

    /// Charges `activation` to the inclusive time of its label, unless an
    /// activation of the same label encloses it.
    fn close(&mut self, activation: &Activation) {
        if self.active.iter().any(|outer| outer.label == activation.label) {
            return;
        }
        let inclusive = self.clock.saturating_sub(activation.entered_at);
        self.counters
            .entry(activation.label.clone())
            .or_default()
            .inclusive += inclusive;
    }

    fn label_of(&self, index: RecordIndex) -> String {
        self.labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    fn build_report(&self) -> FrameReport {
        let mut entries: Vec<ChipReport> = self
            .counters
            .iter()
            .map(|(label, counters)| {
                let self_time_us = counters.self_time.as_micros() as u64;
                let inclusive_us = counters.inclusive.as_micros() as u64;
                ChipReport {
                    label: label.clone(),
                    calls: counters.calls,
                    self_time_us,
                    child_time_us: inclusive_us.saturating_sub(self_time_us),
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.self_time_us
                .cmp(&a.self_time_us)
                .then_with(|| a.label.cmp(&b.label))
        });
        FrameReport {
            frame: self.frame,
            frame_time_us: self.frame_time.as_micros() as u64,
            entries,
        }
    }
}

/// Self/child time accounting for the evaluation stack.
///
/// Attach it with [`FunctionStack::set_observer`](snax_core::FunctionStack::set_observer).
/// Time is keyed by behavior name (function calls) or parameter descriptor
/// (parameter calls); recursive activations of the same behavior accumulate
/// into one entry, and only the outermost of them contributes child time. Counters of the current frame are readable at any time and
/// stay available after the frame ended, until the next frame starts.
#[derive(Debug, Default)]
pub struct PerfMonitor {
    state: RefCell<PerfState>,
}

impl PerfMonitor {
    /// Creates an idle monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Time spent in `label` itself during the current (or last) frame.
    pub fn perf_time(&self, label: &str) -> Duration {
        self.counters(label).self_time
    }

    /// Time spent in records called by `label` during the current (or last) frame.
    pub fn perf_child_time(&self, label: &str) -> Duration {
        self.counters(label).child_time()
    }

    /// Number of times `label` was entered during the current (or last) frame.
    pub fn perf_call_count(&self, label: &str) -> u64 {
        self.counters(label).calls
    }

    /// Wall time of the last completed frame.
    pub fn perf_frame(&self) -> Duration {
        self.state.borrow().frame_time
    }

    /// Report of the last completed frame; empty before the first one.
    pub fn last_frame_report(&self) -> FrameReport {
        self.state.borrow().last_report.clone().unwrap_or_default()
    }

    /// Number of frames that ended while the monitor was attached.
    pub fn frames_observed(&self) -> u64 {
        self.state.borrow().frames_observed
    }

    /// Forgets every counter and report.
    pub fn reset(&self) {
        *self.state.borrow_mut() = PerfState::default();
    }

    fn counters(&self, label: &str) -> Counters {
        self.state
            .borrow()
            .counters
            .get(label)
            .copied()
            .unwrap_or_default()
    }
}

impl StackObserver for PerfMonitor {
    fn on_frame_start(&self, frame: u64) {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        st.frame = frame;
        st.counters.clear();
        st.labels.clear();
        st.labels.insert(RecordIndex::ROOT, ROOT_LABEL.to_owned());
        st.counters.entry(ROOT_LABEL.to_owned()).or_default().calls = 1;
        st.active.clear();
        st.clock = Duration::ZERO;
        st.active.push(Activation {
            index: RecordIndex::ROOT,
            label: ROOT_LABEL.to_owned(),
            entered_at: Duration::ZERO,
        });
        st.frame_watch.restart();
        st.lap.restart();
    }

    fn on_frame_end(&self, frame: u64) {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        st.charge_self_time();
        st.lap.stop();
        st.frame_time = st.frame_watch.stop().unwrap_or_default();
        if st.active.len() > 1 {
            log::warn!(
                "Frame {frame} ended with {} record(s) still entered.",
                st.active.len() - 1
            );
        }
        while let Some(activation) = st.active.pop() {
            st.close(&activation);
        }
        st.frames_observed += 1;

        let report = st.build_report();
        log::trace!(
            "Frame {frame}: {} us over {} label(s).",
            report.frame_time_us,
            report.entries.len()
        );
        st.last_report = Some(report);
    }

    fn on_push(&self, record: &RecordInfo) {
        self.state
            .borrow_mut()
            .labels
            .insert(record.index, record.label.clone());
    }

    fn on_pop(&self, record: &RecordInfo) {
        self.state.borrow_mut().labels.remove(&record.index);
    }

    fn on_enter(&self, _from: RecordIndex, to: RecordIndex) {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        if !st.lap.is_running() || st.active.is_empty() {
            // Attached in the middle of a frame.
            return;
        }
        st.charge_self_time();
        let label = st.label_of(to);
        st.counters.entry(label.clone()).or_default().calls += 1;
        let entered_at = st.clock;
        st.active.push(Activation {
            index: to,
            label,
            entered_at,
        });
    }

    fn on_exit(&self, from: RecordIndex, _to: RecordIndex) {
        let mut guard = self.state.borrow_mut();
        let st = &mut *guard;
        if st.active.len() < 2 {
            return;
        }
        st.charge_self_time();
        let Some(done) = st.active.pop() else {
            return;
        };
        if done.index != from {
            log::warn!(
                "Perf monitor left {} but {} was innermost.",
                from,
                done.index
            );
        }
        st.close(&done);
    }
}
