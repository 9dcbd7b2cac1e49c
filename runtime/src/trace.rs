// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structured record of a simulation run.

use std::collections::HashMap;

use serde::Serialize;

use platform::Ticks;

use crate::process::{ProcessId, ProcessState};

/// `process` was in `state` during `[start, end)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateInterval {
    pub process: String,
    pub state: ProcessState,
    pub start: Ticks,
    pub end: Ticks,
}

/// Depth of the FIFO of `sink` on `channel` right after a transfer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FifoSample {
    pub channel: String,
    pub sink: String,
    pub time: Ticks,
    pub depth: u64,
}

/// `process` occupied hardware thread `thread` of `processor` during
/// `[start, end)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScheduleInterval {
    pub processor: String,
    pub thread: usize,
    pub process: String,
    pub start: Ticks,
    pub end: Ticks,
}

/// Process, channel and sink names are qualified with the application
/// name (`application.name`).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionTrace {
    pub process_states: Vec<StateInterval>,
    pub fifo_depths: Vec<FifoSample>,
    pub schedule: Vec<ScheduleInterval>,
}

impl ExecutionTrace {
    /// Schedule intervals of one processor, in time order.
    pub fn processor_schedule<'a>(
        &'a self,
        processor: &'a str,
    ) -> impl Iterator<Item = &'a ScheduleInterval> + 'a {
        self.schedule.iter().filter(move |s| s.processor == processor)
    }

    /// State intervals of one process, in time order.
    pub fn process_states<'a>(
        &'a self,
        process: &'a str,
    ) -> impl Iterator<Item = &'a StateInterval> + 'a {
        self.process_states
            .iter()
            .filter(move |s| s.process == process)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TraceRecorder {
    trace: ExecutionTrace,
    open_states: HashMap<ProcessId, (String, ProcessState, Ticks)>,
    open_slots: HashMap<(String, usize), (String, Ticks)>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_changed(&mut self, pid: ProcessId, name: &str, state: ProcessState, now: Ticks) {
        if let Some((name, previous, start)) = self.open_states.remove(&pid) {
            if previous == state {
                self.open_states.insert(pid, (name, previous, start));
                return;
            }
            if start < now {
                self.trace.process_states.push(StateInterval {
                    process: name,
                    state: previous,
                    start,
                    end: now,
                });
            }
        }
        self.open_states.insert(pid, (name.to_string(), state, now));
    }

    pub fn fifo_depth(&mut self, application: &str, channel: &str, sink: &str, depth: u64, now: Ticks) {
        self.trace.fifo_depths.push(FifoSample {
            channel: format!("{}.{}", application, channel),
            sink: format!("{}.{}", application, sink),
            time: now,
            depth,
        });
    }

    pub fn slot_busy(&mut self, processor: &str, thread: usize, process: &str, now: Ticks) {
        let previous = self
            .open_slots
            .insert((processor.to_string(), thread), (process.to_string(), now));
        assert!(previous.is_none(), "{} thread {} is busy", processor, thread);
    }

    pub fn slot_free(&mut self, processor: &str, thread: usize, now: Ticks) {
        let key = (processor.to_string(), thread);
        if let Some((process, start)) = self.open_slots.remove(&key) {
            if start < now {
                self.trace.schedule.push(ScheduleInterval {
                    processor: key.0,
                    thread,
                    process,
                    start,
                    end: now,
                });
            }
        }
    }

    /// Closes everything still open at `now`.
    pub fn finish(&self, now: Ticks) -> ExecutionTrace {
        let mut trace = self.trace.clone();
        let mut states: Vec<_> = self.open_states.values().collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, state, start) in states {
            if *start < now || *state == ProcessState::Finished {
                trace.process_states.push(StateInterval {
                    process: name.clone(),
                    state: *state,
                    start: *start,
                    end: now.max(*start),
                });
            }
        }
        let mut slots: Vec<_> = self.open_slots.iter().collect();
        slots.sort();
        for ((processor, thread), (process, start)) in slots {
            if *start < now {
                trace.schedule.push(ScheduleInterval {
                    processor: processor.clone(),
                    thread: *thread,
                    process: process.clone(),
                    start: *start,
                    end: now,
                });
            }
        }
        trace.process_states.sort_by_key(|s| s.start);
        trace.schedule.sort_by_key(|s| s.start);
        trace
    }
}
