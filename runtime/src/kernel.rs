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

//! Discrete event kernel.
//!
//! Events are ordered by time, and events scheduled for the same instant
//! are delivered in the order they were scheduled.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use platform::{SchedulerId, Ticks};

use crate::process::ProcessId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A process became ready or a slot was vacated.
    SchedulerWake(SchedulerId),

    /// The decision, context switch or store cost of a scheduler elapsed.
    SchedulerCostPaid(SchedulerId),
    SliceExpired {
        scheduler: SchedulerId,
        slot: usize,
        activation: u64,
    },
    ComputeDone {
        process: ProcessId,
        generation: u64,
    },
    PhaseDone {
        process: ProcessId,
    },
    ResourceGranted {
        process: ProcessId,
    },
}

#[derive(Debug)]
struct Entry {
    time: Ticks,
    sequence: u64,
    event: Event,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.sequence).cmp(&(other.time, other.sequence))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    now: Ticks,
    sequence: u64,
    heap: BinaryHeap<Reverse<Entry>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    pub fn schedule(&mut self, delay: Ticks, event: Event) {
        let entry = Entry {
            time: self.now + delay,
            sequence: self.sequence,
            event,
        };
        self.sequence += 1;
        self.heap.push(Reverse(entry));
    }

    pub fn peek_time(&self) -> Option<Ticks> {
        self.heap.peek().map(|Reverse(entry)| entry.time)
    }

    /// Removes the next event and moves time forward to it.
    pub fn pop(&mut self) -> Option<Event> {
        let Reverse(entry) = self.heap.pop()?;
        debug_assert!(entry.time >= self.now);
        self.now = entry.time;
        Some(entry.event)
    }

    /// Moves time forward without delivering anything.
    pub fn advance_to(&mut self, time: Ticks) {
        assert!(time >= self.now, "Time cannot go backwards");
        if let Some(next) = self.peek_time() {
            assert!(next >= time, "Skipping over pending events");
        }
        self.now = time;
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
