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

//! Processes replay their trace one segment at a time.
//!
//! A process only holds its own control state. Everything that involves other
//! components (waiting on channels, occupying a scheduler slot, the clock)
//! goes through `System`, which calls the transitions defined here and
//! notifies the observers of each change.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use log::debug;
use num::rational::Ratio;
use serde::Serialize;

use platform::{Cycles, ProcessorId, SchedulerId, Segment, Ticks};

use crate::app::ApplicationId;
use crate::channel::{ChannelId, Direction};
use crate::kernel::Event;
use crate::system::System;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProcessId(pub(crate) usize);

impl ProcessId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Created,
    Ready,
    Running,
    Blocked,
    Finished,
}

impl ProcessState {
    /// Encoding used for waveform dumps.
    pub fn code(&self) -> u64 {
        match self {
            Self::Created => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Blocked => 3,
            Self::Finished => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Preempt,
    Kill,

    /// The effective frequency of the processor changed.
    Adapt,
}

/// The scheduler slot a running process occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    pub scheduler: SchedulerId,
    pub slot: usize,
    pub processor: ProcessorId,
}

/// Progress of a read or write through the phases of a primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub channel: ChannelId,
    pub direction: Direction,
    pub tokens: u64,
    pub processor: ProcessorId,
    pub phase: usize,

    /// Number of resources of the current phase already held.
    pub acquired: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Activity {
    Idle,
    Computing { started: Ticks, ticks: Ticks },
    Communicating(Transfer),
}

/// A blocked process waits until all of these hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Condition {
    pub channel: ChannelId,
    pub direction: Direction,
    pub tokens: u64,
}

pub struct Process {
    name: String,
    application: ApplicationId,
    priority: i32,
    state: ProcessState,

    /// Processor the process is mapped to; the process only runs there.
    processor: ProcessorId,
    scheduler: Option<SchedulerId>,
    placement: Option<Placement>,

    segments: Box<dyn Iterator<Item = Segment>>,
    lookahead: VecDeque<Segment>,

    /// The segment being executed. A preempted compute segment keeps its
    /// remaining cycles here.
    current: Option<Segment>,
    wait_for_initial_tokens: bool,

    total_cycles: BTreeMap<String, Cycles>,
    executed_cycles: BTreeMap<String, Cycles>,
    finish_time: Option<Ticks>,

    pub(crate) activity: Activity,

    /// Invalidates compute completions scheduled before an interrupt.
    pub(crate) generation: u64,

    /// Interrupt received during a transfer, applied once it completes.
    pub(crate) pending_interrupt: Option<Interrupt>,
    pub(crate) waiting_for: Vec<Condition>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("processor", &self.processor)
            .field("scheduler", &self.scheduler)
            .field("current", &self.current)
            .field("activity", &self.activity)
            .finish()
    }
}

impl Process {
    pub(crate) fn new(
        name: &str,
        application: ApplicationId,
        processor: ProcessorId,
        priority: i32,
        segments: Box<dyn Iterator<Item = Segment>>,
        total_cycles: BTreeMap<String, Cycles>,
        wait_for_initial_tokens: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            application,
            priority,
            state: ProcessState::Created,
            processor,
            scheduler: None,
            placement: None,
            segments,
            lookahead: VecDeque::new(),
            current: None,
            wait_for_initial_tokens,
            total_cycles,
            executed_cycles: BTreeMap::new(),
            finish_time: None,
            activity: Activity::Idle,
            generation: 0,
            pending_interrupt: None,
            waiting_for: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn application(&self) -> ApplicationId {
        self.application
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    pub(crate) fn set_processor(&mut self, processor: ProcessorId) {
        assert!(self.state != ProcessState::Running);
        self.processor = processor;
    }

    /// The scheduler managing the process, if it is attached to one.
    pub fn scheduler(&self) -> Option<SchedulerId> {
        self.scheduler
    }

    pub(crate) fn set_scheduler(&mut self, scheduler: Option<SchedulerId>) {
        self.scheduler = scheduler;
    }

    pub(crate) fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub fn finish_time(&self) -> Option<Ticks> {
        self.finish_time
    }

    pub fn total_cycles(&self) -> &BTreeMap<String, Cycles> {
        &self.total_cycles
    }

    pub fn executed_cycles(&self) -> &BTreeMap<String, Cycles> {
        &self.executed_cycles
    }

    pub(crate) fn waits_for_initial_tokens(&self) -> bool {
        self.wait_for_initial_tokens
    }

    /// Unweighted mean over processor types of executed / total cycles.
    pub fn progress(&self) -> f64 {
        let finished = self.state == ProcessState::Finished;
        if self.total_cycles.is_empty() {
            return if finished { 1.0 } else { 0.0 };
        }
        let sum: f64 = self
            .total_cycles
            .iter()
            .map(|(processor_type, total)| {
                if *total == 0 {
                    if finished {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    let executed = self.executed_cycles.get(processor_type).copied().unwrap_or(0);
                    executed as f64 / *total as f64
                }
            })
            .sum();
        sum / self.total_cycles.len() as f64
    }

    /// Reads at the head of the trace, before anything else happens.
    pub(crate) fn initial_reads(&mut self) -> Vec<(String, u64)> {
        assert!(self.current.is_none());
        let mut reads = Vec::new();
        loop {
            if self.lookahead.len() <= reads.len() {
                match self.segments.next() {
                    Some(segment) => self.lookahead.push_back(segment),
                    None => break,
                }
            }
            match &self.lookahead[reads.len()] {
                Segment::Read { channel, tokens } => reads.push((channel.clone(), *tokens)),
                _ => break,
            }
        }
        reads
    }

    pub(crate) fn current_segment(&mut self) -> Option<&Segment> {
        if self.current.is_none() {
            self.current = self
                .lookahead
                .pop_front()
                .or_else(|| self.segments.next());
        }
        self.current.as_ref()
    }

    pub(crate) fn advance_segment(&mut self) {
        self.current = None;
    }

    /// Credits the remaining cycles of the current compute segment and moves
    /// on to the next segment.
    pub(crate) fn complete_compute(&mut self) {
        match self.current.take() {
            Some(Segment::Compute { cycles }) => {
                for (processor_type, c) in cycles {
                    *self.executed_cycles.entry(processor_type).or_insert(0) += c;
                }
            }
            other => panic!("Process {} completed compute in {:?}", self.name, other),
        }
    }

    /// Splits the current compute segment after `elapsed` of its `ticks`:
    /// the processed share is credited and the rest stays in the segment.
    pub(crate) fn split_compute(&mut self, elapsed: Ticks, ticks: Ticks) {
        let cycles = match &mut self.current {
            Some(Segment::Compute { cycles }) => cycles,
            other => panic!("Process {} split compute in {:?}", self.name, other),
        };
        for (processor_type, required) in cycles.iter_mut() {
            let processed = if ticks == 0 {
                *required
            } else {
                Ratio::new(*required as u128 * elapsed as u128, ticks as u128)
                    .round()
                    .to_integer() as Cycles
            };
            let processed = processed.min(*required);
            *self
                .executed_cycles
                .entry(processor_type.clone())
                .or_insert(0) += processed;
            *required -= processed;
        }
    }

    pub(crate) fn start(&mut self) {
        assert_eq!(self.state, ProcessState::Created, "{} started twice", self.name);
        self.state = ProcessState::Ready;
    }

    pub(crate) fn start_blocked(&mut self) {
        assert_eq!(self.state, ProcessState::Created, "{} started twice", self.name);
        self.state = ProcessState::Blocked;
    }

    pub(crate) fn activate(&mut self, placement: Placement) {
        assert_eq!(
            self.state,
            ProcessState::Ready,
            "{} activated while not ready",
            self.name
        );
        assert_eq!(placement.processor, self.processor);
        self.state = ProcessState::Running;
        self.placement = Some(placement);
    }

    fn vacate(&mut self) -> Placement {
        self.pending_interrupt = None;
        self.activity = Activity::Idle;
        self.placement
            .take()
            .expect("Running process without a placement")
    }

    pub(crate) fn deactivate(&mut self) -> Placement {
        assert_eq!(self.state, ProcessState::Running, "{} not running", self.name);
        self.state = ProcessState::Ready;
        self.vacate()
    }

    pub(crate) fn block(&mut self) -> Placement {
        assert_eq!(self.state, ProcessState::Running, "{} not running", self.name);
        self.state = ProcessState::Blocked;
        self.vacate()
    }

    pub(crate) fn unblock(&mut self) {
        assert_eq!(self.state, ProcessState::Blocked, "{} not blocked", self.name);
        self.waiting_for.clear();
        self.state = ProcessState::Ready;
    }

    /// Moves to FINISHED from any state; returns the slot a running process
    /// left.
    pub(crate) fn finish(&mut self, now: Ticks) -> Option<Placement> {
        assert!(self.state != ProcessState::Finished, "{} finished twice", self.name);
        let placement = if self.state == ProcessState::Running {
            Some(self.vacate())
        } else {
            None
        };
        self.generation += 1;
        self.waiting_for.clear();
        self.state = ProcessState::Finished;
        self.finish_time = Some(now);
        placement
    }
}

impl System {
    /// Replays segments until the process suspends or runs out of trace.
    pub(crate) fn execute(&mut self, pid: ProcessId) {
        loop {
            let process = &mut self.processes[pid.0];
            assert_eq!(process.state, ProcessState::Running);
            match process.pending_interrupt.take() {
                Some(Interrupt::Kill) => {
                    self.finish(pid);
                    return;
                }
                Some(Interrupt::Preempt) => {
                    self.deactivate(pid);
                    return;
                }
                Some(Interrupt::Adapt) | None => {}
            }

            let segment = match process.current_segment().cloned() {
                Some(segment) => segment,
                None => {
                    self.finish(pid);
                    return;
                }
            };
            match segment {
                Segment::Compute { cycles } => {
                    let ticks = self.compute_ticks(pid, &cycles);
                    let now = self.queue.now();
                    let process = &mut self.processes[pid.0];
                    process.activity = Activity::Computing {
                        started: now,
                        ticks,
                    };
                    let generation = process.generation;
                    self.queue.schedule(
                        ticks,
                        Event::ComputeDone {
                            process: pid,
                            generation,
                        },
                    );
                    return;
                }
                Segment::Read { channel, tokens } => {
                    let cid = self.resolve_channel(pid, &channel);
                    if self.channels[cid.0].can_consume(pid, tokens) {
                        if !self.begin_transfer(pid, cid, Direction::Consume, tokens) {
                            return;
                        }
                    } else {
                        self.block_on(
                            pid,
                            vec![Condition {
                                channel: cid,
                                direction: Direction::Consume,
                                tokens,
                            }],
                        );
                        return;
                    }
                }
                Segment::Write { channel, tokens } => {
                    let cid = self.resolve_channel(pid, &channel);
                    if self.channels[cid.0].can_produce(pid, tokens) {
                        if !self.begin_transfer(pid, cid, Direction::Produce, tokens) {
                            return;
                        }
                    } else {
                        self.block_on(
                            pid,
                            vec![Condition {
                                channel: cid,
                                direction: Direction::Produce,
                                tokens,
                            }],
                        );
                        return;
                    }
                }
            }
        }
    }

    pub(crate) fn resolve_channel(&self, pid: ProcessId, channel: &str) -> ChannelId {
        let process = &self.processes[pid.0];
        self.applications[process.application.0]
            .channel(channel)
            .unwrap_or_else(|| {
                panic!(
                    "Trace of process {} refers to unknown channel {}",
                    process.name, channel
                )
            })
    }

    /// Ticks the compute segment takes at the current effective frequency
    /// of the processor the process runs on.
    fn compute_ticks(&self, pid: ProcessId, cycles: &BTreeMap<String, Cycles>) -> Ticks {
        let process = &self.processes[pid.0];
        let processor = self.platform.processor(process.processor);
        let required = cycles
            .get(&processor.processor_type)
            .copied()
            .unwrap_or_else(|| {
                panic!(
                    "Trace of process {} has no cycles for processor type {}",
                    process.name, processor.processor_type
                )
            });
        let divisor = if processor.is_multithreaded() && processor.scale_frequency_with_threads {
            self.running_on[process.processor.index()].len().max(1)
        } else {
            1
        };
        processor
            .frequency_domain
            .scaled_cycles_to_ticks(required, divisor)
    }

    pub(crate) fn on_compute_done(&mut self, pid: ProcessId, generation: u64) {
        let process = &mut self.processes[pid.0];
        if process.generation != generation {
            return;
        }
        if !matches!(process.activity, Activity::Computing { .. }) {
            return;
        }
        process.activity = Activity::Idle;
        process.complete_compute();
        self.execute(pid);
    }

    /// Delivers an interrupt to a running process.
    pub(crate) fn interrupt(&mut self, pid: ProcessId, interrupt: Interrupt) {
        let now = self.queue.now();
        let process = &mut self.processes[pid.0];
        if process.state != ProcessState::Running {
            return;
        }
        debug!("{} interrupt {:?} for {}", now, interrupt, process.name);
        match process.activity.clone() {
            Activity::Computing { started, ticks } => {
                process.split_compute(now - started, ticks);
                process.generation += 1;
                process.activity = Activity::Idle;
                match interrupt {
                    Interrupt::Kill => self.finish(pid),
                    Interrupt::Preempt => self.deactivate(pid),
                    Interrupt::Adapt => self.execute(pid),
                }
            }
            Activity::Communicating(_) => match (process.pending_interrupt, interrupt) {
                (_, Interrupt::Adapt) => {}
                (Some(Interrupt::Kill), _) => {}
                (_, latched) => process.pending_interrupt = Some(latched),
            },
            Activity::Idle => {}
        }
    }
}
