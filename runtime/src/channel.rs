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

//! Single producer, multi consumer FIFO channels.
//!
//! Every sink has its own FIFO counter. Producing adds the tokens to all sink
//! FIFOs (broadcast), consuming removes them only from the consumer's FIFO.
//! Each FIFO is bounded by the channel capacity.

use std::collections::VecDeque;

use log::{debug, trace};
use serde::Serialize;

use platform::{Phase, Platform, PrimitiveId, ProcessorId};

use crate::error::Error;
use crate::kernel::Event;
use crate::process::{Activity, Condition, ProcessId, ProcessState, Transfer};
use crate::system::System;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Produce,
    Consume,
}

#[derive(Debug)]
pub struct Channel {
    name: String,

    /// Bytes per token.
    token_size: u64,
    source: Option<ProcessId>,
    sinks: Vec<ProcessId>,

    /// One counter per sink, in sink order.
    fifos: Vec<u64>,
    capacity: Option<u64>,
    primitive: Option<PrimitiveId>,

    /// Blocked processes to re-check whenever the FIFOs change, in the order
    /// they started waiting.
    pub(crate) waiters: Vec<ProcessId>,
}

impl Channel {
    pub fn new(name: &str, token_size: u64) -> Self {
        Self {
            name: name.to_string(),
            token_size,
            source: None,
            sinks: Vec::new(),
            fifos: Vec::new(),
            capacity: None,
            primitive: None,
            waiters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token_size(&self) -> u64 {
        self.token_size
    }

    pub fn source(&self) -> Option<ProcessId> {
        self.source
    }

    pub fn sinks(&self) -> &[ProcessId] {
        &self.sinks
    }

    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    pub fn primitive(&self) -> Option<PrimitiveId> {
        self.primitive
    }

    pub fn set_source(&mut self, process: ProcessId) {
        assert!(
            self.source.is_none(),
            "Channel {} already has a source",
            self.name
        );
        self.source = Some(process);
    }

    pub fn add_sink(&mut self, process: ProcessId) {
        assert!(
            !self.sinks.contains(&process),
            "Process {:?} is already a sink of channel {}",
            process,
            self.name
        );
        self.sinks.push(process);
        self.fifos.push(0);
    }

    pub fn set_capacity(&mut self, capacity: u64) -> Result<(), Error> {
        match self.capacity {
            Some(current) if current != capacity => Err(Error::CapacityChanged {
                channel: self.name.clone(),
                capacity: current,
                requested: capacity,
            }),
            _ => {
                self.capacity = Some(capacity);
                Ok(())
            }
        }
    }

    pub fn set_primitive(&mut self, primitive: PrimitiveId) {
        self.primitive = Some(primitive);
    }

    fn sink_index(&self, process: ProcessId) -> usize {
        self.sinks
            .iter()
            .position(|p| *p == process)
            .unwrap_or_else(|| panic!("{:?} is not a sink of channel {}", process, self.name))
    }

    fn bound(&self) -> u64 {
        self.capacity
            .unwrap_or_else(|| panic!("Channel {} has no capacity", self.name))
    }

    /// True if `process` can write `tokens` without overflowing any sink.
    pub fn can_produce(&self, process: ProcessId, tokens: u64) -> bool {
        assert!(tokens > 0);
        assert_eq!(
            self.source,
            Some(process),
            "{:?} is not the source of channel {}",
            process,
            self.name
        );
        assert!(!self.sinks.is_empty(), "Channel {} has no sink", self.name);
        let capacity = self.bound();
        self.fifos.iter().all(|fifo| fifo + tokens <= capacity)
    }

    /// True if the FIFO of `process` holds at least `tokens`.
    pub fn can_consume(&self, process: ProcessId, tokens: u64) -> bool {
        assert!(tokens > 0);
        assert!(self.source.is_some(), "Channel {} has no source", self.name);
        self.fifos[self.sink_index(process)] >= tokens
    }

    pub(crate) fn commit_produce(&mut self, process: ProcessId, tokens: u64) {
        assert!(self.can_produce(process, tokens));
        for fifo in self.fifos.iter_mut() {
            *fifo += tokens;
        }
    }

    pub(crate) fn commit_consume(&mut self, process: ProcessId, tokens: u64) {
        assert!(self.can_consume(process, tokens));
        let sink = self.sink_index(process);
        self.fifos[sink] -= tokens;
    }

    pub fn fifo_depth(&self, sink: ProcessId) -> u64 {
        self.fifos[self.sink_index(sink)]
    }

    pub(crate) fn is_satisfied(&self, process: ProcessId, condition: &Condition) -> bool {
        match condition.direction {
            Direction::Produce => self.can_produce(process, condition.tokens),
            Direction::Consume => self.can_consume(process, condition.tokens),
        }
    }
}

/// Holder and waiters of a platform resource.
#[derive(Debug, Default)]
pub(crate) struct ResourceState {
    pub holder: Option<ProcessId>,
    pub waiters: VecDeque<ProcessId>,
}

fn phases_of<'a>(
    platform: &'a Platform,
    channels: &[Channel],
    transfer: &Transfer,
) -> &'a [Phase] {
    let channel = &channels[transfer.channel.0];
    let primitive = platform.primitive(
        channel
            .primitive
            .unwrap_or_else(|| panic!("Channel {} has no primitive", channel.name)),
    );
    let phases = match transfer.direction {
        Direction::Produce => primitive.produce_phases(transfer.processor),
        Direction::Consume => primitive.consume_phases(transfer.processor),
    };
    phases.unwrap_or_else(|| {
        panic!(
            "Primitive {} cannot be used by channel {} from {}",
            primitive.name,
            channel.name,
            platform.processor(transfer.processor).name
        )
    })
}

impl System {
    /// Starts moving tokens through the phases of the channel's primitive.
    ///
    /// Returns true if the transfer completed without suspending.
    pub(crate) fn begin_transfer(
        &mut self,
        pid: ProcessId,
        cid: ChannelId,
        direction: Direction,
        tokens: u64,
    ) -> bool {
        let process = &mut self.processes[pid.0];
        let processor: ProcessorId = process.processor();
        trace!(
            "{} {} {:?} {} tokens on {}",
            self.queue.now(),
            process.name(),
            direction,
            tokens,
            self.channels[cid.0].name
        );
        process.activity = Activity::Communicating(Transfer {
            channel: cid,
            direction,
            tokens,
            processor,
            phase: 0,
            acquired: 0,
        });
        self.advance_transfer(pid)
    }

    /// Acquires resources and starts phases until the transfer suspends or
    /// completes. Returns true on completion.
    fn advance_transfer(&mut self, pid: ProcessId) -> bool {
        loop {
            let mut transfer = match &self.processes[pid.0].activity {
                Activity::Communicating(transfer) => transfer.clone(),
                other => panic!("Transfer resumed in {:?}", other),
            };
            let phases = phases_of(&self.platform, &self.channels, &transfer);
            if transfer.phase == phases.len() {
                self.complete_transfer(pid, &transfer);
                return true;
            }
            let phase = &phases[transfer.phase];

            while transfer.acquired < phase.resources.len() {
                let resource = phase.resources[transfer.acquired];
                if self.platform.resource(resource).exclusive {
                    let state = &mut self.resources[resource.index()];
                    if state.holder.is_some() {
                        trace!(
                            "{} waiting for {}",
                            self.processes[pid.0].name(),
                            self.platform.resource(resource).name
                        );
                        state.waiters.push_back(pid);
                        self.processes[pid.0].activity = Activity::Communicating(transfer);
                        return false;
                    }
                    state.holder = Some(pid);
                }
                transfer.acquired += 1;
            }

            let bytes = transfer.tokens * self.channels[transfer.channel.0].token_size;
            let cost = phase.cost(bytes);
            self.processes[pid.0].activity = Activity::Communicating(transfer);
            if cost > 0 {
                self.queue.schedule(cost, Event::PhaseDone { process: pid });
                return false;
            }
            self.release_phase(pid);
        }
    }

    /// Releases the resources of the current phase and moves to the next.
    fn release_phase(&mut self, pid: ProcessId) {
        let transfer = match &mut self.processes[pid.0].activity {
            Activity::Communicating(transfer) => transfer,
            other => panic!("Phase completed in {:?}", other),
        };
        let phase = &phases_of(&self.platform, &self.channels, transfer)[transfer.phase];
        for resource in phase.resources.iter() {
            if !self.platform.resource(*resource).exclusive {
                continue;
            }
            let state = &mut self.resources[resource.index()];
            assert_eq!(state.holder, Some(pid));
            state.holder = state.waiters.pop_front();
            if let Some(next) = state.holder {
                // the grant counts as acquired for the waiter
                if let Activity::Communicating(waiting) = &mut self.processes[next.0].activity {
                    waiting.acquired += 1;
                }
                self.queue
                    .schedule(0, Event::ResourceGranted { process: next });
            }
        }
        if let Activity::Communicating(transfer) = &mut self.processes[pid.0].activity {
            transfer.phase += 1;
            transfer.acquired = 0;
        }
    }

    pub(crate) fn on_phase_done(&mut self, pid: ProcessId) {
        self.release_phase(pid);
        self.continue_transfer(pid);
    }

    pub(crate) fn continue_transfer(&mut self, pid: ProcessId) {
        if self.advance_transfer(pid) {
            self.execute(pid);
        }
    }

    fn complete_transfer(&mut self, pid: ProcessId, transfer: &Transfer) {
        let now = self.queue.now();
        let channel = &mut self.channels[transfer.channel.0];
        match transfer.direction {
            Direction::Produce => channel.commit_produce(pid, transfer.tokens),
            Direction::Consume => channel.commit_consume(pid, transfer.tokens),
        }
        let process = &mut self.processes[pid.0];
        process.activity = Activity::Idle;
        process.advance_segment();
        let application = process.application();

        if let Some(recorder) = self.recorder.as_mut() {
            let channel = &self.channels[transfer.channel.0];
            let application = &self.applications[application.0];
            let sinks: Vec<ProcessId> = match transfer.direction {
                Direction::Produce => channel.sinks.clone(),
                Direction::Consume => vec![pid],
            };
            for sink in sinks {
                recorder.fifo_depth(
                    application.name(),
                    &channel.name,
                    self.processes[sink.0].name(),
                    channel.fifo_depth(sink),
                    now,
                );
            }
        }
        self.notify(transfer.channel);
    }

    /// Blocks a running process until all conditions hold.
    pub(crate) fn block_on(&mut self, pid: ProcessId, conditions: Vec<Condition>) {
        for condition in conditions.iter() {
            let waiters = &mut self.channels[condition.channel.0].waiters;
            if !waiters.contains(&pid) {
                waiters.push(pid);
            }
        }
        debug!(
            "{} {} blocked on {:?}",
            self.queue.now(),
            self.processes[pid.0].name(),
            conditions
        );
        self.processes[pid.0].waiting_for = conditions;
        if self.processes[pid.0].state() == ProcessState::Running {
            self.block(pid);
        }
    }

    /// Re-checks the waiters of a channel whose FIFOs changed.
    pub(crate) fn notify(&mut self, cid: ChannelId) {
        let waiters = self.channels[cid.0].waiters.clone();
        for pid in waiters {
            let process = &self.processes[pid.0];
            if process.state() != ProcessState::Blocked {
                continue;
            }
            let satisfied = process
                .waiting_for
                .iter()
                .all(|condition| self.channels[condition.channel.0].is_satisfied(pid, condition));
            if satisfied {
                self.stop_waiting(pid);
                self.unblock(pid);
            }
        }
    }

    /// Removes a process from the waiter lists of all its channels.
    pub(crate) fn stop_waiting(&mut self, pid: ProcessId) {
        let conditions = std::mem::take(&mut self.processes[pid.0].waiting_for);
        for condition in conditions {
            self.channels[condition.channel.0]
                .waiters
                .retain(|p| *p != pid);
        }
    }
}
