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

//! The system owns every simulated component and drives the event loop.

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{Graph, NodeIndex};

use platform::{Platform, ProcessorId, SchedulerId, Ticks};

use crate::app::{Application, SimulationReport};
use crate::channel::{Channel, ChannelId, Direction, ResourceState};
use crate::energy::{Energy, EnergyEstimator};
use crate::error::Error;
use crate::kernel::{Event, EventQueue};
use crate::process::{Condition, Interrupt, Process, ProcessId, ProcessState};
use crate::scheduler::{AfterRemoval, Removal, Removals, Scheduler};
use crate::trace::TraceRecorder;

pub struct System {
    pub(crate) platform: Platform,
    pub(crate) queue: EventQueue,
    pub(crate) processes: Vec<Process>,
    pub(crate) channels: Vec<Channel>,

    /// In the order of `platform.schedulers()`.
    pub(crate) schedulers: Vec<Scheduler>,
    pub(crate) resources: Vec<ResourceState>,

    /// Processes currently running on each processor.
    pub(crate) running_on: Vec<Vec<ProcessId>>,
    pub(crate) energy: EnergyEstimator,
    pub(crate) applications: Vec<Application>,

    /// Running processes that leave their scheduler once preempted.
    pub(crate) removals: Removals,
    pub(crate) recorder: Option<TraceRecorder>,
}

impl System {
    pub fn new(platform: &Platform) -> Result<Self, Error> {
        let schedulers = platform
            .schedulers()
            .map(|(_, spec)| Scheduler::new(spec, platform))
            .collect::<Result<Vec<_>, _>>()?;
        for (id, processor) in platform.processors() {
            let managing: Vec<&str> = schedulers
                .iter()
                .filter(|s| s.manages(id))
                .map(|s| s.name())
                .collect();
            if managing.len() > 1 {
                return Err(Error::InvalidMapping(format!(
                    "Processor {} is managed by several schedulers: {}",
                    processor.name,
                    managing.join(", ")
                )));
            }
        }
        Ok(Self {
            platform: platform.clone(),
            queue: EventQueue::new(),
            processes: Vec::new(),
            channels: Vec::new(),
            schedulers,
            resources: (0..platform.resource_count())
                .map(|_| ResourceState::default())
                .collect(),
            running_on: vec![Vec::new(); platform.processor_count()],
            energy: EnergyEstimator::new(platform),
            applications: Vec::new(),
            removals: Removals::new(),
            recorder: None,
        })
    }

    /// Records process states, FIFO depths and the schedule from now on.
    pub fn enable_tracing(&mut self) {
        if self.recorder.is_none() {
            let mut recorder = TraceRecorder::new();
            let now = self.queue.now();
            for (i, process) in self.processes.iter().enumerate() {
                let name = format!(
                    "{}.{}",
                    self.applications[process.application().index()].name(),
                    process.name()
                );
                recorder.state_changed(ProcessId(i), &name, process.state(), now);
            }
            self.recorder = Some(recorder);
        }
    }

    pub fn now(&self) -> Ticks {
        self.queue.now()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn process(&self, pid: ProcessId) -> &Process {
        &self.processes[pid.0]
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.processes
            .iter()
            .enumerate()
            .map(|(i, p)| (ProcessId(i), p))
    }

    pub fn channel(&self, cid: ChannelId) -> &Channel {
        &self.channels[cid.0]
    }

    pub fn scheduler(&self, sid: SchedulerId) -> &Scheduler {
        &self.schedulers[sid.index()]
    }

    /// `application.process`
    pub(crate) fn qualified_name(&self, pid: ProcessId) -> String {
        let process = &self.processes[pid.0];
        format!(
            "{}.{}",
            self.applications[process.application().index()].name(),
            process.name()
        )
    }

    /// Tells the observers of a process about its current state.
    pub(crate) fn observe(&mut self, pid: ProcessId) {
        let now = self.queue.now();
        let process = &self.processes[pid.0];
        trace!("{} {} is {:?}", now, process.name(), process.state());
        if let Some(recorder) = self.recorder.as_mut() {
            let name = format!(
                "{}.{}",
                self.applications[process.application().index()].name(),
                process.name()
            );
            recorder.state_changed(pid, &name, process.state(), now);
        }
    }

    /// Attaches a created process to `sid` and makes it ready, or blocked if
    /// it waits for initial tokens that are not there yet.
    pub fn start_process(&mut self, pid: ProcessId, sid: SchedulerId) -> Result<(), Error> {
        assert_eq!(
            self.processes[pid.0].state(),
            ProcessState::Created,
            "{} started twice",
            self.processes[pid.0].name()
        );
        self.add_process(sid, pid)?;

        let reads = if self.processes[pid.0].waits_for_initial_tokens() {
            self.processes[pid.0].initial_reads()
        } else {
            Vec::new()
        };
        let mut needed: BTreeMap<ChannelId, u64> = BTreeMap::new();
        for (channel, tokens) in reads {
            let cid = self.resolve_channel(pid, &channel);
            *needed.entry(cid).or_insert(0) += tokens;
        }
        let satisfied = needed
            .iter()
            .all(|(cid, tokens)| self.channels[cid.0].can_consume(pid, *tokens));

        if satisfied {
            self.processes[pid.0].start();
            self.observe(pid);
            self.on_process_ready(pid);
        } else {
            self.processes[pid.0].start_blocked();
            self.observe(pid);
            let conditions = needed
                .into_iter()
                .map(|(channel, tokens)| Condition {
                    channel,
                    direction: Direction::Consume,
                    tokens,
                })
                .collect();
            self.block_on(pid, conditions);
        }
        Ok(())
    }

    /// Takes a process away from its scheduler without stopping it: it
    /// keeps its state but is not scheduled until resumed. A running process
    /// leaves once preempted, see `removal_pending`.
    pub fn pause_process(&mut self, pid: ProcessId) -> Removal {
        self.remove_process(pid)
    }

    /// Attaches a paused process to `sid`. If the process is still leaving
    /// its previous scheduler, it is attached once the removal completes.
    pub fn resume_process(&mut self, pid: ProcessId, sid: SchedulerId) -> Result<(), Error> {
        let processor = self.processes[pid.0].processor();
        let removal = match self.removals.get_mut(&pid) {
            Some(removal) => removal,
            None => return self.add_process(sid, pid),
        };
        let scheduler = &self.schedulers[sid.index()];
        if !scheduler.manages(processor) {
            return Err(Error::InvalidMapping(format!(
                "{} is not managed by scheduler {}",
                self.platform.processor(processor).name,
                scheduler.name()
            )));
        }
        removal.then = AfterRemoval::Reattach(sid);
        debug!(
            "{} {} resumes on {} once removed",
            self.queue.now(),
            self.processes[pid.0].name(),
            scheduler.name()
        );
        Ok(())
    }

    /// Moves a process to `processor`, managed by `sid`. A running process
    /// moves once it has been preempted.
    pub fn migrate_process(
        &mut self,
        pid: ProcessId,
        sid: SchedulerId,
        processor: ProcessorId,
    ) -> Result<Removal, Error> {
        let scheduler = &self.schedulers[sid.index()];
        if !scheduler.manages(processor) {
            return Err(Error::InvalidMapping(format!(
                "{} is not managed by scheduler {}",
                self.platform.processor(processor).name,
                scheduler.name()
            )));
        }
        for channel in self.channels.iter() {
            let source = channel.source() == Some(pid);
            let sink = channel.sinks().contains(&pid);
            if !source && !sink {
                continue;
            }
            let primitive = match channel.primitive() {
                Some(primitive) => self.platform.primitive(primitive),
                None => continue,
            };
            if (source && primitive.produce_phases(processor).is_none())
                || (sink && primitive.consume_phases(processor).is_none())
            {
                return Err(Error::NoSuitablePrimitive {
                    channel: channel.name().to_string(),
                    primitive: primitive.name.clone(),
                    processor: self.platform.processor(processor).name.clone(),
                });
            }
        }

        debug!(
            "{} migrating {} to {}",
            self.queue.now(),
            self.processes[pid.0].name(),
            self.platform.processor(processor).name
        );
        let process = &self.processes[pid.0];
        match (process.state(), process.scheduler()) {
            (ProcessState::Finished, _) => Ok(Removal::Complete),
            (ProcessState::Created, _) => {
                let aid = process.application();
                self.processes[pid.0].set_processor(processor);
                self.applications[aid.index()].set_initial_scheduler(pid, sid);
                Ok(Removal::Complete)
            }
            (_, None) => {
                self.processes[pid.0].set_processor(processor);
                self.add_process(sid, pid)?;
                Ok(Removal::Complete)
            }
            (_, Some(_)) => Ok(self.request_removal(
                pid,
                AfterRemoval::Migrate {
                    scheduler: sid,
                    processor,
                },
            )),
        }
    }

    /// Terminates a process. A running process stops as soon as it is not
    /// in the middle of a transfer.
    pub fn kill_process(&mut self, pid: ProcessId) {
        let process = &self.processes[pid.0];
        debug!("{} killing {}", self.queue.now(), process.name());
        match process.state() {
            ProcessState::Finished => {}
            ProcessState::Running => self.interrupt(pid, Interrupt::Kill),
            ProcessState::Blocked => {
                self.stop_waiting(pid);
                self.finish(pid);
            }
            ProcessState::Ready | ProcessState::Created => self.finish(pid),
        }
    }

    pub(crate) fn finish(&mut self, pid: ProcessId) {
        let now = self.queue.now();
        let placement = self.processes[pid.0].finish(now);
        debug!("{} {} finished", now, self.processes[pid.0].name());
        if let Some(placement) = placement {
            self.leave_running(pid, placement);
        }
        self.observe(pid);
        if let Some(sid) = self.processes[pid.0].scheduler() {
            self.schedulers[sid.index()].retire(pid);
        }
        let aid = self.processes[pid.0].application();
        self.check_application_end(aid);
    }

    pub(crate) fn deactivate(&mut self, pid: ProcessId) {
        let placement = self.processes[pid.0].deactivate();
        self.leave_running(pid, placement);
        self.observe(pid);
        self.on_process_ready(pid);
    }

    pub(crate) fn block(&mut self, pid: ProcessId) {
        let placement = self.processes[pid.0].block();
        self.leave_running(pid, placement);
        self.observe(pid);
    }

    pub(crate) fn unblock(&mut self, pid: ProcessId) {
        self.processes[pid.0].unblock();
        self.observe(pid);
        self.on_process_ready(pid);
    }

    fn dispatch(&mut self, event: Event) {
        trace!("{} {:?}", self.queue.now(), event);
        match event {
            Event::SchedulerWake(sid) => self.on_scheduler_wake(sid),
            Event::SchedulerCostPaid(sid) => self.on_scheduler_cost_paid(sid),
            Event::SliceExpired {
                scheduler,
                slot,
                activation,
            } => self.on_slice_expired(scheduler, slot, activation),
            Event::ComputeDone {
                process,
                generation,
            } => self.on_compute_done(process, generation),
            Event::PhaseDone { process } => self.on_phase_done(process),
            Event::ResourceGranted { process } => self.continue_transfer(process),
        }
    }

    /// Delivers events until none is left.
    pub fn run(&mut self) {
        while let Some(event) = self.queue.pop() {
            self.dispatch(event);
        }
    }

    /// Delivers all events up to and including `limit`, then moves time to
    /// `limit`.
    pub fn run_until(&mut self, limit: Ticks) {
        while matches!(self.queue.peek_time(), Some(time) if time <= limit) {
            if let Some(event) = self.queue.pop() {
                self.dispatch(event);
            }
        }
        if limit > self.queue.now() {
            self.queue.advance_to(limit);
        }
    }

    /// Starts, runs and checks all added applications.
    pub fn simulate(&mut self) -> Result<SimulationReport, Error> {
        self.start_applications()?;
        self.run();
        self.check_errors()?;
        Ok(self.report())
    }

    /// Reports blocked processes left after a run as a deadlock.
    pub fn check_errors(&self) -> Result<(), Error> {
        let blocked: Vec<ProcessId> = self
            .processes()
            .filter(|(_, p)| p.state() == ProcessState::Blocked)
            .map(|(pid, _)| pid)
            .collect();

        for (pid, process) in self.processes() {
            if !matches!(
                process.state(),
                ProcessState::Blocked | ProcessState::Finished
            ) {
                warn!(
                    "{} did not complete, it is {:?} at {:.0}%",
                    self.qualified_name(pid),
                    process.state(),
                    process.progress() * 100.0
                );
            }
        }
        if blocked.is_empty() {
            return Ok(());
        }

        // wait-for graph: an edge from a blocked process to every process
        // that could unblock it
        let mut graph: Graph<ProcessId, ()> = Graph::new();
        let nodes: Vec<NodeIndex> = self
            .processes()
            .map(|(pid, _)| graph.add_node(pid))
            .collect();
        for pid in blocked.iter() {
            for condition in self.processes[pid.0].waiting_for.iter() {
                let channel = &self.channels[condition.channel.0];
                match condition.direction {
                    Direction::Consume => {
                        if let Some(source) = channel.source() {
                            graph.update_edge(nodes[pid.0], nodes[source.0], ());
                        }
                    }
                    Direction::Produce => {
                        let capacity = channel.capacity().unwrap_or(u64::MAX);
                        for sink in channel.sinks() {
                            if channel.fifo_depth(*sink) + condition.tokens > capacity {
                                graph.update_edge(nodes[pid.0], nodes[sink.0], ());
                            }
                        }
                    }
                }
            }
        }
        let cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                scc.iter()
                    .rev()
                    .map(|node| self.qualified_name(graph[*node]))
                    .collect()
            })
            .collect();
        Err(Error::Deadlock {
            blocked: blocked.iter().map(|pid| self.qualified_name(*pid)).collect(),
            cycles,
        })
    }

    /// Time from the first application start to the finish of the last
    /// process, or to the current time if some process did not finish.
    pub fn execution_time(&self) -> Ticks {
        let start = self
            .applications
            .iter()
            .filter_map(|a| a.start_time())
            .min()
            .unwrap_or(0);
        let end = if self
            .processes
            .iter()
            .all(|p| p.state() == ProcessState::Finished)
        {
            self.processes
                .iter()
                .filter_map(|p| p.finish_time())
                .max()
                .unwrap_or(start)
        } else {
            self.queue.now()
        };
        end.saturating_sub(start)
    }

    pub fn calculate_energy(&self) -> Option<Energy> {
        self.energy.calculate_energy()
    }
}
