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

//! Schedulers decide which ready process runs in which slot.
//!
//! A slot is one execution context: a processor, or one hardware thread of a
//! processor managed by the multithreaded policy. A scheduler makes one
//! decision at a time, and each decision goes through the same stages:
//!
//! ```text
//! Idle -> Deciding (decision cost) -> Switching (context load) -> Idle
//! ```
//!
//! Processes leaving a slot are queued as suspended; the scheduler stores
//! their context (`Storing`) before its next decision.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};

use platform::{ContextSwitchMode, Platform, ProcessorId, SchedulerId, SchedulerSpec, Ticks};

use crate::error::Error;
use crate::kernel::Event;
use crate::process::{Interrupt, Placement, ProcessId, ProcessState};
use crate::system::System;

mod policy;
pub use policy::Policy;

/// Samples kept for load estimation.
const LOAD_TRACE_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Slot {
    pub processor: ProcessorId,

    /// Hardware thread within the processor.
    pub thread: usize,
    pub running: Option<ProcessId>,

    /// Context currently held by the slot (after-scheduling mode only).
    pub loaded: Option<ProcessId>,

    /// Incremented on every activation; identifies time slice timers.
    pub activation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    Idle,
    Deciding(ProcessId),
    Switching { process: ProcessId, slot: usize },
    Storing(ProcessId),
}

/// Bounded history of the number of busy slots.
#[derive(Clone, Debug, Default)]
struct LoadTrace {
    samples: VecDeque<(Ticks, usize)>,
    truncated: bool,
}

impl LoadTrace {
    fn record(&mut self, now: Ticks, busy: usize) {
        match self.samples.back_mut() {
            Some(last) if last.0 == now => last.1 = busy,
            _ => self.samples.push_back((now, busy)),
        }
        if self.samples.len() > LOAD_TRACE_CAPACITY {
            self.samples.pop_front();
            self.truncated = true;
        }
    }

    /// Average number of busy slots over `[now - window, now]`.
    fn average(&self, now: Ticks, window: Ticks) -> Option<f64> {
        let start = now.saturating_sub(window);
        let span = now - start;
        let mut busy = 0;
        let mut covered = !self.truncated;
        let mut t = start;
        let mut area: u128 = 0;
        for (time, b) in self.samples.iter() {
            if *time <= start {
                busy = *b;
                covered = true;
                continue;
            }
            area += busy as u128 * (*time - t) as u128;
            t = *time;
            busy = *b;
        }
        if span == 0 {
            return if covered { Some(busy as f64) } else { None };
        }
        area += busy as u128 * (now - t) as u128;
        if covered {
            Some(area as f64 / span as f64)
        } else {
            None
        }
    }
}

/// Result of removing a process from its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Complete,

    /// The process was running; it leaves once it has been preempted and its
    /// context has been stored.
    Pending,
}

/// What happens to a process once it left its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AfterRemoval {
    Detach,

    /// Resumed while the removal was pending.
    Reattach(SchedulerId),
    Migrate {
        scheduler: SchedulerId,
        processor: ProcessorId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PendingRemoval {
    pub scheduler: SchedulerId,
    pub then: AfterRemoval,
}

#[derive(Debug)]
pub struct Scheduler {
    name: String,
    policy: Policy,
    mode: ContextSwitchMode,
    scheduling_ticks: Ticks,
    time_slice: Option<Ticks>,
    pub(crate) slots: Vec<Slot>,

    /// Processes attached to this scheduler.
    pub(crate) processes: Vec<ProcessId>,
    pub(crate) ready: VecDeque<ProcessId>,

    /// Processes that left a slot and still need their context stored.
    pub(crate) suspended: VecDeque<(ProcessId, usize)>,
    pub(crate) stage: Stage,
    pub(crate) wake_pending: bool,
    load: LoadTrace,
}

impl Scheduler {
    pub fn new(spec: &SchedulerSpec, platform: &Platform) -> Result<Self, Error> {
        if spec.processors.is_empty() {
            return Err(Error::EmptyScheduler(spec.name.clone()));
        }
        let policy = Policy::from_spec(spec)?;
        let mut slots = Vec::new();
        for processor in spec.processors.iter() {
            let threads = if policy.is_multithreaded() {
                platform.processor(*processor).thread_capacity()
            } else {
                1
            };
            for thread in 0..threads {
                slots.push(Slot {
                    processor: *processor,
                    thread,
                    running: None,
                    loaded: None,
                    activation: 0,
                });
            }
        }
        let scheduling_ticks = platform
            .processor(spec.processors[0])
            .ticks(spec.policy.scheduling_cycles);
        Ok(Self {
            name: spec.name.clone(),
            policy,
            mode: spec.context_switch_mode,
            scheduling_ticks,
            time_slice: spec.policy.time_slice,
            slots,
            processes: Vec::new(),
            ready: VecDeque::new(),
            suspended: VecDeque::new(),
            stage: Stage::Idle,
            wake_pending: false,
            load: LoadTrace::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn context_switch_mode(&self) -> ContextSwitchMode {
        self.mode
    }

    pub fn manages(&self, processor: ProcessorId) -> bool {
        self.slots.iter().any(|s| s.processor == processor)
    }

    pub fn ready_queue(&self) -> impl Iterator<Item = &ProcessId> {
        self.ready.iter()
    }

    pub fn running(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.slots.iter().filter_map(|s| s.running)
    }

    pub(crate) fn busy_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.running.is_some()).count()
    }

    /// Forgets a finished process.
    pub(crate) fn retire(&mut self, process: ProcessId) {
        self.ready.retain(|p| *p != process);
        self.policy.retire(process);
    }

    fn record_load(&mut self, now: Ticks) {
        let busy = self.busy_slots();
        self.load.record(now, busy);
    }

    /// Free slot on `processor`, preferring one that still holds the
    /// context of `process`.
    fn free_slot(&self, processor: ProcessorId, process: ProcessId) -> Option<usize> {
        let free: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.processor == processor && s.running.is_none())
            .map(|(i, _)| i)
            .collect();
        free.iter()
            .copied()
            .find(|i| self.slots[*i].loaded == Some(process))
            .or_else(|| free.iter().copied().find(|i| self.slots[*i].loaded.is_none()))
            .or_else(|| free.first().copied())
    }

    /// Fraction of the trailing `window` the slots were busy.
    pub fn average_load(&self, now: Ticks, window: Ticks) -> f64 {
        let slots = self.slots.len() as f64;
        match self.load.average(now, window) {
            Some(busy) => busy / slots,
            None => {
                warn!(
                    "Scheduler {}: load history does not cover the last {} ticks, estimate is degraded",
                    self.name, window
                );
                // fall back to what is known
                let known = self.load.samples.front().map(|s| s.0).unwrap_or(now);
                self.load
                    .average(now, now - known)
                    .map(|busy| busy / slots)
                    .unwrap_or(0.0)
            }
        }
    }
}

impl System {
    pub(crate) fn wake_scheduler(&mut self, sid: SchedulerId) {
        let scheduler = &mut self.schedulers[sid.index()];
        if !scheduler.wake_pending {
            scheduler.wake_pending = true;
            self.queue.schedule(0, Event::SchedulerWake(sid));
        }
    }

    pub(crate) fn on_scheduler_wake(&mut self, sid: SchedulerId) {
        self.schedulers[sid.index()].wake_pending = false;
        self.advance_scheduler(sid);
    }

    fn eligible(&self, sid: SchedulerId, pid: ProcessId) -> bool {
        let process = &self.processes[pid.0];
        process.state() == ProcessState::Ready
            && process.scheduler() == Some(sid)
            && !self.removals.contains_key(&pid)
    }

    /// Policy specific choice of the next process.
    pub(crate) fn schedule(&mut self, sid: SchedulerId) -> Option<ProcessId> {
        let scheduler = &self.schedulers[sid.index()];
        let candidates: Vec<ProcessId> = scheduler
            .ready
            .iter()
            .copied()
            .filter(|pid| {
                self.eligible(sid, *pid)
                    && scheduler
                        .free_slot(self.processes[pid.0].processor(), *pid)
                        .is_some()
            })
            .collect();
        let processes = &self.processes;
        self.schedulers[sid.index()]
            .policy
            .select(&candidates, |pid| processes[pid.0].priority())
    }

    /// Runs the scheduler until it has to wait for time to pass or for a
    /// process to become ready.
    pub(crate) fn advance_scheduler(&mut self, sid: SchedulerId) {
        loop {
            let now = self.queue.now();
            let scheduler = &mut self.schedulers[sid.index()];
            if scheduler.stage != Stage::Idle {
                return;
            }

            if let Some((pid, slot)) = scheduler.suspended.pop_front() {
                let finished = self.processes[pid.0].state() == ProcessState::Finished;
                let removing = self.removals.contains_key(&pid);
                let processor = scheduler.slots[slot].processor;
                let store = self.platform.processor(processor).context_store_ticks();
                let cost = match scheduler.mode {
                    ContextSwitchMode::Always => store,
                    ContextSwitchMode::AfterScheduling if removing && !finished => store,
                    _ => 0,
                };
                if (removing || finished) && scheduler.slots[slot].loaded == Some(pid) {
                    scheduler.slots[slot].loaded = None;
                }
                if cost > 0 {
                    trace!("{} {} storing {:?}", now, scheduler.name, pid);
                    scheduler.stage = Stage::Storing(pid);
                    self.queue.schedule(cost, Event::SchedulerCostPaid(sid));
                    return;
                }
                self.finalize_removal(pid);
                continue;
            }

            match self.schedule(sid) {
                Some(pid) => {
                    let scheduler = &mut self.schedulers[sid.index()];
                    debug!(
                        "{} {} selected {}",
                        now,
                        scheduler.name,
                        self.processes[pid.0].name()
                    );
                    scheduler.stage = Stage::Deciding(pid);
                    let cost = scheduler.scheduling_ticks;
                    self.queue.schedule(cost, Event::SchedulerCostPaid(sid));
                }
                None => trace!("{} {} idle", now, self.schedulers[sid.index()].name),
            }
            return;
        }
    }

    pub(crate) fn on_scheduler_cost_paid(&mut self, sid: SchedulerId) {
        let scheduler = &mut self.schedulers[sid.index()];
        let stage = std::mem::replace(&mut scheduler.stage, Stage::Idle);
        match stage {
            Stage::Deciding(pid) => {
                if self.eligible(sid, pid) {
                    let scheduler = &self.schedulers[sid.index()];
                    let processor = self.processes[pid.0].processor();
                    if let Some(slot) = scheduler.free_slot(processor, pid) {
                        let cost = self.switch_cost(sid, slot, pid);
                        if cost > 0 {
                            self.schedulers[sid.index()].stage =
                                Stage::Switching { process: pid, slot };
                            self.queue.schedule(cost, Event::SchedulerCostPaid(sid));
                            return;
                        }
                        self.activate(sid, slot, pid);
                    }
                }
            }
            Stage::Switching { process, slot } => {
                if self.eligible(sid, process)
                    && self.schedulers[sid.index()].slots[slot].running.is_none()
                {
                    self.activate(sid, slot, process);
                }
            }
            Stage::Storing(pid) => self.finalize_removal(pid),
            Stage::Idle => panic!("Scheduler {} paid for nothing", scheduler.name),
        }
        self.advance_scheduler(sid);
    }

    /// Context switch cost before `pid` runs in `slot`.
    fn switch_cost(&self, sid: SchedulerId, slot: usize, pid: ProcessId) -> Ticks {
        let scheduler = &self.schedulers[sid.index()];
        let slot = &scheduler.slots[slot];
        let processor = self.platform.processor(slot.processor);
        match scheduler.mode {
            ContextSwitchMode::Always => processor.context_load_ticks(),
            ContextSwitchMode::AfterScheduling => match slot.loaded {
                Some(loaded) if loaded == pid => 0,
                Some(_) => processor.context_store_ticks() + processor.context_load_ticks(),
                None => processor.context_load_ticks(),
            },
            ContextSwitchMode::Never => 0,
        }
    }

    /// Puts a ready process into a slot and runs it.
    fn activate(&mut self, sid: SchedulerId, slot: usize, pid: ProcessId) {
        let now = self.queue.now();
        let scheduler = &mut self.schedulers[sid.index()];
        scheduler.ready.retain(|p| *p != pid);
        let entry = &mut scheduler.slots[slot];
        assert!(entry.running.is_none());
        entry.running = Some(pid);
        entry.activation += 1;
        if scheduler.mode == ContextSwitchMode::AfterScheduling {
            entry.loaded = Some(pid);
        }
        let processor = entry.processor;
        let thread = entry.thread;
        let activation = entry.activation;
        scheduler.record_load(now);
        let multithreaded = scheduler.policy.is_multithreaded();
        let time_slice = scheduler.time_slice;

        self.processes[pid.0].activate(Placement {
            scheduler: sid,
            slot,
            processor,
        });
        debug!(
            "{} {} runs on {} ({})",
            now,
            self.processes[pid.0].name(),
            self.platform.processor(processor).name,
            thread
        );
        self.running_on[processor.index()].push(pid);
        self.energy.register_process_start(processor, pid, now);
        self.observe(pid);
        if self.recorder.is_some() {
            let name = self.qualified_name(pid);
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.slot_busy(&self.platform.processor(processor).name, thread, &name, now);
            }
        }
        if multithreaded {
            self.adapt_others(processor, pid);
        }

        self.execute(pid);

        if let Some(time_slice) = time_slice {
            let entry = &self.schedulers[sid.index()].slots[slot];
            if entry.running == Some(pid) && entry.activation == activation {
                self.queue.schedule(
                    time_slice,
                    Event::SliceExpired {
                        scheduler: sid,
                        slot,
                        activation,
                    },
                );
            }
        }
    }

    /// Bookkeeping for a process that stopped running, whatever the reason.
    pub(crate) fn leave_running(&mut self, pid: ProcessId, placement: Placement) {
        let now = self.queue.now();
        let Placement {
            scheduler: sid,
            slot,
            processor,
        } = placement;
        self.running_on[processor.index()].retain(|p| *p != pid);
        self.energy.register_process_end(processor, pid, now);

        let scheduler = &mut self.schedulers[sid.index()];
        assert_eq!(scheduler.slots[slot].running, Some(pid));
        scheduler.slots[slot].running = None;
        let thread = scheduler.slots[slot].thread;
        scheduler.suspended.push_back((pid, slot));
        scheduler.record_load(now);
        let multithreaded = scheduler.policy.is_multithreaded();

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.slot_free(&self.platform.processor(processor).name, thread, now);
        }
        if multithreaded {
            self.adapt_others(processor, pid);
        }
        self.wake_scheduler(sid);
    }

    /// The effective frequency of a multithreaded processor changed.
    fn adapt_others(&mut self, processor: ProcessorId, pid: ProcessId) {
        let others: Vec<ProcessId> = self.running_on[processor.index()]
            .iter()
            .copied()
            .filter(|p| *p != pid)
            .collect();
        for other in others {
            self.interrupt(other, Interrupt::Adapt);
        }
    }

    pub(crate) fn on_slice_expired(&mut self, sid: SchedulerId, slot: usize, activation: u64) {
        let entry = &self.schedulers[sid.index()].slots[slot];
        if entry.activation != activation {
            return;
        }
        if let Some(pid) = entry.running {
            trace!("{} time slice of {:?} expired", self.queue.now(), pid);
            self.interrupt(pid, Interrupt::Preempt);
        }
    }

    /// A process of this scheduler became ready.
    pub(crate) fn on_process_ready(&mut self, pid: ProcessId) {
        if self.removals.contains_key(&pid) {
            return;
        }
        if let Some(sid) = self.processes[pid.0].scheduler() {
            let scheduler = &mut self.schedulers[sid.index()];
            if !scheduler.ready.contains(&pid) {
                scheduler.ready.push_back(pid);
            }
            self.wake_scheduler(sid);
        }
    }

    /// Attaches a process. It is queued right away if it is ready.
    pub fn add_process(&mut self, sid: SchedulerId, pid: ProcessId) -> Result<(), Error> {
        let process = &self.processes[pid.0];
        assert!(
            !matches!(
                process.state(),
                ProcessState::Running | ProcessState::Finished
            ),
            "Cannot add {} process {} to a scheduler",
            format!("{:?}", process.state()).to_lowercase(),
            process.name()
        );
        assert!(process.scheduler().is_none(), "{} is already scheduled", process.name());
        let scheduler = &mut self.schedulers[sid.index()];
        if !scheduler.manages(process.processor()) {
            return Err(Error::InvalidMapping(format!(
                "{} is not managed by scheduler {}",
                self.platform.processor(process.processor()).name,
                scheduler.name
            )));
        }
        scheduler.processes.push(pid);
        scheduler.policy.admit(pid);
        self.processes[pid.0].set_scheduler(Some(sid));
        if self.processes[pid.0].state() == ProcessState::Ready {
            self.on_process_ready(pid);
        }
        Ok(())
    }

    /// Detaches a process from its scheduler. A running process is preempted
    /// first, and the removal completes once it left its slot.
    pub fn remove_process(&mut self, pid: ProcessId) -> Removal {
        self.request_removal(pid, AfterRemoval::Detach)
    }

    pub(crate) fn request_removal(&mut self, pid: ProcessId, then: AfterRemoval) -> Removal {
        let process = &self.processes[pid.0];
        let sid = match process.scheduler() {
            Some(sid) => sid,
            None => return Removal::Complete,
        };
        match process.state() {
            ProcessState::Finished => Removal::Complete,
            ProcessState::Running => {
                let previous = self
                    .removals
                    .insert(pid, PendingRemoval { scheduler: sid, then });
                assert!(previous.is_none(), "{} is already being removed", process.name());
                self.interrupt(pid, Interrupt::Preempt);
                Removal::Pending
            }
            _ => {
                self.detach(pid, sid);
                self.after_removal(pid, then);
                Removal::Complete
            }
        }
    }

    fn detach(&mut self, pid: ProcessId, sid: SchedulerId) {
        let scheduler = &mut self.schedulers[sid.index()];
        scheduler.processes.retain(|p| *p != pid);
        scheduler.ready.retain(|p| *p != pid);
        scheduler.policy.retire(pid);
        self.processes[pid.0].set_scheduler(None);
        debug!(
            "{} {} left {}",
            self.queue.now(),
            self.processes[pid.0].name(),
            scheduler.name
        );
    }

    fn after_removal(&mut self, pid: ProcessId, then: AfterRemoval) {
        if self.processes[pid.0].state() == ProcessState::Finished {
            return;
        }
        let scheduler = match then {
            AfterRemoval::Detach => return,
            AfterRemoval::Reattach(scheduler) => scheduler,
            AfterRemoval::Migrate {
                scheduler,
                processor,
            } => {
                self.processes[pid.0].set_processor(processor);
                scheduler
            }
        };
        if let Err(err) = self.add_process(scheduler, pid) {
            // checked when the removal was requested
            panic!("Reattaching {:?} failed: {}", pid, err);
        }
    }

    /// True while a running process waits to leave its scheduler.
    pub fn removal_pending(&self, pid: ProcessId) -> bool {
        self.removals.contains_key(&pid)
    }

    /// Completes the removal of a process once its context is stored.
    pub(crate) fn finalize_removal(&mut self, pid: ProcessId) {
        if let Some(removal) = self.removals.remove(&pid) {
            if self.processes[pid.0].scheduler() == Some(removal.scheduler) {
                self.detach(pid, removal.scheduler);
            }
            self.after_removal(pid, removal.then);
        }
    }

    pub fn average_load(&self, sid: SchedulerId, window: Ticks) -> f64 {
        self.schedulers[sid.index()].average_load(self.queue.now(), window)
    }
}

pub(crate) type Removals = HashMap<ProcessId, PendingRemoval>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_trace() {
        let mut load = LoadTrace::default();
        load.record(0, 1);
        load.record(10, 0);
        load.record(30, 2);
        // [0,10): 1, [10,30): 0, [30,40): 2
        assert_eq!(load.average(40, 40), Some((10.0 + 20.0) / 40.0));
        assert_eq!(load.average(40, 20), Some(20.0 / 20.0));
        assert_eq!(load.average(40, 0), Some(2.0));
        // windows reaching before time 0 are clipped
        assert_eq!(load.average(40, 100), Some(0.75));
    }

    #[test]
    fn test_load_trace_truncation() {
        let mut load = LoadTrace::default();
        for i in 0..(LOAD_TRACE_CAPACITY as u64 + 10) {
            load.record(i * 10, (i % 2) as usize);
        }
        assert!(load.truncated);
        assert_eq!(load.samples.len(), LOAD_TRACE_CAPACITY);
        let now = LOAD_TRACE_CAPACITY as u64 * 10 + 100;
        assert!(load.average(now, 100).is_some());
        assert_eq!(load.average(now, now), None);
    }
}
