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

//! Applications bind a dataflow graph, its mapping and its trace to live
//! channels and processes.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde::Serialize;

use platform::{DataflowGraph, Mapping, SchedulerId, Ticks, TraceProvider};

use crate::channel::{Channel, ChannelId};
use crate::energy::Energy;
use crate::error::Error;
use crate::process::{Process, ProcessId, ProcessState};
use crate::system::System;
use crate::trace::ExecutionTrace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ApplicationId(pub(crate) usize);

impl ApplicationId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplicationOptions {
    /// Processes whose trace starts with reads begin BLOCKED until the
    /// tokens for all of these reads are available.
    pub wait_for_initial_tokens: bool,
}

#[derive(Debug)]
pub struct Application {
    name: String,
    processes: Vec<ProcessId>,
    process_names: HashMap<String, ProcessId>,
    channels: HashMap<String, ChannelId>,

    /// Scheduler each process is attached to when the application starts.
    schedulers: Vec<(ProcessId, SchedulerId)>,
    start_time: Option<Ticks>,
    end_time: Option<Ticks>,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[ProcessId] {
        &self.processes
    }

    pub fn process(&self, name: &str) -> Option<ProcessId> {
        self.process_names.get(name).copied()
    }

    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        self.channels.get(name).copied()
    }

    pub fn start_time(&self) -> Option<Ticks> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Ticks> {
        self.end_time
    }

    pub(crate) fn set_initial_scheduler(&mut self, pid: ProcessId, sid: SchedulerId) {
        for entry in self.schedulers.iter_mut() {
            if entry.0 == pid {
                entry.1 = sid;
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub state: ProcessState,

    /// Share of the required cycles executed, in [0, 1].
    pub progress: f64,
    pub finish_time: Option<Ticks>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApplicationReport {
    pub name: String,
    pub start_time: Option<Ticks>,
    pub end_time: Option<Ticks>,
    pub processes: BTreeMap<String, ProcessStatus>,
}

/// Outcome of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    pub execution_time: Ticks,
    pub energy: Option<Energy>,
    pub applications: Vec<ApplicationReport>,
    pub trace: Option<ExecutionTrace>,
}

impl SimulationReport {
    pub fn application(&self, name: &str) -> Option<&ApplicationReport> {
        self.applications.iter().find(|a| a.name == name)
    }
}

impl System {
    /// Creates the channels and processes of an application. Nothing runs
    /// until the application is started.
    pub fn add_application(
        &mut self,
        graph: &DataflowGraph,
        mapping: &Mapping,
        trace: &dyn TraceProvider,
        options: ApplicationOptions,
    ) -> Result<ApplicationId, Error> {
        assert!(
            self.applications.iter().all(|a| a.name != graph.name()),
            "Application {} added twice",
            graph.name()
        );

        // Validate everything before creating anything.
        for name in graph.processes() {
            let placement = mapping.process(name)?;
            let scheduler = &self.schedulers[placement.scheduler.index()];
            if !scheduler.manages(placement.processor) {
                return Err(Error::InvalidMapping(format!(
                    "Process {} is mapped to {}, which scheduler {} does not manage",
                    name,
                    self.platform.processor(placement.processor).name,
                    scheduler.name()
                )));
            }
        }
        for spec in graph.channels() {
            let placement = mapping.channel(&spec.name)?;
            if placement.capacity == 0 {
                return Err(Error::InvalidMapping(format!(
                    "Channel {} needs a positive capacity",
                    spec.name
                )));
            }
            let primitive = self.platform.primitive(placement.primitive);
            let source = graph.channel_source(&spec.name)?;
            let source_processor = mapping.process(source)?.processor;
            let mut unsuitable = None;
            if primitive.produce_phases(source_processor).is_none() {
                unsuitable = Some(source_processor);
            }
            for sink in graph.channel_sinks(&spec.name)? {
                let sink_processor = mapping.process(sink)?.processor;
                if unsuitable.is_none() && primitive.consume_phases(sink_processor).is_none() {
                    unsuitable = Some(sink_processor);
                }
            }
            if let Some(processor) = unsuitable {
                return Err(Error::NoSuitablePrimitive {
                    channel: spec.name.clone(),
                    primitive: primitive.name.clone(),
                    processor: self.platform.processor(processor).name.clone(),
                });
            }
        }

        let aid = ApplicationId(self.applications.len());
        let mut application = Application {
            name: graph.name().to_string(),
            processes: Vec::new(),
            process_names: HashMap::new(),
            channels: HashMap::new(),
            schedulers: Vec::new(),
            start_time: None,
            end_time: None,
        };
        for name in graph.processes() {
            let placement = mapping.process(name)?;
            let pid = ProcessId(self.processes.len());
            self.processes.push(Process::new(
                name,
                aid,
                placement.processor,
                placement.priority,
                trace.segments(name),
                trace.accumulate_cycles(name),
                options.wait_for_initial_tokens,
            ));
            application.processes.push(pid);
            application.process_names.insert(name.to_string(), pid);
            application.schedulers.push((pid, placement.scheduler));
        }
        for spec in graph.channels() {
            let placement = mapping.channel(&spec.name)?;
            let cid = ChannelId(self.channels.len());
            let mut channel = Channel::new(&spec.name, spec.token_size);
            channel.set_capacity(placement.capacity)?;
            channel.set_primitive(placement.primitive);
            channel.set_source(application.process_names[graph.channel_source(&spec.name)?]);
            for sink in graph.channel_sinks(&spec.name)? {
                channel.add_sink(application.process_names[sink]);
            }
            self.channels.push(channel);
            application.channels.insert(spec.name.clone(), cid);
        }
        debug!(
            "Application {}: {} processes, {} channels",
            application.name,
            application.processes.len(),
            application.channels.len()
        );
        self.applications.push(application);
        Ok(aid)
    }

    /// Starts every process of the applications that have not started yet.
    pub fn start_applications(&mut self) -> Result<(), Error> {
        let now = self.queue.now();
        for index in 0..self.applications.len() {
            if self.applications[index].start_time.is_some() {
                continue;
            }
            self.applications[index].start_time = Some(now);
            info!("{} Starting application {}", now, self.applications[index].name);
            let schedulers = self.applications[index].schedulers.clone();
            for (pid, sid) in schedulers {
                if self.processes[pid.0].state() == ProcessState::Created {
                    self.start_process(pid, sid)?;
                }
            }
            self.check_application_end(ApplicationId(index));
        }
        Ok(())
    }

    pub(crate) fn check_application_end(&mut self, aid: ApplicationId) {
        let now = self.queue.now();
        let application = &mut self.applications[aid.0];
        if application.end_time.is_some() || application.start_time.is_none() {
            return;
        }
        let processes = &self.processes;
        if application
            .processes
            .iter()
            .all(|pid| processes[pid.0].state() == ProcessState::Finished)
        {
            application.end_time = Some(now);
            info!("{} Application {} finished", now, application.name);
        }
    }

    pub fn application(&self, aid: ApplicationId) -> &Application {
        &self.applications[aid.0]
    }

    pub fn applications(&self) -> impl Iterator<Item = (ApplicationId, &Application)> {
        self.applications
            .iter()
            .enumerate()
            .map(|(i, a)| (ApplicationId(i), a))
    }

    pub fn find_application(&self, name: &str) -> Option<ApplicationId> {
        self.applications
            .iter()
            .position(|a| a.name == name)
            .map(ApplicationId)
    }

    /// Looks up a process by application and process name.
    pub fn find_process(&self, application: &str, process: &str) -> Option<ProcessId> {
        self.find_application(application)
            .and_then(|aid| self.applications[aid.0].process(process))
    }

    pub fn find_channel(&self, application: &str, channel: &str) -> Option<ChannelId> {
        self.find_application(application)
            .and_then(|aid| self.applications[aid.0].channel(channel))
    }

    pub fn report(&self) -> SimulationReport {
        let applications = self
            .applications
            .iter()
            .map(|application| ApplicationReport {
                name: application.name.clone(),
                start_time: application.start_time,
                end_time: application.end_time,
                processes: application
                    .processes
                    .iter()
                    .map(|pid| {
                        let process = &self.processes[pid.0];
                        (
                            process.name().to_string(),
                            ProcessStatus {
                                state: process.state(),
                                progress: process.progress(),
                                finish_time: process.finish_time(),
                            },
                        )
                    })
                    .collect(),
            })
            .collect();
        SimulationReport {
            execution_time: self.execution_time(),
            energy: self.calculate_energy(),
            applications,
            trace: self
                .recorder
                .as_ref()
                .map(|recorder| recorder.finish(self.queue.now())),
        }
    }
}
