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

//! Discrete event execution of dataflow applications mapped onto a
//! platform.
//!
//! A `System` owns the live processes, channels and schedulers. Processes
//! replay their traces segment by segment, channels charge the phases of
//! their primitive, schedulers charge decisions and context switches, and the
//! energy estimator integrates processor activity. All time is logical.

mod app;
mod channel;
mod energy;
mod error;
pub mod kernel;
mod process;
mod scheduler;
mod system;
mod trace;
mod vcd;

pub use crate::app::{
    Application, ApplicationId, ApplicationOptions, ApplicationReport, ProcessStatus,
    SimulationReport,
};
pub use crate::channel::{Channel, ChannelId, Direction};
pub use crate::energy::{Energy, EnergyEstimator};
pub use crate::error::Error;
pub use crate::process::{Interrupt, Process, ProcessId, ProcessState};
pub use crate::scheduler::{Policy, Removal, Scheduler};
pub use crate::system::System;
pub use crate::trace::{ExecutionTrace, FifoSample, ScheduleInterval, StateInterval};

use platform::{DataflowGraph, Mapping, Platform, TraceProvider};

/// Simulates one application until every process finished or nothing can
/// happen anymore.
pub fn simulate(
    platform: &Platform,
    graph: &DataflowGraph,
    mapping: &Mapping,
    trace: &dyn TraceProvider,
) -> Result<SimulationReport, Error> {
    let mut system = System::new(platform)?;
    system.add_application(graph, mapping, trace, ApplicationOptions::default())?;
    system.simulate()
}
