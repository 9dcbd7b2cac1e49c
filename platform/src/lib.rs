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

//! Read-only description of a mapped dataflow system: the hardware platform
//! (processors, resources, communication primitives and schedulers), the
//! dataflow application graph, the mapping of the latter onto the former, and
//! the execution traces the runtime replays.

mod config;
mod error;
mod mapping;
pub mod specs;
mod trace;

/// Logical simulation time. One tick is one picosecond.
pub type Ticks = u64;

/// Processor (or phase) clock cycles.
pub type Cycles = u64;

/// Ticks per simulated second; frequencies are given in Hz.
pub const TICKS_PER_SECOND: u64 = 1_000_000_000_000;

pub use crate::config::{
    ChannelConfiguration, ChannelMappingConfiguration, GraphConfiguration, MappingConfiguration,
    PhaseConfiguration, PlatformConfiguration, PrimitiveConfiguration,
    ProcessMappingConfiguration, ProcessorConfiguration, SchedulerConfiguration,
};
pub use crate::error::Error;
pub use crate::mapping::{ChannelMapping, Mapping, ProcessMapping};
pub use crate::specs::{
    Actor, ChannelSpec, ContextSwitchMode, CostModel, DataflowGraph, FrequencyDomain, Phase,
    Platform, Primitive, PrimitiveId, Processor, ProcessorId, Resource, ResourceId,
    SchedulerId, SchedulerSpec, SchedulingPolicy,
};
pub use crate::trace::{ReplayTrace, Segment, SyntheticTrace, TraceProvider};
pub use petgraph::graph::NodeIndex;
