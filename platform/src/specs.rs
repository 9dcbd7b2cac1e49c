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

//! Platform architectural specification.
//!
//! A platform is a flat collection of processors, shared resources,
//! communication primitives and the schedulers that manage the processors.
//! Components are stored in insertion order and referred to by typed indices
//! (`ProcessorId`, `ResourceId`, ...), so that the runtime can hold cheap,
//! copyable references into the platform while it simulates.

use serde::{Deserialize, Serialize};

use crate::Error;

mod graph;
pub use graph::{Actor, ChannelSpec, DataflowGraph};
mod primitive;
pub use primitive::{CostModel, Phase, Primitive, Resource};
mod processor;
pub use processor::{FrequencyDomain, Processor};
mod scheduler;
pub use scheduler::{ContextSwitchMode, SchedulerSpec, SchedulingPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessorId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimitiveId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchedulerId(usize);

impl ProcessorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl ResourceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl PrimitiveId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl SchedulerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Platform {
    name: String,
    processors: Vec<Processor>,
    resources: Vec<Resource>,
    primitives: Vec<Primitive>,
    schedulers: Vec<SchedulerSpec>,

    /// Static power of everything that is not a processor (interconnect,
    /// memories, ...). Integrated over the whole simulated time.
    pub peripheral_static_power: Option<f64>,
}

impl Platform {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_processor(&mut self, processor: Processor) -> ProcessorId {
        assert!(
            self.find_processor(&processor.name).is_err(),
            "Processor {} already defined",
            processor.name
        );
        self.processors.push(processor);
        ProcessorId(self.processors.len() - 1)
    }

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        assert!(
            self.find_resource(&resource.name).is_err(),
            "Resource {} already defined",
            resource.name
        );
        self.resources.push(resource);
        ResourceId(self.resources.len() - 1)
    }

    pub fn add_primitive(&mut self, primitive: Primitive) -> PrimitiveId {
        assert!(
            self.find_primitive(&primitive.name).is_err(),
            "Primitive {} already defined",
            primitive.name
        );
        for phase in primitive.phases() {
            for resource in phase.resources.iter() {
                assert!(
                    resource.index() < self.resources.len(),
                    "Phase {} of primitive {} refers to an undefined resource",
                    phase.name,
                    primitive.name
                );
            }
        }
        self.primitives.push(primitive);
        PrimitiveId(self.primitives.len() - 1)
    }

    pub fn add_scheduler(&mut self, scheduler: SchedulerSpec) -> SchedulerId {
        assert!(
            self.find_scheduler(&scheduler.name).is_err(),
            "Scheduler {} already defined",
            scheduler.name
        );
        for processor in scheduler.processors.iter() {
            assert!(processor.index() < self.processors.len());
        }
        self.schedulers.push(scheduler);
        SchedulerId(self.schedulers.len() - 1)
    }

    pub fn processor(&self, id: ProcessorId) -> &Processor {
        &self.processors[id.0]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn primitive(&self, id: PrimitiveId) -> &Primitive {
        &self.primitives[id.0]
    }

    pub fn scheduler(&self, id: SchedulerId) -> &SchedulerSpec {
        &self.schedulers[id.0]
    }

    pub fn processors(&self) -> impl Iterator<Item = (ProcessorId, &Processor)> {
        self.processors
            .iter()
            .enumerate()
            .map(|(i, p)| (ProcessorId(i), p))
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i), r))
    }

    pub fn primitives(&self) -> impl Iterator<Item = (PrimitiveId, &Primitive)> {
        self.primitives
            .iter()
            .enumerate()
            .map(|(i, p)| (PrimitiveId(i), p))
    }

    pub fn schedulers(&self) -> impl Iterator<Item = (SchedulerId, &SchedulerSpec)> {
        self.schedulers
            .iter()
            .enumerate()
            .map(|(i, s)| (SchedulerId(i), s))
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn scheduler_count(&self) -> usize {
        self.schedulers.len()
    }

    pub fn find_processor(&self, name: &str) -> Result<ProcessorId, Error> {
        self.processors
            .iter()
            .position(|p| p.name == name)
            .map(ProcessorId)
            .ok_or_else(|| Error::UnknownProcessor(name.to_string()))
    }

    pub fn find_resource(&self, name: &str) -> Result<ResourceId, Error> {
        self.resources
            .iter()
            .position(|r| r.name == name)
            .map(ResourceId)
            .ok_or_else(|| Error::UnknownResource(name.to_string()))
    }

    pub fn find_primitive(&self, name: &str) -> Result<PrimitiveId, Error> {
        self.primitives
            .iter()
            .position(|p| p.name == name)
            .map(PrimitiveId)
            .ok_or_else(|| Error::UnknownPrimitive(name.to_string()))
    }

    pub fn find_scheduler(&self, name: &str) -> Result<SchedulerId, Error> {
        self.schedulers
            .iter()
            .position(|s| s.name == name)
            .map(SchedulerId)
            .ok_or_else(|| Error::UnknownScheduler(name.to_string()))
    }

    /// True if any processor (or the periphery) defines a power figure.
    pub fn has_power_model(&self) -> bool {
        self.peripheral_static_power.is_some()
            || self
                .processors
                .iter()
                .any(|p| p.static_power.is_some() || p.dynamic_power.is_some())
    }

    /// The scheduler that manages `processor`, if any.
    pub fn scheduler_of(&self, processor: ProcessorId) -> Option<SchedulerId> {
        self.schedulers
            .iter()
            .position(|s| s.processors.contains(&processor))
            .map(SchedulerId)
    }
}
