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

//! YAML configuration files.
//!
//! Configurations refer to everything by name; `build` resolves the names
//! and produces the model used by the runtime.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mapping::Mapping;
use crate::specs::{
    ContextSwitchMode, CostModel, DataflowGraph, FrequencyDomain, Phase, Platform, Primitive,
    Processor, Resource, SchedulerSpec, SchedulingPolicy,
};
use crate::{Cycles, Error, Ticks};

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessorConfiguration {
    pub name: String,
    pub processor_type: String,
    pub frequency_domain: String,
    #[serde(default)]
    pub context_load_cycles: Cycles,
    #[serde(default)]
    pub context_store_cycles: Cycles,
    #[serde(default)]
    pub static_power: Option<f64>,
    #[serde(default)]
    pub dynamic_power: Option<f64>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_true")]
    pub scale_frequency_with_threads: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PhaseConfiguration {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
    pub cost: CostModel,
    pub frequency_domain: String,
}

/// Phase lists are keyed by processor name.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PrimitiveConfiguration {
    pub name: String,
    #[serde(default)]
    pub produce: BTreeMap<String, Vec<PhaseConfiguration>>,
    #[serde(default)]
    pub consume: BTreeMap<String, Vec<PhaseConfiguration>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerConfiguration {
    pub name: String,
    pub processors: Vec<String>,
    pub policy: String,
    #[serde(default)]
    pub scheduling_cycles: Cycles,
    #[serde(default)]
    pub time_slice: Option<Ticks>,
    #[serde(default)]
    pub context_switch_mode: ContextSwitchMode,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlatformConfiguration {
    pub name: String,
    #[serde(default)]
    pub peripheral_static_power: Option<f64>,
    pub frequency_domains: Vec<FrequencyDomain>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    pub processors: Vec<ProcessorConfiguration>,
    #[serde(default)]
    pub primitives: Vec<PrimitiveConfiguration>,
    pub schedulers: Vec<SchedulerConfiguration>,
}

impl PlatformConfiguration {
    pub fn from_file(filename: &Path) -> anyhow::Result<Self> {
        log::debug!("Loading {}", filename.display());
        let reader = BufReader::new(File::open(filename)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(config)?)
    }

    fn frequency_domain(&self, name: &str) -> Result<FrequencyDomain, Error> {
        self.frequency_domains
            .iter()
            .find(|fd| fd.name == name)
            .cloned()
            .ok_or_else(|| Error::UnknownFrequencyDomain(name.to_string()))
    }

    fn build_phases(
        &self,
        platform: &Platform,
        primitive: &str,
        phases: &[PhaseConfiguration],
    ) -> Result<Vec<Phase>, Error> {
        phases
            .iter()
            .map(|phase| {
                if let CostModel::Linear {
                    bytes_per_cycle: 0, ..
                } = phase.cost
                {
                    return Err(Error::InvalidCostModel(format!(
                        "{}.{}",
                        primitive, phase.name
                    )));
                }
                let resources = phase
                    .resources
                    .iter()
                    .map(|r| platform.find_resource(r))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Phase::new(
                    &phase.name,
                    resources,
                    phase.cost.clone(),
                    self.frequency_domain(&phase.frequency_domain)?,
                ))
            })
            .collect()
    }

    pub fn build(&self) -> Result<Platform, Error> {
        let mut platform = Platform::new(&self.name);
        platform.peripheral_static_power = self.peripheral_static_power;

        for resource in self.resources.iter() {
            if platform.find_resource(&resource.name).is_ok() {
                return Err(Error::DuplicateName(resource.name.clone()));
            }
            platform.add_resource(resource.clone());
        }

        for config in self.processors.iter() {
            if platform.find_processor(&config.name).is_ok() {
                return Err(Error::DuplicateName(config.name.clone()));
            }
            let mut processor = Processor::new(
                &config.name,
                &config.processor_type,
                self.frequency_domain(&config.frequency_domain)?,
            );
            processor.context_load_cycles = config.context_load_cycles;
            processor.context_store_cycles = config.context_store_cycles;
            processor.static_power = config.static_power;
            processor.dynamic_power = config.dynamic_power;
            processor.threads = config.threads;
            processor.scale_frequency_with_threads = config.scale_frequency_with_threads;
            platform.add_processor(processor);
        }

        for config in self.primitives.iter() {
            if platform.find_primitive(&config.name).is_ok() {
                return Err(Error::DuplicateName(config.name.clone()));
            }
            let mut primitive = Primitive::new(&config.name);
            for (processor, phases) in config.produce.iter() {
                let id = platform.find_processor(processor)?;
                primitive.add_producer(id, self.build_phases(&platform, &config.name, phases)?);
            }
            for (processor, phases) in config.consume.iter() {
                let id = platform.find_processor(processor)?;
                primitive.add_consumer(id, self.build_phases(&platform, &config.name, phases)?);
            }
            platform.add_primitive(primitive);
        }

        for config in self.schedulers.iter() {
            if platform.find_scheduler(&config.name).is_ok() {
                return Err(Error::DuplicateName(config.name.clone()));
            }
            let processors = config
                .processors
                .iter()
                .map(|p| platform.find_processor(p))
                .collect::<Result<Vec<_>, _>>()?;
            let mut scheduler = SchedulerSpec::new(
                &config.name,
                processors,
                SchedulingPolicy::new(&config.policy, config.scheduling_cycles, config.time_slice),
            );
            scheduler.context_switch_mode = config.context_switch_mode;
            platform.add_scheduler(scheduler);
        }

        Ok(platform)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelConfiguration {
    pub name: String,
    pub token_size: u64,
    pub source: String,
    pub sinks: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphConfiguration {
    pub name: String,
    pub processes: Vec<String>,
    #[serde(default)]
    pub channels: Vec<ChannelConfiguration>,
}

impl GraphConfiguration {
    pub fn from_file(filename: &Path) -> anyhow::Result<Self> {
        log::debug!("Loading {}", filename.display());
        let reader = BufReader::new(File::open(filename)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(config)?)
    }

    pub fn build(&self) -> Result<DataflowGraph, Error> {
        let mut graph = DataflowGraph::new(&self.name);
        for process in self.processes.iter() {
            graph.add_process(process)?;
        }
        for channel in self.channels.iter() {
            let sinks: Vec<&str> = channel.sinks.iter().map(|s| s.as_str()).collect();
            graph.add_channel(&channel.name, channel.token_size, &channel.source, &sinks)?;
        }
        Ok(graph)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessMappingConfiguration {
    pub scheduler: String,
    pub processor: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MappingConfiguration {
    pub processes: BTreeMap<String, ProcessMappingConfiguration>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelMappingConfiguration>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelMappingConfiguration {
    pub primitive: String,
    pub capacity: u64,
}

impl MappingConfiguration {
    pub fn from_file(filename: &Path) -> anyhow::Result<Self> {
        log::debug!("Loading {}", filename.display());
        let reader = BufReader::new(File::open(filename)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(config)?)
    }

    pub fn build(&self, platform: &Platform) -> Result<Mapping, Error> {
        let mut mapping = Mapping::new();
        for (name, process) in self.processes.iter() {
            mapping.map_process_with_priority(
                name,
                platform.find_scheduler(&process.scheduler)?,
                platform.find_processor(&process.processor)?,
                process.priority,
            );
        }
        for (name, channel) in self.channels.iter() {
            mapping.map_channel(
                name,
                platform.find_primitive(&channel.primitive)?,
                channel.capacity,
            );
        }
        Ok(mapping)
    }
}
