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

use std::collections::BTreeMap;

use num::Integer;
use serde::{Deserialize, Serialize};

use super::{FrequencyDomain, ProcessorId, ResourceId};
use crate::{Cycles, Ticks};

/// A shared platform resource used during communication (bus, DMA engine,
/// memory port). Exclusive resources have at most one holder at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub exclusive: bool,
}

impl Resource {
    pub fn new(name: &str, exclusive: bool) -> Self {
        Self {
            name: name.to_string(),
            exclusive,
        }
    }
}

/// Maps a transfer size in bytes to a number of cycles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModel {
    Constant { cycles: Cycles },
    /// `offset + ceil(bytes / bytes_per_cycle)` cycles.
    Linear { offset: Cycles, bytes_per_cycle: u64 },
}

impl CostModel {
    pub fn cycles(&self, bytes: u64) -> Cycles {
        match self {
            Self::Constant { cycles } => *cycles,
            Self::Linear {
                offset,
                bytes_per_cycle,
            } => {
                assert!(*bytes_per_cycle > 0);
                offset + Integer::div_ceil(&bytes, bytes_per_cycle)
            }
        }
    }
}

/// One step of a produce or consume operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,

    /// Held for the whole duration of the phase; acquired in order.
    pub resources: Vec<ResourceId>,
    pub cost: CostModel,
    pub frequency_domain: FrequencyDomain,
}

impl Phase {
    pub fn new(
        name: &str,
        resources: Vec<ResourceId>,
        cost: CostModel,
        frequency_domain: FrequencyDomain,
    ) -> Self {
        Self {
            name: name.to_string(),
            resources,
            cost,
            frequency_domain,
        }
    }

    pub fn cost(&self, bytes: u64) -> Ticks {
        self.frequency_domain.cycles_to_ticks(self.cost.cycles(bytes))
    }
}

/// A communication mechanism. The cost of producing depends on the
/// processor the producer runs on, the cost of consuming on the processor of
/// the consumer. A processor without an entry cannot use the primitive in that
/// role.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub name: String,
    pub produce: BTreeMap<ProcessorId, Vec<Phase>>,
    pub consume: BTreeMap<ProcessorId, Vec<Phase>>,
}

impl Primitive {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_producer(&mut self, processor: ProcessorId, phases: Vec<Phase>) {
        self.produce.insert(processor, phases);
    }

    pub fn add_consumer(&mut self, processor: ProcessorId, phases: Vec<Phase>) {
        self.consume.insert(processor, phases);
    }

    pub fn produce_phases(&self, processor: ProcessorId) -> Option<&[Phase]> {
        self.produce.get(&processor).map(|phases| phases.as_slice())
    }

    pub fn consume_phases(&self, processor: ProcessorId) -> Option<&[Phase]> {
        self.consume.get(&processor).map(|phases| phases.as_slice())
    }

    /// True if a source on any of `sources` can reach sinks on any of `sinks`.
    pub fn is_suitable(&self, sources: &[ProcessorId], sinks: &[ProcessorId]) -> bool {
        sources.iter().all(|p| self.produce.contains_key(p))
            && sinks.iter().all(|p| self.consume.contains_key(p))
    }

    pub(crate) fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.produce
            .values()
            .chain(self.consume.values())
            .flat_map(|phases| phases.iter())
    }

    /// Uncontended produce + consume latency for `bytes` between two
    /// processors.
    pub fn static_cost(&self, source: ProcessorId, sink: ProcessorId, bytes: u64) -> Option<Ticks> {
        let produce = self.produce_phases(source)?;
        let consume = self.consume_phases(sink)?;
        Some(
            produce
                .iter()
                .chain(consume.iter())
                .map(|phase| phase.cost(bytes))
                .sum(),
        )
    }
}
