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

use serde::Serialize;

use crate::specs::{PrimitiveId, ProcessorId, SchedulerId};
use crate::Error;

/// Where a process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessMapping {
    pub scheduler: SchedulerId,
    pub processor: ProcessorId,

    /// Only used by priority based policies; higher runs first.
    pub priority: i32,
}

/// How a channel communicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelMapping {
    pub primitive: PrimitiveId,

    /// FIFO capacity in tokens.
    pub capacity: u64,
}

/// Binds the processes and channels of one application graph to platform
/// components.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Mapping {
    processes: BTreeMap<String, ProcessMapping>,
    channels: BTreeMap<String, ChannelMapping>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_process(&mut self, name: &str, scheduler: SchedulerId, processor: ProcessorId) {
        self.map_process_with_priority(name, scheduler, processor, 0)
    }

    pub fn map_process_with_priority(
        &mut self,
        name: &str,
        scheduler: SchedulerId,
        processor: ProcessorId,
        priority: i32,
    ) {
        self.processes.insert(
            name.to_string(),
            ProcessMapping {
                scheduler,
                processor,
                priority,
            },
        );
    }

    pub fn map_channel(&mut self, name: &str, primitive: PrimitiveId, capacity: u64) {
        self.channels.insert(
            name.to_string(),
            ChannelMapping {
                primitive,
                capacity,
            },
        );
    }

    pub fn process(&self, name: &str) -> Result<&ProcessMapping, Error> {
        self.processes
            .get(name)
            .ok_or_else(|| Error::UnmappedProcess(name.to_string()))
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelMapping, Error> {
        self.channels
            .get(name)
            .ok_or_else(|| Error::UnmappedChannel(name.to_string()))
    }

    pub fn processes(&self) -> impl Iterator<Item = (&str, &ProcessMapping)> {
        self.processes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelMapping)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }
}
