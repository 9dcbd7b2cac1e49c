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

use serde::Serialize;

use platform::{Platform, ProcessorId, Ticks};

use crate::process::ProcessId;

/// Energy in power units times ticks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Energy {
    pub static_energy: f64,
    pub dynamic_energy: f64,
}

impl Energy {
    pub fn total(&self) -> f64 {
        self.static_energy + self.dynamic_energy
    }
}

#[derive(Clone, Debug)]
struct ProcessorActivity {
    active: Vec<ProcessId>,
    last_update: Ticks,
    capacity: usize,
    static_power: f64,
    dynamic_power: f64,
}

/// Integrates processor energy from activity intervals.
///
/// A processor burns dynamic power while at least one process runs on it,
/// independently of how many threads are busy.
#[derive(Clone, Debug)]
pub struct EnergyEstimator {
    processors: Vec<ProcessorActivity>,
    peripheral_static_power: f64,
    dynamic_energy: f64,
    enabled: bool,
}

impl EnergyEstimator {
    pub fn new(platform: &Platform) -> Self {
        Self {
            processors: platform
                .processors()
                .map(|(_, p)| ProcessorActivity {
                    active: Vec::new(),
                    last_update: 0,
                    capacity: p.thread_capacity(),
                    static_power: p.static_power.unwrap_or(0.0),
                    dynamic_power: p.dynamic_power.unwrap_or(0.0),
                })
                .collect(),
            peripheral_static_power: platform.peripheral_static_power.unwrap_or(0.0),
            dynamic_energy: 0.0,
            enabled: platform.has_power_model(),
        }
    }

    fn accumulate(&mut self, processor: ProcessorId, now: Ticks) {
        let activity = &mut self.processors[processor.index()];
        assert!(now >= activity.last_update);
        if self.enabled && !activity.active.is_empty() {
            self.dynamic_energy += (now - activity.last_update) as f64 * activity.dynamic_power;
        }
        activity.last_update = now;
    }

    pub fn register_process_start(&mut self, processor: ProcessorId, process: ProcessId, now: Ticks) {
        self.accumulate(processor, now);
        let activity = &mut self.processors[processor.index()];
        assert!(
            activity.active.len() < activity.capacity,
            "Processor {:?} runs more processes than it has threads",
            processor
        );
        assert!(
            !activity.active.contains(&process),
            "{:?} started twice on {:?}",
            process,
            processor
        );
        activity.active.push(process);
    }

    pub fn register_process_end(&mut self, processor: ProcessorId, process: ProcessId, now: Ticks) {
        self.accumulate(processor, now);
        let activity = &mut self.processors[processor.index()];
        let position = activity
            .active
            .iter()
            .position(|p| *p == process)
            .unwrap_or_else(|| panic!("{:?} is not running on {:?}", process, processor));
        activity.active.remove(position);
    }

    /// The last time any processor started or stopped a process.
    pub fn last_activity_time(&self) -> Ticks {
        self.processors
            .iter()
            .map(|p| p.last_update)
            .max()
            .unwrap_or(0)
    }

    /// `None` if the platform has no power model.
    pub fn calculate_energy(&self) -> Option<Energy> {
        if !self.enabled {
            return None;
        }
        let time = self.last_activity_time() as f64;
        let static_power: f64 = self.processors.iter().map(|p| p.static_power).sum::<f64>()
            + self.peripheral_static_power;
        Some(Energy {
            static_energy: static_power * time,
            dynamic_energy: self.dynamic_energy,
        })
    }
}
