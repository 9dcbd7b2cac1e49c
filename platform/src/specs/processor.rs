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

use num::rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::{Cycles, Ticks, TICKS_PER_SECOND};

/// A clock shared by one or more components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyDomain {
    pub name: String,

    /// Frequency in Hz.
    pub frequency: u64,
}

impl FrequencyDomain {
    pub fn new(name: &str, frequency: u64) -> Self {
        assert!(frequency > 0, "Frequency domain {} has zero frequency", name);
        Self {
            name: name.to_string(),
            frequency,
        }
    }

    pub fn cycles_to_ticks(&self, cycles: Cycles) -> Ticks {
        self.scaled_cycles_to_ticks(cycles, 1)
    }

    /// Ticks needed for `cycles` when the clock is time-shared by `divisor`
    /// contexts, i.e., the effective frequency is `frequency / divisor`.
    ///
    /// The conversion is exact and rounds to the nearest tick.
    pub fn scaled_cycles_to_ticks(&self, cycles: Cycles, divisor: usize) -> Ticks {
        assert!(divisor > 0);
        let ticks = Ratio::new(
            cycles as u128 * TICKS_PER_SECOND as u128 * divisor as u128,
            self.frequency as u128,
        );
        ticks.round().to_integer() as Ticks
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    pub name: String,

    /// Processors of the same type share trace cycle counts.
    pub processor_type: String,
    pub frequency_domain: FrequencyDomain,
    pub context_load_cycles: Cycles,
    pub context_store_cycles: Cycles,

    // power figures; energy is power times ticks
    pub static_power: Option<f64>,
    pub dynamic_power: Option<f64>,

    /// Number of hardware threads; `None` for single-threaded processors.
    pub threads: Option<usize>,

    /// Whether concurrently running threads share the clock, i.e. each one
    /// runs at `frequency / running_threads`.
    pub scale_frequency_with_threads: bool,
}

impl Processor {
    pub fn new(name: &str, processor_type: &str, frequency_domain: FrequencyDomain) -> Self {
        Self {
            name: name.to_string(),
            processor_type: processor_type.to_string(),
            frequency_domain,
            context_load_cycles: 0,
            context_store_cycles: 0,
            static_power: None,
            dynamic_power: None,
            threads: None,
            scale_frequency_with_threads: true,
        }
    }

    pub fn ticks(&self, cycles: Cycles) -> Ticks {
        self.frequency_domain.cycles_to_ticks(cycles)
    }

    pub fn context_load_ticks(&self) -> Ticks {
        self.ticks(self.context_load_cycles)
    }

    pub fn context_store_ticks(&self) -> Ticks {
        self.ticks(self.context_store_cycles)
    }

    /// Maximum number of processes that can be active at the same time.
    pub fn thread_capacity(&self) -> usize {
        self.threads.unwrap_or(1)
    }

    pub fn is_multithreaded(&self) -> bool {
        self.threads.is_some()
    }
}
