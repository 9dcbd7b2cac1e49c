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

use serde::{Deserialize, Serialize};

use super::ProcessorId;
use crate::{Cycles, Ticks};

/// When a scheduler pays for saving and restoring process contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSwitchMode {
    /// Load before every activation and store after every suspension.
    Always,
    /// Keep the context of the last process loaded; store it only when a
    /// different process is loaded into the same slot.
    AfterScheduling,
    Never,
}

impl Default for ContextSwitchMode {
    fn default() -> Self {
        Self::AfterScheduling
    }
}

/// The policy is identified by name and resolved by the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    pub name: String,

    /// Cost of one scheduling decision, in cycles of the scheduler's first
    /// processor.
    pub scheduling_cycles: Cycles,
    pub time_slice: Option<Ticks>,
}

impl SchedulingPolicy {
    pub fn new(name: &str, scheduling_cycles: Cycles, time_slice: Option<Ticks>) -> Self {
        Self {
            name: name.to_string(),
            scheduling_cycles,
            time_slice,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    pub name: String,
    pub processors: Vec<ProcessorId>,
    pub policy: SchedulingPolicy,
    #[serde(default)]
    pub context_switch_mode: ContextSwitchMode,
}

impl SchedulerSpec {
    pub fn new(name: &str, processors: Vec<ProcessorId>, policy: SchedulingPolicy) -> Self {
        Self {
            name: name.to_string(),
            processors,
            policy,
            context_switch_mode: ContextSwitchMode::default(),
        }
    }
}
