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

use std::cmp::Reverse;
use std::collections::VecDeque;

use itertools::Itertools;

use platform::SchedulerSpec;

use crate::error::Error;
use crate::process::ProcessId;

/// Picks the next process to run among the ready ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// First come, first served.
    Fifo,

    /// Scans the managed processes in a rotating order. Needs a time slice.
    RoundRobin { rotation: VecDeque<ProcessId> },

    /// Highest priority first; FIFO among equal priorities. Never preempts.
    StaticPriority,

    /// FIFO over all hardware threads of the processors.
    Multithreaded,
}

impl Policy {
    pub fn from_spec(spec: &SchedulerSpec) -> Result<Self, Error> {
        let policy = match spec.policy.name.as_str() {
            "FIFO" => Self::Fifo,
            "RoundRobin" => Self::RoundRobin {
                rotation: VecDeque::new(),
            },
            "StaticPriority" => Self::StaticPriority,
            "Multithreaded" | "MultithreadFIFO" => Self::Multithreaded,
            other => return Err(Error::UnknownPolicy(other.to_string())),
        };
        if let Self::RoundRobin { .. } = policy {
            if spec.policy.time_slice.unwrap_or(0) == 0 {
                return Err(Error::MissingTimeSlice(spec.name.clone()));
            }
        }
        Ok(policy)
    }

    pub fn is_multithreaded(&self) -> bool {
        matches!(self, Self::Multithreaded)
    }

    pub fn admit(&mut self, process: ProcessId) {
        if let Self::RoundRobin { rotation } = self {
            if !rotation.contains(&process) {
                rotation.push_back(process);
            }
        }
    }

    pub fn retire(&mut self, process: ProcessId) {
        if let Self::RoundRobin { rotation } = self {
            rotation.retain(|p| *p != process);
        }
    }

    /// `candidates` are the runnable processes in ready queue order.
    pub fn select<F>(&mut self, candidates: &[ProcessId], priority: F) -> Option<ProcessId>
    where
        F: Fn(ProcessId) -> i32,
    {
        match self {
            Self::Fifo | Self::Multithreaded => candidates.first().copied(),
            Self::StaticPriority => candidates
                .iter()
                .position_min_by_key(|p| Reverse(priority(**p)))
                .map(|i| candidates[i]),
            Self::RoundRobin { rotation } => {
                // the next scan starts right after the selected process
                let position = rotation.iter().position(|p| candidates.contains(p))?;
                rotation.rotate_left(position + 1);
                rotation.back().copied()
            }
        }
    }
}
