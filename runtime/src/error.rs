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

use std::fmt;

/// Modeling and runtime errors. Misuse of the API (calling a transition from
/// the wrong state, double registration, ...) panics instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    NoSuitablePrimitive {
        channel: String,
        primitive: String,
        processor: String,
    },
    CapacityChanged {
        channel: String,
        capacity: u64,
        requested: u64,
    },
    UnknownPolicy(String),
    MissingTimeSlice(String),
    InvalidMapping(String),
    EmptyScheduler(String),

    /// Processes left blocked after the event queue ran dry, with the
    /// wait-for cycles among them.
    Deadlock {
        blocked: Vec<String>,
        cycles: Vec<Vec<String>>,
    },
    Platform(platform::Error),
}

impl From<platform::Error> for Error {
    fn from(err: platform::Error) -> Self {
        Self::Platform(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoSuitablePrimitive {
                channel,
                primitive,
                processor,
            } => write!(
                f,
                "ERROR: Primitive {} of channel {} cannot be used from processor {}",
                primitive, channel, processor
            ),
            Self::CapacityChanged {
                channel,
                capacity,
                requested,
            } => write!(
                f,
                "ERROR: Channel {} already has capacity {}, cannot change it to {}",
                channel, capacity, requested
            ),
            Self::UnknownPolicy(name) => write!(f, "ERROR: Unknown scheduling policy {}", name),
            Self::MissingTimeSlice(name) => {
                write!(f, "ERROR: Scheduler {} needs a time slice", name)
            }
            Self::Deadlock { blocked, cycles } => {
                write!(f, "ERROR: Deadlock, blocked processes: {}", blocked.join(", "))?;
                for cycle in cycles {
                    write!(f, "; cycle: {}", cycle.join(" -> "))?;
                }
                Ok(())
            }
            Self::Platform(err) => write!(f, "{}", err),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(err) => Some(err),
            _ => None,
        }
    }
}
