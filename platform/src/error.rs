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

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    UnknownProcessor(String),
    UnknownFrequencyDomain(String),
    UnknownResource(String),
    UnknownPrimitive(String),
    UnknownScheduler(String),
    UnknownProcess(String),
    UnknownChannel(String),
    DuplicateName(String),
    UnmappedProcess(String),
    UnmappedChannel(String),
    InvalidCostModel(String),

    /// A read or write segment of the named process moves no tokens.
    InvalidTokenCount(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnmappedProcess(name) => {
                write!(f, "ERROR: Process {} has no mapping", name)
            }
            Self::UnmappedChannel(name) => {
                write!(f, "ERROR: Channel {} has no mapping", name)
            }
            Self::DuplicateName(name) => {
                write!(f, "ERROR: Name {} is defined more than once", name)
            }
            Self::InvalidTokenCount(name) => {
                write!(f, "ERROR: Process {} transfers zero tokens", name)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

// this is needed to allow `anyhow::Result` to accept our definition of
// errors when loading configurations.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
