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

//! Execution traces: what each process does, one segment at a time.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};

use crate::specs::DataflowGraph;
use crate::{Cycles, Error};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Cycles needed per processor type.
    Compute { cycles: BTreeMap<String, Cycles> },
    Read { channel: String, tokens: u64 },
    Write { channel: String, tokens: u64 },
}

impl Segment {
    pub fn compute(cycles: &[(&str, Cycles)]) -> Self {
        Self::Compute {
            cycles: cycles
                .iter()
                .map(|(pt, c)| (pt.to_string(), *c))
                .collect(),
        }
    }

    pub fn read(channel: &str, tokens: u64) -> Self {
        Self::Read {
            channel: channel.to_string(),
            tokens,
        }
    }

    pub fn write(channel: &str, tokens: u64) -> Self {
        Self::Write {
            channel: channel.to_string(),
            tokens,
        }
    }
}

/// Source of per-process segment sequences.
///
/// The sequence returned by `segments` is consumed exactly once; calling it
/// again yields a fresh sequence from the start.
pub trait TraceProvider {
    fn segments(&self, process: &str) -> Box<dyn Iterator<Item = Segment>>;

    /// Total cycles per processor type over the whole trace of `process`.
    fn accumulate_cycles(&self, process: &str) -> BTreeMap<String, Cycles> {
        let mut total = BTreeMap::new();
        for segment in self.segments(process) {
            if let Segment::Compute { cycles } = segment {
                for (processor_type, c) in cycles {
                    *total.entry(processor_type).or_insert(0) += c;
                }
            }
        }
        total
    }
}

/// A recorded trace held in memory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayTrace {
    processes: HashMap<String, Vec<Segment>>,
}

impl ReplayTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, process: &str, segment: Segment) {
        self.processes
            .entry(process.to_string())
            .or_default()
            .push(segment);
    }

    pub fn extend<I: IntoIterator<Item = Segment>>(&mut self, process: &str, segments: I) {
        self.processes
            .entry(process.to_string())
            .or_default()
            .extend(segments);
    }

    pub fn from_file(filename: &Path) -> anyhow::Result<Self> {
        log::debug!("Loading trace {}", filename.display());
        let file = std::fs::File::open(filename)?;
        let trace: Self = serde_yaml::from_reader(file)?;
        trace.validate()?;
        Ok(trace)
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        let trace: Self = serde_yaml::from_str(config)?;
        trace.validate()?;
        Ok(trace)
    }

    /// Every read and write moves at least one token.
    pub fn validate(&self) -> Result<(), Error> {
        for (process, segments) in self.processes.iter() {
            let empty = segments.iter().any(|segment| {
                matches!(
                    segment,
                    Segment::Read { tokens: 0, .. } | Segment::Write { tokens: 0, .. }
                )
            });
            if empty {
                return Err(Error::InvalidTokenCount(process.clone()));
            }
        }
        Ok(())
    }
}

impl TraceProvider for ReplayTrace {
    fn segments(&self, process: &str) -> Box<dyn Iterator<Item = Segment>> {
        let segments = match self.processes.get(process) {
            Some(segments) => segments.clone(),
            None => {
                log::warn!("No trace for process {}, it finishes right away", process);
                Vec::new()
            }
        };
        Box::new(segments.into_iter())
    }

    fn accumulate_cycles(&self, process: &str) -> BTreeMap<String, Cycles> {
        let mut total = BTreeMap::new();
        for segment in self.processes.get(process).into_iter().flatten() {
            if let Segment::Compute { cycles } = segment {
                for (processor_type, c) in cycles {
                    *total.entry(processor_type.clone()).or_insert(0) += c;
                }
            }
        }
        total
    }
}

/// Seeded random trace for a dataflow graph.
///
/// Every iteration a process reads one token from each input channel,
/// computes for a random number of cycles (drawn per processor type), then
/// writes one token to each output channel. The same seed always produces the
/// same trace.
#[derive(Clone, Debug)]
pub struct SyntheticTrace {
    ports: HashMap<String, (Vec<String>, Vec<String>)>,
    processor_types: Vec<String>,
    iterations: usize,
    cycles: Range<Cycles>,
    seed: u64,
}

impl SyntheticTrace {
    pub fn new(
        graph: &DataflowGraph,
        processor_types: &[&str],
        iterations: usize,
        cycles: Range<Cycles>,
        seed: u64,
    ) -> Result<Self, Error> {
        assert!(!cycles.is_empty(), "Empty cycle range");
        let mut ports = HashMap::new();
        for process in graph.processes() {
            let inputs = graph.inputs(process)?;
            let outputs = graph.outputs(process)?;
            ports.insert(
                process.to_string(),
                (
                    inputs.iter().map(|c| c.to_string()).collect(),
                    outputs.iter().map(|c| c.to_string()).collect(),
                ),
            );
        }
        Ok(Self {
            ports,
            processor_types: processor_types.iter().map(|t| t.to_string()).collect(),
            iterations,
            cycles,
            seed,
        })
    }

    fn process_seed(&self, process: &str) -> u64 {
        // FNV-1a over the name, mixed with the global seed
        process.bytes().fold(0xcbf29ce484222325 ^ self.seed, |h, b| {
            (h ^ b as u64).wrapping_mul(0x100000001b3)
        })
    }
}

impl TraceProvider for SyntheticTrace {
    fn segments(&self, process: &str) -> Box<dyn Iterator<Item = Segment>> {
        let (inputs, outputs) = match self.ports.get(process) {
            Some(ports) => ports.clone(),
            None => return Box::new(std::iter::empty()),
        };
        let mut rng = Xoshiro256StarStar::seed_from_u64(self.process_seed(process));
        let types = self.processor_types.clone();
        let range = self.cycles.clone();
        let iterations = self.iterations;

        let iteration = move |_| {
            let mut body = Vec::with_capacity(inputs.len() + outputs.len() + 1);
            body.extend(inputs.iter().map(|c| Segment::read(c, 1)));
            body.push(Segment::Compute {
                cycles: types
                    .iter()
                    .map(|t| (t.clone(), rng.gen_range(range.clone())))
                    .collect(),
            });
            body.extend(outputs.iter().map(|c| Segment::write(c, 1)));
            body
        };
        Box::new((0..iterations).map(iteration).flatten())
    }
}
