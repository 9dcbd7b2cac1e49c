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

//! dataflow application graph
//!
//! Channels have exactly one writer and any number of readers, so the graph
//! is stored as a bipartite directed graph: process nodes and channel nodes,
//! with edges process -> channel for the writer and channel -> process for
//! each reader. The order in which readers were added is the sink order of
//! the channel.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use petgraph::prelude::*;

use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,

    /// Size of one token in bytes.
    pub token_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Process(String),
    Channel(ChannelSpec),
}

impl Actor {
    pub fn name(&self) -> &str {
        match self {
            Self::Process(name) => name,
            Self::Channel(spec) => &spec.name,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DataflowGraph {
    name: String,
    topo: Graph<Actor, ()>,
    names: HashMap<String, NodeIndex>,
}

impl DataflowGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_process(&mut self, name: &str) -> Result<NodeIndex, Error> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let node = self.topo.add_node(Actor::Process(name.to_string()));
        self.names.insert(name.to_string(), node);
        Ok(node)
    }

    pub fn add_channel(
        &mut self,
        name: &str,
        token_size: u64,
        source: &str,
        sinks: &[&str],
    ) -> Result<NodeIndex, Error> {
        if self.names.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let src = self.process_node(source)?;
        let dsts = sinks
            .iter()
            .map(|sink| self.process_node(sink))
            .collect::<Result<Vec<_>, _>>()?;
        if !dsts.iter().all_unique() {
            return Err(Error::DuplicateName(format!("{} (sink listed twice)", name)));
        }
        let node = self.topo.add_node(Actor::Channel(ChannelSpec {
            name: name.to_string(),
            token_size,
        }));
        self.names.insert(name.to_string(), node);
        self.topo.add_edge(src, node, ());
        for dst in dsts {
            self.topo.add_edge(node, dst, ());
        }
        Ok(node)
    }

    fn process_node(&self, name: &str) -> Result<NodeIndex, Error> {
        match self.names.get(name) {
            Some(node) if matches!(self.topo[*node], Actor::Process(_)) => Ok(*node),
            _ => Err(Error::UnknownProcess(name.to_string())),
        }
    }

    fn channel_node(&self, name: &str) -> Result<NodeIndex, Error> {
        match self.names.get(name) {
            Some(node) if matches!(self.topo[*node], Actor::Channel(_)) => Ok(*node),
            _ => Err(Error::UnknownChannel(name.to_string())),
        }
    }

    /// Process names in insertion order.
    pub fn processes(&self) -> Vec<&str> {
        self.topo
            .node_indices()
            .filter_map(|node| match &self.topo[node] {
                Actor::Process(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Channels in insertion order.
    pub fn channels(&self) -> Vec<&ChannelSpec> {
        self.topo
            .node_indices()
            .filter_map(|node| match &self.topo[node] {
                Actor::Channel(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelSpec, Error> {
        match &self.topo[self.channel_node(name)?] {
            Actor::Channel(spec) => Ok(spec),
            Actor::Process(_) => unreachable!(),
        }
    }

    pub fn channel_source(&self, name: &str) -> Result<&str, Error> {
        let node = self.channel_node(name)?;
        let source = self
            .topo
            .neighbors_directed(node, Direction::Incoming)
            .next()
            .expect("Channel without source");
        Ok(self.topo[source].name())
    }

    /// Readers of the channel, in the order they were declared.
    pub fn channel_sinks(&self, name: &str) -> Result<Vec<&str>, Error> {
        let node = self.channel_node(name)?;
        Ok(self
            .topo
            .edges_directed(node, Direction::Outgoing)
            .sorted_by_key(|edge| edge.id())
            .map(|edge| self.topo[edge.target()].name())
            .collect())
    }

    /// Channels read by `process`.
    pub fn inputs(&self, process: &str) -> Result<Vec<&str>, Error> {
        let node = self.process_node(process)?;
        Ok(self
            .topo
            .edges_directed(node, Direction::Incoming)
            .sorted_by_key(|edge| edge.id())
            .map(|edge| self.topo[edge.source()].name())
            .collect())
    }

    /// Channels written by `process`.
    pub fn outputs(&self, process: &str) -> Result<Vec<&str>, Error> {
        let node = self.process_node(process)?;
        Ok(self
            .topo
            .edges_directed(node, Direction::Outgoing)
            .sorted_by_key(|edge| edge.id())
            .map(|edge| self.topo[edge.target()].name())
            .collect())
    }

    pub fn to_graphviz(&self) -> String {
        use petgraph::dot::{Config, Dot};

        let generator = Dot::with_attr_getters(
            &self.topo,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, _| String::new(),
            &|_, node| match node.1 {
                Actor::Process(name) => format!("label=\"{}\"", name),
                Actor::Channel(spec) => format!(
                    "label=\"{}\nts = {}\"; shape=box",
                    spec.name, spec.token_size
                ),
            },
        );
        format!("{:?}", generator)
    }
}

impl Display for DataflowGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.to_graphviz())
    }
}
