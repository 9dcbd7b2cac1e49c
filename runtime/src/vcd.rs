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

//! Waveform export of an execution trace.
//!
//! The dump has one scope per application with a `state` signal per process
//! (see `ProcessState::code`) and a FIFO depth signal per channel sink, and
//! one scope per processor with a signal per hardware thread holding the
//! number of the running process (0 when idle; the numbers are listed in
//! the header comments).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::trace::ExecutionTrace;

const DEFAULT_TOP_MODULE: &str = "runtime";
const DEFAULT_VCD_HEADER: &str = "dataflow runtime VCD";
const STATE_WIDTH: usize = 3;
const COUNTER_WIDTH: usize = 32;

struct VcdWriter<W: Write> {
    writer: vcd::Writer<W>,
    error: Option<io::Error>,
    scope_stack: Vec<String>,
    id_map: HashMap<String, vcd::IdCode>,
    widths: HashMap<vcd::IdCode, usize>,
    last_value_map: HashMap<vcd::IdCode, u64>,
    timestamp: Option<u64>,
}

impl<W: Write> VcdWriter<W> {
    fn new(out: W) -> Self {
        Self {
            writer: vcd::Writer::new(out),
            error: None,
            scope_stack: vec![],
            id_map: HashMap::new(),
            widths: HashMap::new(),
            last_value_map: HashMap::new(),
            timestamp: None,
        }
    }

    fn vcd_error_handler(&mut self, err: io::Error) {
        if self.error.is_none() {
            log::error!("VCD writing failed with error {:?}", err);
            self.error = Some(err);
        }
    }

    fn is_error_state(&self) -> bool {
        self.error.is_some()
    }

    fn write_header(&mut self, legend: &[String]) {
        if self.is_error_state() {
            return;
        }
        self._write_header(legend)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _write_header(&mut self, legend: &[String]) -> io::Result<()> {
        self.writer.comment(DEFAULT_VCD_HEADER)?;
        for line in legend {
            self.writer.comment(line)?;
        }
        self.writer.date(chrono::Utc::now().to_string().as_str())?;
        self.writer.timescale(1, vcd::TimescaleUnit::PS)
    }

    fn add_module<T: Display + ?Sized>(&mut self, name: &T) {
        if self.is_error_state() {
            return;
        }
        self._add_module(name)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _add_module<T: Display + ?Sized>(&mut self, name: &T) -> io::Result<()> {
        self.writer.add_module(&name.to_string())?;
        self.scope_stack.push(name.to_string());
        Ok(())
    }

    fn upscope(&mut self) {
        if self.is_error_state() {
            return;
        }
        self.scope_stack
            .pop()
            .expect("Attempted to leave a scope without entering one first.");
        self.writer
            .upscope()
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn add_var(&mut self, var_type: vcd::VarType, width: usize, reference: &str) {
        if self.is_error_state() {
            return;
        }
        self._add_var(var_type, width, reference)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _add_var(&mut self, var_type: vcd::VarType, width: usize, reference: &str) -> io::Result<()> {
        let var_id = self
            .writer
            .add_var(var_type, width as u32, reference, None)?;
        let scoped_name = self.scoped_name(reference);
        if self.id_map.insert(scoped_name.clone(), var_id).is_some() {
            log::warn!("Scoped name {} was redefined for VCD dumps.", scoped_name);
        }
        self.widths.insert(var_id, width);
        Ok(())
    }

    fn enddefinitions(&mut self) {
        if self.is_error_state() {
            return;
        }
        self.writer
            .enddefinitions()
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn scoped_name(&self, name: &str) -> String {
        self.scope_stack.join(".") + "." + name
    }

    /// `name` is the full scoped name of the signal.
    fn change_vector(&mut self, time: u64, name: &str, value: u64) {
        if self.is_error_state() {
            return;
        }
        let id_code = match self.id_map.get(name) {
            Some(id_code) => *id_code,
            None => {
                log::warn!("No such scoped name {} was defined for VCD dumps.", name);
                return;
            }
        };
        if cfg!(feature = "trace-echo-vcd-signal-changes") {
            log::trace!("VCD changing {} to {} at {}", name, value, time);
        }
        self._change_vector(time, id_code, value)
            .unwrap_or_else(|err| self.vcd_error_handler(err));
    }

    fn _change_vector(&mut self, time: u64, id_code: vcd::IdCode, value: u64) -> io::Result<()> {
        if self.last_value_map.get(&id_code) == Some(&value) {
            return Ok(());
        }
        if self.timestamp != Some(time) {
            assert!(
                self.timestamp.map_or(true, |t| t < time),
                "VCD changes must be recorded in time order"
            );
            self.writer.timestamp(time)?;
            self.timestamp = Some(time);
        }
        let width = self.widths[&id_code];
        let bits: Vec<vcd::Value> = (0..width)
            .rev()
            .map(|i| ((value >> i) & 1 == 1).into())
            .collect();
        self.writer.change_vector(id_code, bits.as_slice())?;
        self.last_value_map.insert(id_code, value);
        Ok(())
    }

    fn finish(mut self, end: u64) -> io::Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if self.timestamp.map_or(true, |t| t < end) {
            self.writer.timestamp(end)?;
        }
        Ok(())
    }
}

/// Splits `application.name`.
fn split_qualified(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or(("", name))
}

impl ExecutionTrace {
    /// Writes the trace as a VCD waveform with a 1 ps timescale.
    pub fn write_vcd<W: Write>(&self, out: W) -> io::Result<()> {
        // Declarations, grouped by scope.
        let mut process_signals: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for interval in self.process_states.iter() {
            let (application, process) = split_qualified(&interval.process);
            process_signals
                .entry(application)
                .or_default()
                .insert(format!("{}_state", process));
        }
        for sample in self.fifo_depths.iter() {
            let (application, channel) = split_qualified(&sample.channel);
            let (_, sink) = split_qualified(&sample.sink);
            process_signals
                .entry(application)
                .or_default()
                .insert(format!("{}_{}_fifo", channel, sink));
        }
        let mut thread_signals: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for interval in self.schedule.iter() {
            thread_signals
                .entry(interval.processor.as_str())
                .or_default()
                .insert(interval.thread);
        }
        let numbers: BTreeMap<&str, u64> = self
            .schedule
            .iter()
            .map(|s| s.process.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .zip(1..)
            .collect();

        let mut writer = VcdWriter::new(out);
        let legend: Vec<String> = numbers
            .iter()
            .map(|(process, number)| format!("{}: {}", number, process))
            .collect();
        writer.write_header(&legend);
        writer.add_module(DEFAULT_TOP_MODULE);
        for (application, signals) in process_signals.iter() {
            writer.add_module(application);
            for signal in signals {
                let width = if signal.ends_with("_state") {
                    STATE_WIDTH
                } else {
                    COUNTER_WIDTH
                };
                writer.add_var(vcd::VarType::Wire, width, signal);
            }
            writer.upscope();
        }
        for (processor, threads) in thread_signals.iter() {
            writer.add_module(processor);
            for thread in threads {
                writer.add_var(
                    vcd::VarType::Integer,
                    COUNTER_WIDTH,
                    &format!("thread{}", thread),
                );
            }
            writer.upscope();
        }
        writer.upscope();
        writer.enddefinitions();

        // Changes, in time order; at equal times an interval start overrides
        // the end of the previous one.
        let mut changes: Vec<(u64, u8, String, u64)> = Vec::new();
        for interval in self.process_states.iter() {
            let (application, process) = split_qualified(&interval.process);
            changes.push((
                interval.start,
                1,
                format!("{}.{}.{}_state", DEFAULT_TOP_MODULE, application, process),
                interval.state.code(),
            ));
        }
        for sample in self.fifo_depths.iter() {
            let (application, channel) = split_qualified(&sample.channel);
            let (_, sink) = split_qualified(&sample.sink);
            changes.push((
                sample.time,
                1,
                format!("{}.{}.{}_{}_fifo", DEFAULT_TOP_MODULE, application, channel, sink),
                sample.depth,
            ));
        }
        for interval in self.schedule.iter() {
            let name = format!(
                "{}.{}.thread{}",
                DEFAULT_TOP_MODULE, interval.processor, interval.thread
            );
            changes.push((interval.start, 1, name.clone(), numbers[interval.process.as_str()]));
            changes.push((interval.end, 0, name, 0));
        }
        changes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut end = 0;
        for (time, _, name, value) in changes.iter() {
            writer.change_vector(*time, name, *value);
            end = end.max(*time);
        }
        for interval in self.process_states.iter() {
            end = end.max(interval.end);
        }
        writer.finish(end)
    }

    pub fn write_vcd_file(&self, path: &Path) -> io::Result<()> {
        let file = fs::File::create(path)?;
        log::debug!("VCD file: {}", path.display());
        self.write_vcd(io::BufWriter::new(file))
    }
}
