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

//! Dataflow pipelines mapped onto small platforms.
//!
//! Without arguments the binary runs a producer/consumer pipeline configured
//! from the YAML below. With arguments it reads the platform, graph, mapping
//! and trace from files: `pipelines PLATFORM GRAPH MAPPING TRACE [VCD]`.
use std::path::Path;

use platform::{
    DataflowGraph, GraphConfiguration, Mapping, MappingConfiguration, Platform,
    PlatformConfiguration, ReplayTrace,
};
use runtime::{ApplicationOptions, SimulationReport, System};

const PLATFORM: &str = "---
name: dual
frequency_domains:
  - name: core
    frequency: 1000000000000
resources:
  - name: bus
    exclusive: true
processors:
  - name: pe0
    processor_type: arm
    frequency_domain: core
  - name: pe1
    processor_type: arm
    frequency_domain: core
primitives:
  - name: shm
    produce:
      pe0:
        - name: write
          resources: [bus]
          frequency_domain: core
          cost:
            linear: { offset: 4, bytes_per_cycle: 8 }
    consume:
      pe1:
        - name: read
          resources: [bus]
          frequency_domain: core
          cost:
            constant: { cycles: 2 }
schedulers:
  - name: s0
    processors: [pe0]
    policy: FIFO
    context_switch_mode: never
  - name: s1
    processors: [pe1]
    policy: FIFO
    context_switch_mode: never
";

const GRAPH: &str = "---
name: stream
processes: [producer, consumer]
channels:
  - name: c
    token_size: 16
    source: producer
    sinks: [consumer]
";

const MAPPING: &str = "---
processes:
  producer: { scheduler: s0, processor: pe0 }
  consumer: { scheduler: s1, processor: pe1 }
channels:
  c: { primitive: shm, capacity: 1 }
";

const TRACE: &str = "---
producer:
  - compute: { cycles: { arm: 100 } }
  - write: { channel: c, tokens: 1 }
  - compute: { cycles: { arm: 100 } }
  - write: { channel: c, tokens: 1 }
consumer:
  - read: { channel: c, tokens: 1 }
  - compute: { cycles: { arm: 50 } }
  - read: { channel: c, tokens: 1 }
  - compute: { cycles: { arm: 50 } }
";

struct Model {
    platform: Platform,
    graph: DataflowGraph,
    mapping: Mapping,
    trace: ReplayTrace,
}

fn from_yaml(platform: &str, graph: &str, mapping: &str, trace: &str) -> anyhow::Result<Model> {
    let platform = PlatformConfiguration::from_str(platform)?.build()?;
    let graph = GraphConfiguration::from_str(graph)?.build()?;
    let mapping = MappingConfiguration::from_str(mapping)?.build(&platform)?;
    let trace = ReplayTrace::from_str(trace)?;
    Ok(Model {
        platform,
        graph,
        mapping,
        trace,
    })
}

fn from_files(platform: &str, graph: &str, mapping: &str, trace: &str) -> anyhow::Result<Model> {
    let platform = PlatformConfiguration::from_file(Path::new(platform))?.build()?;
    let graph = GraphConfiguration::from_file(Path::new(graph))?.build()?;
    let mapping = MappingConfiguration::from_file(Path::new(mapping))?.build(&platform)?;
    let trace = ReplayTrace::from_file(Path::new(trace))?;
    Ok(Model {
        platform,
        graph,
        mapping,
        trace,
    })
}

fn run(model: &Model, tracing: bool) -> anyhow::Result<SimulationReport> {
    let mut system = System::new(&model.platform)?;
    system.add_application(
        &model.graph,
        &model.mapping,
        &model.trace,
        ApplicationOptions::default(),
    )?;
    if tracing {
        system.enable_tracing();
    }
    Ok(system.simulate()?)
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let model = if args.len() >= 5 {
        from_files(&args[1], &args[2], &args[3], &args[4]).expect("Loading the model failed.")
    } else {
        from_yaml(PLATFORM, GRAPH, MAPPING, TRACE).expect("Loading the model failed.")
    };
    let report = run(&model, args.len() >= 6).expect("Simulation failed.");
    if let (Some(path), Some(trace)) = (args.get(5), report.trace.as_ref()) {
        if let Err(err) = trace.write_vcd_file(Path::new(path)) {
            log::error!("Writing {} failed: {}", path, err);
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("Report serialization failed.")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::{
        ContextSwitchMode, CostModel, FrequencyDomain, Phase, Primitive, PrimitiveId, Processor,
        ProcessorId, SchedulerId, SchedulerSpec, SchedulingPolicy, Segment,
    };
    use runtime::{Error, ProcessState, Removal};

    /// One cycle is one tick.
    const TERAHERTZ: u64 = 1_000_000_000_000;

    /// A platform with one scheduler per processor and a primitive usable
    /// between any two of them at `cycles` per phase.
    fn platform(
        processors: usize,
        policy: &str,
        time_slice: Option<u64>,
        mode: ContextSwitchMode,
        cycles: u64,
    ) -> (Platform, Vec<ProcessorId>, Vec<SchedulerId>, PrimitiveId) {
        let fd = FrequencyDomain::new("core", TERAHERTZ);
        let mut platform = Platform::new("test");
        let pes: Vec<ProcessorId> = (0..processors)
            .map(|i| platform.add_processor(Processor::new(&format!("pe{}", i), "arm", fd.clone())))
            .collect();
        let mut local = Primitive::new("local");
        for pe in pes.iter() {
            let phase = Phase::new("copy", vec![], CostModel::Constant { cycles }, fd.clone());
            local.add_producer(*pe, vec![phase.clone()]);
            local.add_consumer(*pe, vec![phase]);
        }
        let local = platform.add_primitive(local);
        let schedulers = pes
            .iter()
            .map(|pe| {
                let mut spec = SchedulerSpec::new(
                    &format!("s{}", pe.index()),
                    vec![*pe],
                    SchedulingPolicy::new(policy, 0, time_slice),
                );
                spec.context_switch_mode = mode;
                platform.add_scheduler(spec)
            })
            .collect();
        (platform, pes, schedulers, local)
    }

    /// One processor with a context load of 3 cycles, a store of 2 and a
    /// decision cost of 4.
    fn costly(
        policy: &str,
        time_slice: Option<u64>,
        mode: ContextSwitchMode,
    ) -> (Platform, ProcessorId, SchedulerId) {
        let mut platform = Platform::new("costly");
        let mut processor = Processor::new("pe0", "arm", FrequencyDomain::new("core", TERAHERTZ));
        processor.context_load_cycles = 3;
        processor.context_store_cycles = 2;
        let pe = platform.add_processor(processor);
        let mut spec = SchedulerSpec::new(
            "s0",
            vec![pe],
            SchedulingPolicy::new(policy, 4, time_slice),
        );
        spec.context_switch_mode = mode;
        let sid = platform.add_scheduler(spec);
        (platform, pe, sid)
    }

    /// Independent compute-only processes.
    fn computing(
        name: &str,
        pe: ProcessorId,
        sid: SchedulerId,
        cycles: &[(&str, u64)],
    ) -> (DataflowGraph, Mapping, ReplayTrace) {
        let mut graph = DataflowGraph::new(name);
        let mut mapping = Mapping::new();
        let mut trace = ReplayTrace::new();
        for (process, cycles) in cycles {
            graph.add_process(process).unwrap();
            mapping.map_process(process, sid, pe);
            trace.push(process, Segment::compute(&[("arm", *cycles)]));
        }
        (graph, mapping, trace)
    }

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Independent jobs of 10, 20, .. 50 ticks.
    fn jobs(pe: ProcessorId, sid: SchedulerId) -> (DataflowGraph, Mapping, ReplayTrace) {
        let mut graph = DataflowGraph::new("jobs");
        let mut mapping = Mapping::new();
        let mut trace = ReplayTrace::new();
        for i in 0..5 {
            let name = format!("j{}", i);
            graph.add_process(&name).unwrap();
            mapping.map_process(&name, sid, pe);
            trace.push(&name, Segment::compute(&[("arm", 10 * (i + 1))]));
        }
        (graph, mapping, trace)
    }

    fn finish_times(report: &SimulationReport, application: &str) -> Vec<(String, u64)> {
        let mut times: Vec<_> = report
            .application(application)
            .unwrap()
            .processes
            .iter()
            .map(|(name, status)| (name.clone(), status.finish_time.unwrap()))
            .collect();
        times.sort_by_key(|(_, time)| *time);
        times
    }

    #[test]
    fn test_fifo_runs_in_submission_order() {
        init();
        let (platform, pes, schedulers, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let (graph, mapping, trace) = jobs(pes[0], schedulers[0]);
        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        assert_eq!(report.execution_time, 150);
        assert_eq!(
            finish_times(&report, "jobs"),
            vec![
                ("j0".to_string(), 10),
                ("j1".to_string(), 30),
                ("j2".to_string(), 60),
                ("j3".to_string(), 100),
                ("j4".to_string(), 150),
            ]
        );
        assert_eq!(report.energy, None);
        for status in report.application("jobs").unwrap().processes.values() {
            assert_eq!(status.state, ProcessState::Finished);
            assert_eq!(status.progress, 1.0);
        }
    }

    #[test]
    fn test_multithreaded_runs_in_parallel() {
        init();
        let (mut platform, pes, _, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let mut processor = platform.processor(pes[0]).clone();
        processor.name = "mt".to_string();
        processor.threads = Some(5);
        processor.scale_frequency_with_threads = false;
        let mt = platform.add_processor(processor);
        let mut spec = SchedulerSpec::new("mts", vec![mt], SchedulingPolicy::new("Multithreaded", 0, None));
        spec.context_switch_mode = ContextSwitchMode::Never;
        let sid = platform.add_scheduler(spec);

        let (graph, mapping, trace) = jobs(mt, sid);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.enable_tracing();
        let report = system.simulate().unwrap();
        assert_eq!(report.execution_time, 50);
        let trace = report.trace.unwrap();
        let schedule: Vec<_> = trace.processor_schedule("mt").collect();
        assert_eq!(schedule.len(), 5);
        assert!(schedule.iter().all(|s| s.start == 0));
        let threads: std::collections::BTreeSet<_> = schedule.iter().map(|s| s.thread).collect();
        assert_eq!(threads.len(), 5);
    }

    #[test]
    fn test_multithreaded_frequency_scaling() {
        init();
        let (mut platform, pes, _, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let mut processor = platform.processor(pes[0]).clone();
        processor.name = "mt".to_string();
        processor.threads = Some(2);
        let mt = platform.add_processor(processor);
        let mut spec = SchedulerSpec::new("mts", vec![mt], SchedulingPolicy::new("MultithreadFIFO", 0, None));
        spec.context_switch_mode = ContextSwitchMode::Never;
        let sid = platform.add_scheduler(spec);

        let mut graph = DataflowGraph::new("scaled");
        let mut mapping = Mapping::new();
        let mut trace = ReplayTrace::new();
        for (name, cycles) in [("a", 100), ("b", 200)] {
            graph.add_process(name).unwrap();
            mapping.map_process(name, sid, mt);
            trace.push(name, Segment::compute(&[("arm", cycles)]));
        }
        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        // both run at half speed until a finishes at 200, then b runs its
        // remaining 100 cycles at full speed
        assert_eq!(
            finish_times(&report, "scaled"),
            vec![("a".to_string(), 200), ("b".to_string(), 300)]
        );
    }

    #[test]
    fn test_reader_without_writer_deadlocks() {
        init();
        let (platform, pes, schedulers, local) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let mut graph = DataflowGraph::new("stuck");
        graph.add_process("w").unwrap();
        graph.add_process("r").unwrap();
        graph.add_channel("c", 4, "w", &["r"]).unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("w", schedulers[0], pes[0]);
        mapping.map_process("r", schedulers[0], pes[0]);
        mapping.map_channel("c", local, 1);
        let mut trace = ReplayTrace::new();
        trace.push("w", Segment::compute(&[("arm", 10)]));
        trace.push("r", Segment::read("c", 1));

        let result = runtime::simulate(&platform, &graph, &mapping, &trace);
        assert_eq!(
            result.unwrap_err(),
            Error::Deadlock {
                blocked: vec!["stuck.r".to_string()],
                cycles: vec![],
            }
        );
    }

    #[test]
    fn test_cyclic_wait_is_reported() {
        init();
        let (platform, pes, schedulers, local) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let mut graph = DataflowGraph::new("ring");
        graph.add_process("a").unwrap();
        graph.add_process("b").unwrap();
        graph.add_channel("ab", 4, "a", &["b"]).unwrap();
        graph.add_channel("ba", 4, "b", &["a"]).unwrap();
        let mut mapping = Mapping::new();
        for process in ["a", "b"] {
            mapping.map_process(process, schedulers[0], pes[0]);
        }
        mapping.map_channel("ab", local, 1);
        mapping.map_channel("ba", local, 1);
        let mut trace = ReplayTrace::new();
        trace.extend("a", vec![Segment::read("ba", 1), Segment::write("ab", 1)]);
        trace.extend("b", vec![Segment::read("ab", 1), Segment::write("ba", 1)]);

        match runtime::simulate(&platform, &graph, &mapping, &trace) {
            Err(Error::Deadlock { blocked, cycles }) => {
                assert_eq!(blocked, vec!["ring.a".to_string(), "ring.b".to_string()]);
                assert_eq!(cycles.len(), 1);
                let mut cycle = cycles[0].clone();
                cycle.sort();
                assert_eq!(cycle, vec!["ring.a".to_string(), "ring.b".to_string()]);
            }
            other => panic!("Expected a deadlock, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_pipeline() {
        init();
        let (platform, pes, schedulers, local) = platform(1, "FIFO", None, ContextSwitchMode::Never, 1);
        let mut graph = DataflowGraph::new("fork");
        for process in ["src", "left", "right"] {
            graph.add_process(process).unwrap();
        }
        graph.add_channel("c", 4, "src", &["left", "right"]).unwrap();
        let mut mapping = Mapping::new();
        for process in ["src", "left", "right"] {
            mapping.map_process(process, schedulers[0], pes[0]);
        }
        mapping.map_channel("c", local, 2);
        let mut trace = ReplayTrace::new();
        trace.extend("src", vec![Segment::write("c", 1), Segment::write("c", 1)]);
        trace.extend(
            "left",
            vec![
                Segment::read("c", 1),
                Segment::compute(&[("arm", 5)]),
                Segment::read("c", 1),
            ],
        );
        trace.push("right", Segment::read("c", 2));

        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.enable_tracing();
        let report = system.simulate().unwrap();
        assert_eq!(report.execution_time, 10);
        assert_eq!(
            finish_times(&report, "fork"),
            vec![
                ("src".to_string(), 2),
                ("left".to_string(), 9),
                ("right".to_string(), 10),
            ]
        );

        let trace = report.trace.unwrap();
        let depths = |sink: &str| -> Vec<(u64, u64)> {
            trace
                .fifo_depths
                .iter()
                .filter(|s| s.sink == sink)
                .map(|s| (s.time, s.depth))
                .collect()
        };
        assert_eq!(depths("fork.left"), vec![(1, 1), (2, 2), (3, 1), (9, 0)]);
        assert_eq!(depths("fork.right"), vec![(1, 1), (2, 2), (10, 0)]);
        let c = system.find_channel("fork", "c").unwrap();
        assert_eq!(system.channel(c).fifo_depth(system.find_process("fork", "left").unwrap()), 0);
    }

    #[test]
    fn test_round_robin_interleaves() {
        init();
        let (platform, pes, schedulers, _) =
            platform(1, "RoundRobin", Some(10), ContextSwitchMode::Never, 0);
        let mut graph = DataflowGraph::new("rr");
        let mut mapping = Mapping::new();
        let mut trace = ReplayTrace::new();
        for name in ["a", "b"] {
            graph.add_process(name).unwrap();
            mapping.map_process(name, schedulers[0], pes[0]);
            trace.push(name, Segment::compute(&[("arm", 100)]));
        }
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.enable_tracing();
        let report = system.simulate().unwrap();
        assert_eq!(
            finish_times(&report, "rr"),
            vec![("a".to_string(), 190), ("b".to_string(), 200)]
        );
        let trace = report.trace.unwrap();
        let schedule: Vec<_> = trace.processor_schedule("pe0").collect();
        assert_eq!(schedule.len(), 20);
        for (i, interval) in schedule.iter().enumerate() {
            assert_eq!(interval.start, 10 * i as u64);
            assert_eq!(interval.end - interval.start, 10);
            let expected = if i % 2 == 0 { "rr.a" } else { "rr.b" };
            assert_eq!(interval.process, expected);
        }
    }

    #[test]
    fn test_static_priority() {
        init();
        let (platform, pes, schedulers, _) =
            platform(1, "StaticPriority", None, ContextSwitchMode::Never, 0);
        let mut graph = DataflowGraph::new("prio");
        let mut mapping = Mapping::new();
        let mut trace = ReplayTrace::new();
        for (name, priority) in [("low", 1), ("high", 5), ("mid", 3)] {
            graph.add_process(name).unwrap();
            mapping.map_process_with_priority(name, schedulers[0], pes[0], priority);
            trace.push(name, Segment::compute(&[("arm", 10)]));
        }
        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        assert_eq!(
            finish_times(&report, "prio"),
            vec![
                ("high".to_string(), 10),
                ("mid".to_string(), 20),
                ("low".to_string(), 30),
            ]
        );
    }

    #[test]
    fn test_migration_waits_for_preemption() {
        init();
        let (mut platform, pes, _, _) = platform(2, "FIFO", None, ContextSwitchMode::Never, 0);
        // rebuild the schedulers with a store cost on pe0
        let mut pe0 = platform.processor(pes[0]).clone();
        pe0.name = "src".to_string();
        pe0.context_store_cycles = 5;
        let src = platform.add_processor(pe0);
        let mut pe1 = platform.processor(pes[1]).clone();
        pe1.name = "dst".to_string();
        let dst = platform.add_processor(pe1);
        let s_src = platform.add_scheduler(SchedulerSpec::new(
            "s_src",
            vec![src],
            SchedulingPolicy::new("FIFO", 0, None),
        ));
        let s_dst = platform.add_scheduler(SchedulerSpec::new(
            "s_dst",
            vec![dst],
            SchedulingPolicy::new("FIFO", 0, None),
        ));

        let mut graph = DataflowGraph::new("move");
        graph.add_process("p").unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("p", s_src, src);
        let mut trace = ReplayTrace::new();
        trace.push("p", Segment::compute(&[("arm", 100)]));

        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.enable_tracing();
        system.start_applications().unwrap();
        system.run_until(40);
        let p = system.find_process("move", "p").unwrap();
        assert_eq!(system.process(p).state(), ProcessState::Running);

        assert_eq!(system.migrate_process(p, s_dst, dst), Ok(Removal::Pending));
        assert_eq!(system.process(p).state(), ProcessState::Ready);
        assert_eq!(system.process(p).scheduler(), Some(s_src));
        // the context is stored before the process leaves
        system.run_until(44);
        assert_eq!(system.process(p).scheduler(), Some(s_src));
        system.run_until(45);
        assert_eq!(system.process(p).scheduler(), Some(s_dst));
        assert_eq!(system.process(p).processor(), dst);

        system.run();
        assert_eq!(system.check_errors(), Ok(()));
        assert_eq!(system.process(p).finish_time(), Some(105));
        let report = system.report();
        let trace = report.trace.unwrap();
        let on_src: Vec<_> = trace
            .processor_schedule("src")
            .map(|s| (s.start, s.end))
            .collect();
        let on_dst: Vec<_> = trace
            .processor_schedule("dst")
            .map(|s| (s.start, s.end))
            .collect();
        assert_eq!(on_src, vec![(0, 40)]);
        assert_eq!(on_dst, vec![(45, 105)]);
    }

    #[test]
    fn test_migration_needs_suitable_primitive() {
        init();
        let (mut platform, pes, schedulers, _) = platform(2, "FIFO", None, ContextSwitchMode::Never, 0);
        let fd = platform.processor(pes[0]).frequency_domain.clone();
        let mut only_pe0 = Primitive::new("only_pe0");
        let phase = Phase::new("copy", vec![], CostModel::Constant { cycles: 1 }, fd);
        only_pe0.add_producer(pes[0], vec![phase.clone()]);
        only_pe0.add_consumer(pes[0], vec![phase]);
        let only_pe0 = platform.add_primitive(only_pe0);

        let mut graph = DataflowGraph::new("pinned");
        graph.add_process("w").unwrap();
        graph.add_process("r").unwrap();
        graph.add_channel("c", 4, "w", &["r"]).unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("w", schedulers[0], pes[0]);
        mapping.map_process("r", schedulers[0], pes[0]);
        mapping.map_channel("c", only_pe0, 1);
        let mut trace = ReplayTrace::new();
        trace.push("w", Segment::write("c", 1));
        trace.push("r", Segment::read("c", 1));

        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        let r = system.find_process("pinned", "r").unwrap();
        assert_eq!(
            system.migrate_process(r, schedulers[1], pes[1]),
            Err(Error::NoSuitablePrimitive {
                channel: "c".to_string(),
                primitive: "only_pe0".to_string(),
                processor: "pe1".to_string(),
            })
        );
        assert!(matches!(
            system.migrate_process(r, schedulers[0], pes[1]),
            Err(Error::InvalidMapping(_))
        ));
        assert!(system.simulate().is_ok());
    }

    #[test]
    fn test_exclusive_bus_serializes_transfers() {
        init();
        let (mut platform, pes, schedulers, _) = platform(3, "FIFO", None, ContextSwitchMode::Never, 0);
        let fd = platform.processor(pes[0]).frequency_domain.clone();
        let bus = platform.add_resource(platform::Resource::new("bus", true));
        let mut shm = Primitive::new("shm");
        for pe in &pes[..2] {
            shm.add_producer(
                *pe,
                vec![Phase::new("write", vec![bus], CostModel::Constant { cycles: 10 }, fd.clone())],
            );
        }
        shm.add_consumer(
            pes[2],
            vec![Phase::new("read", vec![], CostModel::Constant { cycles: 0 }, fd)],
        );
        let shm = platform.add_primitive(shm);

        let mut graph = DataflowGraph::new("bus");
        for process in ["p0", "p1", "k0", "k1"] {
            graph.add_process(process).unwrap();
        }
        graph.add_channel("c0", 4, "p0", &["k0"]).unwrap();
        graph.add_channel("c1", 4, "p1", &["k1"]).unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("p0", schedulers[0], pes[0]);
        mapping.map_process("p1", schedulers[1], pes[1]);
        mapping.map_process("k0", schedulers[2], pes[2]);
        mapping.map_process("k1", schedulers[2], pes[2]);
        mapping.map_channel("c0", shm, 1);
        mapping.map_channel("c1", shm, 1);
        let mut trace = ReplayTrace::new();
        trace.push("p0", Segment::write("c0", 1));
        trace.push("p1", Segment::write("c1", 1));
        trace.push("k0", Segment::read("c0", 1));
        trace.push("k1", Segment::read("c1", 1));

        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        assert_eq!(
            finish_times(&report, "bus"),
            vec![
                ("k0".to_string(), 10),
                ("p0".to_string(), 10),
                ("k1".to_string(), 20),
                ("p1".to_string(), 20),
            ]
        );
        assert_eq!(report.execution_time, 20);
    }

    #[test]
    fn test_pipeline_energy() {
        init();
        let fd = FrequencyDomain::new("core", TERAHERTZ);
        let mut platform = Platform::new("energy");
        let mut a = Processor::new("a", "arm", fd.clone());
        a.static_power = Some(1.0);
        a.dynamic_power = Some(3.0);
        let mut b = Processor::new("b", "arm", fd.clone());
        b.static_power = Some(2.0);
        b.dynamic_power = Some(7.0);
        let a = platform.add_processor(a);
        let b = platform.add_processor(b);
        let mut direct = Primitive::new("direct");
        let phase = Phase::new("copy", vec![], CostModel::Constant { cycles: 0 }, fd);
        direct.add_producer(a, vec![phase.clone()]);
        direct.add_consumer(b, vec![phase]);
        let direct = platform.add_primitive(direct);
        let sa = platform.add_scheduler(SchedulerSpec::new("sa", vec![a], SchedulingPolicy::new("FIFO", 0, None)));
        let sb = platform.add_scheduler(SchedulerSpec::new("sb", vec![b], SchedulingPolicy::new("FIFO", 0, None)));

        let mut graph = DataflowGraph::new("energy");
        graph.add_process("A").unwrap();
        graph.add_process("B").unwrap();
        graph.add_channel("ab", 8, "A", &["B"]).unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("A", sa, a);
        mapping.map_process("B", sb, b);
        mapping.map_channel("ab", direct, 1);
        let mut trace = ReplayTrace::new();
        trace.extend("A", vec![Segment::compute(&[("arm", 1000)]), Segment::write("ab", 1)]);
        trace.extend("B", vec![Segment::read("ab", 1), Segment::compute(&[("arm", 2000)])]);

        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        assert_eq!(report.execution_time, 3000);
        let energy = report.energy.unwrap();
        assert_eq!(energy.static_energy, 9000.0);
        assert_eq!(energy.dynamic_energy, 17000.0);
        assert_eq!(energy.total(), 26000.0);
    }

    #[test]
    fn test_waiting_for_initial_tokens() {
        init();
        let (platform, pes, schedulers, local) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let mut graph = DataflowGraph::new("initial");
        graph.add_process("w").unwrap();
        graph.add_process("r").unwrap();
        graph.add_channel("c", 4, "w", &["r"]).unwrap();
        let mut mapping = Mapping::new();
        mapping.map_process("w", schedulers[0], pes[0]);
        mapping.map_process("r", schedulers[0], pes[0]);
        mapping.map_channel("c", local, 2);
        let mut trace = ReplayTrace::new();
        trace.extend("w", vec![Segment::compute(&[("arm", 5)]), Segment::write("c", 2)]);
        trace.extend(
            "r",
            vec![
                Segment::read("c", 1),
                Segment::read("c", 1),
                Segment::compute(&[("arm", 10)]),
            ],
        );

        let mut system = System::new(&platform).unwrap();
        let options = ApplicationOptions {
            wait_for_initial_tokens: true,
        };
        system
            .add_application(&graph, &mapping, &trace, options)
            .unwrap();
        system.start_applications().unwrap();
        let r = system.find_process("initial", "r").unwrap();
        assert_eq!(system.process(r).state(), ProcessState::Blocked);
        system.run();
        assert_eq!(system.check_errors(), Ok(()));
        assert_eq!(system.process(r).finish_time(), Some(15));
    }

    #[test]
    fn test_pause_and_resume() {
        init();
        let (platform, pes, schedulers, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let (graph, mapping, trace) = jobs(pes[0], schedulers[0]);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.start_applications().unwrap();
        let j1 = system.find_process("jobs", "j1").unwrap();
        assert_eq!(system.pause_process(j1), Removal::Complete);
        system.run_until(100);
        // j0, j2 and j3 ran, j1 is still waiting
        assert_eq!(system.process(j1).state(), ProcessState::Ready);
        assert_eq!(system.process(j1).scheduler(), None);
        system.resume_process(j1, schedulers[0]).unwrap();
        system.run();
        // j4 was already running when j1 came back
        assert_eq!(system.process(j1).finish_time(), Some(150));
        assert_eq!(system.execution_time(), 150);
    }

    #[test]
    fn test_kill_running_process() {
        init();
        let (platform, pes, schedulers, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let (graph, mapping, trace) = jobs(pes[0], schedulers[0]);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.start_applications().unwrap();
        system.run_until(5);
        let j0 = system.find_process("jobs", "j0").unwrap();
        system.kill_process(j0);
        assert_eq!(system.process(j0).state(), ProcessState::Finished);
        assert_eq!(system.process(j0).finish_time(), Some(5));
        assert_eq!(system.process(j0).progress(), 0.5);
        system.run();
        // everything after j0 moved 5 ticks earlier
        assert_eq!(system.execution_time(), 145);
    }

    #[test]
    fn test_yaml_pipeline() {
        init();
        let model = from_yaml(PLATFORM, GRAPH, MAPPING, TRACE).unwrap();
        let report = run(&model, false).unwrap();
        assert_eq!(report.execution_time, 264);
        assert_eq!(
            finish_times(&report, "stream"),
            vec![("producer".to_string(), 212), ("consumer".to_string(), 264)]
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"FINISHED\""));
    }

    #[test]
    fn test_vcd_export() {
        init();
        let model = from_yaml(PLATFORM, GRAPH, MAPPING, TRACE).unwrap();
        let report = run(&model, true).unwrap();
        let trace = report.trace.unwrap();
        let mut out = Vec::new();
        trace.write_vcd(&mut out).unwrap();
        let vcd = String::from_utf8(out).unwrap();
        for signal in ["producer_state", "consumer_state", "c_consumer_fifo", "thread0"] {
            assert!(vcd.contains(signal), "{} missing", signal);
        }
        assert!(vcd.contains("#264"));
    }

    #[test]
    fn test_decision_and_switch_costs_always() {
        init();
        let (platform, pe, sid) = costly("FIFO", None, ContextSwitchMode::Always);
        let (graph, mapping, trace) = computing("always", pe, sid, &[("a", 10), ("b", 20)]);
        let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
        // decide 4, load 3, run a; store 2, decide 4, load 3, run b
        assert_eq!(
            finish_times(&report, "always"),
            vec![("a".to_string(), 17), ("b".to_string(), 46)]
        );
        assert_eq!(report.execution_time, 46);
    }

    #[test]
    fn test_context_switch_modes_on_reschedule() {
        init();
        for (mode, finish) in [
            (ContextSwitchMode::Never, 37),
            (ContextSwitchMode::AfterScheduling, 40),
            (ContextSwitchMode::Always, 50),
        ] {
            let (platform, pe, sid) = costly("RoundRobin", Some(10), mode);
            let (graph, mapping, trace) = computing("slices", pe, sid, &[("a", 25)]);
            let report = runtime::simulate(&platform, &graph, &mapping, &trace).unwrap();
            // after scheduling only loads the context once since the slot
            // keeps it between the slices of the same process
            assert_eq!(
                finish_times(&report, "slices"),
                vec![("a".to_string(), finish)],
                "{:?}",
                mode
            );
        }
    }

    #[test]
    fn test_after_scheduling_switches_contexts() {
        init();
        let (platform, pe, sid) = costly("RoundRobin", Some(10), ContextSwitchMode::AfterScheduling);
        let (graph, mapping, trace) = computing("swap", pe, sid, &[("a", 20), ("b", 20)]);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.enable_tracing();
        let report = system.simulate().unwrap();
        assert_eq!(
            finish_times(&report, "swap"),
            vec![("a".to_string(), 55), ("b".to_string(), 72)]
        );
        // first load, then store and load on every switch, then a fresh load
        // once the context of the finished process is gone
        let schedule: Vec<_> = report
            .trace
            .unwrap()
            .processor_schedule("pe0")
            .map(|s| (s.process.clone(), s.start, s.end))
            .collect();
        assert_eq!(
            schedule,
            vec![
                ("swap.a".to_string(), 7, 17),
                ("swap.b".to_string(), 26, 36),
                ("swap.a".to_string(), 45, 55),
                ("swap.b".to_string(), 62, 72),
            ]
        );
    }

    #[test]
    fn test_average_load_after_run() {
        init();
        let (platform, pe, sid) = costly("FIFO", None, ContextSwitchMode::Never);
        let (graph, mapping, trace) = computing("load", pe, sid, &[("a", 10), ("b", 20)]);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.simulate().unwrap();
        // busy during [4, 14) and [18, 38)
        assert_eq!(system.now(), 38);
        assert!((system.average_load(sid, 38) - 30.0 / 38.0).abs() < 1e-9);
        assert_eq!(system.average_load(sid, 20), 1.0);
    }

    #[test]
    fn test_pause_and_resume_running_process() {
        init();
        let (platform, pes, schedulers, _) = platform(1, "FIFO", None, ContextSwitchMode::Never, 0);
        let (graph, mapping, trace) = jobs(pes[0], schedulers[0]);
        let mut system = System::new(&platform).unwrap();
        system
            .add_application(&graph, &mapping, &trace, ApplicationOptions::default())
            .unwrap();
        system.start_applications().unwrap();
        system.run_until(5);
        let j0 = system.find_process("jobs", "j0").unwrap();
        assert_eq!(system.process(j0).state(), ProcessState::Running);

        assert_eq!(system.pause_process(j0), Removal::Pending);
        assert!(system.removal_pending(j0));
        assert_eq!(system.process(j0).scheduler(), Some(schedulers[0]));
        // resuming before the removal completed reattaches afterwards
        system.resume_process(j0, schedulers[0]).unwrap();
        system.run();
        assert!(!system.removal_pending(j0));
        assert_eq!(system.check_errors(), Ok(()));
        // j0 went to the back of the queue with 5 ticks left
        assert_eq!(system.process(j0).finish_time(), Some(150));
        let j1 = system.find_process("jobs", "j1").unwrap();
        assert_eq!(system.process(j1).finish_time(), Some(25));
    }

    #[test]
    fn test_unknown_policy() {
        init();
        let mut config = PlatformConfiguration::from_str(PLATFORM).unwrap();
        config.schedulers[0].policy = "Lottery".to_string();
        let platform = config.build().unwrap();
        assert_eq!(
            System::new(&platform).err(),
            Some(Error::UnknownPolicy("Lottery".to_string()))
        );
    }
}
