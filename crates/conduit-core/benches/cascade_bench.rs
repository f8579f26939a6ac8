//! Criterion benchmarks for the readiness cascade.
//!
//! Measures framework overhead per buffer independently of DSP cost: one
//! `notify` on a hand-fed Source drains a chain of passthrough Filters into a
//! consuming Driver. Two axes:
//!
//! - **Depth**: number of Filters between feeder and consumer
//! - **Block size**: frames per buffer (buffers are shared, so this should be flat)
//!
//! Run with: `cargo bench -p conduit-core -- cascade/`
#![allow(missing_docs)]

use std::sync::Arc;

use conduit_core::{
    Buffer, Config, Graph, PluginFactory, PluginKind, PluginSpec, make_graph, plugin::Idle,
};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const DEPTHS: &[usize] = &[1, 4, 16, 64];
const BLOCK_SIZES: &[usize] = &[64, 256, 1024];

/// `feeder → f0 → … → f{depth-1} → sink`, started.
fn build_chain(depth: usize, block_size: usize) -> Graph {
    let mut factory = PluginFactory::with_builtins();
    factory.register("feeder", PluginKind::Driver, "hand-fed source", |_, _| {
        Ok(PluginSpec::new(PluginKind::Driver, Idle))
    });
    let graph = make_graph(
        &Config::new().with("config.buffer_size", block_size.to_string()),
        Arc::new(factory),
    )
    .expect("graph");
    {
        let mut g = graph.lock();
        g.add_node(
            &Config::new()
                .with("object.type", "feeder")
                .with("node.name", "feeder")
                .with("source.out", "audio"),
        )
        .expect("feeder");
        let mut previous = "feeder".to_string();
        for i in 0..depth {
            let name = format!("f{i}");
            g.add_node(
                &Config::new()
                    .with("object.type", "passthrough")
                    .with("node.name", name.as_str())
                    .with("sink.in", "audio")
                    .with("source.out", "audio"),
            )
            .expect("filter");
            g.link(&previous, "out", &name, "in").expect("link");
            previous = name;
        }
        g.add_node(
            &Config::new()
                .with("object.type", "null")
                .with("node.name", "sink")
                .with("sink.in", "audio"),
        )
        .expect("sink");
        g.link(&previous, "out", "sink", "in").expect("link");
        g.init().expect("init");
        g.activate().expect("activate");
        g.start().expect("start");
    }
    graph
}

fn bench_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade/depth");
    for &depth in DEPTHS {
        let graph = build_chain(depth, 256);
        let feeder = graph.lock().node("feeder").expect("feeder");
        let buffer = Buffer::silence(256);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                feeder
                    .lock()
                    .notify("out", black_box(buffer.clone()))
                    .expect("notify");
            });
        });
    }
    group.finish();
}

fn bench_block_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("cascade/block_size");
    for &block_size in BLOCK_SIZES {
        let graph = build_chain(4, block_size);
        let feeder = graph.lock().node("feeder").expect("feeder");
        let buffer = Buffer::silence(block_size);
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &block_size,
            |b, _| {
                b.iter(|| {
                    feeder
                        .lock()
                        .notify("out", black_box(buffer.clone()))
                        .expect("notify");
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_depth, bench_block_size);
criterion_main!(benches);
