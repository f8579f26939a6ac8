//! Property-based tests for conduit-core.
//!
//! Drives Links, the Filter policy and the arena with random operation
//! sequences and checks them against a simple model.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_core::{
    Arena, Buffer, Config, Error, Flow, Graph, PluginFactory, PluginKind, PluginSpec, make_graph,
    parse_param_value, plugin::Idle, processor_fn,
};
use proptest::prelude::*;

/// Producer feeding one Sink by hand, consumer reset by hand.
fn pair() -> Graph {
    let mut factory = PluginFactory::new();
    factory.register("manual", PluginKind::Driver, "inert", |_, _| {
        Ok(PluginSpec::new(PluginKind::Driver, Idle))
    });
    let graph = make_graph(&Config::new(), Arc::new(factory)).unwrap();
    {
        let mut guard = graph.lock();
        guard
            .add_node(
                &Config::new()
                    .with("object.type", "manual")
                    .with("node.name", "a")
                    .with("source.out", "audio"),
            )
            .unwrap();
        guard
            .add_node(
                &Config::new()
                    .with("object.type", "manual")
                    .with("node.name", "b")
                    .with("sink.in", "audio"),
            )
            .unwrap();
        guard.link("a", "out", "b", "in").unwrap();
    }
    graph
}

/// `feeder → check → drain`, where `check` counts runs that found its Sink
/// empty or its Source busy.
fn chain(violations: Arc<AtomicU64>) -> Graph {
    let mut factory = PluginFactory::new();
    factory.register("manual", PluginKind::Driver, "inert", |_, _| {
        Ok(PluginSpec::new(PluginKind::Driver, Idle))
    });
    factory.register("check", PluginKind::Filter, "instrumented", move |_, _| {
        let violations = Arc::clone(&violations);
        Ok(PluginSpec::new(
            PluginKind::Filter,
            processor_fn(move |ctx| {
                let filled = ctx.input("in")?.is_some();
                if !filled || ctx.publish("out", Buffer::silence(4)).is_err() {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Flow::Continue)
            }),
        ))
    });
    let graph = make_graph(&Config::new(), Arc::new(factory)).unwrap();
    {
        let mut guard = graph.lock();
        for (kind, name, endpoints) in [
            ("manual", "feeder", &[("source.out", "audio")][..]),
            ("check", "check", &[("sink.in", "audio"), ("source.out", "audio")][..]),
            ("manual", "drain", &[("sink.in", "audio")][..]),
        ] {
            let mut config = Config::new().with("object.type", kind).with("node.name", name);
            for (key, value) in endpoints {
                config.set(*key, *value);
            }
            guard.add_node(&config).unwrap();
        }
        guard.link("feeder", "out", "check", "in").unwrap();
        guard.link("check", "out", "drain", "in").unwrap();
        guard.init().unwrap();
        guard.activate().unwrap();
    }
    // `drain` stays inert so its Sink is only reset by hand.
    let guard = graph.lock();
    for name in ["feeder", "check"] {
        guard.node(name).unwrap().lock().start().unwrap();
    }
    drop(guard);
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// For any interleaving of notify and reset on one Link, the Source is
    /// available and the Sink not ready exactly while a buffer is pending,
    /// and notify fails exactly when one is.
    #[test]
    fn link_predicates_follow_the_pending_buffer(ops in prop::collection::vec(any::<bool>(), 1..64)) {
        let graph = pair();
        let (a, b) = {
            let guard = graph.lock();
            (guard.node("a").unwrap(), guard.node("b").unwrap())
        };
        let mut pending = false;
        let mut resets = 0;
        for notify in ops {
            if notify {
                let result = a.lock().notify("out", Buffer::silence(4));
                prop_assert_eq!(result.is_err(), pending);
                if let Err(err) = result {
                    let is_busy = matches!(err, Error::SourceBusy { .. });
                    prop_assert!(is_busy);
                }
                pending = true;
            } else {
                b.lock().reset("in").unwrap();
                resets += 1;
                pending = false;
            }
            prop_assert_eq!(a.lock().source_is_available("out").unwrap(), pending);
            prop_assert_eq!(b.lock().sink_is_ready("in").unwrap(), !pending);
        }
        prop_assert_eq!(b.lock().sink("in").unwrap().reset_count(), resets);
    }

    /// A Filter only ever runs with its Sink filled and its Source clear, and
    /// runs once per buffer that could pass through it.
    #[test]
    fn filter_runs_only_when_ready(ops in prop::collection::vec(any::<bool>(), 1..64)) {
        let violations = Arc::new(AtomicU64::new(0));
        let graph = chain(Arc::clone(&violations));
        let (feeder, check, drain) = {
            let guard = graph.lock();
            (
                guard.node("feeder").unwrap(),
                guard.node("check").unwrap(),
                guard.node("drain").unwrap(),
            )
        };
        let mut forwarded = 0u64;
        for notify in ops {
            if notify {
                if feeder.lock().notify("out", Buffer::silence(4)).is_ok() {
                    forwarded += 1;
                }
            } else {
                drain.lock().reset("in").unwrap();
            }
        }
        prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
        let executions = check.lock().executions();
        // At most one accepted buffer is still parked on the Filter's Sink.
        prop_assert!(executions == forwarded || executions + 1 == forwarded);
    }

    /// Keys of removed entries never resolve again, even after their slot is
    /// reused.
    #[test]
    fn stale_keys_never_resolve(ops in prop::collection::vec(0usize..8, 1..128)) {
        let mut arena = Arena::new();
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (step, op) in ops.into_iter().enumerate() {
            if op < 5 || live.is_empty() {
                live.push((arena.insert(step), step));
            } else {
                let (key, value) = live.swap_remove(op % live.len());
                prop_assert_eq!(arena.remove(key), Some(value));
                dead.push(key);
            }
            for (key, value) in &live {
                prop_assert_eq!(arena.get(*key), Some(value));
            }
            for key in &dead {
                prop_assert!(arena.get(*key).is_none());
            }
        }
        prop_assert_eq!(arena.len(), live.len());
    }

    /// Decibel values convert to the linear gain they name.
    #[test]
    fn decibels_convert_to_linear(db in -60.0f32..12.0f32) {
        let linear = parse_param_value(&format!("{db}dB")).unwrap();
        prop_assert!((20.0 * linear.log10() - db).abs() < 1e-3);
    }
}
