//! The node graph: construction, bring-up, run and tear-down.
//!
//! A [`Graph`] owns the registry its nodes and links live in, the plugin
//! factory used to build nodes, and its own lifecycle. Structural changes go
//! through a [`GraphGuard`]; the graph lock is held while nodes are created,
//! linked and transitioned, and each node is then locked individually.
//! Nodes never lock their graph, so readiness propagation may freely run
//! while a graph guard is held.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::buffer::StreamFormat;
use crate::config::{Config, GraphDescription, split_reference};
use crate::error::{ConfigurationError, Error, Result};
use crate::factory::PluginFactory;
use crate::link::LinkKey;
use crate::lock::{OwnedGuard, OwnedLock};
use crate::node::{Node, NodeGuard, NodeKey};
use crate::object::{Lifecycle, LifecycleHooks, LifecycleState, ObjectId, Transition, advance};
use crate::registry::Registry;

struct GraphState {
    lifecycle: Lifecycle,
    order: Vec<NodeKey>,
    names: HashMap<String, NodeKey>,
}

/// A graph of nodes sharing one stream format.
pub struct Graph {
    id: ObjectId,
    name: String,
    format: StreamFormat,
    registry: Arc<Registry>,
    factory: Arc<PluginFactory>,
    state: OwnedLock<GraphState>,
}

/// Builds an empty graph from `graph.name`, `config.sample_rate` and
/// `config.buffer_size`.
pub fn make_graph(config: &Config, factory: Arc<PluginFactory>) -> Result<Graph> {
    let defaults = StreamFormat::default();
    let format = StreamFormat {
        sample_rate: config.parse_or("config.sample_rate", defaults.sample_rate)?,
        buffer_size: config.parse_or("config.buffer_size", defaults.buffer_size)?,
    };
    if format.sample_rate == 0 {
        return Err(ConfigurationError::InvalidValue {
            key: "config.sample_rate".into(),
            value: "0".into(),
            reason: "must be positive".into(),
        }
        .into());
    }
    if format.buffer_size == 0 {
        return Err(ConfigurationError::InvalidValue {
            key: "config.buffer_size".into(),
            value: "0".into(),
            reason: "must be positive".into(),
        }
        .into());
    }
    let name = config.get("graph.name").unwrap_or("graph").to_string();
    tracing::debug!(graph = %name, sample_rate = format.sample_rate, buffer_size = format.buffer_size, "graph created");
    Ok(Graph {
        id: ObjectId::next(),
        name,
        format,
        registry: Arc::new(Registry::new()),
        factory,
        state: OwnedLock::new(GraphState {
            lifecycle: Lifecycle::new(),
            order: Vec::new(),
            names: HashMap::new(),
        }),
    })
}

impl Graph {
    /// Builds a graph, its nodes, links and subscriptions from a description.
    pub fn from_description(description: &GraphDescription, factory: Arc<PluginFactory>) -> Result<Self> {
        let graph = make_graph(&description.graph_config()?, factory)?;
        {
            let mut guard = graph.lock();
            for config in description.node_configs()? {
                guard.add_node(&config)?;
            }
            for link in &description.links {
                let (from, source) = split_reference(&link.from)?;
                let (to, sink) = split_reference(&link.to)?;
                guard.link(from, source, to, sink)?;
            }
            for subscription in &description.subscriptions {
                let (emitter, signal) = split_reference(&subscription.signal)?;
                let (receiver, slot) = split_reference(&subscription.slot)?;
                guard.subscribe(emitter, signal, receiver, slot)?;
            }
        }
        Ok(graph)
    }

    /// Unique id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream format shared by every node.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// `"graph #<id> '<name>'"`. Never takes the lock.
    pub fn description(&self) -> String {
        format!("graph {} '{}'", self.id, self.name)
    }

    /// The node and link tables.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Acquires the graph's lock.
    pub fn lock(&self) -> GraphGuard<'_> {
        GraphGuard {
            graph: self,
            state: self.state.lock(),
        }
    }

    /// Handle that makes [`run`](Self::run) return early.
    pub fn terminator(&self) -> Terminator {
        Terminator {
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Brings every node up, blocks until all drivers have stopped or
    /// termination is requested, then stops every node, drivers first.
    pub fn run(&self) -> Result<()> {
        {
            let mut guard = self.lock();
            if guard.state() == LifecycleState::Constructed {
                guard.init()?;
            }
            if guard.state() == LifecycleState::Initialized {
                guard.activate()?;
            }
            guard.start()?;
        }
        tracing::info!(
            graph = %self.name,
            drivers = self.registry.running_drivers(),
            "graph running"
        );

        self.registry.wait_idle();

        let mut guard = self.lock();
        if guard.lifecycle().is_running() {
            guard.stop()?;
        }
        tracing::info!(
            graph = %self.name,
            terminated = self.registry.termination_requested(),
            "graph stopped"
        );
        Ok(())
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        for node in stop_order(self.registry.nodes()) {
            let mut guard = node.lock();
            if guard.state() == LifecycleState::Started
                && let Err(err) = guard.stop()
            {
                tracing::error!(node = %node.name(), error = %err, "stop on drop");
            }
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Drivers first, then everything else, each group in insertion order.
fn stop_order(nodes: Vec<Arc<Node>>) -> Vec<Arc<Node>> {
    let (mut drivers, rest): (Vec<_>, Vec<_>) = nodes.into_iter().partition(|n| n.kind().is_driver());
    drivers.extend(rest);
    drivers
}

/// Requests that a running graph return from [`Graph::run`].
#[derive(Clone, Debug)]
pub struct Terminator {
    registry: Weak<Registry>,
}

impl Terminator {
    /// Wakes `run`; it then stops every node. No-op once the graph is gone.
    pub fn terminate(&self) {
        if let Some(registry) = self.registry.upgrade() {
            tracing::info!("termination requested");
            registry.request_termination();
        }
    }
}

/// Exclusive access to a graph's structure and lifecycle.
pub struct GraphGuard<'a> {
    graph: &'a Graph,
    state: OwnedGuard<'a, GraphState>,
}

impl GraphGuard<'_> {
    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.lifecycle.state()
    }

    /// `Constructed → Initialized`; initializes nodes that are not yet.
    pub fn init(&mut self) -> Result<()> {
        self.transition(Transition::Init)
    }

    /// `Initialized → Activated`; activates every node in insertion order.
    pub fn activate(&mut self) -> Result<()> {
        self.transition(Transition::Activate)
    }

    /// `Activated → Started`; starts Filters, then drivers.
    pub fn start(&mut self) -> Result<()> {
        self.transition(Transition::Start)
    }

    /// `Started → Stopped`; stops drivers, then Filters.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(Transition::Stop)
    }

    fn transition(&mut self, transition: Transition) -> Result<()> {
        let description = self.graph.description();
        advance(self, transition, &description)
    }

    /// Creates a node from its configuration list and initializes it.
    ///
    /// Consumes `object.type`, `node.name`, `source.<name>`, `sink.<name>`
    /// and `driver.timeout_ms`; the processor constructor reads `config.*`.
    pub fn add_node(&mut self, config: &Config) -> Result<Arc<Node>> {
        if self.state.lifecycle.is_activated() {
            return Err(Error::Runtime(format!(
                "cannot add nodes to {} once activated",
                self.graph.description()
            )));
        }
        let type_name = config.require("object.type")?;
        let name = config.require("node.name")?;
        if self.state.names.contains_key(name) {
            return Err(ConfigurationError::DuplicateNode(name.to_string()).into());
        }
        let spec = self.graph.factory.create(type_name, config, &self.graph.format)?;
        let timeout = config
            .parse::<u64>("driver.timeout_ms")?
            .map(Duration::from_millis);

        let registry = &self.graph.registry;
        let weak = Arc::downgrade(registry);
        let format = self.graph.format;
        let node = registry.insert_node(|key| Node::new(key, name, type_name, spec, format, weak));
        if let Err(err) = configure(&node, config, timeout) {
            registry.remove_node(node.key());
            return Err(err);
        }

        self.state.names.insert(name.to_string(), node.key());
        self.state.order.push(node.key());
        tracing::debug!(graph = %self.graph.name, node = %name, plugin = %type_name, kind = %node.kind(), "graph_add");
        Ok(node)
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Result<Arc<Node>> {
        self.state
            .names
            .get(name)
            .and_then(|key| self.graph.registry.node(*key))
            .ok_or_else(|| ConfigurationError::UnknownNode(name.to_string()).into())
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.state
            .order
            .iter()
            .filter_map(|key| self.graph.registry.node(*key))
            .collect()
    }

    /// Links `from:source` to `to:sink`.
    pub fn link(&mut self, from: &str, source: &str, to: &str, sink: &str) -> Result<LinkKey> {
        let producer = self.node(from)?;
        let consumer = self.node(to)?;
        producer.link(source, &consumer, sink)
    }

    /// Connects `emitter`'s `signal` to `receiver`'s `slot`.
    pub fn subscribe(&mut self, emitter: &str, signal: &str, receiver: &str, slot: &str) -> Result<()> {
        let emitter = self.node(emitter)?;
        let receiver = self.node(receiver)?;
        emitter.subscribe(signal, &receiver, slot)
    }

    /// Destroys a node that is not running, together with its links.
    pub fn remove_node(&mut self, name: &str) -> Result<()> {
        let node = self.node(name)?;
        let links: Vec<LinkKey> = {
            let guard = node.lock();
            if guard.state() == LifecycleState::Started {
                return Err(Error::Lifecycle {
                    object: node.description(),
                    transition: Transition::Stop,
                    state: LifecycleState::Started,
                });
            }
            guard
                .sources()
                .chain(guard.sinks())
                .flat_map(|channel| channel.link_keys().iter().copied())
                .collect()
        };

        let registry = &self.graph.registry;
        let mut peers: Vec<NodeKey> = Vec::new();
        for key in links {
            if let Some(link) = registry.remove_link(key) {
                for peer in [link.source().node, link.sink().node] {
                    if peer != node.key() && !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
            }
        }
        registry.remove_node(node.key());
        for peer in peers.into_iter().filter_map(|key| registry.node(key)) {
            let mut guard = peer.lock();
            guard.prune_links(registry);
            guard.poke();
        }

        self.state.names.remove(name);
        self.state.order.retain(|key| *key != node.key());
        tracing::debug!(graph = %self.graph.name, node = %name, "graph_remove");
        Ok(())
    }
}

/// Locks each node in turn and applies `op`, stopping at the first error.
fn for_each_node(
    nodes: Vec<Arc<Node>>,
    mut op: impl FnMut(&mut NodeGuard<'_>) -> Result<()>,
) -> Result<()> {
    for node in nodes {
        let mut guard = node.lock();
        op(&mut guard)?;
    }
    Ok(())
}

fn configure(node: &Node, config: &Config, timeout: Option<Duration>) -> Result<()> {
    let mut guard = node.lock();
    for (name, type_tag) in config.prefixed("source.") {
        guard.add_source(name, type_tag)?;
    }
    for (name, type_tag) in config.prefixed("sink.") {
        guard.add_sink(name, type_tag)?;
    }
    guard.set_handoff_timeout(timeout);
    guard.init()
}

impl LifecycleHooks for GraphGuard<'_> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.state.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.state.lifecycle
    }

    fn will_init(&mut self) -> Result<()> {
        for_each_node(self.nodes(), |node| {
            if node.state() == LifecycleState::Constructed {
                node.init()?;
            }
            Ok(())
        })
    }

    fn will_activate(&mut self) -> Result<()> {
        for_each_node(self.nodes(), |node| node.activate())
    }

    fn will_start(&mut self) -> Result<()> {
        let (drivers, rest): (Vec<_>, Vec<_>) = self.nodes().into_iter().partition(|n| n.kind().is_driver());
        for_each_node(rest, |node| node.start())?;
        for_each_node(drivers, |node| node.start())
    }

    fn will_stop(&mut self) -> Result<()> {
        for_each_node(stop_order(self.nodes()), |node| {
            if node.state() == LifecycleState::Started {
                node.stop()?;
            }
            Ok(())
        })
    }
}

impl fmt::Debug for GraphGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphGuard")
            .field("graph", &self.graph.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> Graph {
        make_graph(
            &Config::new().with("graph.name", "test"),
            Arc::new(PluginFactory::with_builtins()),
        )
        .unwrap()
    }

    #[test]
    fn format_defaults_and_overrides() {
        let g = graph();
        assert_eq!(g.format(), StreamFormat::default());

        let g = make_graph(
            &Config::new()
                .with("config.sample_rate", "44100")
                .with("config.buffer_size", "64"),
            Arc::new(PluginFactory::new()),
        )
        .unwrap();
        assert_eq!(g.format().sample_rate, 44100);
        assert_eq!(g.format().buffer_size, 64);
        assert!(make_graph(&Config::new().with("config.buffer_size", "0"), Arc::new(PluginFactory::new())).is_err());
    }

    #[test]
    fn add_node_requires_type_and_unique_name() {
        let g = graph();
        let mut guard = g.lock();
        let err = guard
            .add_node(&Config::new().with("node.name", "a"))
            .unwrap_err();
        assert!(err.to_string().contains("object.type"));

        guard
            .add_node(&Config::new().with("object.type", "passthrough").with("node.name", "a"))
            .unwrap();
        let err = guard
            .add_node(&Config::new().with("object.type", "passthrough").with("node.name", "a"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::DuplicateNode(_))
        ));

        let err = guard
            .add_node(&Config::new().with("object.type", "reverb").with("node.name", "b"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownPluginType(_))
        ));
    }

    #[test]
    fn add_node_creates_endpoints_and_initializes() {
        let g = graph();
        let mut guard = g.lock();
        let node = guard
            .add_node(
                &Config::new()
                    .with("object.type", "gain")
                    .with("node.name", "g")
                    .with("sink.in", "audio")
                    .with("source.out", "audio")
                    .with("config.gain", "-6dB")
                    .with("ui.color", "red"),
            )
            .unwrap();
        let node = node.lock();
        assert_eq!(node.state(), LifecycleState::Initialized);
        assert_eq!(node.source("out").unwrap().type_tag(), "audio");
        assert_eq!(node.sink("in").unwrap().type_tag(), "audio");
    }

    #[test]
    fn failed_configuration_leaves_no_node() {
        let g = graph();
        let mut guard = g.lock();
        let err = guard
            .add_node(
                &Config::new()
                    .with("object.type", "hardware")
                    .with("node.name", "hw")
                    .with("source.left", "audio")
                    .with("sink.left", "audio"),
            )
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(guard.node("hw").is_err());
        assert!(g.registry().nodes().is_empty());
    }

    #[test]
    fn remove_node_drops_its_links() {
        let g = graph();
        let mut guard = g.lock();
        for (name, kind) in [("a", "passthrough"), ("b", "passthrough")] {
            guard
                .add_node(
                    &Config::new()
                        .with("object.type", kind)
                        .with("node.name", name)
                        .with("sink.in", "audio")
                        .with("source.out", "audio"),
                )
                .unwrap();
        }
        guard.link("a", "out", "b", "in").unwrap();
        assert_eq!(g.registry().link_count(), 1);

        guard.remove_node("b").unwrap();
        assert_eq!(g.registry().link_count(), 0);
        let a = guard.node("a").unwrap();
        assert!(a.lock().source("out").unwrap().link_keys().is_empty());
        assert!(guard.node("b").is_err());
    }

    #[test]
    fn terminator_releases_run() {
        let g = graph();
        {
            let mut guard = g.lock();
            guard
                .add_node(
                    &Config::new()
                        .with("object.type", "null")
                        .with("node.name", "sink")
                        .with("sink.in", "audio"),
                )
                .unwrap();
        }
        let terminator = g.terminator();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            terminator.terminate();
        });
        g.run().unwrap();
        stopper.join().unwrap();
        let node = g.lock().node("sink").unwrap();
        assert_eq!(node.lock().state(), LifecycleState::Stopped);
        assert_eq!(g.lock().state(), LifecycleState::Stopped);
    }
}
