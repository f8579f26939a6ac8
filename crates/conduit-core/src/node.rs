//! Graph nodes.
//!
//! A [`Node`] is the unit of processing: a set of named Sources and Sinks, a
//! set of signals and slots, a lifecycle and a [`Processor`]. Everything
//! mutable sits behind the node's [`OwnedLock`]; the only way to touch it is
//! through the [`NodeGuard`] returned by [`Node::lock`], so holding a guard is
//! the proof that the caller owns the node.
//!
//! Immutable identity (id, name, kind, format) lives outside the lock so
//! descriptions and lookups never block.
//!
//! Never hold two node guards on one thread: readiness propagation locks
//! other nodes when a guard is released, and the lock panics on re-entry.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crate::arena::Key;
use crate::buffer::{Buffer, StreamFormat};
use crate::cascade::{self, Event};
use crate::driver::{DriverState, DriverStats, Handoff};
use crate::error::{ConfigurationError, Error, Result};
use crate::link::{Channel, ChannelKind, Endpoint, Link, LinkKey};
use crate::lock::{OwnedGuard, OwnedLock};
use crate::object::{Lifecycle, LifecycleHooks, LifecycleState, ObjectId, Transition, advance};
use crate::plugin::{ActivateContext, Flow, PluginKind, PluginSpec, ProcessContext, Processor};
use crate::registry::Registry;
use crate::signal::{self, Signal, Slot, SlotHandler, Subscription};

/// Registry handle of a [`Node`].
pub type NodeKey = Key<Arc<Node>>;

/// Lock-protected state of a node.
pub(crate) struct NodeState {
    pub(crate) lifecycle: Lifecycle,
    sources: BTreeMap<String, Channel>,
    sinks: BTreeMap<String, Channel>,
    signals: BTreeMap<String, Signal>,
    slots: BTreeMap<String, Slot>,
    processor: Option<Box<dyn Processor>>,
    executing: bool,
    executions: u64,
    transfers: u64,
    pub(crate) driver: DriverState,
}

/// A processing node of a graph.
pub struct Node {
    id: ObjectId,
    key: NodeKey,
    name: String,
    type_name: String,
    kind: PluginKind,
    format: StreamFormat,
    registry: Weak<Registry>,
    state: OwnedLock<NodeState>,
    pub(crate) handoff: Handoff,
}

impl Node {
    pub(crate) fn new(
        key: NodeKey,
        name: impl Into<String>,
        type_name: impl Into<String>,
        spec: PluginSpec,
        format: StreamFormat,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id: ObjectId::next(),
            key,
            name: name.into(),
            type_name: type_name.into(),
            kind: spec.kind,
            format,
            registry,
            state: OwnedLock::new(NodeState {
                lifecycle: Lifecycle::new(),
                sources: BTreeMap::new(),
                sinks: BTreeMap::new(),
                signals: signal::builtin_signals(),
                slots: signal::builtin_slots(),
                processor: Some(spec.processor),
                executing: false,
                executions: 0,
                transfers: 0,
                driver: DriverState::default(),
            }),
            handoff: Handoff::default(),
        }
    }

    /// Unique id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Registry key.
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Name, unique within the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin type the node was built from (`object.type`).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Readiness policy.
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Stream format of the owning graph.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// `"<kind> #<id> '<name>'"`. Never takes the lock.
    pub fn description(&self) -> String {
        format!("{} {} '{}'", self.kind, self.id, self.name)
    }

    /// Acquires the node's lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds it.
    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            node: self,
            state: self.state.lock(),
            pending: Pending {
                registry: &self.registry,
                events: Vec::new(),
            },
        }
    }

    /// Non-blocking [`lock`](Self::lock).
    pub fn try_lock(&self) -> Option<NodeGuard<'_>> {
        let state = self.state.try_lock()?;
        Some(NodeGuard {
            node: self,
            state,
            pending: Pending {
                registry: &self.registry,
                events: Vec::new(),
            },
        })
    }

    /// True if no thread holds the node's lock.
    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }

    /// Thread currently holding the node's lock.
    pub fn owner(&self) -> Option<thread::ThreadId> {
        self.state.owner()
    }

    pub(crate) fn registry(&self) -> Result<Arc<Registry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| Error::Runtime(format!("{} outlived its graph", self.description())))
    }

    /// Links Source `source` of this node to Sink `sink` of `target`.
    ///
    /// Locks each node in turn, never both at once. Fails with a
    /// configuration error if either endpoint is unknown, the type tags
    /// differ, or the pair is already linked.
    pub fn link(&self, source: &str, target: &Node, sink: &str) -> Result<LinkKey> {
        let registry = self.registry()?;
        if !Weak::ptr_eq(&self.registry, &target.registry) {
            return Err(Error::Runtime(format!(
                "{} and {} belong to different graphs",
                self.description(),
                target.description()
            )));
        }

        let (source_type, duplicate) = {
            let guard = self.lock();
            let channel = guard.source(source)?;
            let duplicate = channel
                .links(&registry)
                .iter()
                .any(|link| link.sink().node == target.key && link.sink().name == sink);
            (channel.type_tag().to_string(), duplicate)
        };
        let sink_type = target.lock().sink(sink)?.type_tag().to_string();

        if source_type != sink_type {
            return Err(ConfigurationError::TypeMismatch {
                source_type,
                sink_type,
            }
            .into());
        }
        if duplicate {
            return Err(ConfigurationError::DuplicateLink {
                source_name: format!("{}:{source}", self.name),
                sink_name: format!("{}:{sink}", target.name),
            }
            .into());
        }

        let link = Link::new(
            Endpoint {
                node: self.key,
                name: source.to_string(),
            },
            Endpoint {
                node: target.key,
                name: sink.to_string(),
            },
            source_type,
        );
        let description = link.description();
        let key = registry.insert_link(link);
        target.lock().attach(ChannelKind::Sink, sink, key)?;
        {
            let mut guard = self.lock();
            guard.attach(ChannelKind::Source, source, key)?;
            guard.poke();
        }

        tracing::debug!(
            link = %description,
            from = %self.name,
            to = %target.name,
            "link"
        );
        Ok(key)
    }

    /// Connects signal `signal` of this node to slot `slot` of `target`.
    pub fn subscribe(&self, signal: &str, target: &Node, slot: &str) -> Result<()> {
        if !target.lock().has_slot(slot) {
            return Err(ConfigurationError::UnknownSlot(slot.to_string()).into());
        }
        self.lock().add_subscription(
            signal,
            Subscription {
                target: target.key,
                slot: slot.to_string(),
            },
        )?;
        tracing::debug!(
            emitter = %self.name,
            signal,
            receiver = %target.name,
            slot,
            "subscribe"
        );
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Events recorded under the lock, dispatched once it is released.
struct Pending<'a> {
    registry: &'a Weak<Registry>,
    events: Vec<Event>,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            cascade::dispatch(self.registry, mem::take(&mut self.events));
        }
    }
}

/// Exclusive access to a node.
///
/// Dropping the guard releases the lock and then runs whatever readiness
/// propagation the guarded calls queued.
pub struct NodeGuard<'a> {
    node: &'a Node,
    pub(crate) state: OwnedGuard<'a, NodeState>,
    // Must stay after `state`: fields drop in order, and the cascade may only
    // run once the lock is released.
    pending: Pending<'a>,
}

impl<'a> NodeGuard<'a> {
    /// The guarded node.
    pub fn node(&self) -> &'a Node {
        self.node
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.lifecycle.state()
    }

    /// `Constructed → Initialized`.
    pub fn init(&mut self) -> Result<()> {
        self.transition(Transition::Init)
    }

    /// `Initialized → Activated`. Activates the processor and freezes the
    /// endpoint set.
    pub fn activate(&mut self) -> Result<()> {
        self.transition(Transition::Activate)
    }

    /// `Activated → Started`. The node may execute from here on.
    pub fn start(&mut self) -> Result<()> {
        self.transition(Transition::Start)
    }

    /// `Started → Stopped`. Fires `stopped`; for a threaded driver, waits
    /// until the hardware thread has left the handoff.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(Transition::Stop)
    }

    fn transition(&mut self, transition: Transition) -> Result<()> {
        let description = self.node.description();
        advance(self, transition, &description)
    }

    /// Adds a Source. Fails once activated, on a duplicate name, or on a
    /// hardware-bound node when a Sink already uses the name.
    pub fn add_source(&mut self, name: &str, type_tag: &str) -> Result<&Channel> {
        self.add_channel(ChannelKind::Source, name, type_tag)
    }

    /// Adds a Sink. Same rules as [`add_source`](Self::add_source).
    pub fn add_sink(&mut self, name: &str, type_tag: &str) -> Result<&Channel> {
        self.add_channel(ChannelKind::Sink, name, type_tag)
    }

    fn add_channel(&mut self, kind: ChannelKind, name: &str, type_tag: &str) -> Result<&Channel> {
        if self.state.lifecycle.is_activated() {
            return Err(ConfigurationError::EndpointsFrozen(self.node.description()).into());
        }
        let state = &mut *self.state;
        let (own, other) = match kind {
            ChannelKind::Source => (&mut state.sources, &state.sinks),
            ChannelKind::Sink => (&mut state.sinks, &state.sources),
        };
        if own.contains_key(name) {
            return Err(ConfigurationError::DuplicateEndpoint {
                kind: kind.as_str(),
                name: name.to_string(),
            }
            .into());
        }
        if self.node.kind.is_hardware_bound() && other.contains_key(name) {
            return Err(ConfigurationError::EndpointCollision(name.to_string()).into());
        }
        tracing::debug!(node = %self.node.name, %kind, name, type_tag, "endpoint added");
        Ok(own
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(kind, name, type_tag)))
    }

    /// Looks up a Source.
    pub fn source(&self, name: &str) -> Result<&Channel> {
        self.channel(ChannelKind::Source, name)
    }

    /// Looks up a Sink.
    pub fn sink(&self, name: &str) -> Result<&Channel> {
        self.channel(ChannelKind::Sink, name)
    }

    fn channel(&self, kind: ChannelKind, name: &str) -> Result<&Channel> {
        let map = match kind {
            ChannelKind::Source => &self.state.sources,
            ChannelKind::Sink => &self.state.sinks,
        };
        map.get(name).ok_or_else(|| unknown_endpoint(kind, name))
    }

    fn channel_mut(&mut self, kind: ChannelKind, name: &str) -> Result<&mut Channel> {
        let map = match kind {
            ChannelKind::Source => &mut self.state.sources,
            ChannelKind::Sink => &mut self.state.sinks,
        };
        map.get_mut(name).ok_or_else(|| unknown_endpoint(kind, name))
    }

    /// Sources, sorted by name.
    pub fn sources(&self) -> impl Iterator<Item = &Channel> {
        self.state.sources.values()
    }

    /// Sinks, sorted by name.
    pub fn sinks(&self) -> impl Iterator<Item = &Channel> {
        self.state.sinks.values()
    }

    /// True once `source` has been notified and every outgoing Link still
    /// holds that buffer.
    pub fn source_is_available(&self, source: &str) -> Result<bool> {
        let registry = self.node.registry()?;
        Ok(self.source(source)?.is_available(&registry))
    }

    /// True when every Link into `sink` is ready for a new buffer.
    pub fn sink_is_ready(&self, sink: &str) -> Result<bool> {
        let registry = self.node.registry()?;
        Ok(self.sink(sink)?.is_ready(&registry))
    }

    pub(crate) fn attach(&mut self, kind: ChannelKind, name: &str, key: LinkKey) -> Result<()> {
        self.channel_mut(kind, name)?.attach(key);
        Ok(())
    }

    pub(crate) fn prune_links(&mut self, registry: &Registry) {
        let state = &mut *self.state;
        for channel in state.sources.values_mut().chain(state.sinks.values_mut()) {
            channel.prune(registry);
        }
    }

    /// Publishes `buffer` on every Link of `source`.
    ///
    /// Fails with [`Error::SourceBusy`] if any Link still holds the previous
    /// buffer. Downstream nodes are re-evaluated once this guard is dropped.
    pub fn notify(&mut self, source: &str, buffer: Buffer) -> Result<()> {
        let node = self.node;
        let registry = node.registry()?;
        let channel = self
            .state
            .sources
            .get_mut(source)
            .ok_or_else(|| unknown_endpoint(ChannelKind::Source, source))?;
        let links = channel.links(&registry);
        if links.iter().any(|link| !link.is_ready()) {
            return Err(Error::SourceBusy {
                node: node.description(),
                source_name: source.to_string(),
            });
        }
        for link in &links {
            link.publish(buffer.clone());
        }
        channel.mark_notified();
        self.state.transfers += links.len() as u64;
        self.pending
            .events
            .extend(links.iter().map(|link| Event::Poke(link.sink().node)));
        tracing::trace!(node = %node.name, source, links = links.len(), "notify");
        Ok(())
    }

    /// Buffer waiting on `sink`, if any. Does not consume it.
    pub fn read(&self, sink: &str) -> Result<Option<Buffer>> {
        let registry = self.node.registry()?;
        Ok(self.sink(sink)?.buffer(&registry))
    }

    /// Consumes the buffers on `sink`, returning the first one, and marks its
    /// Links ready again. Upstream nodes are re-evaluated once this guard is
    /// dropped.
    pub fn take(&mut self, sink: &str) -> Result<Option<Buffer>> {
        let registry = self.node.registry()?;
        let channel = self
            .state
            .sinks
            .get_mut(sink)
            .ok_or_else(|| unknown_endpoint(ChannelKind::Sink, sink))?;
        let taken = consume(channel, &registry, &mut self.pending.events);
        self.state.transfers += 1;
        tracing::trace!(node = %self.node.name, sink, "reset");
        Ok(taken)
    }

    /// Consumes the buffers on `sink` and marks its Links ready again.
    pub fn reset(&mut self, sink: &str) -> Result<()> {
        self.take(sink).map(drop)
    }

    fn consume_inputs(&mut self, registry: &Registry) {
        let mut consumed = 0;
        for channel in self.state.sinks.values_mut() {
            if channel.links(registry).iter().any(|link| link.is_available()) {
                consume(channel, registry, &mut self.pending.events);
                consumed += 1;
            }
        }
        self.state.transfers += consumed;
    }

    /// Adds a custom signal. Only before activation.
    pub fn add_signal(&mut self, name: &str) -> Result<()> {
        if self.state.lifecycle.is_activated() {
            return Err(ConfigurationError::EndpointsFrozen(self.node.description()).into());
        }
        if self.state.signals.contains_key(name) {
            return Err(ConfigurationError::DuplicateEndpoint {
                kind: "signal",
                name: name.to_string(),
            }
            .into());
        }
        self.state.signals.insert(name.to_string(), Signal::new(name));
        Ok(())
    }

    /// Looks up a signal.
    pub fn signal(&self, name: &str) -> Result<&Signal> {
        self.state
            .signals
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownSignal(name.to_string()).into())
    }

    /// Adds a custom slot.
    pub fn add_slot(
        &mut self,
        name: &str,
        handler: impl FnMut(&mut NodeGuard<'_>, &str) + Send + 'static,
    ) -> Result<()> {
        if self.state.slots.contains_key(name) {
            return Err(ConfigurationError::DuplicateSlot(name.to_string()).into());
        }
        let handler: SlotHandler = Box::new(handler);
        self.state
            .slots
            .insert(name.to_string(), Slot::Handler(handler));
        Ok(())
    }

    /// True if the node has a slot called `name`.
    pub fn has_slot(&self, name: &str) -> bool {
        self.state.slots.contains_key(name)
    }

    pub(crate) fn add_subscription(&mut self, signal: &str, subscription: Subscription) -> Result<()> {
        self.state
            .signals
            .get_mut(signal)
            .ok_or_else(|| ConfigurationError::UnknownSignal(signal.to_string()))?
            .subscribe(subscription);
        Ok(())
    }

    /// Fires `signal`: one delivery per subscriber, run after this guard is
    /// dropped.
    pub fn emit(&mut self, signal: &str) -> Result<()> {
        let subscribers = self.signal(signal)?.subscribers().to_vec();
        tracing::trace!(node = %self.node.name, signal, subscribers = subscribers.len(), "emit");
        self.pending
            .events
            .extend(subscribers.into_iter().map(|subscription| Event::Deliver {
                target: subscription.target,
                slot: subscription.slot,
                signal: signal.to_string(),
            }));
        Ok(())
    }

    pub(crate) fn invoke_slot(&mut self, slot: &str, signal: &str) {
        let Some(entry) = self.state.slots.remove(slot) else {
            tracing::warn!(node = %self.node.name, slot, signal, "delivery to missing slot");
            return;
        };
        let entry = match entry {
            Slot::Stop => {
                if self.state.lifecycle.is_running()
                    && let Err(err) = self.stop()
                {
                    tracing::error!(node = %self.node.name, error = %err, "stop slot failed");
                }
                Slot::Stop
            }
            Slot::Handler(mut handler) => {
                handler(self, signal);
                Slot::Handler(handler)
            }
        };
        self.state.slots.insert(slot.to_string(), entry);
        self.execute_if_needed();
    }

    /// Number of completed executions.
    pub fn executions(&self) -> u64 {
        self.state.executions
    }

    /// Bounds the hardware thread's wait for output. `None` waits forever.
    pub fn set_handoff_timeout(&mut self, timeout: Option<Duration>) {
        self.state.driver.timeout = timeout;
    }

    /// Handoff counters of a threaded driver.
    pub fn driver_stats(&self) -> DriverStats {
        self.state.driver.stats()
    }

    /// Queues a re-evaluation of this node for when the guard is dropped.
    pub fn poke(&mut self) {
        self.pending.events.push(Event::Poke(self.node.key));
    }

    /// Readiness policy of the node's kind; see [`crate::plugin`].
    pub fn should_execute(&self) -> bool {
        let Ok(registry) = self.node.registry() else {
            return false;
        };
        let state = &*self.state;
        let sinks_filled = state.sinks.values().all(|sink| sink.is_filled(&registry));
        let sources_clear = state.sources.values().all(|source| source.is_clear(&registry));
        let has_input = state
            .sinks
            .values()
            .any(|sink| sink.link_count(&registry) > 0);
        match self.node.kind {
            PluginKind::Filter if state.sinks.is_empty() => {
                let has_output = state
                    .sources
                    .values()
                    .any(|source| source.link_count(&registry) > 0);
                has_output && sources_clear
            }
            PluginKind::Filter => has_input && sinks_filled && sources_clear,
            PluginKind::Driver => has_input && sinks_filled,
            PluginKind::ThreadedDriver => !state.driver.run_requested && sinks_filled,
        }
    }

    /// Executes as long as the node is running and [`should_execute`]
    /// holds. Re-entrant calls from inside a processing step return at once.
    ///
    /// A step that neither publishes nor consumes a buffer leaves the
    /// readiness unchanged, so it ends the loop; the next notify or reset
    /// on a neighbour re-evaluates the node. Termination of the graph also
    /// ends it.
    ///
    /// [`should_execute`]: Self::should_execute
    pub fn execute_if_needed(&mut self) {
        if self.state.executing {
            return;
        }
        while self.state.lifecycle.is_running() && self.should_execute() {
            if self.node.registry().is_ok_and(|registry| registry.termination_requested()) {
                break;
            }
            let transfers = self.state.transfers;
            self.execute();
            if self.state.transfers == transfers {
                tracing::trace!(node = %self.node.name, "step moved no buffers");
                break;
            }
        }
    }

    fn execute(&mut self) {
        self.state.executions += 1;
        if self.node.kind == PluginKind::ThreadedDriver {
            self.state.driver.run_requested = true;
            self.node.handoff.wake.notify_all();
            tracing::trace!(node = %self.node.name, "run requested");
            return;
        }

        let Some(mut processor) = self.state.processor.take() else {
            return;
        };
        self.state.executing = true;
        let outcome = processor.process(&mut ProcessContext::new(self));
        self.state.executing = false;
        self.state.processor = Some(processor);

        if let Ok(registry) = self.node.registry() {
            self.consume_inputs(&registry);
        }

        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::EndOfStream) => {
                tracing::info!(node = %self.node.name, "end of stream");
                if let Err(err) = self.emit(signal::END_OF_STREAM) {
                    tracing::error!(node = %self.node.name, error = %err, "end of stream");
                }
                self.stop_after_execute();
            }
            Err(err) => {
                tracing::error!(node = %self.node.name, error = %err, "processing failed, stopping node");
                self.stop_after_execute();
            }
        }
    }

    fn stop_after_execute(&mut self) {
        if self.state.lifecycle.is_running()
            && let Err(err) = self.stop()
        {
            tracing::error!(node = %self.node.name, error = %err, "stop failed");
        }
    }

    /// Waits until the hardware thread is no longer inside the handoff,
    /// unless the caller is that thread.
    fn release_callback(&mut self) {
        let node = self.node;
        node.handoff.stopped.store(true, Ordering::Release);
        node.handoff.wake.notify_all();
        let me = thread::current().id();
        while let Some(owner) = self.state.driver.in_callback {
            if owner == me {
                break;
            }
            self.state.wait(&node.handoff.ack);
        }
    }
}

impl LifecycleHooks for NodeGuard<'_> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.state.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.state.lifecycle
    }

    fn will_activate(&mut self) -> Result<()> {
        let Some(mut processor) = self.state.processor.take() else {
            return Ok(());
        };
        let result = processor.activate(&ActivateContext::new(self));
        self.state.processor = Some(processor);
        result
    }

    fn did_start(&mut self) {
        if self.node.kind == PluginKind::ThreadedDriver {
            self.node.handoff.wake.notify_all();
        }
        if self.node.kind.is_driver()
            && let Ok(registry) = self.node.registry()
        {
            registry.driver_started();
        }
        self.poke();
    }

    fn did_stop(&mut self) {
        if self.node.kind == PluginKind::ThreadedDriver {
            self.release_callback();
        }
        if let Some(processor) = self.state.processor.as_mut() {
            processor.stop();
        }
        if let Err(err) = self.emit(signal::STOPPED) {
            tracing::error!(node = %self.node.name, error = %err, "stopped signal");
        }
        if self.node.kind.is_driver()
            && let Ok(registry) = self.node.registry()
        {
            registry.driver_stopped();
        }
    }
}

impl fmt::Debug for NodeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGuard")
            .field("node", &self.node.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn consume(channel: &mut Channel, registry: &Registry, events: &mut Vec<Event>) -> Option<Buffer> {
    let mut taken = None;
    for link in channel.links(registry) {
        let buffer = link.consume();
        if taken.is_none() {
            taken = buffer;
        }
        events.push(Event::Poke(link.source().node));
    }
    channel.mark_reset();
    taken
}

fn unknown_endpoint(kind: ChannelKind, name: &str) -> Error {
    ConfigurationError::UnknownEndpoint {
        kind: kind.as_str(),
        name: name.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Idle, processor_fn};
    use std::sync::atomic::AtomicUsize;

    fn node(registry: &Arc<Registry>, name: &str, kind: PluginKind) -> Arc<Node> {
        let weak = Arc::downgrade(registry);
        registry.insert_node(|key| {
            Node::new(key, name, "test", PluginSpec::new(kind, Idle), StreamFormat::default(), weak)
        })
    }

    #[test]
    fn description_is_lock_free() {
        let registry = Arc::new(Registry::new());
        let n = node(&registry, "gain", PluginKind::Filter);
        let _guard = n.lock();
        let text = n.description();
        assert!(text.starts_with("filter #"), "got: {text}");
        assert!(text.ends_with("'gain'"), "got: {text}");
    }

    #[test]
    fn endpoints_freeze_after_activation() {
        let registry = Arc::new(Registry::new());
        let n = node(&registry, "n", PluginKind::Filter);
        let mut guard = n.lock();
        guard.add_sink("in", "audio").unwrap();
        guard.init().unwrap();
        guard.activate().unwrap();
        let err = guard.add_source("out", "audio").unwrap_err();
        assert!(err.is_configuration());
        assert!(guard.source("out").is_err());
    }

    #[test]
    fn hardware_bound_names_cannot_collide() {
        let registry = Arc::new(Registry::new());
        let hw = node(&registry, "hw", PluginKind::ThreadedDriver);
        {
            let mut guard = hw.lock();
            guard.add_source("left", "audio").unwrap();
            let err = guard.add_sink("left", "audio").unwrap_err();
            assert!(matches!(
                err,
                Error::Configuration(ConfigurationError::EndpointCollision(_))
            ));
        }

        let filter = node(&registry, "f", PluginKind::Filter);
        let mut guard = filter.lock();
        guard.add_source("main", "audio").unwrap();
        guard.add_sink("main", "audio").unwrap();
    }

    #[test]
    fn builtin_signals_and_custom_slots() {
        let registry = Arc::new(Registry::new());
        let n = node(&registry, "n", PluginKind::Filter);
        let mut guard = n.lock();
        assert!(guard.signal(signal::END_OF_STREAM).is_ok());
        assert!(guard.signal(signal::STOPPED).is_ok());
        assert!(guard.has_slot(signal::STOP));

        guard.add_signal("clip").unwrap();
        assert!(guard.add_signal("clip").is_err());
        guard.add_slot("reload", |_, _| {}).unwrap();
        assert!(matches!(
            guard.add_slot("reload", |_, _| {}),
            Err(Error::Configuration(ConfigurationError::DuplicateSlot(_)))
        ));
    }

    #[test]
    fn emitted_signal_reaches_slot_after_release() {
        let registry = Arc::new(Registry::new());
        let emitter = node(&registry, "a", PluginKind::Filter);
        let receiver = node(&registry, "b", PluginKind::Filter);
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            receiver
                .lock()
                .add_slot("count", move |guard, signal| {
                    assert_eq!(signal, "clip");
                    assert_eq!(guard.node().name(), "b");
                    hits.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        emitter.lock().add_signal("clip").unwrap();
        emitter.subscribe("clip", &receiver, "count").unwrap();

        {
            let mut guard = emitter.lock();
            guard.emit("clip").unwrap();
            assert_eq!(hits.load(Ordering::SeqCst), 0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_rejects_unknown_names() {
        let registry = Arc::new(Registry::new());
        let a = node(&registry, "a", PluginKind::Filter);
        let b = node(&registry, "b", PluginKind::Filter);
        assert!(matches!(
            a.subscribe("nope", &b, signal::STOP),
            Err(Error::Configuration(ConfigurationError::UnknownSignal(_)))
        ));
        assert!(matches!(
            a.subscribe(signal::STOPPED, &b, "nope"),
            Err(Error::Configuration(ConfigurationError::UnknownSlot(_)))
        ));
    }

    #[test]
    fn processor_error_stops_the_node() {
        let registry = Arc::new(Registry::new());
        let weak = Arc::downgrade(&registry);
        let failing = registry.insert_node(|key| {
            Node::new(
                key,
                "failing",
                "test",
                PluginSpec::new(
                    PluginKind::Filter,
                    processor_fn(|_ctx| Err(Error::Runtime("boom".into()))),
                ),
                StreamFormat::default(),
                weak,
            )
        });
        let feeder = node(&registry, "feeder", PluginKind::Driver);
        feeder.lock().add_source("out", "audio").unwrap();
        failing.lock().add_sink("in", "audio").unwrap();
        feeder.link("out", &failing, "in").unwrap();
        for n in [&feeder, &failing] {
            let mut guard = n.lock();
            guard.init().unwrap();
            guard.activate().unwrap();
            guard.start().unwrap();
        }

        feeder.lock().notify("out", Buffer::silence(8)).unwrap();
        let guard = failing.lock();
        assert_eq!(guard.state(), LifecycleState::Stopped);
        assert_eq!(guard.executions(), 1);
    }
}
