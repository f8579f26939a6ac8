//! Sources, Sinks and the Links between them.
//!
//! A [`Channel`] is one named endpoint on a node, either a Source or a Sink.
//! It does not own its Links: it records their keys, and the per-graph
//! [`Registry`] owns the [`Link`] values. Each Link carries its own small lock
//! around the available/ready flags and the in-flight buffer, so the producer
//! and the consumer can flip them while holding only their own node's lock.
//! Link locks are leaves: nothing else is ever acquired while one is held.

use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::lock::OwnedLock;
use crate::node::NodeKey;
use crate::object::ObjectId;
use crate::registry::Registry;

/// Registry handle of a [`Link`].
pub type LinkKey = crate::arena::Key<Arc<Link>>;

/// Which side of a Link an endpoint sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Output endpoint that publishes buffers.
    Source,
    /// Input endpoint that consumes buffers.
    Sink,
}

impl ChannelKind {
    /// Lowercase name used in configuration keys and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Sink => "sink",
        }
    }

    /// The opposite kind.
    pub fn other(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node-qualified endpoint name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Owning node.
    pub node: NodeKey,
    /// Endpoint name within its namespace.
    pub name: String,
}

#[derive(Debug)]
struct LinkState {
    buffer: Option<Buffer>,
    available: bool,
    ready: bool,
    notified: bool,
}

/// Directed connection from one Source to one Sink.
pub struct Link {
    id: ObjectId,
    source: Endpoint,
    sink: Endpoint,
    type_tag: String,
    state: OwnedLock<LinkState>,
}

impl Link {
    pub(crate) fn new(source: Endpoint, sink: Endpoint, type_tag: impl Into<String>) -> Self {
        Self {
            id: ObjectId::next(),
            source,
            sink,
            type_tag: type_tag.into(),
            state: OwnedLock::new(LinkState {
                buffer: None,
                available: false,
                ready: true,
                notified: false,
            }),
        }
    }

    /// Unique id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Producing endpoint.
    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    /// Consuming endpoint.
    pub fn sink(&self) -> &Endpoint {
        &self.sink
    }

    /// Type tag shared by both endpoints.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Log-friendly description; reads immutable data only.
    pub fn description(&self) -> String {
        format!("link {} '{}' -> '{}'", self.id, self.source.name, self.sink.name)
    }

    /// A buffer has been published and not yet consumed.
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// The Sink side has consumed and can take the next buffer.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// At least one buffer has been published on this Link.
    pub fn was_notified(&self) -> bool {
        self.state.lock().notified
    }

    /// Clone of the in-flight buffer, if any.
    pub fn buffer(&self) -> Option<Buffer> {
        self.state.lock().buffer.clone()
    }

    pub(crate) fn publish(&self, buffer: Buffer) {
        let mut state = self.state.lock();
        state.buffer = Some(buffer);
        state.available = true;
        state.ready = false;
        state.notified = true;
    }

    pub(crate) fn consume(&self) -> Option<Buffer> {
        let mut state = self.state.lock();
        state.available = false;
        state.ready = true;
        state.buffer.take()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("sink", &self.sink)
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// A named, typed Source or Sink on a node.
///
/// Readiness queries resolve the channel's Link keys through the registry;
/// keys whose Link is gone (an endpoint node was removed) are skipped.
#[derive(Debug)]
pub struct Channel {
    id: ObjectId,
    name: String,
    type_tag: String,
    kind: ChannelKind,
    links: Vec<LinkKey>,
    notified: bool,
    notify_count: u64,
    reset_count: u64,
}

impl Channel {
    pub(crate) fn new(kind: ChannelKind, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.into(),
            type_tag: type_tag.into(),
            kind,
            links: Vec::new(),
            notified: false,
            notify_count: 0,
            reset_count: 0,
        }
    }

    /// Unique id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag, e.g. `"audio"`.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Source or Sink.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Keys of the attached Links, including ones that no longer resolve.
    pub fn link_keys(&self) -> &[LinkKey] {
        &self.links
    }

    /// Times `notify` succeeded on this Source.
    pub fn notify_count(&self) -> u64 {
        self.notify_count
    }

    /// Times `reset` ran on this Sink.
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// Live Links attached to this endpoint.
    pub fn links(&self, registry: &Registry) -> Vec<Arc<Link>> {
        self.links.iter().filter_map(|key| registry.link(*key)).collect()
    }

    /// Number of live Links.
    pub fn link_count(&self, registry: &Registry) -> usize {
        self.links.iter().filter(|key| registry.contains_link(**key)).count()
    }

    /// Source view: notified at least once and every outgoing Link available.
    pub fn is_available(&self, registry: &Registry) -> bool {
        self.notified && self.all(registry, |link| link.was_notified() && link.is_available())
    }

    /// Sink view: every incoming Link ready. Vacuously true with no Links.
    pub fn is_ready(&self, registry: &Registry) -> bool {
        self.all(registry, Link::is_ready)
    }

    /// Sink view: every incoming Link holds an unconsumed buffer.
    /// Vacuously true with no Links.
    pub fn is_filled(&self, registry: &Registry) -> bool {
        self.all(registry, Link::is_available)
    }

    /// Source view: no outgoing Link holds an unconsumed buffer.
    /// Vacuously true with no Links.
    pub fn is_clear(&self, registry: &Registry) -> bool {
        self.all(registry, Link::is_ready)
    }

    /// Buffer on the first live incoming Link that holds one.
    pub fn buffer(&self, registry: &Registry) -> Option<Buffer> {
        self.links
            .iter()
            .filter_map(|key| registry.link(*key))
            .find_map(|link| link.buffer())
    }

    fn all(&self, registry: &Registry, predicate: impl Fn(&Link) -> bool) -> bool {
        self.links
            .iter()
            .filter_map(|key| registry.link(*key))
            .all(|link| predicate(&link))
    }

    pub(crate) fn attach(&mut self, key: LinkKey) {
        self.links.push(key);
    }

    pub(crate) fn prune(&mut self, registry: &Registry) {
        self.links.retain(|key| registry.contains_link(*key));
    }

    pub(crate) fn mark_notified(&mut self) {
        self.notified = true;
        self.notify_count += 1;
    }

    pub(crate) fn mark_reset(&mut self) {
        self.reset_count += 1;
    }
}
