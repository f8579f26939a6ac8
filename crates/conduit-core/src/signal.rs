//! Signals and slots between nodes.
//!
//! A signal is a named, fire-and-forget notification owned by a node; a slot
//! is a named handler on a node. Subscribing connects a signal to a slot on
//! any node of the same graph. Firing queues one delivery per subscriber on
//! the firing thread; each delivery runs after the firer's lock is released,
//! under the receiver's lock.

use std::collections::BTreeMap;
use std::fmt;

use crate::node::{NodeGuard, NodeKey};

/// Fired once when a node's processor reports end of stream.
pub const END_OF_STREAM: &str = "end_of_stream";
/// Fired once when a node stops.
pub const STOPPED: &str = "stopped";
/// Builtin slot that stops the receiving node.
pub const STOP: &str = "stop";

/// A subscriber of a signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Receiving node.
    pub target: NodeKey,
    /// Slot invoked on the receiver.
    pub slot: String,
}

/// A named signal and its subscribers.
#[derive(Debug, Default)]
pub struct Signal {
    name: String,
    subscribers: Vec<Subscription>,
}

impl Signal {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Vec::new(),
        }
    }

    /// Signal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current subscribers, in subscription order.
    pub fn subscribers(&self) -> &[Subscription] {
        &self.subscribers
    }

    pub(crate) fn subscribe(&mut self, subscription: Subscription) {
        self.subscribers.push(subscription);
    }
}

/// Handler run when a subscribed signal fires. Receives the receiver's guard
/// and the name of the signal that fired.
pub type SlotHandler = Box<dyn FnMut(&mut NodeGuard<'_>, &str) + Send>;

pub(crate) enum Slot {
    Stop,
    Handler(SlotHandler),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str("Slot::Stop"),
            Self::Handler(_) => f.write_str("Slot::Handler(..)"),
        }
    }
}

pub(crate) fn builtin_signals() -> BTreeMap<String, Signal> {
    [END_OF_STREAM, STOPPED]
        .into_iter()
        .map(|name| (name.to_string(), Signal::new(name)))
        .collect()
}

pub(crate) fn builtin_slots() -> BTreeMap<String, Slot> {
    BTreeMap::from([(STOP.to_string(), Slot::Stop)])
}
