//! Deferred, same-thread propagation of readiness and signal events.
//!
//! Whatever a node does under its lock that may make another node executable
//! (publishing on a Source, resetting a Sink, starting, firing a signal) is
//! recorded as an [`Event`] in the node's guard. When the guard releases the
//! lock, the events are handed to [`dispatch`], which runs them on the
//! releasing thread before the releasing call returns.
//!
//! Dispatch is a per-thread trampoline. The outermost release drains the
//! queue; a release that happens while the queue is being drained (a node
//! poked by the cascade publishing further downstream) only appends. Long
//! chains and generator loops therefore run in constant stack depth, and a
//! thread never holds more than one node lock at a time.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Weak;

use crate::node::NodeKey;
use crate::registry::Registry;

/// Work queued by a node guard for after its lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// The node's readiness may have changed; re-evaluate it.
    Poke(NodeKey),
    /// Invoke `slot` on `target` on behalf of `signal`.
    Deliver {
        target: NodeKey,
        slot: String,
        signal: String,
    },
}

thread_local! {
    static QUEUE: RefCell<VecDeque<(Weak<Registry>, Event)>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Clears the trampoline if a handler unwinds, so a later cascade on this
/// thread starts clean.
struct DrainScope;

impl Drop for DrainScope {
    fn drop(&mut self) {
        DRAINING.set(false);
        if std::thread::panicking() {
            QUEUE.with_borrow_mut(VecDeque::clear);
        }
    }
}

/// Runs `events` on the current thread, after any already queued ones.
pub(crate) fn dispatch(registry: &Weak<Registry>, events: Vec<Event>) {
    if events.is_empty() {
        return;
    }
    QUEUE.with_borrow_mut(|queue| {
        queue.extend(events.into_iter().map(|event| (Weak::clone(registry), event)));
    });
    if DRAINING.get() {
        return;
    }
    DRAINING.set(true);
    let _scope = DrainScope;
    while let Some((registry, event)) = QUEUE.with_borrow_mut(VecDeque::pop_front) {
        let Some(registry) = registry.upgrade() else {
            continue;
        };
        handle(&registry, event);
    }
}

/// True while the current thread is draining a cascade.
pub fn is_dispatching() -> bool {
    DRAINING.get()
}

fn handle(registry: &Registry, event: Event) {
    tracing::trace!(?event, "cascade");
    match event {
        Event::Poke(key) => {
            // A terminating graph stops scheduling; `run` stops the nodes.
            if registry.termination_requested() {
                return;
            }
            if let Some(node) = registry.node(key) {
                node.lock().execute_if_needed();
            }
        }
        Event::Deliver {
            target,
            slot,
            signal,
        } => {
            if let Some(node) = registry.node(target) {
                node.lock().invoke_slot(&slot, &signal);
            }
        }
    }
}
