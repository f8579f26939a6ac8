//! Per-graph tables of nodes and links.
//!
//! The registry owns every [`Node`] and [`Link`] of one graph, addressed by
//! generational keys. The table locks are held only for the lookup itself,
//! never across a call into a node, so they sit below every object lock in
//! the ordering.
//!
//! It also carries the activity counter that `Graph::run` blocks on: the
//! number of started, not yet stopped drivers, and a termination request.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::arena::Arena;
use crate::link::{Link, LinkKey};
use crate::node::{Node, NodeKey};

#[derive(Debug, Default)]
struct Activity {
    running_drivers: usize,
    terminate: bool,
}

/// Nodes, links and driver activity of one graph.
#[derive(Default)]
pub struct Registry {
    nodes: RwLock<Arena<Arc<Node>>>,
    links: RwLock<Arena<Arc<Link>>>,
    activity: Mutex<Activity>,
    activity_changed: Condvar,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a node key.
    pub fn node(&self, key: NodeKey) -> Option<Arc<Node>> {
        self.nodes.read().get(key).cloned()
    }

    /// Resolves a link key.
    pub fn link(&self, key: LinkKey) -> Option<Arc<Link>> {
        self.links.read().get(key).cloned()
    }

    /// True if the link still exists.
    pub fn contains_link(&self, key: LinkKey) -> bool {
        self.links.read().contains(key)
    }

    /// Live nodes in slot order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().iter().map(|(_, node)| Arc::clone(node)).collect()
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.read().len()
    }

    pub(crate) fn insert_node(&self, make: impl FnOnce(NodeKey) -> Node) -> Arc<Node> {
        let mut nodes = self.nodes.write();
        let (_, node) = nodes.emplace(|key| Arc::new(make(key)));
        Arc::clone(node)
    }

    pub(crate) fn remove_node(&self, key: NodeKey) -> Option<Arc<Node>> {
        self.nodes.write().remove(key)
    }

    pub(crate) fn insert_link(&self, link: Link) -> LinkKey {
        self.links.write().insert(Arc::new(link))
    }

    pub(crate) fn remove_link(&self, key: LinkKey) -> Option<Arc<Link>> {
        self.links.write().remove(key)
    }

    pub(crate) fn driver_started(&self) {
        self.activity.lock().running_drivers += 1;
        self.activity_changed.notify_all();
    }

    pub(crate) fn driver_stopped(&self) {
        let mut activity = self.activity.lock();
        activity.running_drivers = activity.running_drivers.saturating_sub(1);
        drop(activity);
        self.activity_changed.notify_all();
    }

    /// Number of started, not yet stopped drivers.
    pub fn running_drivers(&self) -> usize {
        self.activity.lock().running_drivers
    }

    pub(crate) fn request_termination(&self) {
        self.activity.lock().terminate = true;
        self.activity_changed.notify_all();
    }

    pub(crate) fn termination_requested(&self) -> bool {
        self.activity.lock().terminate
    }

    /// Blocks until no driver is running or termination was requested.
    pub(crate) fn wait_idle(&self) {
        let mut activity = self.activity.lock();
        while activity.running_drivers > 0 && !activity.terminate {
            self.activity_changed.wait(&mut activity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_idle_returns_when_drivers_stop() {
        let registry = Arc::new(Registry::new());
        registry.driver_started();
        registry.driver_started();
        assert_eq!(registry.running_drivers(), 2);

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_idle())
        };
        thread::sleep(Duration::from_millis(10));
        registry.driver_stopped();
        registry.driver_stopped();
        waiter.join().unwrap();
        assert_eq!(registry.running_drivers(), 0);
    }

    #[test]
    fn termination_releases_waiters() {
        let registry = Arc::new(Registry::new());
        registry.driver_started();
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_idle())
        };
        registry.request_termination();
        waiter.join().unwrap();
        assert!(registry.termination_requested());
        assert_eq!(registry.running_drivers(), 1);
    }
}
