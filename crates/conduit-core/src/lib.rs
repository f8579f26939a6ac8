//! Conduit Core - graph, lifecycle and real-time handoff substrate
//!
//! This crate provides the engine underneath a modular audio graph: nodes
//! with typed Sources and Sinks, Links between them, a readiness policy that
//! decides when each node runs, and the rendezvous that lets a hardware
//! callback thread exchange buffers with the graph.
//!
//! # Core Abstractions
//!
//! ## Locking and Lifecycle
//!
//! - [`OwnedLock`] - Mutex that knows which thread holds it
//! - [`LifecycleHooks`] / [`advance`] - `Constructed → Initialized → Activated → Started → Stopped`
//!
//! ## Graph Model
//!
//! - [`Graph`] / [`GraphGuard`] - Node container, bring-up and tear-down
//! - [`Node`] / [`NodeGuard`] - Sources, Sinks, signals, slots and a processor
//! - [`Link`] / [`Channel`] - Source-to-Sink connections and their predicates
//! - [`Registry`] - Generational tables of nodes and links
//!
//! ## Execution
//!
//! - [`PluginKind`] - `Driver`, `Filter` or `ThreadedDriver` readiness policy
//! - [`Processor`] - The processing step of a node
//! - [`DriverPort`] - Entry point of a hardware callback
//! - [`AsyncEngine`] - Worker pool for foreign-thread graph mutations
//!
//! ## Construction
//!
//! - [`Config`] - Ordered key/value construction list
//! - [`GraphDescription`] - TOML graph files
//! - [`PluginFactory`] - `object.type` to processor constructors
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use conduit_core::{Config, PluginFactory, make_graph};
//!
//! let graph = make_graph(&Config::new(), Arc::new(PluginFactory::with_builtins())).unwrap();
//! {
//!     let mut g = graph.lock();
//!     g.add_node(&Config::new()
//!         .with("object.type", "tone")
//!         .with("node.name", "osc")
//!         .with("source.out", "audio")
//!         .with("config.blocks", "4"))
//!         .unwrap();
//!     g.add_node(&Config::new()
//!         .with("object.type", "null")
//!         .with("node.name", "sink")
//!         .with("sink.in", "audio"))
//!         .unwrap();
//!     g.link("osc", "out", "sink", "in").unwrap();
//!     g.subscribe("osc", "end_of_stream", "sink", "stop").unwrap();
//! }
//! graph.run().unwrap();
//! ```

pub mod arena;
pub mod buffer;
pub mod cascade;
pub mod config;
pub mod driver;
pub mod error;
pub mod factory;
pub mod graph;
pub mod jobs;
pub mod link;
pub mod lock;
pub mod node;
pub mod object;
pub mod plugin;
pub mod processors;
pub mod registry;
pub mod signal;

pub use arena::{Arena, Key};
pub use buffer::{Buffer, BufferPool, StreamFormat};
pub use config::{Config, GraphDescription, parse_param_value, split_reference};
pub use driver::{CallbackStatus, DriverPort, DriverStats};
pub use error::{ConfigurationError, Error, Result};
pub use factory::PluginFactory;
pub use graph::{Graph, GraphGuard, Terminator, make_graph};
pub use jobs::AsyncEngine;
pub use link::{Channel, ChannelKind, Endpoint, Link, LinkKey};
pub use lock::{LockOwnershipError, OwnedGuard, OwnedLock};
pub use node::{Node, NodeGuard, NodeKey};
pub use object::{Lifecycle, LifecycleHooks, LifecycleState, ObjectId, Transition, advance};
pub use plugin::{ActivateContext, Flow, PluginKind, PluginSpec, ProcessContext, Processor, processor_fn};
pub use registry::Registry;
pub use signal::{END_OF_STREAM, STOP, STOPPED, Signal, Subscription};
