//! Plugin variants and the processing step they run.
//!
//! Every node is one of three [`PluginKind`]s; the kind selects the readiness
//! policy evaluated by [`NodeGuard::should_execute`]:
//!
//! | Kind             | Executes when                                                        |
//! |------------------|----------------------------------------------------------------------|
//! | `Filter`         | every Sink is filled and every Source is clear downstream             |
//! | `Driver`         | it has incoming Links and every Sink is filled                        |
//! | `ThreadedDriver` | every Sink is filled and no run request is outstanding                |
//!
//! A Sink is *filled* when each of its Links carries an unconsumed buffer and
//! a Source is *clear* when each of its Links is ready again. A Filter without
//! Sinks is a generator: it runs whenever its linked Sources are clear.
//!
//! The DSP itself lives behind the [`Processor`] trait. `ThreadedDriver`
//! nodes never call their processor's `process`; their execution is a run
//! request to the hardware thread (see [`crate::driver`]).

use std::fmt;

use crate::buffer::{Buffer, StreamFormat};
use crate::driver::DriverPort;
use crate::error::Result;
use crate::node::NodeGuard;

/// Readiness policy of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Consumes buffers; waits only on its Sinks.
    Driver,
    /// Consumes and produces; waits on its Sinks and its downstream.
    Filter,
    /// Bridges a foreign real-time thread; execution is a handoff request.
    ThreadedDriver,
}

impl PluginKind {
    /// Lowercase name used in descriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Filter => "filter",
            Self::ThreadedDriver => "threaded-driver",
        }
    }

    /// Drivers keep `Graph::run` alive while started.
    pub fn is_driver(self) -> bool {
        matches!(self, Self::Driver | Self::ThreadedDriver)
    }

    /// Bound to a hardware device; Sources and Sinks share one port namespace.
    pub fn is_hardware_bound(self) -> bool {
        self == Self::ThreadedDriver
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one processing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// No more data: emit `end_of_stream`, then stop the node.
    EndOfStream,
}

/// The processing step of a node.
///
/// `process` runs with the node's lock held, at most once at a time per
/// node. Sinks are reset by the framework after every call, so an input
/// buffer is only valid for the call that observed it.
pub trait Processor: Send {
    /// Called during node activation, once the endpoint set is final.
    /// Errors abort the activation.
    fn activate(&mut self, ctx: &ActivateContext<'_, '_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Runs one step.
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow>;

    /// Called once when the node stops.
    fn stop(&mut self) {}
}

/// A processor that does nothing. Used by threaded drivers, whose work
/// happens on the hardware thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Idle;

impl Processor for Idle {
    fn process(&mut self, _ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        Ok(Flow::Continue)
    }
}

/// Processor backed by a closure; see [`processor_fn`].
pub struct FnProcessor<F>(F);

/// Wraps a closure as a [`Processor`].
///
/// ```
/// use conduit_core::plugin::{processor_fn, Flow};
///
/// let mut calls = 0;
/// let _p = processor_fn(move |_ctx| {
///     calls += 1;
///     Ok(Flow::Continue)
/// });
/// ```
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: FnMut(&mut ProcessContext<'_, '_>) -> Result<Flow> + Send,
{
    FnProcessor(f)
}

impl<F> Processor for FnProcessor<F>
where
    F: FnMut(&mut ProcessContext<'_, '_>) -> Result<Flow> + Send,
{
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        (self.0)(ctx)
    }
}

/// What a constructor hands back to the graph: the kind plus its processor.
pub struct PluginSpec {
    /// Readiness policy.
    pub kind: PluginKind,
    /// The processing step.
    pub processor: Box<dyn Processor>,
}

impl PluginSpec {
    /// Bundles a kind with a processor.
    pub fn new(kind: PluginKind, processor: impl Processor + 'static) -> Self {
        Self {
            kind,
            processor: Box::new(processor),
        }
    }
}

impl fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSpec")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// View of the activating node handed to [`Processor::activate`].
pub struct ActivateContext<'g, 'a> {
    guard: &'g NodeGuard<'a>,
}

impl<'g, 'a> ActivateContext<'g, 'a> {
    pub(crate) fn new(guard: &'g NodeGuard<'a>) -> Self {
        Self { guard }
    }

    /// Stream format of the graph.
    pub fn format(&self) -> StreamFormat {
        self.guard.node().format()
    }

    /// Name of the activating node.
    pub fn node_name(&self) -> &str {
        self.guard.node().name()
    }

    /// Names of the node's Sources, sorted.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.guard.sources().map(|channel| channel.name())
    }

    /// Names of the node's Sinks, sorted.
    pub fn sinks(&self) -> impl Iterator<Item = &str> {
        self.guard.sinks().map(|channel| channel.name())
    }

    /// Handoff port of a threaded driver, for a hardware backend to call
    /// once per period.
    pub fn port(&self) -> Result<DriverPort> {
        DriverPort::from_guard(self.guard)
    }
}

/// View of the executing node handed to [`Processor::process`].
pub struct ProcessContext<'g, 'a> {
    guard: &'g mut NodeGuard<'a>,
}

impl<'g, 'a> ProcessContext<'g, 'a> {
    pub(crate) fn new(guard: &'g mut NodeGuard<'a>) -> Self {
        Self { guard }
    }

    /// Stream format of the graph.
    pub fn format(&self) -> StreamFormat {
        self.guard.node().format()
    }

    /// Name of the executing node.
    pub fn node_name(&self) -> &str {
        self.guard.node().name()
    }

    /// Names of the node's Sources, sorted.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.guard.sources().map(|channel| channel.name())
    }

    /// Names of the node's Sinks, sorted.
    pub fn sinks(&self) -> impl Iterator<Item = &str> {
        self.guard.sinks().map(|channel| channel.name())
    }

    /// Buffer waiting on `sink`, if any.
    pub fn input(&self, sink: &str) -> Result<Option<Buffer>> {
        self.guard.read(sink)
    }

    /// Publishes `buffer` on `source`.
    pub fn publish(&mut self, source: &str, buffer: Buffer) -> Result<()> {
        self.guard.notify(source, buffer)
    }

    /// Publishes `buffer` on every Source.
    pub fn publish_all(&mut self, buffer: &Buffer) -> Result<()> {
        let names: Vec<String> = self.sources().map(str::to_owned).collect();
        for name in names {
            self.guard.notify(&name, buffer.clone())?;
        }
        Ok(())
    }

    /// Fires a signal of the executing node.
    pub fn emit(&mut self, signal: &str) -> Result<()> {
        self.guard.emit(signal)
    }
}
