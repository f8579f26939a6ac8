//! Real-time handoff between a hardware callback thread and the graph.
//!
//! A hardware backend owns a thread the graph does not control. Once per
//! period it calls [`DriverPort::process`] with the captured input and the
//! output region to fill. The port:
//!
//! 1. locks the threaded-driver node; if it is stopped returns
//!    [`CallbackStatus::Abort`], if it has not started yet plays silence;
//! 2. publishes each capture channel on the Source of the same index, then
//!    releases the lock, which runs every downstream node that became ready;
//! 3. re-locks and waits on the node's condition variable until the graph has
//!    filled the driver's Sinks (the node "executed") or the node stopped;
//! 4. copies each Sink into the output, resets the Sinks and clears the run
//!    request.
//!
//! Stopping the node wakes the wait and blocks until the hardware thread has
//! left the handoff, so the thread never touches the node after `Stopped`.
//!
//! An optional deadline (`driver.timeout_ms`) bounds step 3; when it passes
//! the period is played as silence and counted as an underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Condvar;

use crate::buffer::{Buffer, BufferPool};
use crate::error::{ConfigurationError, Error, Result};
use crate::node::{Node, NodeGuard};
use crate::object::LifecycleState;
use crate::plugin::PluginKind;

/// Condition variables of the rendezvous.
#[derive(Debug, Default)]
pub(crate) struct Handoff {
    /// Graph to hardware: the run request was set, or the node stopped.
    pub(crate) wake: Condvar,
    /// Hardware to graph: the callback left the handoff.
    pub(crate) ack: Condvar,
    /// Set once stop begins; lets a late callback bail out without locking.
    pub(crate) stopped: AtomicBool,
}

/// Handoff counters of a threaded driver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverStats {
    /// Hardware periods handled while started.
    pub periods: u64,
    /// Captured buffers dropped because a Source was still busy.
    pub overruns: u64,
    /// Periods played as silence because the deadline passed.
    pub underruns: u64,
}

/// Handoff state kept under the node lock.
#[derive(Debug, Default)]
pub(crate) struct DriverState {
    pub(crate) run_requested: bool,
    pub(crate) in_callback: Option<ThreadId>,
    pub(crate) timeout: Option<Duration>,
    stats: DriverStats,
}

impl DriverState {
    pub(crate) fn stats(&self) -> DriverStats {
        self.stats
    }
}

/// What the hardware subsystem should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Keep calling.
    Continue,
    /// The driver stopped; stop requesting callbacks.
    Abort,
}

/// Entry point of a hardware callback into a threaded driver.
///
/// Buffers are interleaved: `input` has [`capture_channels`] samples per
/// frame, ordered like the node's sorted Source names, and `output` has
/// [`playback_channels`] samples per frame, ordered like its sorted Sink
/// names.
///
/// [`capture_channels`]: Self::capture_channels
/// [`playback_channels`]: Self::playback_channels
pub struct DriverPort {
    node: Arc<Node>,
    capture: Vec<String>,
    playback: Vec<String>,
    pool: BufferPool,
}

impl DriverPort {
    /// Creates the port of a threaded-driver node. Takes the node's lock.
    pub fn new(node: &Arc<Node>) -> Result<Self> {
        let guard = node.lock();
        Self::build(Arc::clone(node), &guard)
    }

    pub(crate) fn from_guard(guard: &NodeGuard<'_>) -> Result<Self> {
        let node = guard.node();
        let node = node
            .registry()?
            .node(node.key())
            .ok_or_else(|| Error::Runtime(format!("{} is not registered", node.description())))?;
        Self::build(node, guard)
    }

    fn build(node: Arc<Node>, guard: &NodeGuard<'_>) -> Result<Self> {
        if node.kind() != PluginKind::ThreadedDriver {
            return Err(ConfigurationError::InvalidValue {
                key: "object.type".into(),
                value: node.type_name().to_string(),
                reason: format!("{} is not a threaded driver", node.description()),
            }
            .into());
        }
        let capture: Vec<String> = guard.sources().map(|c| c.name().to_string()).collect();
        let playback: Vec<String> = guard.sinks().map(|c| c.name().to_string()).collect();
        let pool = BufferPool::new(node.format().buffer_size, 2 * (capture.len() + playback.len()) + 2);
        Ok(Self {
            node,
            capture,
            playback,
            pool,
        })
    }

    /// The driver node.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Interleaved input channels, one per Source.
    pub fn capture_channels(&self) -> usize {
        self.capture.len()
    }

    /// Interleaved output channels, one per Sink.
    pub fn playback_channels(&self) -> usize {
        self.playback.len()
    }

    /// Blocks until the node has started, or `timeout` passes.
    ///
    /// Returns false if the node stopped first or the wait timed out.
    pub fn wait_started(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = self.node.lock();
        loop {
            match guard.state() {
                LifecycleState::Started => return true,
                LifecycleState::Stopped => return false,
                _ => {}
            }
            match deadline {
                Some(deadline) => {
                    if guard.state.wait_until(&self.node.handoff.wake, deadline) {
                        return guard.state() == LifecycleState::Started;
                    }
                }
                None => guard.state.wait(&self.node.handoff.wake),
            }
        }
    }

    /// Handles one hardware period of `frames` frames.
    ///
    /// Blocks until the graph has produced the period's output, the node
    /// stops, or the configured deadline passes. Never fails: anomalies are
    /// logged and counted.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize) -> CallbackStatus {
        if self.node.handoff.stopped.load(Ordering::Acquire) {
            output.fill(0.0);
            return CallbackStatus::Abort;
        }
        let me = thread::current().id();
        {
            let mut guard = self.node.lock();
            match guard.state() {
                LifecycleState::Started => {}
                LifecycleState::Stopped => {
                    output.fill(0.0);
                    return CallbackStatus::Abort;
                }
                _ => {
                    output.fill(0.0);
                    return CallbackStatus::Continue;
                }
            }
            guard.state.driver.in_callback = Some(me);
            guard.state.driver.stats.periods += 1;
            self.capture(&mut guard, input, frames);
        }

        let mut guard = self.node.lock();
        let status = self.await_run(&mut guard, output, frames);
        guard.state.driver.in_callback = None;
        self.node.handoff.ack.notify_all();
        status
    }

    fn capture(&self, guard: &mut NodeGuard<'_>, input: &[f32], frames: usize) {
        let channels = self.capture.len();
        for (index, name) in self.capture.iter().enumerate() {
            let mut samples = self.pool.obtain();
            samples.resize(frames, 0.0);
            for (frame, sample) in samples.iter_mut().enumerate() {
                *sample = input.get(frame * channels + index).copied().unwrap_or(0.0);
            }
            if let Err(err) = guard.notify(name, Buffer::from_vec(samples)) {
                guard.state.driver.stats.overruns += 1;
                tracing::warn!(node = %self.node.name(), source = %name, error = %err, "capture overrun");
            }
        }
    }

    fn await_run(&self, guard: &mut NodeGuard<'_>, output: &mut [f32], frames: usize) -> CallbackStatus {
        let deadline = guard.state.driver.timeout.map(|timeout| Instant::now() + timeout);
        while !guard.state.driver.run_requested && guard.state.lifecycle.is_running() {
            match deadline {
                Some(deadline) => {
                    let timed_out = guard.state.wait_until(&self.node.handoff.wake, deadline);
                    if timed_out && !guard.state.driver.run_requested {
                        guard.state.driver.stats.underruns += 1;
                        tracing::warn!(node = %self.node.name(), frames, "handoff deadline passed, playing silence");
                        output.fill(0.0);
                        return CallbackStatus::Continue;
                    }
                }
                None => guard.state.wait(&self.node.handoff.wake),
            }
        }
        if !guard.state.lifecycle.is_running() {
            output.fill(0.0);
            return CallbackStatus::Abort;
        }

        self.playback(guard, output, frames);
        guard.state.driver.run_requested = false;
        guard.poke();
        CallbackStatus::Continue
    }

    fn playback(&self, guard: &mut NodeGuard<'_>, output: &mut [f32], frames: usize) {
        output.fill(0.0);
        let channels = self.playback.len();
        for (index, name) in self.playback.iter().enumerate() {
            match guard.take(name) {
                Ok(Some(buffer)) => {
                    for (frame, sample) in buffer.samples().iter().take(frames).enumerate() {
                        if let Some(slot) = output.get_mut(frame * channels + index) {
                            *slot = *sample;
                        }
                    }
                    self.pool.recycle(buffer);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(node = %self.node.name(), sink = %name, error = %err, "playback");
                }
            }
        }
    }
}

impl std::fmt::Debug for DriverPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverPort")
            .field("node", &self.node.name())
            .field("capture", &self.capture)
            .field("playback", &self.playback)
            .finish_non_exhaustive()
    }
}
