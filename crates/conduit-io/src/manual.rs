//! Deterministic backend for tests and offline rendering.
//!
//! [`ManualBackend`] stands in for an audio device: each opened stream is a
//! dedicated thread that waits for its driver to start, then calls
//! [`DriverPort::process`] back to back, feeding caller-supplied input and
//! collecting the output. It stops on `Abort` (the driver stopped), after a
//! fixed number of periods, or when its handle is dropped. With a period
//! limit, the thread stops the driver itself once the last period is
//! rendered, so `Graph::run` returns.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use conduit_core::{CallbackStatus, DriverPort, LifecycleState};
use parking_lot::Mutex;

use crate::backend::{AudioDevice, BackendConfig, HardwareBackend, StreamHandle};
use crate::Result;

/// How often a waiting stream thread checks whether its handle was dropped.
const POLL: Duration = Duration::from_millis(20);

type Rendered = Arc<Mutex<BTreeMap<String, Vec<f32>>>>;

/// Backend that renders on its own threads as fast as the graph allows.
#[derive(Debug, Default, Clone)]
pub struct ManualBackend {
    periods: Option<u64>,
    input: Arc<Vec<f32>>,
    rendered: Rendered,
}

impl ManualBackend {
    /// A backend that runs until its drivers stop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops each driver after `periods` periods.
    pub fn with_periods(mut self, periods: u64) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Interleaved capture samples, consumed period by period; silence after.
    pub fn with_input(mut self, input: Vec<f32>) -> Self {
        self.input = Arc::new(input);
        self
    }

    /// Interleaved output rendered so far by the driver named `node`.
    pub fn rendered(&self, node: &str) -> Vec<f32> {
        self.rendered.lock().get(node).cloned().unwrap_or_default()
    }
}

impl HardwareBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(vec![AudioDevice {
            name: "manual".to_string(),
            is_input: true,
            is_output: true,
            default_sample_rate: None,
        }])
    }

    fn open(&self, config: &BackendConfig, port: DriverPort) -> Result<StreamHandle> {
        let node = port.node().name().to_string();
        self.rendered.lock().insert(node.clone(), Vec::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let render = Render {
            port,
            frames: config.buffer_size as usize,
            periods: self.periods,
            input: Arc::clone(&self.input),
            rendered: Arc::clone(&self.rendered),
            node: node.clone(),
            cancel: Arc::clone(&cancel),
        };
        let thread = thread::Builder::new()
            .name(format!("conduit-manual-{node}"))
            .spawn(move || render.run())?;
        tracing::info!(node = %node, periods = ?self.periods, "manual stream started");
        Ok(StreamHandle::new(ManualStream {
            cancel,
            thread: Some(thread),
        }))
    }
}

struct Render {
    port: DriverPort,
    frames: usize,
    periods: Option<u64>,
    input: Arc<Vec<f32>>,
    rendered: Rendered,
    node: String,
    cancel: Arc<AtomicBool>,
}

impl Render {
    fn run(mut self) {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return;
            }
            if self.port.wait_started(Some(POLL)) {
                break;
            }
            if self.port.node().lock().state() == LifecycleState::Stopped {
                return;
            }
        }

        let capture = self.port.capture_channels() * self.frames;
        let mut output = vec![0.0; self.port.playback_channels() * self.frames];
        let mut input = vec![0.0; capture];
        let mut period: u64 = 0;
        while self.periods.is_none_or(|limit| period < limit) && !self.cancel.load(Ordering::Acquire) {
            self.next_input(period, &mut input);
            let status = self.port.process(&input, &mut output, self.frames);
            if status == CallbackStatus::Abort {
                tracing::debug!(node = %self.node, period, "manual stream aborted");
                return;
            }
            if let Some(rendered) = self.rendered.lock().get_mut(&self.node) {
                rendered.extend_from_slice(&output);
            }
            period += 1;
        }
        if self.cancel.load(Ordering::Acquire) {
            return;
        }

        tracing::debug!(node = %self.node, period, "manual stream finished");
        let mut guard = self.port.node().lock();
        if guard.state() == LifecycleState::Started
            && let Err(err) = guard.stop()
        {
            tracing::error!(node = %self.node, error = %err, "stop after last period");
        }
    }

    fn next_input(&self, period: u64, input: &mut [f32]) {
        let start = (period as usize).saturating_mul(input.len());
        for (offset, sample) in input.iter_mut().enumerate() {
            *sample = self.input.get(start + offset).copied().unwrap_or(0.0);
        }
    }
}

/// Joins the render thread on drop.
struct ManualStream {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("manual stream thread panicked");
        }
    }
}
