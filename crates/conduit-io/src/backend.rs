//! Pluggable hardware backend abstraction.
//!
//! A [`HardwareBackend`] owns the platform side of a threaded driver: given a
//! [`DriverPort`] it opens a stream whose real-time thread calls
//! [`DriverPort::process`] once per period, and returns a [`StreamHandle`]
//! that keeps the stream alive.
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │  threaded-driver node (activate) │
//! └──────────────┬───────────────────┘
//!                │ ctx.port()
//!                ▼
//! ┌──────────────────────────────────┐
//! │      HardwareBackend::open       │
//! └──────────────┬───────────────────┘
//!        ┌───────┴────────┐
//!        ▼                ▼
//! ┌─────────────┐  ┌──────────────┐
//! │ CpalBackend │  │ ManualBackend │
//! └─────────────┘  └──────────────┘
//! ```
//!
//! Handles land in a [`Streams`] set owned by the application. Dropping a
//! handle may join the real-time thread, which needs the driver's lock, so
//! the set is cleared after `Graph::run` returns and never under a node lock.

use std::sync::Arc;

use conduit_core::{DriverPort, StreamFormat};
use parking_lot::Mutex;

use crate::Result;

/// Shape of the stream a backend should open for one driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per period.
    pub buffer_size: u32,
    /// Output channels, one per driver Sink.
    pub playback_channels: u16,
    /// Input channels, one per driver Source.
    pub capture_channels: u16,
    /// Optional device name filter (system default if `None`).
    pub device_name: Option<String>,
}

impl BackendConfig {
    /// Derives the stream shape from the graph format and the driver's port.
    pub fn for_port(format: StreamFormat, port: &DriverPort, device_name: Option<String>) -> Self {
        Self {
            sample_rate: format.sample_rate,
            buffer_size: format.buffer_size as u32,
            playback_channels: port.playback_channels() as u16,
            capture_channels: port.capture_channels() as u16,
            device_name,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            playback_channels: 2,
            capture_channels: 0,
            device_name: None,
        }
    }
}

/// Type-erased stream handle.
///
/// The stream runs while this handle exists; dropping it stops it.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, kept alive until drop.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Open streams of a graph. Cloning shares the set.
#[derive(Clone, Default)]
pub struct Streams {
    handles: Arc<Mutex<Vec<StreamHandle>>>,
}

impl Streams {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `handle` alive until [`clear`](Self::clear) or the last clone drops.
    pub fn push(&self, handle: StreamHandle) {
        self.handles.lock().push(handle);
    }

    /// Number of open streams.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// True if no stream is open.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Closes every stream.
    pub fn clear(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();
        drop(handles);
        if count > 0 {
            tracing::debug!(count, "streams closed");
        }
    }
}

impl std::fmt::Debug for Streams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streams").field("open", &self.len()).finish()
    }
}

/// Information about an audio device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Device name.
    pub name: String,
    /// Whether this is an input device.
    pub is_input: bool,
    /// Whether this is an output device.
    pub is_output: bool,
    /// Default sample rate, if the device reports one.
    pub default_sample_rate: Option<u32>,
}

/// Platform audio subsystem driving threaded drivers.
///
/// Object-safe so the application can pick a backend at runtime.
pub trait HardwareBackend: Send + Sync {
    /// Backend name, e.g. `"cpal"`.
    fn name(&self) -> &'static str;

    /// Devices this backend can open.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// Opens a stream that calls `port.process` once per period until the
    /// port reports `Abort` or the handle is dropped.
    fn open(&self, config: &BackendConfig, port: DriverPort) -> Result<StreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.playback_channels, 2);
        assert_eq!(config.capture_channels, 0);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn stream_handle_debug() {
        let handle = StreamHandle::new(42u32);
        assert!(format!("{handle:?}").contains("StreamHandle"));
    }

    #[test]
    fn clearing_streams_drops_every_handle() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let streams = Streams::new();
        let shared = streams.clone();
        for _ in 0..3 {
            shared.push(StreamHandle::new(Counted(Arc::clone(&dropped))));
        }
        assert_eq!(streams.len(), 3);
        streams.clear();
        assert!(shared.is_empty());
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }
}
