//! Audio I/O layer for the conduit engine.
//!
//! This crate provides:
//!
//! - **Hardware backends**: the [`HardwareBackend`] trait, a cpal
//!   implementation ([`CpalBackend`]) and a deterministic
//!   [`ManualBackend`] for tests and offline rendering
//! - **Threaded-driver nodes**: [`register_hardware`] replaces the inert
//!   `hardware` plugin with one that opens a backend stream on activation
//! - **WAV nodes**: `wav.reader` and `wav.writer` plugins ([`register_wav`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conduit_core::{Graph, GraphDescription, PluginFactory};
//! use conduit_io::{CpalBackend, Streams, register};
//!
//! let streams = Streams::new();
//! let mut factory = PluginFactory::with_builtins();
//! register(&mut factory, Arc::new(CpalBackend::new()), &streams);
//!
//! let description = GraphDescription::load("graph.toml")?;
//! let graph = Graph::from_description(&description, Arc::new(factory))?;
//! graph.run()?;
//! drop(streams);
//! ```

pub mod backend;
pub mod cpal_backend;
mod hardware;
pub mod manual;
pub mod wav;

use std::sync::Arc;

use conduit_core::PluginFactory;

pub use backend::{AudioDevice, BackendConfig, HardwareBackend, StreamHandle, Streams};
pub use cpal_backend::CpalBackend;
pub use hardware::register_hardware;
pub use manual::ManualBackend;
pub use wav::{WavPlayer, WavRecorder, register_wav};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("No audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The driver node and the device disagree on the stream shape.
    #[error("Unsupported stream: {0}")]
    Unsupported(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for conduit_core::Error {
    fn from(err: Error) -> Self {
        conduit_core::Error::Hardware(err.to_string())
    }
}

/// Result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Registers the hardware driver backed by `backend` and the WAV plugins.
pub fn register(factory: &mut PluginFactory, backend: Arc<dyn HardwareBackend>, streams: &Streams) {
    register_hardware(factory, backend, streams);
    register_wav(factory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_hardware_errors() {
        let err: conduit_core::Error = Error::DeviceNotFound("no output device matching 'x'".into()).into();
        assert!(matches!(err, conduit_core::Error::Hardware(ref msg) if msg.contains("matching 'x'")));
    }

    #[test]
    fn register_adds_io_plugins() {
        let mut factory = PluginFactory::with_builtins();
        register(&mut factory, Arc::new(ManualBackend::new()), &Streams::new());
        for name in ["hardware", "wav.reader", "wav.writer"] {
            assert!(factory.contains(name), "{name} not registered");
        }
    }
}
