//! CLI command implementations.

pub mod devices;
pub mod plugins;
pub mod run;

use std::sync::Arc;

use clap::ValueEnum;
use conduit_core::PluginFactory;
use conduit_io::{CpalBackend, HardwareBackend, ManualBackend, Streams};

/// Hardware backend driving `hardware` nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Platform audio through cpal
    Cpal,
    /// Offline rendering on a dedicated thread, no device needed
    Manual,
}

impl Backend {
    /// Instantiates the backend. `periods` bounds a manual render.
    pub fn create(self, periods: Option<u64>) -> Arc<dyn HardwareBackend> {
        match self {
            Backend::Cpal => Arc::new(CpalBackend::new()),
            Backend::Manual => match periods {
                Some(periods) => Arc::new(ManualBackend::new().with_periods(periods)),
                None => Arc::new(ManualBackend::new()),
            },
        }
    }
}

/// Builtin plugins plus the I/O plugins bound to `backend`.
pub fn plugin_factory(backend: Arc<dyn HardwareBackend>, streams: &Streams) -> PluginFactory {
    let mut factory = PluginFactory::with_builtins();
    conduit_io::register(&mut factory, backend, streams);
    factory
}
