//! The `hardware` threaded-driver plugin.

use std::sync::Arc;

use conduit_core::{ActivateContext, Flow, PluginFactory, PluginKind, PluginSpec, ProcessContext, Processor};

use crate::backend::{BackendConfig, HardwareBackend, Streams};

/// Threaded driver whose stream is opened when the node activates.
struct HardwareDriver {
    backend: Arc<dyn HardwareBackend>,
    streams: Streams,
    device: Option<String>,
}

impl Processor for HardwareDriver {
    fn activate(&mut self, ctx: &ActivateContext<'_, '_>) -> conduit_core::Result<()> {
        let port = ctx.port()?;
        let config = BackendConfig::for_port(ctx.format(), &port, self.device.clone());
        tracing::debug!(node = ctx.node_name(), backend = self.backend.name(), ?config, "opening stream");
        let handle = self.backend.open(&config, port)?;
        self.streams.push(handle);
        Ok(())
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_, '_>) -> conduit_core::Result<Flow> {
        Ok(Flow::Continue)
    }
}

/// Replaces the `hardware` plugin with one that opens a `backend` stream on
/// activation. Handles are kept in `streams`.
///
/// Reads `config.device`, a case-insensitive device name fragment.
pub fn register_hardware(factory: &mut PluginFactory, backend: Arc<dyn HardwareBackend>, streams: &Streams) {
    let streams = streams.clone();
    factory.register(
        "hardware",
        PluginKind::ThreadedDriver,
        "threaded driver on the selected backend: config.device",
        move |config, _| {
            Ok(PluginSpec::new(
                PluginKind::ThreadedDriver,
                HardwareDriver {
                    backend: Arc::clone(&backend),
                    streams: streams.clone(),
                    device: config.get("config.device").map(str::to_owned),
                },
            ))
        },
    );
}
