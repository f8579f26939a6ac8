//! List registered plugin types.

use std::sync::Arc;

use conduit_io::{ManualBackend, Streams};

use super::plugin_factory;

pub fn run() -> anyhow::Result<()> {
    let factory = plugin_factory(Arc::new(ManualBackend::new()), &Streams::new());

    println!("Available Plugins");
    println!("=================\n");
    let width = factory.types().map(|(name, _, _)| name.len()).max().unwrap_or(0);
    for (name, kind, summary) in factory.types() {
        println!("  {name:<width$}  {:<15}  {summary}", kind.as_str());
    }
    Ok(())
}
