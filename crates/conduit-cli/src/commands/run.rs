//! Run a graph description.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use conduit_core::{AsyncEngine, Graph, GraphDescription};
use conduit_io::Streams;

use super::{Backend, plugin_factory};

#[derive(Args)]
pub struct RunArgs {
    /// Graph description (TOML)
    graph: PathBuf,

    /// Worker threads of the job engine (default: available parallelism)
    #[arg(long)]
    threads: Option<usize>,

    /// Backend for `hardware` nodes
    #[arg(long, value_enum, default_value_t = Backend::Cpal)]
    backend: Backend,

    /// Stop each hardware driver after this many periods (manual backend)
    #[arg(long)]
    periods: Option<u64>,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let description = GraphDescription::load(&args.graph)?;
    if args.periods.is_some() && args.backend != Backend::Manual {
        tracing::warn!("--periods only applies to the manual backend");
    }

    let engine = match args.threads {
        Some(threads) => AsyncEngine::with_threads(threads)?,
        None => AsyncEngine::new(),
    };
    let streams = Streams::new();
    let factory = Arc::new(plugin_factory(args.backend.create(args.periods), &streams));
    let graph = engine
        .wait_job(move || Graph::from_description(&description, factory))?
        .with_context(|| format!("failed to build graph from {}", args.graph.display()))?;

    let format = graph.format();
    let nodes = graph.lock().nodes().len();
    println!("Running {}", graph.description());
    println!("  Nodes: {nodes}");
    println!("  Sample rate: {} Hz", format.sample_rate);
    println!("  Buffer size: {} frames", format.buffer_size);
    println!("\nPress Ctrl+C to stop...\n");

    let terminator = graph.terminator();
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        terminator.terminate();
    })?;

    let result = graph.run();
    streams.clear();
    drop(graph);
    engine.shutdown();
    result?;

    println!("Done.");
    Ok(())
}
