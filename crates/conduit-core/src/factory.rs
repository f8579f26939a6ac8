//! Plugin type registry.
//!
//! Maps the `object.type` of a node configuration to a constructor. The
//! constructor reads the `config.*` keys it understands and returns the
//! node's kind and processor; endpoints and the node itself are created by
//! the graph.

use std::collections::BTreeMap;
use std::fmt;

use crate::buffer::StreamFormat;
use crate::config::Config;
use crate::error::{ConfigurationError, Result};
use crate::plugin::{Idle, PluginKind, PluginSpec};
use crate::processors::{Gain, Mixer, NullSink, Passthrough, Tone};

type Constructor = Box<dyn Fn(&Config, &StreamFormat) -> Result<PluginSpec> + Send + Sync>;

struct Registration {
    kind: PluginKind,
    summary: &'static str,
    construct: Constructor,
}

/// Constructors keyed by plugin type name.
#[derive(Default)]
pub struct PluginFactory {
    types: BTreeMap<String, Registration>,
}

impl PluginFactory {
    /// A factory with no registered types.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with the builtin processors registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register("passthrough", PluginKind::Filter, "copies each sink to the source of the same index", |_, _| {
            Ok(PluginSpec::new(PluginKind::Filter, Passthrough))
        });
        factory.register("gain", PluginKind::Filter, "scales every sink by config.gain", |config, _| {
            Ok(PluginSpec::new(PluginKind::Filter, Gain::from_config(config)?))
        });
        factory.register("mixer", PluginKind::Filter, "sums all sinks into every source", |_, _| {
            Ok(PluginSpec::new(PluginKind::Filter, Mixer))
        });
        factory.register("tone", PluginKind::Filter, "sine generator: config.frequency, config.amplitude, config.blocks", |config, format| {
            Ok(PluginSpec::new(PluginKind::Filter, Tone::from_config(config, format)?))
        });
        factory.register("null", PluginKind::Driver, "consumes and discards its sinks", |_, _| {
            Ok(PluginSpec::new(PluginKind::Driver, NullSink::default()))
        });
        factory.register("hardware", PluginKind::ThreadedDriver, "threaded driver handed to an external callback", |_, _| {
            Ok(PluginSpec::new(PluginKind::ThreadedDriver, Idle))
        });
        factory
    }

    /// Registers (or replaces) a plugin type.
    pub fn register<F>(&mut self, type_name: &str, kind: PluginKind, summary: &'static str, construct: F)
    where
        F: Fn(&Config, &StreamFormat) -> Result<PluginSpec> + Send + Sync + 'static,
    {
        self.types.insert(
            type_name.to_string(),
            Registration {
                kind,
                summary,
                construct: Box::new(construct),
            },
        );
    }

    /// Builds the plugin for `type_name`.
    pub fn create(&self, type_name: &str, config: &Config, format: &StreamFormat) -> Result<PluginSpec> {
        let registration = self
            .types
            .get(type_name)
            .ok_or_else(|| ConfigurationError::UnknownPluginType(type_name.to_string()))?;
        (registration.construct)(config, format)
    }

    /// True if `type_name` is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered types as `(name, kind, summary)`, sorted by name.
    pub fn types(&self) -> impl Iterator<Item = (&str, PluginKind, &'static str)> {
        self.types
            .iter()
            .map(|(name, registration)| (name.as_str(), registration.kind, registration.summary))
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types.keys()).finish()
    }
}
