//! Construction-time configuration.
//!
//! Graphs and nodes are built from an ordered key/value list ([`Config`]).
//! Keys are unique; the base types consume the keys they know
//! (`object.type`, `node.name`, `source.<name>`, `sink.<name>`, `graph.name`,
//! `config.sample_rate`, `config.buffer_size`) and ignore the rest, which are
//! left for processor constructors (`config.*`).
//!
//! A whole graph can also be described in TOML and loaded with
//! [`GraphDescription`]:
//!
//! ```toml
//! [graph]
//! "graph.name" = "demo"
//! config.sample_rate = 48000
//!
//! [[node]]
//! object.type = "tone"
//! node.name = "osc"
//! source.out = "audio"
//! config.frequency = "440Hz"
//!
//! [[node]]
//! object.type = "null"
//! node.name = "sink"
//! sink.in = "audio"
//!
//! [[link]]
//! from = "osc:out"
//! to = "sink:in"
//!
//! [[subscribe]]
//! signal = "osc:end_of_stream"
//! slot = "sink:stop"
//! ```
//!
//! Dotted keys and quoted keys are equivalent: nested tables are flattened
//! back into dotted names, preserving file order.

use serde::Deserialize;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigurationError, Error, Result};

/// Ordered list of unique key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: Vec<(String, String)>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from pairs, rejecting duplicate keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (key, value) in pairs {
            config.insert(key, value)?;
        }
        Ok(config)
    }

    /// Builder form of [`set()`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Appends a pair; fails if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.get(&key).is_some() {
            return Err(ConfigurationError::DuplicateKey(key).into());
        }
        self.entries.push((key, value.into()));
        Ok(())
    }

    /// Sets a value, replacing an existing one in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns the raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the raw value for `key`, or `MissingKey`.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| ConfigurationError::MissingKey(key.to_string()).into())
    }

    /// Parses the value for `key` with [`FromStr`]. Absent keys yield `None`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid_value(key, raw, e))
    }

    /// Parses the value for `key`, falling back to `default` when absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Parses an audio parameter with unit suffixes (see [`parse_param_value`]).
    pub fn param(&self, key: &str) -> Result<Option<f32>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        parse_param_value(raw)
            .map(Some)
            .ok_or_else(|| invalid_value(key, raw, "not a number"))
    }

    /// Iterates `(suffix, value)` for every key starting with `prefix`.
    pub fn prefixed<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.entries
            .iter()
            .filter_map(move |(k, v)| k.strip_prefix(prefix).map(|s| (s, v.as_str())))
    }

    /// Iterates all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn invalid_value(key: &str, value: &str, reason: impl Display) -> Error {
    ConfigurationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Parse a parameter value string into an f32.
///
/// Supports various formats:
/// - Plain numbers: "0.5", "1.2", "-0.3"
/// - Percentages: "50%", "120%" (divided by 100)
/// - Decibels: "-6dB", "+3dB" (converted to linear gain)
/// - Time in ms: "100ms" (converted to seconds)
/// - Time in s: "1.5s" (kept as seconds)
/// - Frequency: "440Hz", "1.2kHz" (converted to Hz)
pub fn parse_param_value(value: &str) -> Option<f32> {
    let value = value.trim();

    if let Some(pct) = value.strip_suffix('%') {
        return pct.trim().parse::<f32>().ok().map(|v| v / 100.0);
    }

    if let Some(db) = value
        .strip_suffix("dB")
        .or_else(|| value.strip_suffix("db"))
    {
        return db
            .trim()
            .parse::<f32>()
            .ok()
            .map(|v| 10.0_f32.powf(v / 20.0));
    }

    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<f32>().ok().map(|v| v / 1000.0);
    }

    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse::<f32>().ok();
    }

    if let Some(khz) = value
        .strip_suffix("kHz")
        .or_else(|| value.strip_suffix("khz"))
    {
        return khz.trim().parse::<f32>().ok().map(|v| v * 1000.0);
    }

    if let Some(hz) = value
        .strip_suffix("Hz")
        .or_else(|| value.strip_suffix("hz"))
    {
        return hz.trim().parse::<f32>().ok();
    }

    value.parse::<f32>().ok()
}

/// Splits a `node:endpoint` reference.
pub fn split_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once(':') {
        Some((node, endpoint)) if !node.is_empty() && !endpoint.is_empty() => {
            Ok((node.trim(), endpoint.trim()))
        }
        _ => Err(ConfigurationError::InvalidReference(reference.to_string()).into()),
    }
}

/// A `[[link]]` entry: `from = "node:source"`, `to = "node:sink"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LinkDescription {
    /// Source reference.
    pub from: String,
    /// Sink reference.
    pub to: String,
}

/// A `[[subscribe]]` entry: `signal = "node:signal"`, `slot = "node:slot"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubscriptionDescription {
    /// Emitting node and signal.
    pub signal: String,
    /// Receiving node and slot.
    pub slot: String,
}

/// A graph loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDescription {
    /// Graph-level keys.
    #[serde(default)]
    pub graph: toml::Table,
    /// One table per node, in file order.
    #[serde(default, rename = "node")]
    pub nodes: Vec<toml::Table>,
    /// Links between endpoints.
    #[serde(default, rename = "link")]
    pub links: Vec<LinkDescription>,
    /// Signal subscriptions.
    #[serde(default, rename = "subscribe")]
    pub subscriptions: Vec<SubscriptionDescription>,
}

impl GraphDescription {
    /// Parses a description from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a description from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
        Self::parse(&text)
    }

    /// Graph-level configuration list.
    pub fn graph_config(&self) -> Result<Config> {
        flatten(&self.graph)
    }

    /// Node configuration lists, in file order.
    pub fn node_configs(&self) -> Result<Vec<Config>> {
        self.nodes.iter().map(flatten).collect()
    }
}

fn flatten(table: &toml::Table) -> Result<Config> {
    let mut config = Config::new();
    flatten_into(&mut config, "", table)?;
    Ok(config)
}

fn flatten_into(config: &mut Config, prefix: &str, table: &toml::Table) -> Result<()> {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten_into(config, &key, nested)?,
            toml::Value::String(s) => config.insert(key, s.as_str())?,
            toml::Value::Integer(i) => config.insert(key, i.to_string())?,
            toml::Value::Float(f) => config.insert(key, f.to_string())?,
            toml::Value::Boolean(b) => config.insert(key, b.to_string())?,
            other => {
                return Err(invalid_value(
                    &key,
                    &other.to_string(),
                    "expected a string, number or boolean",
                ));
            }
        }
    }
    Ok(())
}
