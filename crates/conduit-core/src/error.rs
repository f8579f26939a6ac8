//! Error types for graph construction and execution.
//!
//! Configuration errors are always surfaced to the caller and never retried.
//! Lifecycle errors indicate broken orchestration code; they are returned so
//! call sites and tests can observe them, and orchestration treats them as
//! fatal. Lock ownership violations never appear here: they panic (see
//! [`LockOwnershipError`](crate::lock::LockOwnershipError)).

use std::path::PathBuf;
use thiserror::Error;

use crate::object::{LifecycleState, Transition};

/// Convenience result type for conduit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or running a graph.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, duplicate or invalid construction data.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A lifecycle transition was attempted out of order.
    #[error("{object}: cannot {transition} while {state}")]
    Lifecycle {
        /// Description of the object.
        object: String,
        /// The transition that was refused.
        transition: Transition,
        /// State the object was in.
        state: LifecycleState,
    },

    /// A Source was notified before its previous buffer was consumed.
    #[error("source '{source_name}' on {node} still holds an unconsumed buffer")]
    SourceBusy {
        /// Description of the owning node.
        node: String,
        /// Name of the busy Source.
        source_name: String,
    },

    /// The external audio subsystem failed.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Misuse of a running component (e.g. reconfiguring a started engine).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Failed to read a graph description.
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a graph description.
    #[error("failed to parse graph description: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Error {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Returns true for [`Error::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Returns true for [`Error::Lifecycle`].
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::Lifecycle { .. })
    }
}

/// Construction-time errors: keys, names, endpoints, links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A required key is absent.
    #[error("missing key '{0}'")]
    MissingKey(String),

    /// A key appears twice in one configuration list.
    #[error("duplicate key '{0}'")]
    DuplicateKey(String),

    /// A value could not be parsed.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        /// Offending key.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No constructor is registered for an `object.type`.
    #[error("unknown plugin type '{0}'")]
    UnknownPluginType(String),

    /// Two nodes share a name within a graph.
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    /// A node name does not resolve.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// Two endpoints of the same kind share a name on one node.
    #[error("duplicate {kind} '{name}'")]
    DuplicateEndpoint {
        /// `source` or `sink`.
        kind: &'static str,
        /// Endpoint name.
        name: String,
    },

    /// On a hardware-bound node a Source and a Sink share a name.
    #[error("endpoint '{0}' collides with an endpoint of the other kind")]
    EndpointCollision(String),

    /// An endpoint name does not resolve.
    #[error("unknown {kind} '{name}'")]
    UnknownEndpoint {
        /// `source` or `sink`.
        kind: &'static str,
        /// Endpoint name.
        name: String,
    },

    /// Source and Sink type tags differ.
    #[error("type mismatch: source carries '{source_type}', sink expects '{sink_type}'")]
    TypeMismatch {
        /// Type tag of the Source.
        source_type: String,
        /// Type tag of the Sink.
        sink_type: String,
    },

    /// The Source is already linked to this Sink.
    #[error("'{source_name}' is already linked to '{sink_name}'")]
    DuplicateLink {
        /// Source endpoint.
        source_name: String,
        /// Sink endpoint.
        sink_name: String,
    },

    /// Endpoints can only be added before activation.
    #[error("endpoints of {0} are frozen after activation")]
    EndpointsFrozen(String),

    /// A signal name does not resolve.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// A slot name does not resolve.
    #[error("unknown slot '{0}'")]
    UnknownSlot(String),

    /// A slot with this name already exists.
    #[error("duplicate slot '{0}'")]
    DuplicateSlot(String),

    /// A `node:endpoint` reference is malformed.
    #[error("invalid reference '{0}' (expected node:endpoint)")]
    InvalidReference(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn configuration_errors_convert_and_classify() {
        let err: Error = ConfigurationError::MissingKey("node.name".into()).into();
        assert!(err.is_configuration());
        assert!(!err.is_lifecycle());
        assert_eq!(
            err.to_string(),
            "configuration error: missing key 'node.name'"
        );
    }

    #[test]
    fn type_mismatch_display() {
        let err = ConfigurationError::TypeMismatch {
            source_type: "audio".into(),
            sink_type: "midi".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch: source carries 'audio', sink expects 'midi'"
        );
    }

    #[test]
    fn lifecycle_display_names_transition_and_state() {
        let err = Error::Lifecycle {
            object: "node #3 'gain'".into(),
            transition: Transition::Activate,
            state: LifecycleState::Constructed,
        };
        let msg = err.to_string();
        assert!(msg.contains("cannot activate"), "got: {msg}");
        assert!(msg.contains("constructed"), "got: {msg}");
        assert!(err.is_lifecycle());
    }

    #[test]
    fn read_file_exposes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "mock");
        let err = Error::read_file("/graphs/missing.toml", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/graphs/missing.toml"));
    }
}
