//! Library error types.
//!
//! The isolate runtime and the CLI work in `anyhow`; everything a caller of
//! the library can match on lives here.

use thiserror::Error;

/// Why an incoming envelope was not acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not an object, or not tagged with the sandbox source.
    #[error("message is not from the sandbox")]
    Foreign,

    /// Tagged with the sandbox source but not a known message type.
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// Known type, but the payload has the wrong shape.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    /// A field of the envelope itself has the wrong shape.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Failures reported by a sandboxed frame implementation.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("focus is not supported by this frame")]
    FocusUnsupported,

    #[error("frame failed to load document: {0}")]
    Load(String),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
