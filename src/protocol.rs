//! Sandbox -> host message protocol.
//!
//! Wire shape:
//!
//! ```json
//! { "source": "codepen-sandbox", "type": "console", "payload": { "level": "warn", "args": ["{\"a\":1}"] }, "generation": 3 }
//! ```
//!
//! `generation` is optional. Anything without the sandbox source tag is
//! foreign and must be ignored; anything with the tag but the wrong shape is
//! malformed and must not be trusted.

use crate::console::LogLevel;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Source tag carried by every envelope the sandbox posts.
pub const SANDBOX_SOURCE: &str = "codepen-sandbox";

/// Identifies one sandboxed context instance. Bumped on every Run and Stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Payload of a `console` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolePayload {
    pub level: Option<LogLevel>,
    pub args: Vec<Value>,
}

impl ConsolePayload {
    /// Arguments rendered and joined with a single space.
    pub fn text(&self) -> String {
        self.args
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Payload of a `runtime-error` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeErrorPayload {
    pub message: Option<String>,
    pub filename: Option<String>,
    #[serde(alias = "line")]
    pub lineno: Option<u64>,
    #[serde(alias = "column")]
    pub colno: Option<u64>,
}

impl RuntimeErrorPayload {
    pub const DEFAULT_MESSAGE: &'static str = "Runtime error";

    /// The reported message, or `"Runtime error"` when absent or empty.
    pub fn message_or_default(&self) -> &str {
        match self.message.as_deref() {
            Some(message) if !message.is_empty() => message,
            _ => Self::DEFAULT_MESSAGE,
        }
    }
}

/// Payload of a `sandbox-ready` message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyPayload {
    #[serde(alias = "timestamp")]
    pub ts: Option<u64>,
}

/// The typed body of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SandboxMessage {
    Console(ConsolePayload),
    RuntimeError(RuntimeErrorPayload),
    SandboxReady(ReadyPayload),
}

impl SandboxMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxMessage::Console(_) => "console",
            SandboxMessage::RuntimeError(_) => "runtime-error",
            SandboxMessage::SandboxReady(_) => "sandbox-ready",
        }
    }
}

/// A validated message from the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: SandboxMessage,
    pub generation: Option<Generation>,
}

impl Envelope {
    pub fn new(message: SandboxMessage) -> Self {
        Self {
            message,
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Validate a raw cross-context message.
    ///
    /// # Errors
    /// - [`ProtocolError::Foreign`] if it is not an object carrying the sandbox source tag
    /// - [`ProtocolError::UnknownType`] for an unrecognised `type`
    /// - [`ProtocolError::MalformedPayload`] / [`ProtocolError::MalformedEnvelope`] for bad shapes
    pub fn parse(raw: &Value) -> Result<Self, ProtocolError> {
        let object = match raw {
            Value::Object(object) => object,
            _ => return Err(ProtocolError::Foreign),
        };
        if object.get("source").and_then(Value::as_str) != Some(SANDBOX_SOURCE) {
            return Err(ProtocolError::Foreign);
        }

        let generation = match object.get("generation") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .map(Generation::new)
                    .ok_or_else(|| {
                        ProtocolError::MalformedEnvelope(format!("bad generation {}", value))
                    })?,
            ),
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedEnvelope("missing type".to_string()))?;

        // A missing or null payload reads as an empty object.
        let payload = match object.get("payload") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) => value.clone(),
        };

        let message = match kind {
            "console" => SandboxMessage::Console(payload_as("console", payload)?),
            "runtime-error" => {
                SandboxMessage::RuntimeError(payload_as("runtime-error", payload)?)
            }
            "sandbox-ready" => {
                SandboxMessage::SandboxReady(payload_as("sandbox-ready", payload)?)
            }
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        Ok(Self {
            message,
            generation,
        })
    }

    /// Wire form of the envelope.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(&self.message).unwrap_or(Value::Null);
        if let Value::Object(object) = &mut value {
            object.insert("source".to_string(), Value::from(SANDBOX_SOURCE));
            if let Some(generation) = self.generation {
                object.insert("generation".to_string(), Value::from(generation.get()));
            }
        }
        value
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Render one log argument as display text. Total: never fails.
///
/// Strings are shown verbatim; every other value (numbers, booleans, null,
/// arrays, objects) as compact JSON text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
