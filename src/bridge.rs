//! Host side of the sandbox message channel.
//!
//! The bridge is the only writer of the console state on the host side. It
//! validates each cross-context message before acting on it: foreign and
//! malformed messages are ignored, and so are messages stamped with a
//! generation other than the current one.

use crate::console::{LogLevel, SharedConsole};
use crate::error::ProtocolError;
use crate::host::{HostContext, ListenerGuard};
use crate::protocol::{Envelope, Generation, SandboxMessage};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, trace};

/// What the bridge did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Appended a console entry with this id.
    Logged(u64),
    /// Set the runtime error and appended an error entry with this id.
    RuntimeError(u64),
    /// The sandbox finished installing its instrumentation.
    Ready,
    /// Stamped with a generation that is no longer current.
    Stale(Generation),
    /// Not for us, or not trustworthy.
    Rejected(ProtocolError),
}

/// Validates sandbox messages and applies them to the shared console.
#[derive(Clone)]
pub struct Bridge {
    console: SharedConsole,
    current: Rc<Cell<Generation>>,
    ready_at: Rc<Cell<Option<u64>>>,
}

impl Bridge {
    pub fn new(console: SharedConsole, current: Rc<Cell<Generation>>) -> Self {
        Self {
            console,
            current,
            ready_at: Rc::new(Cell::new(None)),
        }
    }

    /// Register this bridge as a `message` listener on `host` for the guard's lifetime.
    #[must_use = "the bridge stops listening when the guard is dropped"]
    pub fn attach(&self, host: &HostContext) -> ListenerGuard {
        let bridge = self.clone();
        host.on_message(move |message| {
            bridge.handle(message);
        })
    }

    /// Validate and apply one raw message.
    pub fn handle(&self, raw: &Value) -> Delivery {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(ProtocolError::Foreign) => {
                trace!("ignoring foreign message");
                return Delivery::Rejected(ProtocolError::Foreign);
            }
            Err(e) => {
                debug!(error = %e, "ignoring malformed sandbox message");
                return Delivery::Rejected(e);
            }
        };
        self.apply(envelope)
    }

    /// Apply an already validated envelope.
    pub fn apply(&self, envelope: Envelope) -> Delivery {
        if let Some(generation) = envelope.generation {
            let current = self.current.get();
            if generation != current {
                debug!(%generation, %current, kind = envelope.message.kind(), "dropping stale sandbox message");
                return Delivery::Stale(generation);
            }
        }

        match envelope.message {
            SandboxMessage::Console(payload) => {
                let level = payload.level.unwrap_or(LogLevel::Log);
                let id = self.console.borrow_mut().push(level, payload.text());
                Delivery::Logged(id)
            }
            SandboxMessage::RuntimeError(payload) => {
                let message = payload.message_or_default();
                debug!(
                    error = message,
                    filename = payload.filename.as_deref(),
                    line = payload.lineno,
                    column = payload.colno,
                    "sandbox runtime error"
                );
                let id = self.console.borrow_mut().record_runtime_error(message);
                Delivery::RuntimeError(id)
            }
            SandboxMessage::SandboxReady(payload) => {
                trace!(ts = payload.ts, "sandbox ready");
                self.ready_at.set(Some(payload.ts.unwrap_or_default()));
                Delivery::Ready
            }
        }
    }

    /// Timestamp reported by the last `sandbox-ready` message, if any.
    pub fn ready_at(&self) -> Option<u64> {
        self.ready_at.get()
    }

    /// Forget the ready signal (a new context is about to load).
    pub fn reset_ready(&self) {
        self.ready_at.set(None);
    }

    pub fn console(&self) -> &SharedConsole {
        &self.console
    }
}
