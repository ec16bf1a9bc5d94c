//! # CodePen Sandbox
//!
//! The execution core of a live HTML/CSS/JS editor: build an isolated
//! document from untrusted user code, run it in a sandboxed context, and
//! relay its console output and errors back through a narrow, validated
//! message channel.
//!
//! ## Pieces
//!
//! - [`synthesize()`]: pure document synthesis from a [`SourceBundle`]
//! - [`instrument`]: the script that hooks console/error/rejection inside the sandbox
//! - [`Bridge`]: host-side listener that validates envelopes into a bounded [`ConsoleState`]
//! - [`Controller`]: Run/Stop lifecycle with generation-based cancellation
//! - [`HeadlessFrame`]: a V8-backed sandboxed context for running pens without a browser
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codepen_sandbox::{EditorSession, HeadlessFrame, HostContext, SandboxConfig, SourceBundle};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SandboxConfig::default();
//!     let host = HostContext::new();
//!     let session = EditorSession::mount(&host, HeadlessFrame::new(&config)?, &config);
//!
//!     let execution = {
//!         let mut controller = session.controller().borrow_mut();
//!         controller.update_sources(SourceBundle::new("<h1>Hi</h1>", "", "console.log('hi')"));
//!         controller.run()?;
//!         controller.frame_mut().take_execution()
//!     };
//!
//!     if let Some(execution) = execution {
//!         let loaded = execution.run().await?;
//!         for message in &loaded.messages {
//!             host.post_message(message);
//!         }
//!         session.controller().borrow_mut().on_load(loaded.generation);
//!     }
//!     print!("{}", session.controller().borrow().console().borrow().render());
//!     Ok(())
//! }
//! ```

mod bridge;
mod config;
mod console;
mod error;
mod fetch;
mod host;
pub mod instrument;
mod lifecycle;
mod ops;
mod protocol;
mod runtime;
mod source;
pub mod synthesize;

pub use bridge::{Bridge, Delivery};
pub use config::{SandboxConfig, DEFAULT_FOCUS_DELAY_MS, DEFAULT_MAX_LOG_ENTRIES};
pub use console::{ConsoleState, LogEntry, LogLevel, SharedConsole};
pub use error::{ConfigError, FrameError, ProtocolError};
pub use fetch::ResourceFetcher;
pub use host::{HostContext, KeyPress, ListenerGuard};
pub use lifecycle::{
    Controller, Download, EditorSession, LifecycleState, SandboxFrame, DOWNLOAD_FILE_NAME,
    STOPPED_MESSAGE,
};
pub use protocol::{
    display_value, ConsolePayload, Envelope, Generation, ReadyPayload, RuntimeErrorPayload,
    SandboxMessage, SANDBOX_SOURCE,
};
pub use runtime::{extract_scripts, Execution, HeadlessFrame, LoadedDocument, ScriptBlock};
pub use source::{Draft, SourceBundle};
pub use synthesize::{synthesize, synthesize_with, ResourceKind, SynthesisOptions};
