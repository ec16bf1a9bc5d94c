//! Run/Stop lifecycle of the sandboxed preview.
//!
//! ```text
//!            run()                    on_load(current)
//!   Idle ─────────────► Loading ─────────────────────► Running
//!    ▲                   │  ▲                              │
//!    │      stop()       │  └──────────── run() ───────────┤
//!    └───────────────────┴─────────────── stop() ──────────┘
//! ```
//!
//! Every Run and every Stop moves to a new [`Generation`]. The frame is asked
//! to throw away its context on Stop rather than hide it, so nothing from the
//! previous run keeps executing.

use crate::bridge::Bridge;
use crate::config::SandboxConfig;
use crate::console::{ConsoleState, LogLevel, SharedConsole};
use crate::error::FrameError;
use crate::host::{HostContext, KeyPress, ListenerGuard};
use crate::protocol::Generation;
use crate::source::SourceBundle;
use crate::synthesize::{synthesize_with, SynthesisOptions};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// Informational entry appended when the user stops a run.
pub const STOPPED_MESSAGE: &str = "[Stopped]";

/// File name offered by Download.
pub const DOWNLOAD_FILE_NAME: &str = "pen.html";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Loading,
    Running,
}

/// The sandboxed browsing context the controller drives.
pub trait SandboxFrame {
    /// Replace the frame's content with `document`, loaded as `generation`.
    /// The frame reports completion through [`Controller::on_load`].
    fn load(&mut self, generation: Generation, document: &str) -> Result<(), FrameError>;

    /// Destroy the current context (and anything still running in it) and
    /// leave an empty one identified by `generation`.
    fn discard(&mut self, generation: Generation);

    /// Move input focus into the frame after `delay`. Best-effort.
    fn focus_after(&mut self, delay: Duration) -> Result<(), FrameError>;
}

/// A synthesized document offered as a standalone file.
///
/// The value is consumed when saved; it cannot be used twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: &'static str,
    pub mime: &'static str,
    pub content: String,
}

impl Download {
    /// Write the document into `dir` and return the path written.
    pub fn save_in(self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let path = dir.as_ref().join(self.file_name);
        std::fs::write(&path, self.content.as_bytes())?;
        Ok(path)
    }
}

/// Drives synthesis, frame (re)creation and state resets for Run and Stop.
pub struct Controller<F> {
    frame: F,
    state: LifecycleState,
    generation: Rc<Cell<Generation>>,
    console: SharedConsole,
    bridge: Bridge,
    sources: SourceBundle,
    document: Option<String>,
    focus_delay: Duration,
    tag_generations: bool,
}

impl<F: SandboxFrame> Controller<F> {
    pub fn new(frame: F, config: &SandboxConfig) -> Self {
        let generation = Rc::new(Cell::new(Generation::default()));
        let console = ConsoleState::shared(config.max_log_entries);
        let bridge = Bridge::new(Rc::clone(&console), Rc::clone(&generation));
        Self {
            frame,
            state: LifecycleState::Idle,
            generation,
            console,
            bridge,
            sources: SourceBundle::default(),
            document: None,
            focus_delay: config.focus_delay(),
            tag_generations: config.tag_generations,
        }
    }

    /// The bridge writing into this controller's console and checking its
    /// generation. Clones share the ready signal, which Run and Stop clear.
    pub fn bridge(&self) -> Bridge {
        self.bridge.clone()
    }

    /// Replace the editor fragments used by the next Run.
    pub fn update_sources(&mut self, sources: SourceBundle) {
        self.sources = sources;
    }

    pub fn sources(&self) -> &SourceBundle {
        &self.sources
    }

    /// Synthesize the current sources and load them into a fresh context.
    ///
    /// Clears the console and the runtime error first. Allowed in every state.
    pub fn run(&mut self) -> Result<Generation, FrameError> {
        self.console.borrow_mut().reset();
        self.bridge.reset_ready();
        let generation = self.bump_generation();
        self.state = LifecycleState::Loading;

        let options = SynthesisOptions {
            generation: self.tag_generations.then_some(generation),
        };
        let document = synthesize_with(&self.sources, &options);
        debug!(%generation, bytes = document.len(), "loading synthesized document");

        if let Err(e) = self.frame.load(generation, &document) {
            // The frame never received the document; nothing is loading.
            self.state = LifecycleState::Idle;
            self.document = None;
            return Err(e);
        }
        self.document = Some(document);

        if let Err(e) = self.frame.focus_after(self.focus_delay) {
            debug!(error = %e, "could not focus sandbox frame");
        }
        Ok(generation)
    }

    /// Load-complete signal from the frame.
    ///
    /// Only the current generation may complete, and only out of `Loading`.
    pub fn on_load(&mut self, generation: Generation) -> bool {
        if generation != self.generation.get() || self.state != LifecycleState::Loading {
            debug!(%generation, state = ?self.state, "ignoring load signal");
            return false;
        }
        self.state = LifecycleState::Running;
        true
    }

    /// Discard the sandboxed context and go back to `Idle`.
    pub fn stop(&mut self) -> Generation {
        let generation = self.bump_generation();
        self.bridge.reset_ready();
        self.frame.discard(generation);
        self.document = None;
        self.state = LifecycleState::Idle;
        self.console
            .borrow_mut()
            .push(LogLevel::Info, STOPPED_MESSAGE);
        info!(%generation, "sandbox stopped");
        generation
    }

    /// The last synthesized document as `pen.html`, if there is one.
    pub fn download(&self) -> Option<Download> {
        self.document.as_ref().map(|content| Download {
            file_name: DOWNLOAD_FILE_NAME,
            mime: "text/html",
            content: content.clone(),
        })
    }

    /// Ctrl/Cmd+Enter runs. Returns true when the key was consumed and its
    /// default action must be suppressed.
    pub fn handle_key(&mut self, key: &KeyPress) -> bool {
        if !is_run_shortcut(key) {
            return false;
        }
        if let Err(e) = self.run() {
            debug!(error = %e, "run from keyboard shortcut failed");
        }
        true
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation.get()
    }

    pub fn console(&self) -> &SharedConsole {
        &self.console
    }

    pub fn runtime_error(&self) -> Option<String> {
        self.console.borrow().runtime_error().map(str::to_string)
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    pub fn frame(&self) -> &F {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut F {
        &mut self.frame
    }

    fn bump_generation(&mut self) -> Generation {
        let next = self.generation.get().next();
        self.generation.set(next);
        next
    }
}

fn is_run_shortcut(key: &KeyPress) -> bool {
    (key.ctrl || key.meta) && key.key == "Enter"
}

/// One mounted editor: the controller plus its host listeners.
///
/// Mounting registers the bridge's `message` listener and the keyboard
/// shortcut; dropping the session removes both.
pub struct EditorSession<F> {
    controller: Rc<RefCell<Controller<F>>>,
    bridge: Bridge,
    _message_listener: ListenerGuard,
    _key_listener: ListenerGuard,
}

impl<F: SandboxFrame + 'static> EditorSession<F> {
    pub fn mount(host: &HostContext, frame: F, config: &SandboxConfig) -> Self {
        let controller = Rc::new(RefCell::new(Controller::new(frame, config)));
        let bridge = controller.borrow().bridge();
        let message_listener = bridge.attach(host);

        let weak = Rc::downgrade(&controller);
        let key_listener = host.on_keydown(move |key| {
            if !is_run_shortcut(key) {
                return false;
            }
            match weak.upgrade() {
                Some(controller) => match controller.try_borrow_mut() {
                    Ok(mut controller) => controller.handle_key(key),
                    Err(_) => {
                        debug!("controller busy, shortcut ignored");
                        true
                    }
                },
                None => false,
            }
        });

        Self {
            controller,
            bridge,
            _message_listener: message_listener,
            _key_listener: key_listener,
        }
    }

    pub fn controller(&self) -> &Rc<RefCell<Controller<F>>> {
        &self.controller
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct RecordingFrame {
        loads: Vec<(Generation, String)>,
        discards: Vec<Generation>,
        focus_requests: usize,
        fail_focus: bool,
        fail_load: bool,
    }

    impl SandboxFrame for RecordingFrame {
        fn load(&mut self, generation: Generation, document: &str) -> Result<(), FrameError> {
            if self.fail_load {
                return Err(FrameError::Load("no frame".into()));
            }
            self.loads.push((generation, document.to_string()));
            Ok(())
        }

        fn discard(&mut self, generation: Generation) {
            self.discards.push(generation);
        }

        fn focus_after(&mut self, _delay: Duration) -> Result<(), FrameError> {
            self.focus_requests += 1;
            if self.fail_focus {
                Err(FrameError::FocusUnsupported)
            } else {
                Ok(())
            }
        }
    }

    fn ready(generation: Generation) -> serde_json::Value {
        json!({
            "source": "codepen-sandbox",
            "type": "sandbox-ready",
            "payload": { "ts": 42 },
            "generation": generation.get(),
        })
    }

    fn controller() -> Controller<RecordingFrame> {
        let mut controller = Controller::new(RecordingFrame::default(), &SandboxConfig::default());
        controller.update_sources(SourceBundle::new(
            "<h1>Hi</h1>",
            "h1{color:red}",
            "console.log('x')",
        ));
        controller
    }

    #[test]
    fn test_run_goes_through_loading() {
        let mut controller = controller();
        assert_eq!(controller.state(), LifecycleState::Idle);

        let generation = controller.run().unwrap();
        assert_eq!(controller.state(), LifecycleState::Loading);
        assert_eq!(controller.frame().loads.len(), 1);
        assert_eq!(controller.frame().loads[0].0, generation);
        assert!(controller.frame().loads[0].1.contains("<h1>Hi</h1>"));

        assert!(controller.on_load(generation));
        assert_eq!(controller.state(), LifecycleState::Running);
    }

    #[test]
    fn test_run_from_running_returns_to_loading() {
        let mut controller = controller();
        let first = controller.run().unwrap();
        controller.on_load(first);

        let second = controller.run().unwrap();
        assert_ne!(first, second);
        assert_eq!(controller.state(), LifecycleState::Loading);

        // The first load signal arriving late must not complete the second run
        assert!(!controller.on_load(first));
        assert_eq!(controller.state(), LifecycleState::Loading);
    }

    #[test]
    fn test_run_clears_console_and_error() {
        let mut controller = controller();
        {
            let mut console = controller.console().borrow_mut();
            console.push(LogLevel::Log, "old");
            console.record_runtime_error("old boom");
        }

        controller.run().unwrap();
        assert!(controller.console().borrow().is_empty());
        assert_eq!(controller.runtime_error(), None);
    }

    #[test]
    fn test_stop_discards_and_logs() {
        let mut controller = controller();
        let run = controller.run().unwrap();
        controller.on_load(run);

        let stopped = controller.stop();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.frame().discards, vec![stopped]);
        assert!(stopped > run);
        assert!(controller.document().is_none());

        let console = controller.console().borrow();
        let last = console.entries().last().unwrap();
        assert_eq!(last.level, LogLevel::Info);
        assert_eq!(last.text, "[Stopped]");
    }

    #[test]
    fn test_load_signal_after_stop_is_ignored() {
        let mut controller = controller();
        let run = controller.run().unwrap();
        let stopped = controller.stop();

        assert!(!controller.on_load(run));
        assert!(!controller.on_load(stopped));
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_focus_failure_is_swallowed() {
        let mut controller = controller();
        controller.frame_mut().fail_focus = true;
        assert!(controller.run().is_ok());
        assert_eq!(controller.frame().focus_requests, 1);
        assert_eq!(controller.state(), LifecycleState::Loading);
    }

    #[test]
    fn test_load_failure_leaves_idle() {
        let mut controller = controller();
        controller.frame_mut().fail_load = true;
        assert!(controller.run().is_err());
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert!(controller.download().is_none());
    }

    #[test]
    fn test_download() {
        let mut controller = controller();
        assert!(controller.download().is_none());

        controller.run().unwrap();
        let download = controller.download().unwrap();
        assert_eq!(download.file_name, "pen.html");
        assert_eq!(download.mime, "text/html");
        assert_eq!(Some(download.content.as_str()), controller.document());
        assert_eq!(controller.state(), LifecycleState::Loading);

        let dir = tempfile::tempdir().unwrap();
        let path = download.save_in(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("pen.html"));
        assert!(std::fs::read_to_string(path).unwrap().contains("<h1>Hi</h1>"));

        controller.stop();
        assert!(controller.download().is_none());
    }

    #[test]
    fn test_documents_are_generation_tagged() {
        let mut controller = controller();
        let generation = controller.run().unwrap();
        let needle = format!("var GENERATION = {};", generation.get());
        assert!(controller.document().unwrap().contains(&needle));

        let config = SandboxConfig {
            tag_generations: false,
            ..Default::default()
        };
        let mut untagged = Controller::new(RecordingFrame::default(), &config);
        untagged.run().unwrap();
        assert!(untagged.document().unwrap().contains("var GENERATION = null;"));
    }

    #[test]
    fn test_shortcut() {
        let mut controller = controller();
        assert!(!controller.handle_key(&KeyPress::new("Enter")));
        assert!(!controller.handle_key(&KeyPress::new("s").with_ctrl()));
        assert_eq!(controller.state(), LifecycleState::Idle);

        assert!(controller.handle_key(&KeyPress::new("Enter").with_meta()));
        assert_eq!(controller.state(), LifecycleState::Loading);
    }

    #[test]
    fn test_session_wires_bridge_and_keys() {
        let host = HostContext::new();
        let session = EditorSession::mount(&host, RecordingFrame::default(), &SandboxConfig::default());
        assert_eq!(host.message_listener_count(), 1);
        assert_eq!(host.keydown_listener_count(), 1);

        assert!(host.key_down(&KeyPress::new("Enter").with_ctrl()));
        let generation = session.controller().borrow().generation();
        assert_eq!(session.controller().borrow().state(), LifecycleState::Loading);

        host.post_message(&json!({
            "source": "codepen-sandbox",
            "type": "runtime-error",
            "payload": { "message": "boom" },
            "generation": generation.get()
        }));
        assert_eq!(
            session.controller().borrow().runtime_error().as_deref(),
            Some("boom")
        );

        // A message from the previous generation is dropped after Stop
        session.controller().borrow_mut().stop();
        host.post_message(&json!({
            "source": "codepen-sandbox",
            "type": "console",
            "payload": { "level": "log", "args": ["late"] },
            "generation": generation.get()
        }));
        let texts: Vec<String> = session
            .controller()
            .borrow()
            .console()
            .borrow()
            .entries()
            .map(|e| e.text.clone())
            .collect();
        assert_eq!(texts, vec!["boom".to_string(), "[Stopped]".to_string()]);

        drop(session);
        assert_eq!(host.message_listener_count(), 0);
        assert_eq!(host.keydown_listener_count(), 0);
        assert!(!host.key_down(&KeyPress::new("Enter").with_ctrl()));
    }

    #[test]
    fn test_ready_signal_cleared_by_run_and_stop() {
        let mut controller = controller();
        let bridge = controller.bridge();

        let first = controller.run().unwrap();
        bridge.handle(&ready(first));
        assert_eq!(bridge.ready_at(), Some(42));

        let second = controller.run().unwrap();
        assert_eq!(bridge.ready_at(), None);
        bridge.handle(&ready(first));
        assert_eq!(bridge.ready_at(), None);
        bridge.handle(&ready(second));
        assert_eq!(controller.bridge().ready_at(), Some(42));

        controller.stop();
        assert_eq!(bridge.ready_at(), None);
    }
}
