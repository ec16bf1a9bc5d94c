//! Headless sandboxed context - runs a synthesized document's scripts in a V8 isolate.
//!
//! Each loaded generation gets its own isolate with:
//! - window/self/parent, `addEventListener` for `error` and `unhandledrejection`
//! - console (forwarded to tracing under the `sandbox` target)
//! - crypto.randomUUID, crypto.getRandomValues, crypto.subtle.digest
//! - atob, btoa
//! - No DOM, no timers, no fs, net or env access
//!
//! Script blocks run in document order; `defer` scripts run after the
//! document's own blocks. Messages posted to `window.parent` are collected
//! and handed back to the host in posting order.

use crate::config::SandboxConfig;
use crate::error::FrameError;
use crate::fetch::ResourceFetcher;
use crate::lifecycle::SandboxFrame;
use crate::ops::{codepen_sandbox, Outbox};
use crate::protocol::Generation;
use anyhow::Error;
use deno_core::error::JsError;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Script types a browser executes as classic scripts
const EXECUTABLE_TYPES: &[&str] = &[
    "",
    "text/javascript",
    "application/javascript",
    "module",
];

/// One `<script>` element of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBlock {
    Inline(String),
    External { src: String, defer: bool },
}

/// The outcome of executing one loaded document.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub generation: Generation,
    /// Everything posted to `window.parent`, in posting order
    pub messages: Vec<Value>,
}

/// A loaded document detached from its frame, ready to run.
///
/// Taking it out with [`HeadlessFrame::take_execution`] lets the caller
/// release any borrow of the frame before awaiting.
pub struct Execution {
    fetcher: ResourceFetcher,
    generation: Generation,
    document: String,
}

/// A [`SandboxFrame`] that executes documents in a fresh V8 isolate.
///
/// `load` only records the document; `execute` runs it. The isolate lives for
/// one execution, so discarding the frame leaves nothing running.
pub struct HeadlessFrame {
    fetcher: ResourceFetcher,
    pending: Option<Execution>,
    current: Generation,
}

impl HeadlessFrame {
    pub fn new(config: &SandboxConfig) -> Result<Self, Error> {
        Ok(Self {
            fetcher: ResourceFetcher::new(config.allowed_origins.clone())?,
            pending: None,
            current: Generation::default(),
        })
    }

    /// Generation of the context the frame currently holds
    pub fn generation(&self) -> Generation {
        self.current
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending document out of the frame.
    pub fn take_execution(&mut self) -> Option<Execution> {
        self.pending.take()
    }

    /// Execute the pending document, if any, and collect its messages.
    pub async fn execute(&mut self) -> Result<Option<LoadedDocument>, Error> {
        match self.take_execution() {
            Some(execution) => execution.run().await.map(Some),
            None => Ok(None),
        }
    }
}

impl Execution {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Run the document's scripts in a fresh isolate and collect its messages.
    pub async fn run(self) -> Result<LoadedDocument, Error> {
        debug!(generation = %self.generation, "executing document");

        let mut runtime = create_runtime();
        let mut deferred = Vec::new();

        for block in extract_scripts(&self.document) {
            match block {
                ScriptBlock::Inline(code) => {
                    run_script(&mut runtime, "<inline-script>", "about:srcdoc", code)
                }
                ScriptBlock::External { src, defer: true } => deferred.push(src),
                ScriptBlock::External { src, defer: false } => {
                    self.run_external(&mut runtime, &src).await
                }
            }
        }
        for src in deferred {
            self.run_external(&mut runtime, &src).await;
        }

        if let Err(error) = runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
        {
            report_uncaught(&mut runtime, "about:srcdoc", &error);
        }

        let messages = runtime
            .op_state()
            .borrow_mut()
            .try_borrow_mut::<Outbox>()
            .map(|outbox| std::mem::take(&mut outbox.messages))
            .unwrap_or_default();
        trace!(count = messages.len(), "collected sandbox messages");

        Ok(LoadedDocument {
            generation: self.generation,
            messages,
        })
    }

    async fn run_external(&self, runtime: &mut JsRuntime, src: &str) {
        if !self.fetcher.is_enabled() {
            debug!(src, "external scripts disabled, skipping");
            return;
        }
        match self.fetcher.fetch_script(src).await {
            Ok(code) => run_script(runtime, "<external-script>", src, code),
            // A failed script load is not a window error in browsers either
            Err(e) => warn!(src, error = %e, "external script not loaded"),
        }
    }
}

impl SandboxFrame for HeadlessFrame {
    fn load(&mut self, generation: Generation, document: &str) -> Result<(), FrameError> {
        self.current = generation;
        self.pending = Some(Execution {
            fetcher: self.fetcher.clone(),
            generation,
            document: document.to_string(),
        });
        Ok(())
    }

    fn discard(&mut self, generation: Generation) {
        if self.pending.take().is_some() {
            debug!(%generation, "discarded pending document");
        }
        self.current = generation;
    }

    fn focus_after(&mut self, _delay: Duration) -> Result<(), FrameError> {
        // Nothing to focus without a display
        Err(FrameError::FocusUnsupported)
    }
}

fn create_runtime() -> JsRuntime {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![codepen_sandbox::init_ops_and_esm()],
        ..Default::default()
    });
    runtime.op_state().borrow_mut().put(Outbox::default());
    runtime
}

fn run_script(runtime: &mut JsRuntime, name: &'static str, filename: &str, code: String) {
    if let Err(error) = runtime.execute_script(name, code) {
        report_uncaught(runtime, filename, &error);
    }
}

/// Fire the sandbox's window `error` event for an exception nothing caught.
fn report_uncaught(runtime: &mut JsRuntime, filename: &str, error: &Error) {
    let init = error_event_init(filename, error);
    debug!(error = %init["message"], "uncaught error in sandbox");

    let dispatch = format!("globalThis.__codepenDispatchError({})", init);
    if let Err(e) = runtime.execute_script("<dispatch-error>", dispatch) {
        warn!(error = %e, "could not dispatch error event");
    }
}

fn error_event_init(filename: &str, error: &Error) -> Value {
    match error.downcast_ref::<JsError>() {
        Some(js_error) => {
            let frame = js_error.frames.first();
            json!({
                "message": js_error.exception_message,
                "filename": frame.and_then(|f| f.file_name.clone()).unwrap_or_else(|| filename.to_string()),
                "lineno": frame.and_then(|f| f.line_number),
                "colno": frame.and_then(|f| f.column_number),
            })
        }
        None => json!({
            "message": error.to_string(),
            "filename": filename,
        }),
    }
}

// ============================================================================
// Script extraction
// ============================================================================

/// Raw-text elements whose content is never scanned for tags
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Find the executable `<script>` elements of `document`, in document order.
///
/// Tokenizes like a browser's parser as far as scripts are concerned:
/// comments are skipped, `<style>`/`<textarea>`/`<title>` content is raw
/// text, and a script body runs to the first case-insensitive `</script`
/// followed by whitespace, `/` or `>`.
pub fn extract_scripts(document: &str) -> Vec<ScriptBlock> {
    let lower = document.to_ascii_lowercase();
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(offset) = lower[pos..].find('<') {
        let lt = pos + offset;
        if lower[lt..].starts_with("<!--") {
            pos = match lower[lt + 4..].find("-->") {
                Some(len) => lt + 4 + len + 3,
                None => break,
            };
            continue;
        }

        let Some(name) = RAW_TEXT_ELEMENTS
            .iter()
            .copied()
            .find(|name| is_tag_start(&lower, lt + 1, name))
        else {
            pos = lt + 1;
            continue;
        };
        let name_end = lt + 1 + name.len();
        let Some(open_len) = lower[name_end..].find('>') else {
            break;
        };
        let open_end = name_end + open_len;
        let body_start = open_end + 1;
        let (body_end, next) = match find_end_tag(&lower, body_start, name) {
            Some(at) => (at, at + 2 + name.len()),
            None => (document.len(), document.len()),
        };
        pos = next;

        if name != "script" {
            continue;
        }
        let attributes = parse_attributes(&document[name_end..open_end]);
        let script_type = attribute(&attributes, "type").unwrap_or_default();
        if !EXECUTABLE_TYPES.contains(&script_type.trim().to_ascii_lowercase().as_str()) {
            trace!(script_type, "skipping non-script block");
            continue;
        }

        match attribute(&attributes, "src") {
            Some(src) => blocks.push(ScriptBlock::External {
                src: src.trim().to_string(),
                defer: attributes.iter().any(|(name, _)| name == "defer"),
            }),
            None => blocks.push(ScriptBlock::Inline(document[body_start..body_end].to_string())),
        }
    }

    blocks
}

/// `name` at `at` followed by whitespace, `/` or `>` (so `<scripts>` is not `<script`).
fn is_tag_start(lower: &str, at: usize, name: &str) -> bool {
    lower[at..].starts_with(name) && is_tag_boundary(lower.as_bytes().get(at + name.len()))
}

fn is_tag_boundary(byte: Option<&u8>) -> bool {
    matches!(byte, Some(b'>' | b'/')) || byte.is_some_and(u8::is_ascii_whitespace)
}

/// Offset of the `</name` that ends a raw-text element opened before `from`.
fn find_end_tag(lower: &str, from: usize, name: &str) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = lower[pos..].find("</") {
        let at = pos + offset;
        if is_tag_start(lower, at + 2, name) {
            return Some(at);
        }
        pos = at + 2;
    }
    None
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Parse `name`, `name=value`, `name="value"` and `name='value'` pairs.
/// Names are lowercased; a valueless attribute gets an empty value.
fn parse_attributes(text: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut chars = text.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace() || *c == '/').is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };
        let mut end = text.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == '=' || c == '/' {
                end = i;
                break;
            }
            chars.next();
        }
        let name = text[start..end].to_ascii_lowercase();

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let mut value = String::new();
        if chars.next_if(|(_, c)| *c == '=').is_some() {
            while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
            match chars.peek().map(|&(_, c)| c) {
                Some(quote @ ('"' | '\'')) => {
                    chars.next();
                    for (_, c) in chars.by_ref() {
                        if c == quote {
                            break;
                        }
                        value.push(c);
                    }
                }
                _ => {
                    while let Some((_, c)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
                        value.push(c);
                    }
                }
            }
        }
        if !name.is_empty() {
            attributes.push((name, value));
        }
    }

    attributes
}
