//! Instrumentation installed inside the sandboxed context.
//!
//! The script hooks `console.log/info/warn/error`, the global `error` event
//! and `unhandledrejection`, and relays each as an envelope to
//! `window.parent`. Every post is wrapped so nothing it does can throw into
//! user code.

use crate::protocol::{Generation, SANDBOX_SOURCE};

const INSTRUMENTATION_TEMPLATE: &str = include_str!("instrument.js");

/// Render the instrumentation script, optionally stamping every envelope with `generation`.
pub fn instrumentation_script(generation: Option<Generation>) -> String {
    INSTRUMENTATION_TEMPLATE
        .replace("__SOURCE__", &js_string(SANDBOX_SOURCE))
        .replace("__GENERATION__", &js_generation(generation))
}

/// Wrap (already escaped) user script in a synchronous exception handler that
/// reports the caught error's message as a `runtime-error` envelope.
pub fn wrap_user_script(script: &str, generation: Option<Generation>) -> String {
    let tag = match generation {
        Some(generation) => format!(", generation: {}", generation.get()),
        None => String::new(),
    };
    format!(
        r#"
try {{
{script}
}} catch (e) {{
  try {{ window.parent.postMessage({{ source: {source}, type: 'runtime-error', payload: {{ message: e && e.message ? e.message : String(e) }}{tag} }}, '*'); }} catch (err) {{}}
}}
"#,
        script = script,
        source = js_string(SANDBOX_SOURCE),
        tag = tag,
    )
}

fn js_string(value: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_generation(generation: Option<Generation>) -> String {
    match generation {
        Some(generation) => generation.get().to_string(),
        None => "null".to_string(),
    }
}
