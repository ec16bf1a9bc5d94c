//! Ops backing the headless sandboxed context.
//!
//! The bootstrap module turns these into the browser globals user code
//! expects (`parent.postMessage`, `console`, `crypto`, `atob`, `btoa`).

use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};
use serde_json::Value;

// ============================================================================
// Message channel
// ============================================================================

/// Messages posted to `window.parent`, in posting order
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    pub messages: Vec<Value>,
}

/// `window.parent.postMessage` - receives the structured-cloned message as JSON text
#[op2(fast)]
pub fn op_post_message(state: &mut OpState, #[string] message: &str) {
    let value = match serde_json::from_str::<Value>(message) {
        Ok(value) => value,
        Err(e) => {
            tracing::trace!(target: "sandbox", error = %e, "dropping non-JSON message");
            return;
        }
    };
    if let Some(outbox) = state.try_borrow_mut::<Outbox>() {
        outbox.messages.push(value);
    }
}

/// The sandbox's own console, under the instrumentation
#[op2(fast)]
pub fn op_sandbox_print(#[string] level: &str, #[string] msg: &str) {
    tracing::debug!(target: "sandbox", level, "{}", msg);
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[op2]
#[buffer]
pub fn op_crypto_subtle_digest(
    #[string] algorithm: &str,
    #[buffer] data: &[u8],
) -> Result<Vec<u8>, Error> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let result = match algorithm.to_uppercase().replace('-', "").as_str() {
        "SHA256" => Sha256::digest(data).to_vec(),
        "SHA384" => Sha384::digest(data).to_vec(),
        "SHA512" => Sha512::digest(data).to_vec(),
        _ => {
            return Err(anyhow!(
                "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
                algorithm
            ))
        }
    };

    Ok(result)
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    // btoa only accepts Latin-1 in browsers
    let bytes = data
        .chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| anyhow!("InvalidCharacterError: string contains characters outside Latin-1"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| anyhow!("InvalidCharacterError: invalid base64: {}", e))?;
    // One char per byte, like the browser's binary string
    Ok(bytes.into_iter().map(char::from).collect())
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    codepen_sandbox,
    ops = [
        op_post_message,
        op_sandbox_print,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
    ],
    esm_entry_point = "ext:codepen_sandbox/bootstrap.js",
    esm = ["ext:codepen_sandbox/bootstrap.js" = "src/bootstrap.js"],
);
