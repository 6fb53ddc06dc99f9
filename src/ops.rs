//! Sandbox op surface.
//!
//! Everything that crosses the isolate/host boundary goes through these
//! ops: diagnostic envelopes, link activations, resource-handle
//! fetches, and the small crypto/encoding surface previewed scripts may
//! use. The active render generation lives in `OpState` and is stamped
//! onto every outbound message.

use deno_core::{op2, OpState};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use crate::handles::{HandleTable, SharedHandleTable};
use crate::navigate::{NavigationRequest, NavigationSender};
use crate::relay::{DiagnosticEnvelope, DiagnosticLevel, DiagnosticSender};

/// Generation of the render cycle this isolate belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ActiveGeneration(pub u64);

// ============================================================================
// Diagnostic Relay
// ============================================================================

/// Message shape posted by the in-page bootstrap snippet.
#[derive(Debug, Deserialize)]
struct PostedMessage {
    source: String,
    level: DiagnosticLevel,
    message: String,
}

/// Turn a raw `postMessage` payload into a generation-stamped envelope.
/// Payloads that don't look like console traffic are dropped here.
fn envelope_from_posted(data: serde_json::Value, generation: u64) -> Option<DiagnosticEnvelope> {
    let posted: PostedMessage = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(err) => {
            log::debug!("ignoring malformed sandbox message: {err}");
            return None;
        }
    };
    Some(DiagnosticEnvelope {
        source: posted.source,
        level: posted.level,
        message: posted.message,
        generation,
    })
}

#[op2]
pub fn op_post_message(state: &mut OpState, #[serde] data: serde_json::Value) {
    let generation = state.borrow::<ActiveGeneration>().0;
    if let Some(envelope) = envelope_from_posted(data, generation) {
        if let Some(sender) = state.try_borrow::<DiagnosticSender>() {
            let _ = sender.send(envelope);
        }
    }
}

// ============================================================================
// Navigation
// ============================================================================

#[op2(fast)]
pub fn op_link_activated(state: &mut OpState, #[string] href: &str) {
    let generation = state.borrow::<ActiveGeneration>().0;
    if let Some(sender) = state.try_borrow::<NavigationSender>() {
        let _ = sender.send(NavigationRequest {
            href: href.to_string(),
            generation,
        });
    }
}

// ============================================================================
// Resource Fetch
// ============================================================================

/// Response returned to the sandbox's `fetch` shim.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub mime_type: String,
    pub url: String,
    pub body: String,
    /// "utf8" for text handles, "base64" for binary ones.
    pub encoding: String,
}

/// Look a locator up in the live handle table. Unknown and revoked
/// locators answer 404 - this is how a dangling reference surfaces
/// inside the sandbox.
fn lookup_resource(table: &HandleTable, locator: &str) -> ResourceResponse {
    match table.resolve(locator) {
        Some(handle) if handle.is_text => ResourceResponse {
            ok: true,
            status: 200,
            status_text: "OK".to_string(),
            mime_type: handle.mime_type.to_string(),
            url: locator.to_string(),
            body: String::from_utf8_lossy(&handle.bytes).into_owned(),
            encoding: "utf8".to_string(),
        },
        Some(handle) => {
            use base64::Engine;
            ResourceResponse {
                ok: true,
                status: 200,
                status_text: "OK".to_string(),
                mime_type: handle.mime_type.to_string(),
                url: locator.to_string(),
                body: base64::engine::general_purpose::STANDARD.encode(&handle.bytes),
                encoding: "base64".to_string(),
            }
        }
        None => ResourceResponse {
            ok: false,
            status: 404,
            status_text: "Not Found".to_string(),
            mime_type: String::new(),
            url: locator.to_string(),
            body: String::new(),
            encoding: "utf8".to_string(),
        },
    }
}

#[op2(async)]
#[serde]
pub async fn op_resource_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] locator: String,
) -> Result<ResourceResponse, deno_core::error::AnyError> {
    let table = {
        let state_ref = state.borrow();
        state_ref.borrow::<SharedHandleTable>().clone()
    };
    let response = lookup_resource(&table.borrow(), &locator);
    Ok(response)
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
) -> Result<Vec<u8>, deno_core::error::AnyError> {
    use anyhow::anyhow;
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let result = match algorithm.to_uppercase().replace("-", "").as_str() {
        "SHA256" => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        "SHA384" => {
            let mut hasher = Sha384::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        "SHA512" => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        _ => {
            return Err(anyhow!(
                "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
                algorithm
            )
            .into())
        }
    };

    Ok(result)
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> Result<String, deno_core::error::AnyError> {
    use base64::Engine;
    // btoa expects Latin-1, but we'll be lenient and accept UTF-8
    Ok(base64::engine::general_purpose::STANDARD.encode(data.as_bytes()))
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, deno_core::error::AnyError> {
    use anyhow::anyhow;
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e).into())
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    catocode_runtime,
    ops = [
        op_post_message,
        op_link_activated,
        op_resource_fetch,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
    ],
    esm_entry_point = "ext:catocode_runtime/bootstrap.js",
    esm = ["ext:catocode_runtime/bootstrap.js" = "src/bootstrap.js"],
);
