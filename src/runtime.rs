//! Sandbox renderer - executes a resolved document's scripts in an
//! isolated V8 context.
//!
//! One `JsRuntime` per render cycle, tagged with the cycle's
//! generation and sharing nothing with the host beyond the op surface.
//! Beginning a new render explicitly tears down the superseded context
//! before its replacement is built; the host applies no execution
//! timeout - previewed programs are short, user-authored, and
//! non-adversarial by assumption.

use std::rc::Rc;
use std::time::Duration;

use anyhow::Error;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};

use crate::handles::SharedHandleTable;
use crate::loader::HandleLoader;
use crate::navigate::NavigationSender;
use crate::ops::{catocode_runtime, ActiveGeneration};
use crate::relay::{DiagnosticEnvelope, DiagnosticLevel, DiagnosticSender, SOURCE_TAG};
use crate::resolver::{ResolvedDocument, ScriptCode};
use crate::scheduler::DEFAULT_DEBOUNCE;

/// Tuning for the preview sandbox.
pub struct SandboxConfig {
    /// Quiet interval required after the last edit before a render starts.
    pub debounce: Duration,
    /// Maximum isolate heap in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
        }
    }
}

/// Owns the live execution context, at most one at a time.
#[derive(Default)]
pub struct SandboxRenderer {
    max_heap_size: Option<usize>,
    /// Context of the most recent cycle. Replaced (dropped) when the
    /// next cycle begins rendering.
    current: Option<JsRuntime>,
}

impl SandboxRenderer {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            max_heap_size: config.max_heap_size,
            current: None,
        }
    }

    pub fn has_live_context(&self) -> bool {
        self.current.is_some()
    }

    /// Tear down the live context, if any.
    pub fn dispose(&mut self) {
        self.current = None;
    }

    /// Run one resolved document.
    ///
    /// Script faults are not render failures: they surface through the
    /// diagnostic relay and the cycle still counts as loaded. On
    /// successful load every handle of the preceding generations is
    /// revoked - never this cycle's own, so its in-flight fetches stay
    /// valid for the whole execution.
    pub async fn render(
        &mut self,
        doc: &ResolvedDocument,
        table: SharedHandleTable,
        diagnostics: DiagnosticSender,
        navigation: NavigationSender,
    ) -> Result<(), Error> {
        // Supersede the previous context before building the new one
        self.current = None;

        let loader = HandleLoader::new(table.clone(), doc.generation);
        let create_params = self
            .max_heap_size
            .map(|max_bytes| deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            module_loader: Some(Rc::new(loader)),
            extensions: vec![catocode_runtime::init_ops_and_esm()],
            create_params,
            ..Default::default()
        });

        if self.max_heap_size.is_some() {
            runtime.add_near_heap_limit_callback(|current, initial| {
                // Don't increase the limit - let V8 terminate gracefully
                log::warn!(
                    "preview isolate near heap limit: current={}MB, initial={}MB",
                    current / (1024 * 1024),
                    initial / (1024 * 1024)
                );
                current
            });
        }

        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(ActiveGeneration(doc.generation));
            op_state.put(table.clone());
            op_state.put(diagnostics.clone());
            op_state.put(navigation);
        }

        for script in &doc.scripts {
            let code = match &script.code {
                ScriptCode::Inline(body) => {
                    wrap_classic(body, &format!("{}#inline", doc.entry_path))
                }
                ScriptCode::External(src) if src.starts_with("preview://") => {
                    if script.module {
                        format!("globalThis.__catocode_import__({});", js_string(src))
                    } else {
                        let source = {
                            let table = table.borrow();
                            table
                                .resolve(src)
                                .filter(|h| h.is_text)
                                .map(|h| (String::from_utf8_lossy(&h.bytes).into_owned(), h.path.clone()))
                        };
                        match source {
                            Some((body, path)) => wrap_classic(&body, &path),
                            None => {
                                report_failed_load(&diagnostics, doc.generation, src);
                                continue;
                            }
                        }
                    }
                }
                // A dangling reference: the literal path survived rewriting
                ScriptCode::External(src) => {
                    report_failed_load(&diagnostics, doc.generation, src);
                    continue;
                }
            };

            if let Err(err) = runtime.execute_script("[catocode:script]", code) {
                // Faults escaping __catocode_run__ itself; keep going,
                // later scripts still run, as in a real document
                forward_fault(&diagnostics, doc.generation, &err.to_string());
            }
        }

        // Drive module evaluation and any pending promises to completion
        if let Err(err) = runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
        {
            forward_fault(&diagnostics, doc.generation, &err.to_string());
        }

        // Initial load complete: predecessors can no longer be fetched from
        table.borrow_mut().revoke_before(doc.generation);
        self.current = Some(runtime);
        Ok(())
    }
}

/// JSON-escape a string into a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Classic scripts run through the bootstrap's fault-trapping runner.
fn wrap_classic(source: &str, filename: &str) -> String {
    format!(
        "globalThis.__catocode_run__({}, {});",
        js_string(source),
        js_string(filename)
    )
}

fn report_failed_load(diagnostics: &DiagnosticSender, generation: u64, src: &str) {
    log::debug!("generation {generation}: failed resource load {src}");
    let _ = diagnostics.send(DiagnosticEnvelope {
        source: SOURCE_TAG.to_string(),
        level: DiagnosticLevel::Error,
        message: format!("Failed to load resource: {src}"),
        generation,
    });
}

fn forward_fault(diagnostics: &DiagnosticSender, generation: u64, message: &str) {
    let _ = diagnostics.send(DiagnosticEnvelope {
        source: SOURCE_TAG.to_string(),
        level: DiagnosticLevel::Error,
        message: message.to_string(),
        generation,
    });
}
