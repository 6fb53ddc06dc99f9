//! Resource resolver: turns the stored entry document into a renderable
//! one. Every stored file is snapshotted into a fresh resource handle
//! for the cycle, `src=`/`href=` references to known paths are rewritten
//! to handle locators, and the diagnostic bootstrap snippet is injected
//! after the first `<head>`.

use regex::Regex;
use thiserror::Error;

use crate::handles::{CycleToken, HandleTable};
use crate::store::VirtualFileStore;

/// Why an entry document could not be resolved. Both kinds are
/// recovered locally with a placeholder document; neither is raised to
/// the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no file exists at the requested entry path")]
    EntryMissing,
    #[error("the entry file is not an HTML document")]
    EntryNotHtml,
}

/// One `<script>` element of the resolved document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCode {
    Inline(String),
    /// The `src` attribute value after rewriting: a handle locator when
    /// the path was known, the untouched literal otherwise.
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub code: ScriptCode,
    pub module: bool,
}

/// Output of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub entry_path: String,
    pub generation: u64,
    pub html: String,
    pub scripts: Vec<ScriptSource>,
}

/// In-page diagnostic bootstrap. Wraps the native console emitters so
/// each call posts a tagged envelope to the host before performing the
/// original emission, and forwards uncaught faults as error-level
/// output. Works unchanged in a real frame (postMessage to the parent)
/// and in the headless sandbox (the bootstrap shims window.parent).
pub const DIAGNOSTIC_SNIPPET: &str = r#"<script>(() => {
  ['log', 'warn', 'error', 'info'].forEach((level) => {
    const original = console[level];
    console[level] = (...args) => {
      try {
        const message = args.map((arg) => {
          if (arg instanceof Error) return arg.stack;
          if (typeof arg === 'object' && arg !== null) return JSON.stringify(arg, null, 2);
          return String(arg);
        }).join(' ');
        window.parent.postMessage({ source: 'catocode-console', level, message }, '*');
      } catch (e) {
        window.parent.postMessage({ source: 'catocode-console', level: 'error', message: 'Error forwarding console output.' }, '*');
      }
      original.apply(console, args);
    };
  });
  window.addEventListener('error', (e) => {
    console.error(e.message, 'at', e.filename + ':' + e.lineno);
  });
})();</script>"#;

/// Resolve `entry_path` against the store for one render cycle.
///
/// Validation happens before any handle is minted, so a failed resolve
/// leaves the table untouched and there is nothing to revoke for the
/// failed cycle.
pub fn resolve(
    store: &VirtualFileStore,
    table: &mut HandleTable,
    entry_path: &str,
    generation: u64,
) -> Result<ResolvedDocument, ResolveError> {
    let entry = store.get(entry_path).ok_or(ResolveError::EntryMissing)?;
    let source = match (&entry.content, entry.is_html()) {
        (crate::store::FileContent::Text(text), true) => text.clone(),
        _ => return Err(ResolveError::EntryNotHtml),
    };

    let token = CycleToken::mint(generation);
    for record in store.list() {
        table.insert(token.handle_for(record));
    }

    let mut html = inject_snippet(&source);
    for record in store.list() {
        html = rewrite_references(&html, &record.path, &token.locator_for(&record.path));
    }

    // Module scripts are executed through the loader, so inline module
    // bodies get a synthetic handle of their own for this cycle.
    let mut scripts = extract_scripts(&html);
    for (index, script) in scripts.iter_mut().enumerate() {
        if script.module {
            if let ScriptCode::Inline(body) = &script.code {
                let path = format!("__inline_module_{index}.js");
                table.insert(token.handle_for(&crate::store::FileRecord {
                    path: path.clone(),
                    content: crate::store::FileContent::Text(body.clone()),
                }));
                script.code = ScriptCode::External(token.locator_for(&path));
            }
        }
    }

    Ok(ResolvedDocument {
        entry_path: entry_path.to_string(),
        generation,
        html,
        scripts,
    })
}

/// Insert the diagnostic snippet immediately after the first `<head>`.
/// Documents without a `<head>` pass through unmodified.
fn inject_snippet(html: &str) -> String {
    match html.find("<head>") {
        Some(pos) => {
            let insert_at = pos + "<head>".len();
            let mut out = String::with_capacity(html.len() + DIAGNOSTIC_SNIPPET.len());
            out.push_str(&html[..insert_at]);
            out.push_str(DIAGNOSTIC_SNIPPET);
            out.push_str(&html[insert_at..]);
            out
        }
        None => html.to_string(),
    }
}

/// Substitute `src=`/`href=` references to `path` with `locator`.
/// The attribute name matches case-insensitively, the path exactly,
/// with an optional `./` prefix; either quote style is accepted.
/// References to paths absent from the store never reach this function
/// and stay literal (a non-fatal dangling reference).
fn rewrite_references(html: &str, path: &str, locator: &str) -> String {
    let pattern = format!(
        r#"((?i:src|href))=["'](?:\./)?{}["']"#,
        regex::escape(path)
    );
    // The pattern is built from a fixed template and an escaped literal.
    let re = Regex::new(&pattern).unwrap();
    re.replace_all(html, format!(r#"${{1}}="{locator}""#).as_str())
        .into_owned()
}

/// Collect `<script>` elements in document order.
fn extract_scripts(html: &str) -> Vec<ScriptSource> {
    let script_re = Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script>").unwrap();
    let src_re = Regex::new(r#"(?i)\bsrc\s*=\s*["']([^"']*)["']"#).unwrap();
    let module_re = Regex::new(r#"(?i)\btype\s*=\s*["']?module"#).unwrap();

    script_re
        .captures_iter(html)
        .map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            let module = module_re.is_match(attrs);
            let code = match src_re.captures(attrs) {
                Some(src) => ScriptCode::External(src[1].to_string()),
                None => ScriptCode::Inline(body.to_string()),
            };
            ScriptSource { code, module }
        })
        .collect()
}

/// Host-visible stand-in rendered when the entry cannot be resolved,
/// shaped like the editor's "Preview Error" panel.
pub fn placeholder_document(entry_path: &str, error: ResolveError) -> String {
    let hint = match error {
        ResolveError::EntryMissing => "Please create an HTML file.",
        ResolveError::EntryNotHtml => "The preview entry must be an HTML file.",
    };
    format!(
        "<div style=\"font-family: sans-serif; padding: 2rem;\">\
         <h2>Preview Error</h2>\
         <p>Could not preview <strong>{entry_path}</strong>: {error}. {hint}</p>\
         </div>"
    )
}
