//! # CatoCode Preview Engine
//!
//! An in-memory preview engine for a multi-file project editor. It
//! keeps the project's files in a virtual store, resolves inter-file
//! references into ephemeral resource handles, executes the entry
//! document's scripts in an isolated V8 context, and relays the
//! context's console output back to the host over a generation-tagged
//! message channel.
//!
//! ## Guarantees
//!
//! - **Isolation**: previewed scripts share no state with the host;
//!   every crossing goes through the typed op surface
//! - **No filesystem or network access**: the sandbox can only fetch
//!   and import the current cycle's resource handles
//! - **Staleness filtering**: output from a superseded render never
//!   reaches the current diagnostic log
//! - **Handle lifetime**: a cycle's handles stay valid for its whole
//!   execution and die only once the next cycle starts rendering
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catocode_preview::{PreviewSession, SandboxConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut session = PreviewSession::new(SandboxConfig::default(), "index.html");
//!     session.put_file("index.html", "<html><head></head><body>\
//!         <script>console.log('hello');</script></body></html>");
//!     session.render_now().await;
//!
//!     println!("{}", session.last_html().unwrap());
//!     for message in session.diagnostics() {
//!         println!("[{}] {}", message.level, message.text);
//!     }
//! }
//! ```

mod handles;
mod loader;
mod navigate;
mod ops;
mod relay;
mod resolver;
mod runtime;
mod scheduler;
mod session;
mod store;

pub use handles::{HandleTable, ResourceHandle, SharedHandleTable};
pub use navigate::{decide, normalize_href, NavigationDecision, NavigationRequest};
pub use relay::{
    DiagnosticEnvelope, DiagnosticLevel, DiagnosticLog, DiagnosticMessage, SOURCE_TAG,
};
pub use resolver::{resolve, placeholder_document, ResolveError, ResolvedDocument};
pub use runtime::{SandboxConfig, SandboxRenderer};
pub use scheduler::{RenderScheduler, RenderState, RenderStatus, DEFAULT_DEBOUNCE};
pub use session::{
    command_channel, event_channel, PreviewSession, SessionCommand, SessionEvent,
};
pub use store::{is_text_path, guess_mime, FileContent, FileRecord, VirtualFileStore};
