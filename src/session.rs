//! Preview session: one controller owning the store, the scheduler,
//! the handle table, the relay channels, and the live sandbox context.
//!
//! Sessions are self-contained - no global state - so several previews
//! can coexist in one process and be tested in isolation. All session
//! methods run on a single logical thread; the only suspension point
//! is the debounce wait between an edit burst and its render.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep_until;

use crate::handles::{HandleTable, SharedHandleTable};
use crate::navigate::{self, NavigationDecision};
use crate::relay::{self, DiagnosticLog, DiagnosticMessage, DiagnosticReceiver, DiagnosticSender};
use crate::resolver;
use crate::runtime::{SandboxConfig, SandboxRenderer};
use crate::scheduler::{RenderScheduler, RenderState, RenderStatus};
use crate::store::{FileContent, VirtualFileStore};

/// Mutations and requests accepted by a driven session.
#[derive(Debug)]
pub enum SessionCommand {
    Put { path: String, content: FileContent },
    Delete { path: String },
    OpenEntry { path: String },
    Shutdown,
}

/// What the session reports back to its host.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(RenderState),
    /// A cycle produced a document - the rewritten entry on success,
    /// the explanatory placeholder on a failed resolve.
    Rendered { generation: u64, html: String },
    Diagnostic(DiagnosticMessage),
    /// An intercepted in-sandbox navigation switched the entry; the
    /// editor can move its active-file selection along.
    Navigated { path: String },
}

pub struct PreviewSession {
    store: VirtualFileStore,
    table: SharedHandleTable,
    scheduler: RenderScheduler,
    renderer: SandboxRenderer,
    diag_tx: DiagnosticSender,
    diag_rx: DiagnosticReceiver,
    nav_tx: navigate::NavigationSender,
    nav_rx: navigate::NavigationReceiver,
    log: DiagnosticLog,
    last_html: Option<String>,
    events: Vec<SessionEvent>,
}

impl PreviewSession {
    pub fn new(config: SandboxConfig, entry_path: impl Into<String>) -> Self {
        let (diag_tx, diag_rx) = relay::channel();
        let (nav_tx, nav_rx) = navigate::channel();
        Self {
            store: VirtualFileStore::new(),
            table: HandleTable::shared(),
            scheduler: RenderScheduler::new(entry_path, config.debounce),
            renderer: SandboxRenderer::new(&config),
            diag_tx,
            diag_rx,
            nav_tx,
            nav_rx,
            log: DiagnosticLog::new(),
            last_html: None,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Collaborator-facing mutations (editor widget, uploader)
    // ------------------------------------------------------------------

    pub fn put_file(&mut self, path: impl Into<String>, content: impl Into<FileContent>) {
        self.store.put(path, content);
        self.scheduler.note_edit();
    }

    pub fn delete_file(&mut self, path: &str) {
        self.store.delete(path);
        self.scheduler.note_edit();
    }

    /// The user opened a different document as the preview entry.
    pub fn set_entry(&mut self, path: impl Into<String>) {
        self.scheduler.note_entry_change(path);
    }

    pub fn store(&self) -> &VirtualFileStore {
        &self.store
    }

    pub fn state(&self) -> &RenderState {
        self.scheduler.state()
    }

    /// Accepted diagnostics, in arrival order.
    pub fn diagnostics(&self) -> &[DiagnosticMessage] {
        self.log.entries()
    }

    /// Document produced by the most recent cycle.
    pub fn last_html(&self) -> Option<&str> {
        self.last_html.as_deref()
    }

    /// Events accumulated since the previous drain.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Render cycle
    // ------------------------------------------------------------------

    /// Skip the debounce wait and run a full cycle immediately.
    pub async fn render_now(&mut self) {
        if self.scheduler.state().status != RenderStatus::Pending {
            self.scheduler.note_edit();
        }
        self.render_cycle().await;
    }

    async fn render_cycle(&mut self) {
        let (generation, entry_path) = self.scheduler.begin_render();
        self.emit_state();

        let resolved = {
            let mut table = self.table.borrow_mut();
            resolver::resolve(&self.store, &mut table, &entry_path, generation)
        };

        match resolved {
            Ok(doc) => {
                if let Err(err) = self
                    .renderer
                    .render(&doc, self.table.clone(), self.diag_tx.clone(), self.nav_tx.clone())
                    .await
                {
                    // The document was produced even if the isolate
                    // misbehaved; the failure surfaces as a diagnostic
                    log::error!("sandbox execution error: {err:#}");
                }
                self.last_html = Some(doc.html.clone());
                self.scheduler.finish_render(Ok(()));
                self.events.push(SessionEvent::Rendered {
                    generation,
                    html: doc.html,
                });
            }
            Err(kind) => {
                let placeholder = resolver::placeholder_document(&entry_path, kind);
                self.last_html = Some(placeholder.clone());
                self.scheduler.finish_render(Err(kind));
                self.events.push(SessionEvent::Rendered {
                    generation,
                    html: placeholder,
                });
            }
        }
        self.emit_state();

        self.pump_diagnostics();
        self.pump_navigation();
    }

    /// Move queued envelopes into the log, dropping stale ones.
    fn pump_diagnostics(&mut self) {
        let current = self.scheduler.generation();
        for message in self.log.drain(&mut self.diag_rx, current) {
            self.events.push(SessionEvent::Diagnostic(message));
        }
    }

    /// Apply queued link activations from the current generation.
    fn pump_navigation(&mut self) {
        let current = self.scheduler.generation();
        while let Ok(request) = self.nav_rx.try_recv() {
            if request.generation != current {
                log::debug!(
                    "dropping stale navigation request from generation {}",
                    request.generation
                );
                continue;
            }
            match navigate::decide(&self.store, &request.href) {
                NavigationDecision::Intercept(path) => {
                    self.scheduler.note_entry_change(path.clone());
                    self.events.push(SessionEvent::Navigated { path });
                }
                NavigationDecision::PassThrough => {
                    log::debug!("navigation to {:?} passes through", request.href);
                }
            }
        }
    }

    fn emit_state(&mut self) {
        self.events
            .push(SessionEvent::StateChanged(self.scheduler.state().clone()));
    }

    // ------------------------------------------------------------------
    // Driven mode
    // ------------------------------------------------------------------

    /// Cooperative drive loop: commands interleave with the debounce
    /// wait, each event pushing the deadline; the render fires only
    /// when a window passes with no further events.
    pub async fn run(
        &mut self,
        mut commands: UnboundedReceiver<SessionCommand>,
        events: UnboundedSender<SessionEvent>,
    ) {
        loop {
            self.flush_events(&events);
            let deadline = self.scheduler.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Put { path, content }) => self.put_file(path, content),
                    Some(SessionCommand::Delete { path }) => self.delete_file(&path),
                    Some(SessionCommand::OpenEntry { path }) => self.set_entry(path),
                    Some(SessionCommand::Shutdown) | None => break,
                },
                // The deadline is re-read every iteration, so a fresh
                // event preempts an armed render
                _ = async { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    self.render_cycle().await;
                }
            }
        }
        self.flush_events(&events);
        self.renderer.dispose();
    }

    fn flush_events(&mut self, events: &UnboundedSender<SessionEvent>) {
        for event in self.drain_events() {
            let _ = events.send(event);
        }
    }
}

/// Convenience for drivers: a command channel pair.
pub fn command_channel() -> (UnboundedSender<SessionCommand>, UnboundedReceiver<SessionCommand>) {
    mpsc::unbounded_channel()
}

/// Convenience for drivers: an event channel pair.
pub fn event_channel() -> (UnboundedSender<SessionEvent>, UnboundedReceiver<SessionEvent>) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveError;
    use crate::scheduler::DEFAULT_DEBOUNCE;
    use std::time::Duration;

    const INDEX: &str = "<html><head></head><body>\
                         <script>console.log('generation ran');</script>\
                         </body></html>";

    fn session() -> PreviewSession {
        PreviewSession::new(SandboxConfig::default(), "index.html")
    }

    #[tokio::test]
    async fn test_render_produces_document_and_diagnostics() {
        let mut session = session();
        session.put_file("index.html", INDEX);
        session.render_now().await;

        assert_eq!(session.state().status, RenderStatus::Rendered);
        assert_eq!(session.state().generation, 1);
        let html = session.last_html().unwrap();
        assert!(html.contains("catocode-console"));
        assert_eq!(session.diagnostics().len(), 1);
        assert_eq!(session.diagnostics()[0].text, "generation ran");
        assert_eq!(session.diagnostics()[0].origin_generation, 1);
    }

    #[tokio::test]
    async fn test_missing_entry_fails_without_poisoning_session() {
        let mut session = session();
        session.put_file("index.html", INDEX);
        session.render_now().await;
        assert_eq!(session.state().status, RenderStatus::Rendered);

        // Delete the entry and re-render the same path
        session.delete_file("index.html");
        session.render_now().await;
        assert_eq!(
            session.state().status,
            RenderStatus::Failed(ResolveError::EntryMissing)
        );
        assert!(session.last_html().unwrap().contains("Preview Error"));

        // Store and scheduler remain fully usable
        session.put_file("index.html", INDEX);
        session.render_now().await;
        assert_eq!(session.state().status, RenderStatus::Rendered);
        assert_eq!(session.state().generation, 3);
    }

    #[tokio::test]
    async fn test_stale_diagnostics_dropped_across_generations() {
        let mut session = session();
        session.put_file("index.html", INDEX);
        session.render_now().await;
        assert_eq!(session.diagnostics().len(), 1);

        // An envelope from the superseded generation arrives late
        session
            .diag_tx
            .send(crate::relay::DiagnosticEnvelope {
                source: crate::relay::SOURCE_TAG.to_string(),
                level: crate::relay::DiagnosticLevel::Log,
                message: "late straggler".to_string(),
                generation: 1,
            })
            .unwrap();
        session.render_now().await;

        // Generation 2's own output is in; the straggler is not
        assert_eq!(session.state().generation, 2);
        let texts: Vec<&str> = session.diagnostics().iter().map(|m| m.text.as_str()).collect();
        assert!(!texts.contains(&"late straggler"));
        assert_eq!(
            texts.iter().filter(|t| **t == "generation ran").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_navigation_switches_entry_and_notifies_host() {
        let mut session = session();
        session.put_file(
            "index.html",
            "<html><head></head><body>\
             <script>__catocode__.activateLink('about.html');</script>\
             </body></html>",
        );
        session.put_file("about.html", "<h1>about</h1>");
        session.render_now().await;

        let events = session.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Navigated { path } if path == "about.html")));

        // The interception queued an entry change; next cycle renders it
        assert_eq!(session.state().status, RenderStatus::Pending);
        session.render_now().await;
        assert_eq!(session.state().entry_path, "about.html");
        assert_eq!(session.state().status, RenderStatus::Rendered);
        assert_eq!(session.last_html().unwrap(), "<h1>about</h1>");
    }

    #[tokio::test]
    async fn test_stale_navigation_request_ignored() {
        let mut session = session();
        session.put_file("index.html", INDEX);
        session.put_file("about.html", "<h1>about</h1>");
        session.render_now().await;
        assert_eq!(session.state().generation, 1);

        // A link activation from a superseded isolate arrives late
        session
            .nav_tx
            .send(crate::navigate::NavigationRequest {
                href: "about.html".to_string(),
                generation: 0,
            })
            .unwrap();
        session.render_now().await;

        assert_eq!(session.state().entry_path, "index.html");
        assert!(!session
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Navigated { .. })));
    }

    #[tokio::test]
    async fn test_external_navigation_passes_through() {
        let mut session = session();
        session.put_file(
            "index.html",
            "<html><head></head><body>\
             <script>__catocode__.activateLink('https://example.com/out');</script>\
             </body></html>",
        );
        session.render_now().await;
        let events = session.drain_events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::Navigated { .. })));
        assert_eq!(session.state().status, RenderStatus::Rendered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_burst_coalesces_into_one_render() {
        let (cmd_tx, cmd_rx) = command_channel();
        let (event_tx, mut event_rx) = event_channel();

        for i in 0..5 {
            cmd_tx
                .send(SessionCommand::Put {
                    path: "index.html".to_string(),
                    content: FileContent::Text(format!(
                        "<html><head></head><body><script>console.log('edit {i}');</script></body></html>"
                    )),
                })
                .unwrap();
        }

        let drive = async {
            let mut session = session();
            session.run(cmd_rx, event_tx).await;
            session
        };
        let shutdown = async {
            // Let the burst land, then a full quiet window
            tokio::time::sleep(DEFAULT_DEBOUNCE + Duration::from_millis(50)).await;
            cmd_tx.send(SessionCommand::Shutdown).unwrap();
        };
        let (session, _) = tokio::join!(drive, shutdown);

        // Exactly one cycle ran, reflecting the final edit
        assert_eq!(session.state().generation, 1);
        let mut rendered = 0;
        let mut saw_last_edit = false;
        while let Ok(event) = event_rx.try_recv() {
            match event {
                SessionEvent::Rendered { .. } => rendered += 1,
                SessionEvent::Diagnostic(message) => {
                    saw_last_edit |= message.text == "edit 4";
                }
                _ => {}
            }
        }
        assert_eq!(rendered, 1);
        assert!(saw_last_edit);
    }
}
