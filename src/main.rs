//! CatoCode preview CLI
//!
//! Single-shot mode:
//!   catocode-preview <project-dir> [entry]
//!
//! Server mode (persistent session, reads commands from stdin):
//!   catocode-preview --server <project-dir> [entry]
//!
//! Server protocol (one command per line):
//!   put <path> <json-string-content>
//!   putb <path> <base64-content>
//!   delete <path>
//!   open <path>
//!   quit
//!
//! Each completed render cycle is written to stdout as a framed block:
//!   Status:Rendered
//!   Generation:3
//!   Length:1234
//!
//!   <!DOCTYPE html>...
//!
//! Diagnostics and navigation events go to stderr with [LOG]/[WARN]/
//! [ERROR]/[INFO]/[NAV] prefixes.

use anyhow::{anyhow, Context, Result};
use catocode_preview::{
    command_channel, event_channel, is_text_path, PreviewSession, RenderStatus, SandboxConfig,
    SessionCommand, SessionEvent,
};
use std::io::{BufRead, Write};
use std::path::Path;

fn print_usage() {
    eprintln!("CatoCode preview engine - sandboxed multi-file HTML preview");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  catocode-preview <project-dir> [entry]");
    eprintln!();
    eprintln!("Server mode (persistent session):");
    eprintln!("  catocode-preview --server <project-dir> [entry]");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  catocode-preview ./site index.html");
    eprintln!("  catocode-preview --server ./site");
}

/// Load every file under `dir` into the session, store-relative with
/// forward slashes, split text/binary by extension.
fn load_project(session: &mut PreviewSession, dir: &Path) -> Result<usize> {
    let mut loaded = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for dir_entry in std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory {}", current.display()))?
        {
            let path = dir_entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(dir)
                .map_err(|_| anyhow!("Path escapes project dir: {}", path.display()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if is_text_path(&relative) {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                session.put_file(relative, text);
            } else {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                session.put_file(relative, bytes);
            }
            loaded += 1;
        }
    }
    Ok(loaded)
}

fn print_diagnostic(level: &str, text: &str) {
    eprintln!("[{}] {}", level.to_uppercase(), text);
}

/// Run one render and print its results (original behavior).
async fn run_single_shot(project_dir: &str, entry: &str) -> Result<()> {
    let mut session = PreviewSession::new(SandboxConfig::default(), entry);
    let loaded = load_project(&mut session, Path::new(project_dir))?;
    log::info!("loaded {loaded} file(s) from {project_dir}");

    session.render_now().await;

    for message in session.diagnostics() {
        print_diagnostic(message.level.as_str(), &message.text);
    }
    if let RenderStatus::Failed(kind) = session.state().status {
        eprintln!("[ERROR] render failed: {kind}");
    }
    println!("{}", session.last_html().unwrap_or_default());
    Ok(())
}

/// One line of the stdin protocol.
fn parse_command(line: &str) -> Result<Option<SessionCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "put" => {
            let (path, payload) = rest
                .split_once(' ')
                .ok_or_else(|| anyhow!("put needs a path and a JSON string"))?;
            let content: String =
                serde_json::from_str(payload).context("put payload must be a JSON string")?;
            Ok(Some(SessionCommand::Put {
                path: path.to_string(),
                content: content.into(),
            }))
        }
        "putb" => {
            use base64::Engine;
            let (path, payload) = rest
                .split_once(' ')
                .ok_or_else(|| anyhow!("putb needs a path and base64 content"))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .context("putb payload must be base64")?;
            Ok(Some(SessionCommand::Put {
                path: path.to_string(),
                content: bytes.into(),
            }))
        }
        "delete" => {
            if rest.is_empty() {
                return Err(anyhow!("delete needs a path"));
            }
            Ok(Some(SessionCommand::Delete {
                path: rest.to_string(),
            }))
        }
        "open" => {
            if rest.is_empty() {
                return Err(anyhow!("open needs a path"));
            }
            Ok(Some(SessionCommand::OpenEntry {
                path: rest.to_string(),
            }))
        }
        "quit" => Ok(Some(SessionCommand::Shutdown)),
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

/// Write a framed document block: status and length headers, a blank
/// separator, then the raw body.
fn write_document(stdout: &mut std::io::Stdout, status: &str, generation: u64, body: &str) -> Result<()> {
    writeln!(stdout, "Status:{status}")?;
    writeln!(stdout, "Generation:{generation}")?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?;
    writeln!(stdout, "{body}")?;
    stdout.flush()?;
    Ok(())
}

async fn print_events(mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Rendered { generation, html } => {
                let _ = write_document(&mut stdout, "Rendered", generation, &html);
            }
            SessionEvent::Diagnostic(message) => {
                print_diagnostic(message.level.as_str(), &message.text);
            }
            SessionEvent::Navigated { path } => {
                eprintln!("[NAV] {path}");
            }
            SessionEvent::StateChanged(state) => {
                log::debug!(
                    "state: {:?} entry={} generation={}",
                    state.status,
                    state.entry_path,
                    state.generation
                );
            }
        }
    }
}

/// Run in server mode: a live session driven by stdin commands, with
/// debounced re-renders.
async fn run_server(project_dir: &str, entry: &str) -> Result<()> {
    let mut session = PreviewSession::new(SandboxConfig::default(), entry);
    let loaded = load_project(&mut session, Path::new(project_dir))?;

    let (cmd_tx, cmd_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    // Blocking reader thread; the session stays on this thread because
    // the isolate is !Send
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            match parse_command(&line) {
                Ok(Some(SessionCommand::Shutdown)) => {
                    let _ = cmd_tx.send(SessionCommand::Shutdown);
                    return;
                }
                Ok(Some(command)) => {
                    let _ = cmd_tx.send(command);
                }
                Ok(None) => {}
                Err(err) => eprintln!("[ERROR] {err}"),
            }
        }
        // EOF - stdin closed, exit gracefully
        let _ = cmd_tx.send(SessionCommand::Shutdown);
    });

    eprintln!("[catocode-preview] Server ready ({loaded} file(s) loaded), reading from stdin...");

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let printer = tokio::task::spawn_local(print_events(event_rx));
            session.run(cmd_rx, event_tx).await;
            let _ = printer.await;
        })
        .await;

    eprintln!("[catocode-preview] Server shutting down");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    if args[1] == "--server" {
        if args.len() < 3 {
            print_usage();
            return Err(anyhow!("Server mode requires a project-dir argument"));
        }
        let entry = args.get(3).map(|s| s.as_str()).unwrap_or("index.html");
        return run_server(&args[2], entry).await;
    }

    let project_dir = &args[1];
    let entry = args.get(2).map(|s| s.as_str()).unwrap_or("index.html");
    run_single_shot(project_dir, entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_project_splits_text_and_binary() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(dir.path().join("img/logo.png"), [0x89u8, 0x50]).unwrap();

        let mut session = PreviewSession::new(SandboxConfig::default(), "index.html");
        let loaded = load_project(&mut session, dir.path()).unwrap();
        assert_eq!(loaded, 2);

        let index = session.store().get("index.html").unwrap();
        assert!(index.content.is_text());
        let logo = session.store().get("img/logo.png").unwrap();
        assert!(!logo.content.is_text());
        assert_eq!(logo.content.as_bytes(), &[0x89, 0x50]);
    }

    #[test]
    fn test_parse_command_roundtrip() {
        match parse_command(r#"put index.html "<h1>hi</h1>""#).unwrap() {
            Some(SessionCommand::Put { path, content }) => {
                assert_eq!(path, "index.html");
                assert_eq!(content.as_bytes(), b"<h1>hi</h1>");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            parse_command("delete a.txt").unwrap(),
            Some(SessionCommand::Delete { .. })
        ));
        assert!(matches!(
            parse_command("open about.html").unwrap(),
            Some(SessionCommand::OpenEntry { .. })
        ));
        assert!(matches!(
            parse_command("quit").unwrap(),
            Some(SessionCommand::Shutdown)
        ));
        assert!(parse_command("").unwrap().is_none());
        assert!(parse_command("frobnicate x").is_err());
        assert!(parse_command("put index.html not-json").is_err());
    }

    #[test]
    fn test_parse_putb_decodes_base64() {
        match parse_command("putb logo.png AAEC").unwrap() {
            Some(SessionCommand::Put { path, content }) => {
                assert_eq!(path, "logo.png");
                assert_eq!(content.as_bytes(), &[0, 1, 2]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
