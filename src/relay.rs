//! Diagnostic relay: the structured channel carrying sandbox console
//! output back to the host.
//!
//! Envelopes are stamped with the generation active when they were
//! emitted. The host accepts an envelope only if its source tag is ours
//! and its generation equals the current one at drain time; anything
//! else is output from a superseded render and is silently dropped so
//! it never bleeds into the current view. Delivery is FIFO within a
//! generation, unordered across generations.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fixed source tag carried by every envelope this engine emits.
pub const SOURCE_TAG: &str = "catocode-console";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Log,
    Warn,
    Error,
    Info,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Log => "log",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Info => "info",
        }
    }
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope crossing the sandbox/host boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEnvelope {
    pub source: String,
    pub level: DiagnosticLevel,
    pub message: String,
    pub generation: u64,
}

/// One accepted entry of the host-visible diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub level: DiagnosticLevel,
    pub text: String,
    pub origin_generation: u64,
}

pub type DiagnosticSender = UnboundedSender<DiagnosticEnvelope>;
pub type DiagnosticReceiver = UnboundedReceiver<DiagnosticEnvelope>;

pub fn channel() -> (DiagnosticSender, DiagnosticReceiver) {
    mpsc::unbounded_channel()
}

/// Host-side log of accepted diagnostics, in arrival order.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<DiagnosticMessage>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull every queued envelope, applying the staleness predicate at
    /// dequeue time. Returns the entries accepted by this drain.
    pub fn drain(
        &mut self,
        receiver: &mut DiagnosticReceiver,
        current_generation: u64,
    ) -> Vec<DiagnosticMessage> {
        let mut accepted = Vec::new();
        while let Ok(envelope) = receiver.try_recv() {
            if let Some(message) = self.accept(envelope, current_generation) {
                accepted.push(message);
            }
        }
        accepted
    }

    /// Validate one envelope; append and return it if current.
    pub fn accept(
        &mut self,
        envelope: DiagnosticEnvelope,
        current_generation: u64,
    ) -> Option<DiagnosticMessage> {
        if envelope.source != SOURCE_TAG {
            log::debug!("dropping diagnostic with unknown source tag {:?}", envelope.source);
            return None;
        }
        if envelope.generation != current_generation {
            log::debug!(
                "dropping stale diagnostic from generation {} (current {})",
                envelope.generation,
                current_generation
            );
            return None;
        }
        let message = DiagnosticMessage {
            level: envelope.level,
            text: envelope.message,
            origin_generation: envelope.generation,
        };
        self.entries.push(message.clone());
        Some(message)
    }

    pub fn entries(&self) -> &[DiagnosticMessage] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(level: DiagnosticLevel, message: &str, generation: u64) -> DiagnosticEnvelope {
        DiagnosticEnvelope {
            source: SOURCE_TAG.to_string(),
            level,
            message: message.to_string(),
            generation,
        }
    }

    #[test]
    fn test_accepts_current_generation_in_fifo_order() {
        let (tx, mut rx) = channel();
        tx.send(envelope(DiagnosticLevel::Log, "one", 3)).unwrap();
        tx.send(envelope(DiagnosticLevel::Warn, "two", 3)).unwrap();

        let mut log = DiagnosticLog::new();
        let accepted = log.drain(&mut rx, 3);
        assert_eq!(accepted.len(), 2);
        assert_eq!(log.entries()[0].text, "one");
        assert_eq!(log.entries()[1].text, "two");
        assert_eq!(log.entries()[1].level, DiagnosticLevel::Warn);
    }

    #[test]
    fn test_drops_stale_generation() {
        let (tx, mut rx) = channel();
        tx.send(envelope(DiagnosticLevel::Log, "old", 2)).unwrap();
        tx.send(envelope(DiagnosticLevel::Log, "new", 3)).unwrap();

        let mut log = DiagnosticLog::new();
        log.drain(&mut rx, 3);
        // The superseded generation produced zero entries
        assert_eq!(log.entries().len(), 1);
        assert_eq!(log.entries()[0].text, "new");
        assert_eq!(log.entries()[0].origin_generation, 3);
    }

    #[test]
    fn test_drops_unknown_source_tag() {
        let (tx, mut rx) = channel();
        tx.send(DiagnosticEnvelope {
            source: "someone-else".to_string(),
            level: DiagnosticLevel::Error,
            message: "spoofed".to_string(),
            generation: 1,
        })
        .unwrap();

        let mut log = DiagnosticLog::new();
        log.drain(&mut rx, 1);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_level_serde_is_lowercase() {
        let json = serde_json::to_string(&DiagnosticLevel::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
        let level: DiagnosticLevel = serde_json::from_str("\"info\"").unwrap();
        assert_eq!(level, DiagnosticLevel::Info);
    }
}
