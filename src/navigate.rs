//! Navigation interceptor: maps in-sandbox link activation back to
//! store paths.
//!
//! A link whose normalized destination exists in the store is
//! intercepted and becomes an entry-change request; everything else
//! passes through to default navigation. A destination that merely
//! isn't tracked and one that is genuinely external are deliberately
//! treated the same way.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

use crate::store::VirtualFileStore;

/// Raw link activation reported by the sandbox, stamped with the
/// generation active when the link fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationRequest {
    pub href: String,
    pub generation: u64,
}

pub type NavigationSender = UnboundedSender<NavigationRequest>;
pub type NavigationReceiver = UnboundedReceiver<NavigationRequest>;

pub fn channel() -> (NavigationSender, NavigationReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Destination is a stored file: render it as the new entry and
    /// notify the host so its active-selection state can follow.
    Intercept(String),
    /// Unknown or external destination: default navigation proceeds.
    PassThrough,
}

/// Reduce an activated href to a store-relative path: drop any scheme
/// and host, then the leading slash.
pub fn normalize_href(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        // Not an absolute URL: already a bare or relative path
        Err(_) => href.to_string(),
    };
    let path = path.strip_prefix("./").unwrap_or(&path);
    path.trim_start_matches('/').to_string()
}

/// Decide what to do with an activated link.
pub fn decide(store: &VirtualFileStore, href: &str) -> NavigationDecision {
    let path = normalize_href(href);
    if store.contains(&path) {
        NavigationDecision::Intercept(path)
    } else {
        NavigationDecision::PassThrough
    }
}
