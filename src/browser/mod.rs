//! Browser automation seam
//!
//! The portal navigator and the form-fill engine only talk to these traits.
//! `chromium` provides the real implementation on top of chromiumoxide; the
//! tests drive the same code against a synthetic page.
//!
//! Page callbacks (failed requests, console errors, uncaught exceptions) are
//! not delivered as callbacks. They are pushed into a bounded [`EventQueue`]
//! that the navigator drains after each phase.

pub mod chromium;
#[cfg(test)]
pub mod fake;

pub use chromium::ChromiumLauncher;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page script failed: {0}")]
    Script(String),

    #[error("no element matches {0}")]
    ElementNotFound(String),

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("browser session already closed")]
    Closed,

    #[error("devtools protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
}

/// How to find an element on an unknown portal page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector, first match in document order
    Css(&'static str),
    /// Visible button-like element whose text or value contains this label,
    /// case-insensitively
    Label(&'static str),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(css) => f.write_str(css),
            Locator::Label(label) => write!(f, "label=\"{}\"", label),
        }
    }
}

/// Where a navigation ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landing {
    pub requested: String,
    pub final_url: String,
    /// Status of the main document response, when the browser reported one
    pub status: Option<u16>,
}

/// Something the page reported asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// `url` falls back to the devtools request id when the request was not seen
    RequestFailed { url: String, reason: String },
    ConsoleError(String),
    PageError(String),
}

impl fmt::Display for PageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEvent::RequestFailed { url, reason } => {
                write!(f, "request to {} failed: {}", url, reason)
            }
            PageEvent::ConsoleError(msg) => write!(f, "console error: {}", msg),
            PageEvent::PageError(msg) => write!(f, "page error: {}", msg),
        }
    }
}

/// Bounded FIFO of page events; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<PageEvent>,
    capacity: usize,
    dropped: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: PageEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take everything queued so far, plus the number of events lost to overflow
    pub fn drain(&mut self) -> (Vec<PageEvent>, usize) {
        let dropped = std::mem::take(&mut self.dropped);
        (self.events.drain(..).collect(), dropped)
    }
}

/// Request id -> URL for in-flight requests, so failures can name the URL.
/// Holds at most `capacity` ids; the oldest is forgotten first.
#[derive(Debug)]
pub struct RequestUrls {
    urls: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RequestUrls {
    pub fn new(capacity: usize) -> Self {
        Self {
            urls: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, id: String, url: String) {
        if self.urls.insert(id.clone(), url).is_none() {
            self.order.push_back(id);
        }
        while self.urls.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.urls.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// URL recorded for `id`, or the id itself if it was never seen
    pub fn resolve(&mut self, id: &str) -> String {
        match self.urls.remove(id) {
            Some(url) => {
                self.order.retain(|known| known != id);
                url
            }
            None => id.to_string(),
        }
    }
}

pub type SharedEvents = Arc<Mutex<EventQueue>>;

pub fn shared_events(capacity: usize) -> SharedEvents {
    Arc::new(Mutex::new(EventQueue::new(capacity)))
}

pub(crate) fn push_event(queue: &SharedEvents, event: PageEvent) {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(event);
}

pub(crate) fn drain_events(queue: &SharedEvents) -> (Vec<PageEvent>, usize) {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .drain()
}

/// DOM operations the form-fill engine needs
#[async_trait]
pub trait PortalPage: Send + Sync {
    /// Element exists, is visible and accepts input
    async fn is_interactable(&self, locator: &Locator) -> Result<bool, BrowserError>;

    /// Focus, select everything and delete it
    async fn clear(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Send `text` as keystrokes to the element
    async fn type_text(&self, locator: &Locator, text: &str) -> Result<(), BrowserError>;

    /// `element.click()` in page context, bypassing pointer hit-testing
    async fn dom_click(&self, locator: &Locator) -> Result<(), BrowserError>;
}

/// One live browser with a single working tab
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> &dyn PortalPage;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Landing, BrowserError>;

    async fn current_url(&self) -> Option<String>;

    /// Full-page PNG capture
    async fn snapshot(&self, path: &Path) -> Result<(), BrowserError>;

    /// Page events since the last drain, and how many were dropped on overflow
    fn drain_events(&self) -> (Vec<PageEvent>, usize);

    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_queue_drops_oldest() {
        let mut queue = EventQueue::new(2);
        queue.push(PageEvent::ConsoleError("a".into()));
        queue.push(PageEvent::ConsoleError("b".into()));
        queue.push(PageEvent::PageError("c".into()));

        let (events, dropped) = queue.drain();
        assert_eq!(dropped, 1);
        assert_eq!(
            events,
            vec![PageEvent::ConsoleError("b".into()), PageEvent::PageError("c".into())]
        );

        let (events, dropped) = queue.drain();
        assert!(events.is_empty());
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_request_urls_resolve_and_forget() {
        let mut urls = RequestUrls::new(2);
        urls.insert("1.1".into(), "http://a.test/".into());
        urls.insert("1.2".into(), "http://b.test/".into());
        urls.insert("1.3".into(), "http://c.test/".into());

        // Oldest id was evicted
        assert_eq!(urls.resolve("1.1"), "1.1");
        assert_eq!(urls.resolve("1.2"), "http://b.test/");
        // Resolved ids are removed
        assert_eq!(urls.resolve("1.2"), "1.2");
        assert_eq!(urls.resolve("1.3"), "http://c.test/");
    }

    #[test]
    fn test_request_failed_display_names_url() {
        let event = PageEvent::RequestFailed {
            url: "http://10.0.0.1/login".into(),
            reason: "net::ERR_ABORTED".into(),
        };
        assert_eq!(event.to_string(), "request to http://10.0.0.1/login failed: net::ERR_ABORTED");
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::Css("#idnumber").to_string(), "#idnumber");
        assert_eq!(Locator::Label("Connect").to_string(), "label=\"Connect\"");
    }
}
